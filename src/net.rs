//! Socket abstraction consumed by [`crate::conn::Connection`].
//!
//! The connection owns exactly one socket at a time but never opens or
//! secures one itself; a factory supplies sockets and classifies their
//! errors. This keeps the core free of any particular I/O or TLS policy:
//! blocking, non-blocking and TLS-wrapped sockets all look the same.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Supplies sockets to a connection and classifies their errors.
pub trait SocketFactory {
    /// The socket type produced by this factory.
    type Socket: Read + Write;

    /// Open a new socket, observing the timeout if one is given.
    fn connect(&self, timeout: Option<Duration>) -> io::Result<Self::Socket>;

    /// Upgrade a socket to TLS after the server accepted an SSLRequest.
    fn secure(&self, _socket: Self::Socket) -> io::Result<Self::Socket> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "socket factory does not support TLS",
        ))
    }

    /// Whether the error is a connect timeout.
    fn is_timeout(&self, err: &io::Error) -> bool {
        err.kind() == io::ErrorKind::TimedOut
    }

    /// Whether the error means "retry the same operation later".
    fn is_try_again(&self, err: &io::Error) -> bool {
        matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
        )
    }

    /// A human-readable description if the error is fatal to the socket.
    ///
    /// Returning `None` means "not actually fatal": the driver bubbles the
    /// error up instead of poisoning the connection.
    fn fatal_message(&self, err: &io::Error) -> Option<String> {
        if self.is_try_again(err) || self.is_timeout(err) {
            None
        } else {
            Some(err.to_string())
        }
    }
}

/// Plain TCP socket factory.
#[derive(Debug, Clone)]
pub struct TcpSocketFactory {
    /// Hostname or IP address
    pub host: String,
    /// Port number
    pub port: u16,
}

impl TcpSocketFactory {
    /// Factory for the given host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl SocketFactory for TcpSocketFactory {
    type Socket = TcpStream;

    fn connect(&self, timeout: Option<Duration>) -> io::Result<TcpStream> {
        let stream = match timeout {
            Some(timeout) => {
                let mut last_err = None;
                let addrs = (self.host.as_str(), self.port).to_socket_addrs()?;
                let mut stream = None;
                for addr in addrs {
                    match TcpStream::connect_timeout(&addr, timeout) {
                        Ok(s) => {
                            stream = Some(s);
                            break;
                        }
                        Err(e) => last_err = Some(e),
                    }
                }
                match stream {
                    Some(s) => s,
                    None => {
                        return Err(last_err.unwrap_or_else(|| {
                            io::Error::new(
                                io::ErrorKind::AddrNotAvailable,
                                "could not resolve any address",
                            )
                        }));
                    }
                }
            }
            None => TcpStream::connect((self.host.as_str(), self.port))?,
        };
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// TLS-capable socket factory backed by native-tls.
#[cfg(feature = "tls")]
pub mod tls {
    use super::{SocketFactory, TcpSocketFactory};
    use std::io::{self, Read, Write};
    use std::net::TcpStream;
    use std::time::Duration;

    /// A TCP stream that may have been upgraded to TLS.
    #[allow(clippy::large_enum_variant)]
    pub enum MaybeTlsStream {
        /// Cleartext TCP
        Plain(TcpStream),
        /// TLS over TCP
        Tls(native_tls::TlsStream<TcpStream>),
    }

    impl Read for MaybeTlsStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self {
                MaybeTlsStream::Plain(s) => s.read(buf),
                MaybeTlsStream::Tls(s) => s.read(buf),
            }
        }
    }

    impl Write for MaybeTlsStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            match self {
                MaybeTlsStream::Plain(s) => s.write(buf),
                MaybeTlsStream::Tls(s) => s.write(buf),
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            match self {
                MaybeTlsStream::Plain(s) => s.flush(),
                MaybeTlsStream::Tls(s) => s.flush(),
            }
        }
    }

    /// Socket factory that can secure its sockets with TLS.
    pub struct TlsSocketFactory {
        tcp: TcpSocketFactory,
        connector: native_tls::TlsConnector,
        domain: String,
    }

    impl TlsSocketFactory {
        /// Factory for the given host and port, validating certificates
        /// against `domain`.
        pub fn new(
            host: impl Into<String>,
            port: u16,
            connector: native_tls::TlsConnector,
            domain: impl Into<String>,
        ) -> Self {
            Self {
                tcp: TcpSocketFactory::new(host, port),
                connector,
                domain: domain.into(),
            }
        }
    }

    impl SocketFactory for TlsSocketFactory {
        type Socket = MaybeTlsStream;

        fn connect(&self, timeout: Option<Duration>) -> io::Result<MaybeTlsStream> {
            Ok(MaybeTlsStream::Plain(self.tcp.connect(timeout)?))
        }

        fn secure(&self, socket: MaybeTlsStream) -> io::Result<MaybeTlsStream> {
            let MaybeTlsStream::Plain(stream) = socket else {
                return Err(io::Error::other("socket is already secured"));
            };
            let tls = self
                .connector
                .connect(&self.domain, stream)
                .map_err(io::Error::other)?;
            Ok(MaybeTlsStream::Tls(tls))
        }
    }
}
