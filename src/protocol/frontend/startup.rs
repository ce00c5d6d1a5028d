//! Startup-family and termination messages.
//!
//! Startup, SSLRequest and CancelRequest are untagged: the frame is
//! `length || payload` with no leading type byte.

use crate::protocol::codec::MessageBuilder;
use crate::protocol::types::Version;

/// StartupMessage parameters.
///
/// `user` is required by the server; `database`, `application_name` and any
/// run-time settings ride along as additional name/value pairs. This crate
/// does not resolve defaults; callers hand it a finished parameter list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Startup {
    /// Parameter name/value pairs, sent in order
    pub params: Vec<(String, String)>,
}

impl Startup {
    /// Startup parameters with just a user name.
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            params: vec![("user".to_string(), user.into())],
        }
    }

    /// Add a parameter pair.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Add the database parameter.
    pub fn database(self, database: impl Into<String>) -> Self {
        self.param("database", database)
    }

    /// The value of the `user` parameter, as raw bytes.
    pub fn user(&self) -> &[u8] {
        self.params
            .iter()
            .find(|(name, _)| name == "user")
            .map(|(_, value)| value.as_bytes())
            .unwrap_or_default()
    }

    /// Serialize the StartupMessage.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        let mut msg = MessageBuilder::new_untagged(buf);
        msg.write_i32(Version::V3_0.to_i32());
        for (name, value) in &self.params {
            msg.write_cstr(name);
            msg.write_cstr(value);
        }
        // Terminator
        msg.write_u8(0);
        msg.finish();
    }
}

/// Write an SSLRequest message.
///
/// This is sent before StartupMessage to request TLS encryption.
/// Server responds with single byte: 'S' (accepted) or 'N' (rejected).
pub fn write_ssl_request(buf: &mut Vec<u8>) {
    let mut msg = MessageBuilder::new_untagged(buf);
    msg.write_i32(Version::NEGOTIATE_SSL_CODE.to_i32());
    msg.finish();
}

/// Write a CancelRequest message.
///
/// This is sent on a NEW connection to cancel a query running on another
/// connection. The server closes the connection immediately with no
/// response.
pub fn write_cancel_request(buf: &mut Vec<u8>, pid: u32, secret_key: u32) {
    let mut msg = MessageBuilder::new_untagged(buf);
    msg.write_i32(Version::CANCEL_REQUEST_CODE.to_i32());
    msg.write_i32(pid as i32);
    msg.write_i32(secret_key as i32);
    msg.finish();
}

/// Write a Terminate message.
///
/// Sent to cleanly close the connection.
pub fn write_terminate(buf: &mut Vec<u8>) {
    let msg = MessageBuilder::new(buf, super::msg_type::TERMINATE);
    msg.finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssl_request() {
        let mut buf = Vec::new();
        write_ssl_request(&mut buf);

        assert_eq!(buf.len(), 8);
        assert_eq!(&buf[0..4], &8_i32.to_be_bytes());
        assert_eq!(&buf[4..8], &80877103_i32.to_be_bytes());
    }

    #[test]
    fn startup() {
        let mut buf = Vec::new();
        let startup = Startup::new("postgres").database("test");
        startup.encode(&mut buf);

        // Length covers the whole frame
        let len = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        assert_eq!(len as usize, buf.len());

        // Protocol version 3.0
        let version = i32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        assert_eq!(version, 196608);

        assert_eq!(&buf[8..], b"user\0postgres\0database\0test\0\0");
        assert_eq!(startup.user(), b"postgres");
    }

    #[test]
    fn cancel_request() {
        let mut buf = Vec::new();
        write_cancel_request(&mut buf, 123, 456);

        assert_eq!(buf.len(), 16);
        assert_eq!(&buf[0..4], &16_i32.to_be_bytes());
        assert_eq!(&buf[4..8], &80877102_i32.to_be_bytes());
        assert_eq!(&buf[8..12], &123_i32.to_be_bytes());
        assert_eq!(&buf[12..16], &456_i32.to_be_bytes());
    }

    #[test]
    fn terminate() {
        let mut buf = Vec::new();
        write_terminate(&mut buf);

        assert_eq!(buf.len(), 5);
        assert_eq!(buf[0], b'X');
        assert_eq!(&buf[1..5], &4_i32.to_be_bytes());
    }
}
