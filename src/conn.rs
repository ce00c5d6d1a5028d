//! The I/O-facing connection façade.
//!
//! A connection owns one socket, one inbound frame buffer, one outbound
//! byte queue and at most one mounted transaction. It shuttles bytes and
//! delegates all protocol semantics to whatever transaction is mounted.
//!
//! Operations are designed not to raise: failures are recorded on the
//! mounted transaction and inspected by the caller afterwards. The only
//! errors returned through `Result` are socket errors the factory declines
//! to classify as either "try again" or fatal.

use std::io::{self, Read, Write};
use std::time::Duration;

use crate::error::{Error, ErrorFields, Failure, sqlstate};
use crate::net::SocketFactory;
use crate::protocol::buffer::MessageStream;
use crate::protocol::frontend::{
    Close, Command, Startup, write_cancel_request, write_copy_data, write_copy_done,
    write_copy_fail, write_ssl_request,
};
use crate::protocol::types::TransactionStatus;
use crate::state::{
    AsyncMessage, Closing, Direction, Instruction, Negotiation, Pending, Transaction, WireGroup,
};

/// SSL connection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Don't request SSL
    Disable,
    /// Request SSL, fall back to cleartext if the server declines
    #[default]
    Prefer,
    /// Require SSL; fail if the server declines
    Require,
}

/// Sink for wire trace lines.
pub type Tracer = Box<dyn FnMut(&str) + Send>;

const RECV_SIZE: usize = 8192;

/// Serialize a pending payload into wire bytes, tracing each frame.
fn serialize_pending(pending: &Pending<'_>, out: &mut Vec<u8>, mut tracer: Option<&mut Tracer>) {
    fn emit(tracer: &mut Option<&mut Tracer>, tag: Option<u8>, frame: &[u8]) {
        if let Some(t) = tracer.as_mut() {
            let line = match tag {
                Some(tag) => format!(
                    "↑ {}({}): b\"{}\"\n",
                    tag as char,
                    frame.len(),
                    frame.escape_ascii()
                ),
                None => format!("↑ __({}): b\"{}\"\n", frame.len(), frame.escape_ascii()),
            };
            t(&line);
        }
    }

    fn emit_commands(
        tracer: &mut Option<&mut Tracer>,
        out: &mut Vec<u8>,
        commands: &[Command],
    ) {
        for cmd in commands {
            let start = out.len();
            cmd.encode(out);
            emit(tracer, Some(cmd.tag()), &out[start..]);
        }
    }

    match pending {
        Pending::Bytes(bytes) => {
            out.extend_from_slice(bytes);
            emit(&mut tracer, None, bytes);
        }
        Pending::Commands(commands) => emit_commands(&mut tracer, out, commands),
        Pending::CopyChunks(chunks) => {
            for chunk in *chunks {
                let start = out.len();
                write_copy_data(out, chunk);
                emit(&mut tracer, Some(b'd'), &out[start..]);
            }
        }
        Pending::CopyDone(rest) => {
            let start = out.len();
            write_copy_done(out);
            emit(&mut tracer, Some(b'c'), &out[start..]);
            emit_commands(&mut tracer, out, rest);
        }
        Pending::CopyFail(rest) => {
            let start = out.len();
            write_copy_fail(out, "invalid termination");
            emit(&mut tracer, Some(b'f'), &out[start..]);
            emit_commands(&mut tracer, out, rest);
        }
        Pending::Nothing => {}
    }
}

/// A detachable handle for out-of-band query cancellation.
///
/// Opens its own socket, so it is safe to use from another thread while the
/// owning connection is mid-step.
#[derive(Debug, Clone)]
pub struct Canceller<F: SocketFactory> {
    factory: F,
    pid: u32,
    secret_key: u32,
}

impl<F: SocketFactory> Canceller<F> {
    /// Send a CancelRequest for the connection this handle was taken from.
    pub fn interrupt(&self, timeout: Option<Duration>) -> io::Result<()> {
        let mut socket = self.factory.connect(timeout)?;
        let mut request = Vec::with_capacity(16);
        write_cancel_request(&mut request, self.pid, self.secret_key);
        socket.write_all(&request)?;
        socket.flush()
    }
}

/// A protocol 3.0 connection.
pub struct Connection<F: SocketFactory> {
    factory: F,
    socket: Option<F::Socket>,
    /// Whether a connect attempt was made (successful or not).
    connected: bool,
    stream: MessageStream,
    /// Unconsumed messages of the most recently read group.
    group: Option<WireGroup>,
    next_group: u64,
    /// Serialized outbound bytes; partially flushed sends resume here.
    send_data: Vec<u8>,
    send_pos: usize,
    /// Send generation already serialized into `send_data`.
    sent_gen: Option<u64>,
    xact: Option<Transaction>,
    /// The most recently finished non-fatal instruction.
    done: Option<Instruction>,
    state: Option<TransactionStatus>,
    backend_pid: Option<u32>,
    backend_key: Option<u32>,
    /// None until SSL negotiation runs; then whether the server accepted.
    ssl_negotiation: Option<bool>,
    startup_params: Vec<(String, String)>,
    garbage_statements: Vec<String>,
    garbage_cursors: Vec<String>,
    tracer: Option<Tracer>,
}

impl<F: SocketFactory> Connection<F> {
    /// Initialize a connection. Does not open the socket; the startup
    /// negotiation is mounted and waits for [`connect`](Self::connect).
    pub fn new(factory: F, startup: Startup, password: Vec<u8>) -> Self {
        Self {
            factory,
            socket: None,
            connected: false,
            stream: MessageStream::new(),
            group: None,
            next_group: 0,
            send_data: Vec::with_capacity(8192),
            send_pos: 0,
            sent_gen: None,
            xact: Some(Transaction::Negotiation(Negotiation::new(
                startup, password,
            ))),
            done: None,
            state: None,
            backend_pid: None,
            backend_key: None,
            ssl_negotiation: None,
            startup_params: Vec::new(),
            garbage_statements: Vec::new(),
            garbage_cursors: Vec::new(),
            tracer: None,
        }
    }

    /// The socket factory this connection was built with.
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Backend process ID, once negotiation completed.
    pub fn backend_pid(&self) -> Option<u32> {
        self.backend_pid
    }

    /// Backend secret key, once negotiation completed.
    pub fn backend_key(&self) -> Option<u32> {
        self.backend_key
    }

    /// The last ReadyForQuery transaction status observed on the wire.
    pub fn transaction_state(&self) -> Option<TransactionStatus> {
        self.state
    }

    /// Whether SSL negotiation ran, and whether the server accepted.
    pub fn ssl_negotiation(&self) -> Option<bool> {
        self.ssl_negotiation
    }

    /// Server parameters reported during startup.
    pub fn startup_params(&self) -> &[(String, String)] {
        &self.startup_params
    }

    /// The pinned failure, if the connection is poisoned.
    pub fn failure(&self) -> Option<&Failure> {
        self.xact
            .as_ref()
            .filter(|x| x.is_complete() && x.is_fatal())
            .and_then(|x| x.error())
    }

    /// The mounted transaction, if any.
    pub fn current(&self) -> Option<&Transaction> {
        self.xact.as_ref()
    }

    /// Mutable access to the mounted instruction, e.g. to feed copy data
    /// between steps.
    pub fn instruction_mut(&mut self) -> Option<&mut Instruction> {
        match self.xact.as_mut() {
            Some(Transaction::Instruction(x)) => Some(x),
            _ => None,
        }
    }

    /// Install a trace sink; every frame in either direction is formatted
    /// as an arrowed line with type, length and payload bytes.
    pub fn set_tracer(&mut self, tracer: Tracer) {
        self.tracer = Some(tracer);
    }

    /// Remove the trace sink.
    pub fn clear_tracer(&mut self) {
        self.tracer = None;
    }

    /// Queue a server-side prepared statement name for closure before the
    /// next instruction is mounted.
    pub fn retire_statement(&mut self, name: impl Into<String>) {
        self.garbage_statements.push(name.into());
    }

    /// Queue a server-side portal name for closure before the next
    /// instruction is mounted.
    pub fn retire_portal(&mut self, name: impl Into<String>) {
        self.garbage_cursors.push(name.into());
    }

    /// A detachable cancellation handle, once negotiation completed.
    pub fn canceller(&self) -> Option<Canceller<F>>
    where
        F: Clone,
    {
        Some(Canceller {
            factory: self.factory.clone(),
            pid: self.backend_pid?,
            secret_key: self.backend_key?,
        })
    }

    /// Establish the connection: open the socket, optionally negotiate the
    /// transport upgrade, then drive the startup negotiation to completion.
    ///
    /// Never raises for protocol or socket failures; those complete the
    /// negotiation fatally and are read from [`failure`](Self::failure).
    pub fn connect(&mut self, ssl: SslMode, timeout: Option<Duration>) -> io::Result<()> {
        if self.connected {
            return Ok(());
        }
        self.connected = true;

        match self.factory.connect(timeout) {
            Ok(socket) => self.socket = Some(socket),
            Err(e) => {
                let failure = if self.factory.is_timeout(&e) {
                    let message = match timeout {
                        Some(t) => format!("connect timed out ({} seconds)", t.as_secs_f64()),
                        None => "connect timed out".to_string(),
                    };
                    Failure::client(
                        ErrorFields::client(sqlstate::CONNECT_TIMEOUT, message)
                            .with_severity("FATAL"),
                    )
                } else if let Some(message) = self.factory.fatal_message(&e) {
                    Failure::client(
                        ErrorFields::client(sqlstate::CONNECTION_REJECTED, message)
                            .with_severity("FATAL"),
                    )
                } else {
                    return Err(e);
                };
                self.fail_current(failure, Some(Error::Io(e)));
                return Ok(());
            }
        }

        if ssl != SslMode::Disable && !self.negotiate_ssl(ssl == SslMode::Require)? {
            return Ok(());
        }

        let _ = self.complete()?;
        Ok(())
    }

    /// One-byte SSL negotiation: send SSLRequest, read 'S' or 'N'.
    ///
    /// Returns true when startup may proceed on the (possibly upgraded)
    /// socket.
    fn negotiate_ssl(&mut self, required: bool) -> io::Result<bool> {
        let mut request = Vec::with_capacity(8);
        write_ssl_request(&mut request);
        if let Some(t) = self.tracer.as_mut() {
            t(&format!(
                "↑ __({}): b\"{}\"\n",
                request.len(),
                request.escape_ascii()
            ));
        }

        let mut pos = 0;
        while pos < request.len() {
            let Some(socket) = self.socket.as_mut() else {
                return Ok(false);
            };
            match socket.write(&request[pos..]) {
                Ok(0) => {
                    self.fail_socket("zero-length write", None);
                    return Ok(false);
                }
                Ok(n) => pos += n,
                Err(e) if self.factory.is_try_again(&e) => {}
                Err(e) => match self.factory.fatal_message(&e) {
                    Some(message) => {
                        self.fail_socket(&message, Some(e));
                        return Ok(false);
                    }
                    None => return Err(e),
                },
            }
        }

        let status = loop {
            let Some(socket) = self.socket.as_mut() else {
                return Ok(false);
            };
            let mut byte = [0u8; 1];
            match socket.read(&mut byte) {
                // EOF before the reply byte: not a protocol 3.0 endpoint.
                Ok(0) => break None,
                Ok(_) => break Some(byte[0]),
                Err(e) if self.factory.is_try_again(&e) => {}
                Err(e) => match self.factory.fatal_message(&e) {
                    Some(message) => {
                        self.fail_socket(&message, Some(e));
                        return Ok(false);
                    }
                    None => return Err(e),
                },
            }
        };
        if let (Some(t), Some(b)) = (self.tracer.as_mut(), status) {
            t(&format!("↓ __(1): b\"{}\"\n", [b].escape_ascii()));
        }

        match status {
            Some(b'S') => {
                self.ssl_negotiation = Some(true);
                let Some(socket) = self.socket.take() else {
                    return Ok(false);
                };
                match self.factory.secure(socket) {
                    Ok(secured) => {
                        self.socket = Some(secured);
                        Ok(true)
                    }
                    Err(e) => {
                        let failure = Failure::client(
                            ErrorFields::client(
                                sqlstate::INSECURITY,
                                "SSL negotiation caused exception",
                            )
                            .with_severity("FATAL"),
                        );
                        self.fail_current(failure, Some(Error::Io(e)));
                        Ok(false)
                    }
                }
            }
            Some(b'N') => {
                self.ssl_negotiation = Some(false);
                if required {
                    let failure = Failure::client(
                        ErrorFields::client(
                            sqlstate::INSECURITY,
                            "SSL was required, and the server could not accommodate",
                        )
                        .with_severity("FATAL"),
                    );
                    self.fail_current(failure, None);
                    Ok(false)
                } else {
                    Ok(true)
                }
            }
            _ => {
                let failure = Failure::client(
                    ErrorFields::client(
                        sqlstate::PROTOCOL_VIOLATION,
                        "server did not support SSL negotiation",
                    )
                    .with_severity("FATAL")
                    .with_hint("The server is probably not PostgreSQL."),
                );
                self.fail_current(failure, None);
                Ok(false)
            }
        }
    }

    /// Mount an instruction.
    ///
    /// Completes whatever is currently mounted first (its result is
    /// discarded; call [`complete`](Self::complete) beforehand to keep it),
    /// flushes queued resource closures, then mounts the instruction and
    /// performs one step.
    ///
    /// `Ok(Some(_))` hands the instruction straight back: either it was
    /// already complete, or the connection is poisoned and the instruction
    /// was completed with the closed-connection failure.
    pub fn push(&mut self, x: Instruction) -> io::Result<Option<Instruction>> {
        if x.is_complete() {
            return Ok(Some(x));
        }
        let _ = self.complete()?;
        if self.xact.is_some() {
            return Ok(Some(Self::reject(x)));
        }
        if !self.garbage_statements.is_empty() || !self.garbage_cursors.is_empty() {
            self.flush_resources()?;
            if self.xact.is_some() {
                return Ok(Some(Self::reject(x)));
            }
        }
        self.mount(Transaction::Instruction(x));
        self.step()?;
        Ok(None)
    }

    /// Complete a pushed-back instruction with the pinned failure.
    fn reject(mut x: Instruction) -> Instruction {
        x.fail(
            Failure::client(
                ErrorFields::client(
                    sqlstate::CONNECTION_DOES_NOT_EXIST,
                    "operation on closed connection",
                )
                .with_severity("FATAL")
                .with_hint("A new connection needs to be created in order to query the server."),
            ),
            None,
        );
        x
    }

    fn mount(&mut self, xact: Transaction) {
        self.xact = Some(xact);
        self.sent_gen = None;
    }

    /// Close statements and portals queued for release.
    ///
    /// Runs a synthesized `Close..., Sync` instruction. Called implicitly
    /// before a new instruction is mounted; public so higher layers can
    /// reclaim server resources at a time of their choosing.
    pub fn flush_resources(&mut self) -> io::Result<()> {
        if self.garbage_statements.is_empty() && self.garbage_cursors.is_empty() {
            return Ok(());
        }
        let _ = self.complete()?;
        if self.xact.is_some() {
            // Poisoned; the names stay queued.
            return Ok(());
        }
        let mut commands: Vec<Command> = Vec::new();
        for name in self.garbage_cursors.drain(..) {
            commands.push(Command::Close(Close::portal(name)));
        }
        for name in self.garbage_statements.drain(..) {
            commands.push(Command::Close(Close::statement(name)));
        }
        commands.push(Command::Sync);
        self.mount(Transaction::Instruction(Instruction::new(commands)));
        let _ = self.complete()?;
        Ok(())
    }

    /// Perform exactly one wire transition on the mounted transaction.
    ///
    /// A socket "try again" counts as a transition; fatal socket errors
    /// close the socket and complete the transaction with `08006`.
    pub fn step(&mut self) -> io::Result<()> {
        let direction = match self.xact.as_ref() {
            Some(x) => x.direction(),
            None => return Ok(()),
        };
        match direction {
            Direction::Sending => self.step_send()?,
            Direction::Receiving => self.step_recv()?,
            Direction::Complete => {}
        }
        self.finalize();
        Ok(())
    }

    /// Drive the mounted transaction to completion.
    ///
    /// Returns the finished instruction when it completed without a fatal
    /// failure; `None` when nothing was mounted or the transaction is
    /// pinned fatally (inspect [`failure`](Self::failure)).
    pub fn complete(&mut self) -> io::Result<Option<Instruction>> {
        loop {
            let (is_complete, is_fatal) = match self.xact.as_ref() {
                None => break,
                Some(x) => (x.is_complete(), x.is_fatal()),
            };
            if is_complete {
                self.finalize();
                if is_fatal {
                    return Ok(None);
                }
            } else {
                self.step()?;
            }
        }
        Ok(self.done.take())
    }

    /// Force the backend to a known Ready state without running user work:
    /// completes the current transaction, then runs a bare Sync.
    pub fn synchronize(&mut self) -> io::Result<Option<Instruction>> {
        match self.push(Instruction::new(vec![Command::Sync]))? {
            Some(rejected) => Ok(Some(rejected)),
            None => self.complete(),
        }
    }

    /// Send a CancelRequest for the running query on a dedicated socket.
    /// Never touches the primary socket.
    pub fn interrupt(&self, timeout: Option<Duration>) -> io::Result<()> {
        let (Some(pid), Some(secret_key)) = (self.backend_pid, self.backend_key) else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "no backend key information",
            ));
        };
        let mut socket = self.factory.connect(timeout)?;
        let mut request = Vec::with_capacity(16);
        write_cancel_request(&mut request, pid, secret_key);
        socket.write_all(&request)?;
        socket.flush()
    }

    /// Send Terminate and pin the connection closed: every later mount
    /// attempt reports `08003`.
    pub fn close(&mut self) -> io::Result<()> {
        let _ = self.complete()?;
        self.mount(Transaction::Closing(Closing::new()));
        let _ = self.complete()?;
        Ok(())
    }

    fn step_send(&mut self) -> io::Result<()> {
        if let Some(xact) = self.xact.as_ref() {
            let generation = xact.send_generation();
            if self.sent_gen != Some(generation) {
                serialize_pending(&xact.pending(), &mut self.send_data, self.tracer.as_mut());
                self.sent_gen = Some(generation);
            }
        }

        while self.send_pos < self.send_data.len() {
            let Some(socket) = self.socket.as_mut() else {
                self.fail_socket("connection is not open", None);
                return Ok(());
            };
            match socket.write(&self.send_data[self.send_pos..]) {
                Ok(0) => {
                    self.fail_socket("zero-length write", None);
                    return Ok(());
                }
                Ok(n) => self.send_pos += n,
                Err(e) if self.factory.is_try_again(&e) => return Ok(()),
                Err(e) => match self.factory.fatal_message(&e) {
                    Some(message) => {
                        self.fail_socket(&message, Some(e));
                        return Ok(());
                    }
                    None => return Err(e),
                },
            }
        }

        self.send_data.clear();
        self.send_pos = 0;
        if let Some(xact) = self.xact.as_mut() {
            xact.sent();
        }
        Ok(())
    }

    fn step_recv(&mut self) -> io::Result<()> {
        if self.group.is_none() && !self.read_into()? {
            return Ok(());
        }
        let Some(group) = self.group.as_ref() else {
            return Ok(());
        };
        let len = group.messages.len();
        let count = match self.xact.as_mut() {
            Some(x) => x.put(group),
            // Nothing mounted to interpret the bytes; drop them.
            None => len,
        };
        if let Some(status) = self.xact.as_ref().and_then(|x| x.last_ready()) {
            self.state = Some(status);
        }
        if count >= len {
            self.group = None;
        } else if count > 0 {
            if let Some(group) = self.group.as_mut() {
                group.messages.drain(..count);
                group.id = self.next_group;
                self.next_group += 1;
            }
        }
        Ok(())
    }

    /// Read from the socket into the frame buffer until at least one whole
    /// message is available, then drain the buffer into a new wire group.
    ///
    /// Returns false when no group could be produced this step.
    fn read_into(&mut self) -> io::Result<bool> {
        loop {
            if self.stream.has_message() {
                break;
            }
            let Some(socket) = self.socket.as_mut() else {
                self.fail_socket("connection is not open", None);
                return Ok(false);
            };
            let mut chunk = [0u8; RECV_SIZE];
            match socket.read(&mut chunk) {
                Ok(0) => {
                    let failure = Failure::client(
                        ErrorFields::client(
                            sqlstate::CONNECTION_FAILURE,
                            "unexpected EOF from server",
                        )
                        .with_severity("FATAL")
                        .with_detail("Zero-length read from the connection's socket."),
                    );
                    self.fail_current(failure, None);
                    return Ok(false);
                }
                Ok(n) => self.stream.write(&chunk[..n]),
                Err(e) if self.factory.is_try_again(&e) => return Ok(false),
                Err(e) => match self.factory.fatal_message(&e) {
                    Some(message) => {
                        self.fail_socket(&message, Some(e));
                        return Ok(false);
                    }
                    None => return Err(e),
                },
            }
        }

        let messages = match self.stream.read() {
            Ok(messages) => messages,
            Err(e) => {
                let failure = Failure::client(
                    ErrorFields::client(
                        sqlstate::PROTOCOL_VIOLATION,
                        "wire-data caused exception in protocol transaction",
                    )
                    .with_severity("FATAL")
                    .with_hint("Protocol error detected."),
                );
                self.fail_current(failure, Some(e));
                return Ok(false);
            }
        };
        if let Some(t) = self.tracer.as_mut() {
            for msg in &messages {
                t(&format!(
                    "↓ {}({}): b\"{}\"\n",
                    msg.tag as char,
                    msg.payload.len() + 4,
                    msg.payload.escape_ascii()
                ));
            }
        }
        let id = self.next_group;
        self.next_group += 1;
        self.group = Some(WireGroup::new(id, messages));
        Ok(true)
    }

    /// Record a fatal socket failure on the mounted transaction.
    fn fail_socket(&mut self, message: &str, exception: Option<io::Error>) {
        let failure = Failure::client(
            ErrorFields::client(sqlstate::CONNECTION_FAILURE, message)
                .with_severity("FATAL")
                .with_detail("fatal socket error"),
        );
        self.fail_current(failure, exception.map(Error::Io));
    }

    /// Close the socket (at most once) and complete the mounted
    /// transaction with the failure.
    fn fail_current(&mut self, failure: Failure, exception: Option<Error>) {
        self.socket = None;
        if let Some(xact) = self.xact.as_mut() {
            xact.fail(failure, exception);
        }
    }

    /// Unmount a completed transaction: a non-fatal instruction is parked
    /// for the caller, a completed negotiation yields the backend key; a
    /// fatal transaction stays pinned (and the socket is closed).
    fn finalize(&mut self) {
        let Some(xact) = self.xact.as_ref() else {
            return;
        };
        if !xact.is_complete() {
            return;
        }
        if xact.is_fatal() {
            self.socket = None;
            return;
        }
        match self.xact.take() {
            Some(Transaction::Instruction(x)) => {
                self.done = Some(x);
            }
            Some(Transaction::Negotiation(mut negotiation)) => {
                if let Some(key) = negotiation.backend_key() {
                    self.backend_pid = Some(key.pid);
                    self.backend_key = Some(key.secret_key);
                }
                self.state = negotiation.last_ready().or(self.state);
                for msg in negotiation.take_asyncs() {
                    match msg {
                        AsyncMessage::ParameterChanged { name, value } => {
                            self.startup_params.push((name, value));
                        }
                        AsyncMessage::Notice(fields) => {
                            tracing::debug!("notice during startup: {}", fields.message());
                        }
                        AsyncMessage::Notification { channel, .. } => {
                            tracing::debug!("notification during startup on {channel}");
                        }
                    }
                }
            }
            _ => {}
        }
        self.sent_gen = None;
    }
}
