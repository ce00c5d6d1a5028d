//! Shared helpers for the scripted protocol tests: wire-frame builders and
//! an in-memory socket factory.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::rc::Rc;
use std::time::Duration;

use pq3::net::SocketFactory;
use pq3::protocol::buffer::RawMessage;
use pq3::state::WireGroup;

/// Frame a backend message: tag, self-inclusive length, payload.
pub fn frame(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend_from_slice(&(payload.len() as i32 + 4).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn msg(tag: u8, payload: &[u8]) -> RawMessage {
    RawMessage::new(tag, payload.to_vec())
}

pub fn group(id: u64, messages: Vec<RawMessage>) -> WireGroup {
    WireGroup::new(id, messages)
}

/// Authentication message with the given request code and trailing bytes.
pub fn auth(request: i32, extra: &[u8]) -> RawMessage {
    let mut payload = request.to_be_bytes().to_vec();
    payload.extend_from_slice(extra);
    msg(b'R', &payload)
}

/// BackendKeyData with the given pid and secret.
pub fn key_data(pid: u32, secret: u32) -> RawMessage {
    let mut payload = pid.to_be_bytes().to_vec();
    payload.extend_from_slice(&secret.to_be_bytes());
    msg(b'K', &payload)
}

/// ReadyForQuery with the given status byte.
pub fn ready(status: u8) -> RawMessage {
    msg(b'Z', &[status])
}

/// CommandComplete with the given tag.
pub fn command_complete(tag: &str) -> RawMessage {
    let mut payload = tag.as_bytes().to_vec();
    payload.push(0);
    msg(b'C', &payload)
}

fn fields_payload(pairs: &[(u8, &str)]) -> Vec<u8> {
    let mut payload = Vec::new();
    for (code, value) in pairs {
        payload.push(*code);
        payload.extend_from_slice(value.as_bytes());
        payload.push(0);
    }
    payload.push(0);
    payload
}

/// ErrorResponse with severity, SQLSTATE and message.
pub fn error_response(severity: &str, code: &str, message: &str) -> RawMessage {
    msg(
        b'E',
        &fields_payload(&[(b'S', severity), (b'V', severity), (b'C', code), (b'M', message)]),
    )
}

/// NoticeResponse with a message field.
pub fn notice(message: &str) -> RawMessage {
    msg(b'N', &fields_payload(&[(b'S', "NOTICE"), (b'M', message)]))
}

/// NotificationResponse on a channel.
pub fn notification(pid: u32, channel: &str, payload: &str) -> RawMessage {
    let mut body = pid.to_be_bytes().to_vec();
    body.extend_from_slice(channel.as_bytes());
    body.push(0);
    body.extend_from_slice(payload.as_bytes());
    body.push(0);
    msg(b'A', &body)
}

/// ParameterStatus name/value.
pub fn param_status(name: &str, value: &str) -> RawMessage {
    let mut body = name.as_bytes().to_vec();
    body.push(0);
    body.extend_from_slice(value.as_bytes());
    body.push(0);
    msg(b'S', &body)
}

/// RowDescription with a single text-format column of the given type OID.
pub fn row_description(name: &str, type_oid: u32) -> RawMessage {
    let mut payload = 1_u16.to_be_bytes().to_vec();
    payload.extend_from_slice(name.as_bytes());
    payload.push(0);
    payload.extend_from_slice(&0_u32.to_be_bytes()); // table oid
    payload.extend_from_slice(&0_i16.to_be_bytes()); // column id
    payload.extend_from_slice(&type_oid.to_be_bytes());
    payload.extend_from_slice(&4_i16.to_be_bytes()); // type size
    payload.extend_from_slice(&(-1_i32).to_be_bytes()); // type modifier
    payload.extend_from_slice(&0_u16.to_be_bytes()); // text format
    msg(b'T', &payload)
}

/// DataRow with the given columns (`None` = SQL NULL).
pub fn data_row(columns: &[Option<&[u8]>]) -> RawMessage {
    let mut payload = (columns.len() as u16).to_be_bytes().to_vec();
    for column in columns {
        match column {
            Some(value) => {
                payload.extend_from_slice(&(value.len() as i32).to_be_bytes());
                payload.extend_from_slice(value);
            }
            None => payload.extend_from_slice(&(-1_i32).to_be_bytes()),
        }
    }
    msg(b'D', &payload)
}

/// CopyInResponse / CopyOutResponse body: text format, n text columns.
pub fn copy_begin(tag: u8, columns: u16) -> RawMessage {
    let mut payload = vec![0u8];
    payload.extend_from_slice(&columns.to_be_bytes());
    for _ in 0..columns {
        payload.extend_from_slice(&0_u16.to_be_bytes());
    }
    msg(tag, &payload)
}

/// FunctionCallResponse with a non-null result.
pub fn function_result(value: &[u8]) -> RawMessage {
    let mut payload = (value.len() as i32).to_be_bytes().to_vec();
    payload.extend_from_slice(value);
    msg(b'V', &payload)
}

/// Concatenate framed messages into one server-to-client byte script.
pub fn script(messages: &[RawMessage]) -> Vec<u8> {
    let mut out = Vec::new();
    for m in messages {
        out.extend_from_slice(&frame(m.tag, &m.payload));
    }
    out
}

/// In-memory socket fed from a pre-scripted server byte sequence; writes
/// are captured for assertions. Reading past the script reports EOF.
pub struct ScriptedSocket {
    input: io::Cursor<Vec<u8>>,
    written: Rc<RefCell<Vec<u8>>>,
}

impl Read for ScriptedSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for ScriptedSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Factory producing scripted sockets, one per `connect` call.
pub struct ScriptedFactory {
    inputs: RefCell<VecDeque<Vec<u8>>>,
    writes: RefCell<Vec<Rc<RefCell<Vec<u8>>>>>,
}

impl ScriptedFactory {
    /// One input byte script per socket the test expects to open.
    pub fn new(inputs: Vec<Vec<u8>>) -> Self {
        Self {
            inputs: RefCell::new(inputs.into()),
            writes: RefCell::new(Vec::new()),
        }
    }

    /// Number of sockets opened so far.
    pub fn opened(&self) -> usize {
        self.writes.borrow().len()
    }

    /// Bytes written to the n-th opened socket.
    pub fn written(&self, socket: usize) -> Vec<u8> {
        self.writes.borrow()[socket].borrow().clone()
    }
}

impl SocketFactory for ScriptedFactory {
    type Socket = ScriptedSocket;

    fn connect(&self, _timeout: Option<Duration>) -> io::Result<ScriptedSocket> {
        let input = self.inputs.borrow_mut().pop_front().unwrap_or_default();
        let written = Rc::new(RefCell::new(Vec::new()));
        self.writes.borrow_mut().push(Rc::clone(&written));
        Ok(ScriptedSocket {
            input: io::Cursor::new(input),
            written,
        })
    }
}

/// Factory whose connect always fails with the given error kind.
pub struct FailingFactory(pub io::ErrorKind);

impl SocketFactory for FailingFactory {
    type Socket = ScriptedSocket;

    fn connect(&self, _timeout: Option<Duration>) -> io::Result<ScriptedSocket> {
        Err(io::Error::new(self.0, "scripted connect failure"))
    }
}
