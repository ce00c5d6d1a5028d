//! Inbound frame reassembly for the backend message stream.
//!
//! The backend framing is one type byte followed by a 4-byte big-endian
//! length that includes itself, followed by `length - 4` payload bytes.
//! Chunks arrive from the socket with arbitrary boundaries; this buffer
//! stitches them back into whole messages, copying each payload exactly
//! once out of the accumulation buffer.

use crate::error::{Error, Result};

/// Frame header size: type byte plus length field.
const HEADER_LEN: usize = 5;

/// A reassembled backend message: one type byte and the owned payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Message type byte
    pub tag: u8,
    /// Message payload (after the length field)
    pub payload: Vec<u8>,
}

impl RawMessage {
    /// Create a new RawMessage.
    pub fn new(tag: u8, payload: Vec<u8>) -> Self {
        Self { tag, payload }
    }
}

/// Reassembly buffer for the inbound byte stream.
#[derive(Debug, Default)]
pub struct MessageStream {
    buf: Vec<u8>,
    pos: usize,
}

impl MessageStream {
    /// Create an empty stream buffer.
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(8192),
            pos: 0,
        }
    }

    /// Append a chunk of bytes received from the socket.
    pub fn write(&mut self, chunk: &[u8]) {
        if self.pos == self.buf.len() {
            self.buf.clear();
            self.pos = 0;
        }
        self.buf.extend_from_slice(chunk);
    }

    /// Whether at least one complete message is buffered.
    pub fn has_message(&self) -> bool {
        let pending = &self.buf[self.pos..];
        if pending.len() < HEADER_LEN {
            return false;
        }
        let len = i32::from_be_bytes([pending[1], pending[2], pending[3], pending[4]]);
        // A length below 4 is malformed; report it as available so read()
        // can surface the framing error.
        len < 4 || pending.len() >= 1 + len as usize
    }

    /// Drain all currently complete messages, in wire order.
    ///
    /// Bytes of a trailing partial message are retained for the next call.
    pub fn read(&mut self) -> Result<Vec<RawMessage>> {
        let mut messages = Vec::new();
        loop {
            let pending = &self.buf[self.pos..];
            if pending.len() < HEADER_LEN {
                break;
            }
            let len = i32::from_be_bytes([pending[1], pending[2], pending[3], pending[4]]);
            if len < 4 {
                return Err(Error::Protocol(format!(
                    "invalid message length: {len}"
                )));
            }
            let total = 1 + len as usize;
            if pending.len() < total {
                break;
            }
            messages.push(RawMessage {
                tag: pending[0],
                payload: pending[HEADER_LEN..total].to_vec(),
            });
            self.pos += total;
        }
        if self.pos == self.buf.len() {
            self.buf.clear();
            self.pos = 0;
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        out.extend_from_slice(&(payload.len() as i32 + 4).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn whole_frame() {
        let mut stream = MessageStream::new();
        stream.write(&frame(b'Z', b"I"));
        assert!(stream.has_message());
        let msgs = stream.read().unwrap();
        assert_eq!(msgs, vec![RawMessage::new(b'Z', b"I".to_vec())]);
        assert!(!stream.has_message());
    }

    #[test]
    fn arbitrary_fragmentation() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&frame(b'T', b"descriptor"));
        wire.extend_from_slice(&frame(b'D', b"row"));
        wire.extend_from_slice(&frame(b'C', b"SELECT 1\0"));
        wire.extend_from_slice(&frame(b'Z', b"I"));

        // Byte-at-a-time delivery must yield the same sequence.
        let mut stream = MessageStream::new();
        let mut seen = Vec::new();
        for b in &wire {
            stream.write(std::slice::from_ref(b));
            seen.extend(stream.read().unwrap());
        }
        assert_eq!(
            seen.iter().map(|m| m.tag).collect::<Vec<_>>(),
            vec![b'T', b'D', b'C', b'Z']
        );
        assert_eq!(seen[2].payload, b"SELECT 1\0");

        // Split at every possible boundary.
        for split in 0..wire.len() {
            let mut stream = MessageStream::new();
            stream.write(&wire[..split]);
            let mut seen = stream.read().unwrap();
            stream.write(&wire[split..]);
            seen.extend(stream.read().unwrap());
            assert_eq!(seen.len(), 4, "split at {split}");
        }
    }

    #[test]
    fn empty_payload_message() {
        let mut stream = MessageStream::new();
        stream.write(&frame(b'1', b""));
        let msgs = stream.read().unwrap();
        assert_eq!(msgs, vec![RawMessage::new(b'1', Vec::new())]);
    }

    #[test]
    fn malformed_length_rejected() {
        let mut stream = MessageStream::new();
        stream.write(&[b'Z', 0, 0, 0, 1]);
        assert!(stream.has_message());
        assert!(stream.read().is_err());
    }
}
