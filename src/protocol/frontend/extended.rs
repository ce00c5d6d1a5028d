//! Extended query protocol messages.

use crate::protocol::codec::MessageBuilder;
use crate::protocol::types::{FormatCode, Oid};

/// Target of a Describe or Close message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// A prepared statement ('S')
    Statement,
    /// A portal ('P')
    Portal,
}

impl Target {
    fn byte(self) -> u8 {
        match self {
            Target::Statement => b'S',
            Target::Portal => b'P',
        }
    }
}

/// Parse message - create a prepared statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parse {
    /// Statement name (empty string for the unnamed statement)
    pub name: String,
    /// SQL query with $1, $2, ... placeholders
    pub query: String,
    /// Parameter type OIDs (0 = let the server infer)
    pub param_types: Vec<Oid>,
}

impl Parse {
    /// Serialize the Parse message.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        let mut msg = MessageBuilder::new(buf, super::msg_type::PARSE);
        msg.write_cstr(&self.name);
        msg.write_cstr(&self.query);
        msg.write_i16(self.param_types.len() as i16);
        for &oid in &self.param_types {
            msg.write_i32(oid as i32);
        }
        msg.finish();
    }
}

/// Bind message - create a portal from a prepared statement.
///
/// Parameter values are raw encoded bytes; `None` binds SQL NULL. The core
/// does not encode column values, so callers supply bytes matching the
/// format codes they declare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bind {
    /// Portal name (empty string for the unnamed portal)
    pub portal: String,
    /// Statement name
    pub statement: String,
    /// Format codes for the parameters (empty = all text)
    pub param_formats: Vec<FormatCode>,
    /// Parameter values
    pub params: Vec<Option<Vec<u8>>>,
    /// Format codes for the result columns (empty = all text)
    pub result_formats: Vec<FormatCode>,
}

impl Bind {
    /// Serialize the Bind message.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        let mut msg = MessageBuilder::new(buf, super::msg_type::BIND);
        msg.write_cstr(&self.portal);
        msg.write_cstr(&self.statement);

        msg.write_i16(self.param_formats.len() as i16);
        for &fmt in &self.param_formats {
            msg.write_i16(fmt as i16);
        }

        msg.write_i16(self.params.len() as i16);
        for param in &self.params {
            match param {
                Some(value) => {
                    msg.write_i32(value.len() as i32);
                    msg.write_bytes(value);
                }
                None => msg.write_i32(-1),
            }
        }

        msg.write_i16(self.result_formats.len() as i16);
        for &fmt in &self.result_formats {
            msg.write_i16(fmt as i16);
        }

        msg.finish();
    }
}

/// Describe message - request metadata for a statement or portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Describe {
    /// What is being described
    pub target: Target,
    /// Statement or portal name
    pub name: String,
}

impl Describe {
    /// Serialize the Describe message.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        let mut msg = MessageBuilder::new(buf, super::msg_type::DESCRIBE);
        msg.write_u8(self.target.byte());
        msg.write_cstr(&self.name);
        msg.finish();
    }
}

/// Close message - release a statement or portal on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Close {
    /// What is being closed
    pub target: Target,
    /// Statement or portal name
    pub name: String,
}

impl Close {
    /// Close a prepared statement by name.
    pub fn statement(name: impl Into<String>) -> Self {
        Self {
            target: Target::Statement,
            name: name.into(),
        }
    }

    /// Close a portal by name.
    pub fn portal(name: impl Into<String>) -> Self {
        Self {
            target: Target::Portal,
            name: name.into(),
        }
    }

    /// Serialize the Close message.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        let mut msg = MessageBuilder::new(buf, super::msg_type::CLOSE);
        msg.write_u8(self.target.byte());
        msg.write_cstr(&self.name);
        msg.finish();
    }
}

/// Execute message - run a portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execute {
    /// Portal name
    pub portal: String,
    /// Maximum number of rows to return (0 = unlimited)
    pub max_rows: u32,
}

impl Execute {
    /// Serialize the Execute message.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        let mut msg = MessageBuilder::new(buf, super::msg_type::EXECUTE);
        msg.write_cstr(&self.portal);
        msg.write_i32(self.max_rows as i32);
        msg.finish();
    }
}

/// Write a Sync message.
///
/// This ends an extended query sequence; the server discards messages up
/// to it after an error, then responds with ReadyForQuery.
pub fn write_sync(buf: &mut Vec<u8>) {
    let msg = MessageBuilder::new(buf, super::msg_type::SYNC);
    msg.finish();
}

/// Write a Flush message.
///
/// Forces the server to send all pending responses without waiting for
/// Sync. Elicits no reply of its own.
pub fn write_flush(buf: &mut Vec<u8>) {
    let msg = MessageBuilder::new(buf, super::msg_type::FLUSH);
    msg.finish();
}
