//! PostgreSQL frontend (client → server) messages.

pub mod auth;
pub mod copy;
pub mod extended;
pub mod function;
pub mod simple;
pub mod startup;

pub use auth::{crypt_password, md5_password, write_password};
pub use copy::{write_copy_data, write_copy_done, write_copy_fail};
pub use extended::{Bind, Close, Describe, Execute, Parse, Target, write_flush, write_sync};
pub use function::FunctionCall;
pub use simple::Query;
pub use startup::{Startup, write_cancel_request, write_ssl_request, write_terminate};

/// Frontend message type bytes.
pub mod msg_type {
    /// Password/crypt/MD5 response (all password replies use 'p')
    pub const PASSWORD: u8 = b'p';
    /// Query (simple query protocol)
    pub const QUERY: u8 = b'Q';
    /// Parse (extended query protocol)
    pub const PARSE: u8 = b'P';
    /// Bind (extended query protocol)
    pub const BIND: u8 = b'B';
    /// Execute (extended query protocol)
    pub const EXECUTE: u8 = b'E';
    /// Describe (extended query protocol)
    pub const DESCRIBE: u8 = b'D';
    /// Close (extended query protocol)
    pub const CLOSE: u8 = b'C';
    /// Sync (extended query protocol)
    pub const SYNC: u8 = b'S';
    /// Flush (extended query protocol)
    pub const FLUSH: u8 = b'H';
    /// Function call
    pub const FUNCTION_CALL: u8 = b'F';
    /// CopyData
    pub const COPY_DATA: u8 = b'd';
    /// CopyDone
    pub const COPY_DONE: u8 = b'c';
    /// CopyFail
    pub const COPY_FAIL: u8 = b'f';
    /// Terminate
    pub const TERMINATE: u8 = b'X';
}

/// One outbound command of an instruction.
///
/// An instruction is built from an ordered sequence of these; the
/// instruction machine validates each backend reply against the expected
/// replies of the command currently being answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Simple query
    Query(Query),
    /// Fast-path function call
    Function(FunctionCall),
    /// Parse a prepared statement
    Parse(Parse),
    /// Bind a portal from a prepared statement
    Bind(Bind),
    /// Describe a statement or portal
    Describe(Describe),
    /// Close a statement or portal
    Close(Close),
    /// Execute a portal
    Execute(Execute),
    /// End of a pipelined batch; the server answers with ReadyForQuery
    Sync,
    /// Force the server to flush pending replies; elicits no reply itself
    Flush,
}

impl Command {
    /// Serialize this command as a framed wire message.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Command::Query(m) => m.encode(buf),
            Command::Function(m) => m.encode(buf),
            Command::Parse(m) => m.encode(buf),
            Command::Bind(m) => m.encode(buf),
            Command::Describe(m) => m.encode(buf),
            Command::Close(m) => m.encode(buf),
            Command::Execute(m) => m.encode(buf),
            Command::Sync => write_sync(buf),
            Command::Flush => write_flush(buf),
        }
    }

    /// Wire type byte of this command.
    pub fn tag(&self) -> u8 {
        match self {
            Command::Query(_) => msg_type::QUERY,
            Command::Function(_) => msg_type::FUNCTION_CALL,
            Command::Parse(_) => msg_type::PARSE,
            Command::Bind(_) => msg_type::BIND,
            Command::Describe(_) => msg_type::DESCRIBE,
            Command::Close(_) => msg_type::CLOSE,
            Command::Execute(_) => msg_type::EXECUTE,
            Command::Sync => msg_type::SYNC,
            Command::Flush => msg_type::FLUSH,
        }
    }

    /// Whether this command is a Sync marker.
    pub fn is_sync(&self) -> bool {
        matches!(self, Command::Sync)
    }
}
