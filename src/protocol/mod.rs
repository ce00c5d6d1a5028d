//! PostgreSQL wire protocol 3.0 implementation.
//!
//! # Structure
//!
//! - `backend`: Server → Client messages (parsing)
//! - `frontend`: Client → Server messages (encoding)
//! - `buffer`: Inbound frame reassembly
//! - `codec`: Low-level encoding/decoding primitives
//! - `types`: Common protocol types (FormatCode, Oid, TransactionStatus, Version)

pub mod backend;
pub mod buffer;
pub mod codec;
pub mod frontend;
pub mod types;

// Re-export commonly used types
pub use backend::Reply;
pub use buffer::{MessageStream, RawMessage};
pub use frontend::Command;
pub use types::{FormatCode, Oid, TransactionStatus, Version};
