//! A sans-I/O PostgreSQL frontend/backend protocol 3.0 engine.
//!
//! # Features
//!
//! - **Sans-I/O state machines**: negotiation and instruction execution are
//!   pure byte-in/byte-out machines, so any concurrency model can drive them
//! - **No-raise contract**: protocol and socket failures are recorded on the
//!   transaction that observed them, never thrown through the driver
//! - **Pipelining**: extended-query batches resynchronize on the next Sync
//!   after a non-fatal error
//! - **Streaming fast paths**: COPY and row data bypass per-message
//!   validation once a homogeneous stream is established
//!
//! # Example
//!
//! ```no_run
//! use pq3::net::TcpSocketFactory;
//! use pq3::protocol::frontend::{Command, Query, Startup};
//! use pq3::state::Instruction;
//! use pq3::{Connection, SslMode};
//!
//! fn main() -> std::io::Result<()> {
//!     let factory = TcpSocketFactory::new("localhost", 5432);
//!     let startup = Startup::new("postgres").database("mydb");
//!     let mut conn = Connection::new(factory, startup, b"secret".to_vec());
//!
//!     conn.connect(SslMode::Prefer, None)?;
//!     if let Some(failure) = conn.failure() {
//!         eprintln!("could not connect: {failure}");
//!         return Ok(());
//!     }
//!
//!     let query = Instruction::new(vec![Command::Query(Query("SELECT 1".into()))]);
//!     conn.push(query)?;
//!     if let Some(done) = conn.complete()? {
//!         for reply in done.replies() {
//!             println!("{reply:?}");
//!         }
//!     }
//!     conn.close()?;
//!     Ok(())
//! }
//! ```

// private
mod conn;
mod error;

// pub
pub mod net;
pub mod protocol;
pub mod state;

pub use conn::{Canceller, Connection, SslMode, Tracer};
pub use error::{Error, ErrorFields, ErrorOrigin, Failure, Result, sqlstate};
pub use protocol::{Reply, TransactionStatus};
pub use state::{AsyncMessage, Direction, Instruction, Negotiation, WireGroup};
