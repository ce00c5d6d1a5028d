//! Sans-I/O protocol transactions.
//!
//! A transaction owns the semantics of one multi-message exchange with the
//! backend: startup negotiation, an instruction (a pre-built sequence of
//! frontend commands), or the closing handshake. Transactions never touch a
//! socket and never return errors through `Result`; failures are recorded
//! on the transaction itself and the driver inspects them after completion.

pub mod instruction;
pub mod negotiation;

pub use instruction::{AsyncHook, Group, Instruction};
pub use negotiation::Negotiation;

use crate::error::{ErrorFields, Failure, Result, sqlstate};
use crate::protocol::backend::{
    NoticeResponse, NotificationResponse, ParameterStatus, msg_type,
};
use crate::protocol::buffer::RawMessage;
use crate::protocol::frontend::{Command, write_terminate};
use crate::protocol::types::TransactionStatus;

/// Direction of the next wire transition for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The transaction has bytes to send.
    Sending,
    /// The transaction is waiting for backend messages.
    Receiving,
    /// The transaction will accept no more bytes in either direction.
    Complete,
}

/// A batch of reassembled backend messages, as drained from the stream
/// buffer in one read.
///
/// The `id` is the group's identity: re-presenting a group with the same id
/// after a transient I/O retry replays it from the same position instead of
/// applying it twice.
#[derive(Debug, Clone)]
pub struct WireGroup {
    /// Identity of this group, assigned by the driver.
    pub id: u64,
    /// The messages, in wire order.
    pub messages: Vec<RawMessage>,
}

impl WireGroup {
    /// Create a new wire group.
    pub fn new(id: u64, messages: Vec<RawMessage>) -> Self {
        Self { id, messages }
    }
}

/// Asynchronous message from the server.
///
/// These can arrive at any point of any exchange and never advance the
/// surrounding transaction's state.
#[derive(Debug, Clone)]
pub enum AsyncMessage {
    /// Non-fatal notice/warning from server.
    Notice(ErrorFields),

    /// Notification from LISTEN/NOTIFY.
    Notification {
        /// PID of the notifying backend process
        pid: u32,
        /// Channel name
        channel: String,
        /// Notification payload
        payload: String,
    },

    /// Server parameter value changed.
    ParameterChanged {
        /// Parameter name
        name: String,
        /// New value
        value: String,
    },
}

/// Parse one of the three asynchronous message types.
pub(crate) fn parse_async(msg: &RawMessage) -> Result<AsyncMessage> {
    match msg.tag {
        msg_type::NOTICE_RESPONSE => {
            let notice = NoticeResponse::parse(&msg.payload)?;
            Ok(AsyncMessage::Notice(notice.fields))
        }
        msg_type::NOTIFICATION_RESPONSE => {
            let n = NotificationResponse::parse(&msg.payload)?;
            Ok(AsyncMessage::Notification {
                pid: n.pid,
                channel: n.channel,
                payload: n.payload,
            })
        }
        _ => {
            let param = ParameterStatus::parse(&msg.payload)?;
            Ok(AsyncMessage::ParameterChanged {
                name: param.name,
                value: param.value,
            })
        }
    }
}

/// What a transaction wants written next.
///
/// The driver serializes this into wire bytes; raw chunks are wrapped into
/// CopyData frames, everything else serializes itself.
#[derive(Debug)]
pub enum Pending<'a> {
    /// Pre-framed bytes (startup packet, password reply, terminate).
    Bytes(&'a [u8]),
    /// Frontend commands to frame in order.
    Commands(&'a [Command]),
    /// Raw COPY chunks to wrap as CopyData frames.
    CopyChunks(&'a [Vec<u8>]),
    /// A CopyDone frame followed by the remaining commands.
    CopyDone(&'a [Command]),
    /// A CopyFail frame followed by the remaining commands.
    CopyFail(&'a [Command]),
    /// Nothing to write.
    Nothing,
}

/// Terminal transaction for a closed connection.
///
/// Sends the Terminate message, then completes fatally so the connection
/// slot stays pinned: every later mount attempt observes the same `08003`
/// failure.
#[derive(Debug)]
pub struct Closing {
    payload: Vec<u8>,
    state: Direction,
    error: Failure,
}

impl Closing {
    /// Create the closing transaction.
    pub fn new() -> Self {
        let mut payload = Vec::with_capacity(5);
        write_terminate(&mut payload);
        Self {
            payload,
            state: Direction::Sending,
            error: Failure::client(
                ErrorFields::client(
                    sqlstate::CONNECTION_DOES_NOT_EXIST,
                    "operation on closed connection",
                )
                .with_severity("FATAL")
                .with_hint("A new connection needs to be created in order to query the server."),
            ),
        }
    }

    /// The pinned failure this sentinel reports.
    pub fn error(&self) -> &Failure {
        &self.error
    }

    fn sent(&mut self) {
        self.state = Direction::Complete;
    }
}

impl Default for Closing {
    fn default() -> Self {
        Self::new()
    }
}

/// The transaction currently mounted on a connection.
#[derive(Debug)]
pub enum Transaction {
    /// Startup negotiation.
    Negotiation(Negotiation),
    /// A user instruction.
    Instruction(Instruction),
    /// The closing sentinel.
    Closing(Closing),
}

impl Transaction {
    /// Direction of the next wire transition.
    pub fn direction(&self) -> Direction {
        match self {
            Transaction::Negotiation(x) => x.direction(),
            Transaction::Instruction(x) => x.direction(),
            Transaction::Closing(x) => x.state,
        }
    }

    /// Whether the transaction is complete.
    pub fn is_complete(&self) -> bool {
        self.direction() == Direction::Complete
    }

    /// Whether the transaction failed in a way that poisons the connection.
    pub fn is_fatal(&self) -> bool {
        match self {
            Transaction::Negotiation(x) => x.is_fatal(),
            Transaction::Instruction(x) => x.is_fatal(),
            Transaction::Closing(x) => x.state == Direction::Complete,
        }
    }

    /// The failure recorded on this transaction, if any.
    pub fn error(&self) -> Option<&Failure> {
        match self {
            Transaction::Negotiation(x) => x.error(),
            Transaction::Instruction(x) => x.error(),
            Transaction::Closing(x) => Some(x.error()),
        }
    }

    /// The last ReadyForQuery status this transaction observed.
    pub fn last_ready(&self) -> Option<TransactionStatus> {
        match self {
            Transaction::Negotiation(x) => x.last_ready(),
            Transaction::Instruction(x) => x.last_ready(),
            Transaction::Closing(_) => None,
        }
    }

    /// Monotonic counter bumped whenever the pending payload changes.
    ///
    /// The driver uses it to avoid re-serializing a payload it has already
    /// queued when a send is retried.
    pub fn send_generation(&self) -> u64 {
        match self {
            Transaction::Negotiation(x) => x.send_generation(),
            Transaction::Instruction(x) => x.send_generation(),
            Transaction::Closing(_) => 0,
        }
    }

    /// What to write next.
    pub fn pending(&self) -> Pending<'_> {
        match self {
            Transaction::Negotiation(x) => x.pending(),
            Transaction::Instruction(x) => x.pending(),
            Transaction::Closing(x) => Pending::Bytes(&x.payload),
        }
    }

    /// Finalize the Sending state once the pending payload is on the wire.
    pub fn sent(&mut self) {
        match self {
            Transaction::Negotiation(x) => x.sent(),
            Transaction::Instruction(x) => x.sent(),
            Transaction::Closing(x) => x.sent(),
        }
    }

    /// Deliver a group of backend messages; returns how many were consumed.
    pub fn put(&mut self, group: &WireGroup) -> usize {
        match self {
            Transaction::Negotiation(x) => x.put(group),
            Transaction::Instruction(x) => x.put(group),
            Transaction::Closing(_) => 0,
        }
    }

    /// Force-complete with a failure observed by the driver (socket errors,
    /// unexpected EOF, framing violations).
    pub(crate) fn fail(&mut self, failure: Failure, exception: Option<crate::error::Error>) {
        match self {
            Transaction::Negotiation(x) => x.fail(failure, exception),
            Transaction::Instruction(x) => x.fail(failure, exception),
            // The closing sentinel keeps its own 08003 failure; a socket
            // error just finishes it.
            Transaction::Closing(x) => x.state = Direction::Complete,
        }
    }
}
