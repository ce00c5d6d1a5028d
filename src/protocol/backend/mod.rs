//! PostgreSQL backend (server → client) messages.

pub mod auth;
pub mod copy;
pub mod error;
pub mod extended;
pub mod function;
pub mod query;

pub use auth::{Authentication, BackendKeyData, NotificationResponse, ParameterStatus};
pub use copy::{CopyInResponse, CopyOutResponse};
pub use error::{ErrorResponse, NoticeResponse};
pub use extended::ParameterDescription;
pub use function::FunctionCallResponse;
pub use query::{CommandComplete, DataRow, FieldDescription, RowDescription};

use crate::error::{Error, Result};
use crate::protocol::types::TransactionStatus;

/// Backend message type bytes.
pub mod msg_type {
    /// Authentication message
    pub const AUTHENTICATION: u8 = b'R';
    /// BackendKeyData
    pub const BACKEND_KEY_DATA: u8 = b'K';
    /// ParameterStatus
    pub const PARAMETER_STATUS: u8 = b'S';
    /// ReadyForQuery
    pub const READY_FOR_QUERY: u8 = b'Z';
    /// RowDescription
    pub const ROW_DESCRIPTION: u8 = b'T';
    /// DataRow
    pub const DATA_ROW: u8 = b'D';
    /// CommandComplete
    pub const COMMAND_COMPLETE: u8 = b'C';
    /// EmptyQueryResponse
    pub const EMPTY_QUERY_RESPONSE: u8 = b'I';
    /// ErrorResponse
    pub const ERROR_RESPONSE: u8 = b'E';
    /// NoticeResponse
    pub const NOTICE_RESPONSE: u8 = b'N';
    /// NotificationResponse
    pub const NOTIFICATION_RESPONSE: u8 = b'A';
    /// ParseComplete
    pub const PARSE_COMPLETE: u8 = b'1';
    /// BindComplete
    pub const BIND_COMPLETE: u8 = b'2';
    /// CloseComplete
    pub const CLOSE_COMPLETE: u8 = b'3';
    /// ParameterDescription
    pub const PARAMETER_DESCRIPTION: u8 = b't';
    /// NoData
    pub const NO_DATA: u8 = b'n';
    /// PortalSuspended
    pub const PORTAL_SUSPENDED: u8 = b's';
    /// CopyInResponse
    pub const COPY_IN_RESPONSE: u8 = b'G';
    /// CopyOutResponse
    pub const COPY_OUT_RESPONSE: u8 = b'H';
    /// CopyData
    pub const COPY_DATA: u8 = b'd';
    /// CopyDone
    pub const COPY_DONE: u8 = b'c';
    /// FunctionCallResponse
    pub const FUNCTION_CALL_RESPONSE: u8 = b'V';
}

/// Check if a type byte represents an async message (can arrive at any time).
pub fn is_async_type(tag: u8) -> bool {
    matches!(
        tag,
        msg_type::NOTICE_RESPONSE | msg_type::NOTIFICATION_RESPONSE | msg_type::PARAMETER_STATUS
    )
}

/// A parsed backend reply, as stored in an instruction's completed groups.
///
/// Only the message types that may appear inside an instruction exchange
/// are represented; startup-phase and asynchronous messages are parsed by
/// their own types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// RowDescription: result-set column metadata.
    RowDescription(RowDescription),
    /// DataRow: raw field bytes, `None` per SQL NULL column.
    DataRow(DataRow),
    /// CommandComplete with its command tag.
    Complete(CommandComplete),
    /// EmptyQueryResponse: the query string was empty.
    EmptyQuery,
    /// ReadyForQuery with the reported transaction status.
    Ready(TransactionStatus),
    /// ParseComplete
    ParseComplete,
    /// BindComplete
    BindComplete,
    /// CloseComplete
    CloseComplete,
    /// NoData: Describe of a statement or portal that returns no rows.
    NoData,
    /// PortalSuspended: Execute row limit reached before the portal drained.
    Suspended,
    /// ParameterDescription: statement parameter type OIDs.
    ParameterDescription(ParameterDescription),
    /// CopyInResponse: the server is ready to sink copy data.
    CopyIn(CopyInResponse),
    /// CopyOutResponse: the server is about to stream copy data.
    CopyOut(CopyOutResponse),
    /// CopyData: one raw chunk of a COPY stream.
    CopyData(Vec<u8>),
    /// CopyDone
    CopyDone,
    /// FunctionCallResponse with the raw result bytes.
    FunctionResult(FunctionCallResponse),
}

impl Reply {
    /// Parse a backend message payload by its type byte.
    pub fn parse(tag: u8, payload: &[u8]) -> Result<Reply> {
        match tag {
            msg_type::ROW_DESCRIPTION => Ok(Reply::RowDescription(RowDescription::parse(payload)?)),
            msg_type::DATA_ROW => Ok(Reply::DataRow(DataRow::parse(payload)?)),
            msg_type::COMMAND_COMPLETE => Ok(Reply::Complete(CommandComplete::parse(payload)?)),
            msg_type::EMPTY_QUERY_RESPONSE => Ok(Reply::EmptyQuery),
            msg_type::READY_FOR_QUERY => Ok(Reply::Ready(auth::parse_ready(payload)?)),
            msg_type::PARSE_COMPLETE => Ok(Reply::ParseComplete),
            msg_type::BIND_COMPLETE => Ok(Reply::BindComplete),
            msg_type::CLOSE_COMPLETE => Ok(Reply::CloseComplete),
            msg_type::NO_DATA => Ok(Reply::NoData),
            msg_type::PORTAL_SUSPENDED => Ok(Reply::Suspended),
            msg_type::PARAMETER_DESCRIPTION => Ok(Reply::ParameterDescription(
                ParameterDescription::parse(payload)?,
            )),
            msg_type::COPY_IN_RESPONSE => Ok(Reply::CopyIn(CopyInResponse::parse(payload)?)),
            msg_type::COPY_OUT_RESPONSE => Ok(Reply::CopyOut(CopyOutResponse::parse(payload)?)),
            msg_type::COPY_DATA => Ok(Reply::CopyData(payload.to_vec())),
            msg_type::COPY_DONE => Ok(Reply::CopyDone),
            msg_type::FUNCTION_CALL_RESPONSE => Ok(Reply::FunctionResult(
                FunctionCallResponse::parse(payload)?,
            )),
            _ => Err(Error::Protocol(format!(
                "no parser for backend message type '{}'",
                tag as char
            ))),
        }
    }

    /// The ReadyForQuery transaction status, if this reply is one.
    pub fn ready_status(&self) -> Option<TransactionStatus> {
        match self {
            Reply::Ready(status) => Some(*status),
            _ => None,
        }
    }
}
