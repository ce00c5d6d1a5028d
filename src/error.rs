//! Error types for pq3.

use thiserror::Error;

/// Result type for pq3 operations.
pub type Result<T> = core::result::Result<T, Error>;

/// SQLSTATE codes used or synthesized by the protocol core.
///
/// Codes starting with `--` are client-internal and never appear on the
/// wire; they are documented here so higher layers can match on them.
pub mod sqlstate {
    /// Operation on a closed connection.
    pub const CONNECTION_DOES_NOT_EXIST: &str = "08003";
    /// Server refused the connection / connect failed.
    pub const CONNECTION_REJECTED: &str = "08004";
    /// Fatal socket error or unexpected EOF.
    pub const CONNECTION_FAILURE: &str = "08006";
    /// Protocol violation: unexpected message type, parse error, bad SSL reply.
    pub const PROTOCOL_VIOLATION: &str = "08P01";
    /// Connect timed out (client-internal).
    pub const CONNECT_TIMEOUT: &str = "--TOE";
    /// SSL required but unavailable, or the TLS wrap failed (client-internal).
    pub const INSECURITY: &str = "--SEC";
    /// Unsupported authentication request (client-internal).
    pub const UNSUPPORTED_AUTH: &str = "--AUT";
    /// The "no code" SQLSTATE.
    pub const NO_CODE: &str = "00000";
}

/// Parsed fields of an ErrorResponse or NoticeResponse message.
///
/// Also used for errors synthesized by the client, which fill in only a
/// handful of the fields.
#[derive(Debug, Clone, Default)]
pub struct ErrorFields {
    /// Severity (localized): ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG
    pub severity: Option<String>,
    /// Severity (non-localized, PostgreSQL 9.6+)
    pub severity_non_localized: Option<String>,
    /// SQLSTATE error code (5 characters)
    pub code: Option<String>,
    /// Primary error message
    pub message: Option<String>,
    /// Detailed error explanation
    pub detail: Option<String>,
    /// Suggestion for fixing the error
    pub hint: Option<String>,
    /// Cursor position in query string (1-based)
    pub position: Option<u32>,
    /// Position in internal query
    pub internal_position: Option<u32>,
    /// Failed internal command text
    pub internal_query: Option<String>,
    /// Context/stack trace
    pub where_: Option<String>,
    /// Schema name
    pub schema: Option<String>,
    /// Table name
    pub table: Option<String>,
    /// Column name
    pub column: Option<String>,
    /// Data type name
    pub data_type: Option<String>,
    /// Constraint name
    pub constraint: Option<String>,
    /// Source file name
    pub file: Option<String>,
    /// Source line number
    pub line: Option<u32>,
    /// Source routine name
    pub routine: Option<String>,
}

impl ErrorFields {
    /// Build the fields of a client-synthesized error.
    pub fn client(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.to_string()),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Set the severity field.
    pub fn with_severity(mut self, severity: &str) -> Self {
        self.severity = Some(severity.to_string());
        self
    }

    /// Set the hint field.
    pub fn with_hint(mut self, hint: &str) -> Self {
        self.hint = Some(hint.to_string());
        self
    }

    /// Set the detail field.
    pub fn with_detail(mut self, detail: &str) -> Self {
        self.detail = Some(detail.to_string());
        self
    }

    /// Get the SQLSTATE code, `"00000"` if absent.
    pub fn code(&self) -> &str {
        self.code.as_deref().unwrap_or(sqlstate::NO_CODE)
    }

    /// Get the primary message.
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }

    /// Severity, preferring the non-localized variant.
    pub fn severity(&self) -> &str {
        self.severity_non_localized
            .as_deref()
            .or(self.severity.as_deref())
            .unwrap_or_default()
    }

    /// FATAL and PANIC severities mark the connection unrecoverable.
    pub fn is_disconnect(&self) -> bool {
        matches!(self.severity(), "FATAL" | "PANIC")
    }
}

impl std::fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} (SQLSTATE {})",
            self.severity(),
            self.message(),
            self.code()
        )?;
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {}", detail)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {}", hint)?;
        }
        Ok(())
    }
}

/// Where a reported failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOrigin {
    /// Parsed from a backend ErrorResponse message.
    Server,
    /// Synthesized by this client for protocol or socket failures.
    Client,
}

/// A failure attached to a protocol transaction.
///
/// The core never returns these through `Result`; they are recorded on the
/// transaction that observed them, and higher layers decide whether to
/// raise, retry or reconnect.
#[derive(Debug, Clone)]
pub struct Failure {
    /// Origin of the error fields.
    pub origin: ErrorOrigin,
    /// The error fields themselves.
    pub fields: ErrorFields,
}

impl Failure {
    /// A failure parsed from a backend ErrorResponse.
    pub fn server(fields: ErrorFields) -> Self {
        Self {
            origin: ErrorOrigin::Server,
            fields,
        }
    }

    /// A failure synthesized by the client.
    pub fn client(fields: ErrorFields) -> Self {
        Self {
            origin: ErrorOrigin::Client,
            fields,
        }
    }

    /// SQLSTATE code of the failure.
    pub fn code(&self) -> &str {
        self.fields.code()
    }

    /// Primary message of the failure.
    pub fn message(&self) -> &str {
        self.fields.message()
    }

    /// True if the failure makes the connection unusable.
    pub fn is_disconnect(&self) -> bool {
        self.fields.is_disconnect()
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.fields, f)
    }
}

/// Error type for pq3's fallible internals.
///
/// Message parsers and the frame buffer return this; the connection and the
/// state machines convert it into a [`Failure`] on the current transaction
/// rather than letting it escape.
#[derive(Debug, Error)]
pub enum Error {
    /// Protocol error (malformed message, unexpected response, etc.)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl<Src: std::fmt::Debug, Dst: std::fmt::Debug + ?Sized> From<zerocopy::error::CastError<Src, Dst>>
    for Error
{
    fn from(err: zerocopy::error::CastError<Src, Dst>) -> Self {
        Error::Protocol(format!("zerocopy cast error: {err:?}"))
    }
}
