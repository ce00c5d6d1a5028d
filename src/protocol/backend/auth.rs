//! Startup-phase and asynchronous backend messages.

use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::{read_cstr, read_i32, read_u32};
use crate::protocol::types::{TransactionStatus, U32BE};

/// Authentication request constants.
pub mod auth_request {
    pub const OK: i32 = 0;
    pub const KERBEROS_V4: i32 = 1;
    pub const KERBEROS_V5: i32 = 2;
    pub const CLEARTEXT_PASSWORD: i32 = 3;
    pub const CRYPT_PASSWORD: i32 = 4;
    pub const MD5_PASSWORD: i32 = 5;
    pub const SCM_CREDENTIAL: i32 = 6;
    pub const GSS: i32 = 7;
    pub const GSS_CONTINUE: i32 = 8;
    pub const SSPI: i32 = 9;
    pub const SASL: i32 = 10;

    /// Human-readable name for an authentication request code.
    pub fn name(request: i32) -> &'static str {
        match request {
            OK => "OK",
            KERBEROS_V4 => "KerberosV4",
            KERBEROS_V5 => "KerberosV5",
            CLEARTEXT_PASSWORD => "Cleartext",
            CRYPT_PASSWORD => "Crypt",
            MD5_PASSWORD => "MD5",
            SCM_CREDENTIAL => "SCMCredential",
            GSS => "GSS",
            GSS_CONTINUE => "GSSContinue",
            SSPI => "SSPI",
            SASL => "SASL",
            _ => "<unknown>",
        }
    }
}

/// Authentication message from the server.
///
/// Only trust, cleartext, crypt and MD5 challenges are actionable; every
/// other request is carried as [`Authentication::Unsupported`] so the
/// negotiation can refuse it with a descriptive error instead of guessing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    /// Authentication successful
    Ok,
    /// Cleartext password required
    CleartextPassword,
    /// Unix crypt(3) password required (with 2-byte salt)
    CryptPassword {
        /// Salt for crypt(3)
        salt: [u8; 2],
    },
    /// MD5 password required (with 4-byte salt)
    Md5Password {
        /// Salt for the outer MD5 round
        salt: [u8; 4],
    },
    /// Any other authentication request, kept by its numeric code.
    Unsupported {
        /// The raw authentication request code
        request: i32,
    },
}

impl Authentication {
    /// Parse an Authentication message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (request, rest) = read_i32(payload)?;
        match request {
            auth_request::OK => Ok(Authentication::Ok),
            auth_request::CLEARTEXT_PASSWORD => Ok(Authentication::CleartextPassword),
            auth_request::CRYPT_PASSWORD => {
                let salt: [u8; 2] = rest
                    .try_into()
                    .map_err(|_| Error::Protocol("CryptPassword: missing 2-byte salt".into()))?;
                Ok(Authentication::CryptPassword { salt })
            }
            auth_request::MD5_PASSWORD => {
                let salt: [u8; 4] = rest
                    .try_into()
                    .map_err(|_| Error::Protocol("Md5Password: missing 4-byte salt".into()))?;
                Ok(Authentication::Md5Password { salt })
            }
            other => Ok(Authentication::Unsupported { request: other }),
        }
    }

    /// The raw request code of this message.
    pub fn request(&self) -> i32 {
        match self {
            Authentication::Ok => auth_request::OK,
            Authentication::CleartextPassword => auth_request::CLEARTEXT_PASSWORD,
            Authentication::CryptPassword { .. } => auth_request::CRYPT_PASSWORD,
            Authentication::Md5Password { .. } => auth_request::MD5_PASSWORD,
            Authentication::Unsupported { request } => *request,
        }
    }
}

/// Fixed wire layout of BackendKeyData.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
struct BackendKeyDataWire {
    pid: U32BE,
    secret_key: U32BE,
}

/// BackendKeyData message - process ID and secret key for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendKeyData {
    /// Process ID of the backend
    pub pid: u32,
    /// Secret key for CancelRequest
    pub secret_key: u32,
}

impl BackendKeyData {
    /// Parse a BackendKeyData message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let wire = BackendKeyDataWire::ref_from_bytes(payload)
            .map_err(|e| Error::Protocol(format!("BackendKeyData: {e:?}")))?;
        Ok(Self {
            pid: wire.pid.get(),
            secret_key: wire.secret_key.get(),
        })
    }
}

/// Parse a ReadyForQuery payload into its transaction status.
pub fn parse_ready(payload: &[u8]) -> Result<TransactionStatus> {
    let [byte] = payload else {
        return Err(Error::Protocol(format!(
            "ReadyForQuery: expected 1 byte, got {}",
            payload.len()
        )));
    };
    TransactionStatus::from_byte(*byte)
        .ok_or_else(|| Error::Protocol(format!("ReadyForQuery: unknown status {byte:#x}")))
}

/// ParameterStatus message - server parameter name and value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterStatus {
    /// Parameter name
    pub name: String,
    /// Parameter value
    pub value: String,
}

impl ParameterStatus {
    /// Parse a ParameterStatus message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (name, rest) = read_cstr(payload)?;
        let (value, _) = read_cstr(rest)?;
        Ok(Self {
            name: name.to_string(),
            value: value.to_string(),
        })
    }
}

/// NotificationResponse message - asynchronous notification from LISTEN/NOTIFY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationResponse {
    /// PID of the notifying backend
    pub pid: u32,
    /// Channel name
    pub channel: String,
    /// Notification payload
    pub payload: String,
}

impl NotificationResponse {
    /// Parse a NotificationResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (pid, rest) = read_u32(payload)?;
        let (channel, rest) = read_cstr(rest)?;
        let (notify_payload, _) = read_cstr(rest)?;
        Ok(Self {
            pid,
            channel: channel.to_string(),
            payload: notify_payload.to_string(),
        })
    }
}
