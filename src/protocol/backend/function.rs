//! Fast-path function call backend messages.

use crate::error::{Error, Result};
use crate::protocol::codec::{read_bytes, read_i32};

/// FunctionCallResponse message - result of a fast-path function call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCallResponse {
    /// Raw result bytes; `None` is SQL NULL
    pub value: Option<Vec<u8>>,
}

impl FunctionCallResponse {
    /// Parse a FunctionCallResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (len, rest) = read_i32(payload)?;
        if len == -1 {
            return Ok(Self { value: None });
        }
        if len < 0 {
            return Err(Error::Protocol(format!(
                "FunctionCallResponse: bad result length {len}"
            )));
        }
        let (value, _) = read_bytes(rest, len as usize)?;
        Ok(Self {
            value: Some(value.to_vec()),
        })
    }
}
