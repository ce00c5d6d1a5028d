//! Fast-path function call messages.

use crate::protocol::codec::MessageBuilder;
use crate::protocol::types::{FormatCode, Oid};

/// FunctionCall message - invoke a function by OID, bypassing SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall {
    /// OID of the function to call
    pub oid: Oid,
    /// Format codes for the arguments (empty = all text)
    pub arg_formats: Vec<FormatCode>,
    /// Argument values; `None` passes SQL NULL
    pub args: Vec<Option<Vec<u8>>>,
    /// Format code for the result
    pub result_format: FormatCode,
}

impl FunctionCall {
    /// Serialize the FunctionCall message.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        let mut msg = MessageBuilder::new(buf, super::msg_type::FUNCTION_CALL);
        msg.write_i32(self.oid as i32);

        msg.write_i16(self.arg_formats.len() as i16);
        for &fmt in &self.arg_formats {
            msg.write_i16(fmt as i16);
        }

        msg.write_i16(self.args.len() as i16);
        for arg in &self.args {
            match arg {
                Some(value) => {
                    msg.write_i32(value.len() as i32);
                    msg.write_bytes(value);
                }
                None => msg.write_i32(-1),
            }
        }

        msg.write_i16(self.result_format as i16);
        msg.finish();
    }
}
