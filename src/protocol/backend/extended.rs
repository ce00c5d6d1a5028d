//! Extended query protocol backend messages.
//!
//! ParseComplete, BindComplete, CloseComplete, NoData and PortalSuspended
//! carry no payload; they are represented directly by [`super::Reply`]
//! variants. Only ParameterDescription has structure worth parsing.

use crate::error::Result;
use crate::protocol::codec::{read_i16, read_u32};
use crate::protocol::types::Oid;

/// ParameterDescription message - parameter type OIDs of a prepared statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDescription {
    /// One OID per statement parameter
    pub type_oids: Vec<Oid>,
}

impl ParameterDescription {
    /// Parse a ParameterDescription message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (count, mut data) = read_i16(payload)?;
        let mut type_oids = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            let (oid, rest) = read_u32(data)?;
            type_oids.push(oid);
            data = rest;
        }
        Ok(Self { type_oids })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_description() {
        let mut payload = 2_i16.to_be_bytes().to_vec();
        payload.extend_from_slice(&23_u32.to_be_bytes());
        payload.extend_from_slice(&25_u32.to_be_bytes());
        let desc = ParameterDescription::parse(&payload).unwrap();
        assert_eq!(desc.type_oids, vec![23, 25]);
    }
}
