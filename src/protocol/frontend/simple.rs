//! Simple query protocol messages.

use crate::protocol::codec::MessageBuilder;

/// Query message - one round of the simple query protocol.
///
/// The query string may contain multiple SQL statements separated by
/// semicolons; the server answers with one result set per statement and a
/// single trailing ReadyForQuery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query(pub String);

impl Query {
    /// Serialize the Query message.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        let mut msg = MessageBuilder::new(buf, super::msg_type::QUERY);
        msg.write_cstr(&self.0);
        msg.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query() {
        let mut buf = Vec::new();
        Query("SELECT 1".to_string()).encode(&mut buf);

        assert_eq!(buf[0], b'Q');

        // Length: 4 (length field) + 9 (query + null terminator)
        let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert_eq!(len, 13);

        assert_eq!(&buf[5..14], b"SELECT 1\0");
    }
}
