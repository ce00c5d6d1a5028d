//! Password reply messages and their hashing contracts.

use md5::{Digest, Md5};

use crate::protocol::codec::MessageBuilder;

/// Write a PasswordMessage carrying an already-prepared reply.
///
/// The same 'p' frame carries cleartext, crypt and MD5 replies; only the
/// body differs.
pub fn write_password(buf: &mut Vec<u8>, password: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_cstring(password);
    msg.finish();
}

/// Compute the MD5 password reply.
///
/// PostgreSQL MD5 format: `"md5" + md5_hex(md5_hex(password + user) + salt)`
/// where the inner digest is hex-encoded ASCII before the outer round.
pub fn md5_password(user: &[u8], password: &[u8], salt: &[u8; 4]) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(password);
    hasher.update(user);
    let inner = format!("{:x}", hasher.finalize());

    let mut hasher = Md5::new();
    hasher.update(inner.as_bytes());
    hasher.update(salt);

    format!("md5{:x}", hasher.finalize()).into_bytes()
}

/// Compute the Unix crypt(3) password reply.
///
/// The server sends a 2-byte salt; the reply is the traditional 13-character
/// DES crypt output. Fails if the salt bytes are outside the crypt alphabet.
pub fn crypt_password(password: &[u8], salt: &[u8; 2]) -> Result<Vec<u8>, String> {
    let salt = std::str::from_utf8(salt).map_err(|_| "crypt salt is not ASCII".to_string())?;
    pwhash::unix_crypt::hash_with(salt, password)
        .map(String::into_bytes)
        .map_err(|e| format!("crypt failed: {e}"))
}
