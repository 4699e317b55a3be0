//! Canned replies.
//!
//! Preserialized wire bytes for the most common responses, created once
//! and shared by every handler. Null has two forms because RESP2 clients
//! must never see RESP3-only type bytes.

pub const OK: &[u8] = b"+OK\r\n";
pub const PONG: &[u8] = b"+PONG\r\n";
pub const QUEUED: &[u8] = b"+QUEUED\r\n";
pub const EMPTY_BULK: &[u8] = b"$0\r\n\r\n";
pub const CZERO: &[u8] = b":0\r\n";
pub const CONE: &[u8] = b":1\r\n";

/// RESP2 null bulk.
pub const NULL_BULK: &[u8] = b"$-1\r\n";
/// RESP3 null.
pub const NULL_RESP3: &[u8] = b"_\r\n";

pub const SYNTAX_ERR: &[u8] = b"-ERR syntax error\r\n";
pub const WRONGTYPE_ERR: &[u8] =
    b"-WRONGTYPE Operation against a key holding the wrong kind of value\r\n";
pub const NOAUTH_ERR: &[u8] = b"-NOAUTH Authentication required.\r\n";
pub const OOM_ERR: &[u8] = b"-OOM command not allowed when used memory > 'maxmemory'.\r\n";
pub const WRONGPASS_ERR: &[u8] =
    b"-WRONGPASS invalid username-password pair or user is disabled.\r\n";

/// The protocol-appropriate null reply.
pub fn null(resp_version: u8) -> &'static [u8] {
    if resp_version >= 3 {
        NULL_RESP3
    } else {
        NULL_BULK
    }
}
