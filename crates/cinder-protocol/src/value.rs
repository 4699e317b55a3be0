//! RESP value model.
//!
//! [`Resp`] covers the full RESP2 + RESP3 reply grammar. Bulk payloads
//! use `Bytes` so values can move through the pipeline without copies.
//!
//! Attribute frames (`|`) are not represented here: the reader parses
//! and discards them, delivering only the payload they decorate.

use bytes::Bytes;

/// A single protocol value.
#[derive(Debug, Clone, PartialEq)]
pub enum Resp {
    /// `+OK\r\n` — short, non-binary status replies.
    Simple(String),

    /// `-ERR message\r\n`.
    Error(String),

    /// `:42\r\n` — 64-bit signed integer.
    Integer(i64),

    /// `$5\r\nhello\r\n` — binary-safe string.
    Bulk(Bytes),

    /// `*2\r\n...\r\n` — ordered aggregate of values.
    Array(Vec<Resp>),

    /// `_\r\n` (RESP3), also produced for the legacy `$-1`/`*-1` forms.
    Null,

    /// `,3.25\r\n` — double-precision float.
    Double(f64),

    /// `#t\r\n` / `#f\r\n`.
    Boolean(bool),

    /// `!21\r\n...` — binary-safe error payload.
    BulkError(String),

    /// `=15\r\ntxt:...\r\n` — bulk string with a 3-byte format tag.
    Verbatim { format: [u8; 3], data: Bytes },

    /// `%2\r\n...` — key/value pairs; the wire count is the pair count.
    Map(Vec<(Resp, Resp)>),

    /// `~3\r\n...` — unordered aggregate.
    Set(Vec<Resp>),

    /// `>2\r\n...` — out-of-band push message.
    Push(Vec<Resp>),

    /// `(3492890328409238509324850943850943825024385\r\n`.
    BigNumber(String),
}

impl Resp {
    /// Returns `true` for the null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Resp::Null)
    }

    /// Convenience constructor for a bulk string from a static slice.
    pub fn bulk(data: &'static [u8]) -> Resp {
        Resp::Bulk(Bytes::from_static(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality() {
        assert_eq!(Resp::Simple("OK".into()), Resp::Simple("OK".into()));
        assert_ne!(Resp::Integer(1), Resp::Integer(2));
        assert_eq!(Resp::Null, Resp::Null);
        assert_eq!(Resp::Boolean(true), Resp::Boolean(true));
    }

    #[test]
    fn is_null() {
        assert!(Resp::Null.is_null());
        assert!(!Resp::bulk(b"").is_null());
        assert!(!Resp::Integer(0).is_null());
    }
}
