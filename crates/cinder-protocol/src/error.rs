//! Protocol error types.
//!
//! Every variant renders with the `Protocol error` prefix clients expect
//! to see before their connection is closed.

use thiserror::Error;

/// Errors raised while decoding the wire format.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The first byte of a frame didn't match any known type prefix.
    #[error("Protocol error: got {0:#04x} as reply type byte")]
    BadTypeByte(u8),

    /// An integer field (length prefix, `:` value) failed to parse.
    #[error("Protocol error: bad integer value")]
    BadInteger,

    /// A bulk string or aggregate declared a length outside the
    /// permitted range.
    #[error("Protocol error: length out of range")]
    LengthOutOfRange,

    /// A verbatim string payload was missing the `fmt:` separator.
    #[error("Protocol error: verbatim string 4 bytes of content type are missing")]
    MissingVerbatimSeparator,

    /// A simple string or error line contained a stray CR or LF.
    #[error("Protocol error: newline embedded in simple string")]
    EmbeddedNewline,

    /// A double value failed to parse.
    #[error("Protocol error: bad double value")]
    BadDouble,

    /// A boolean frame held something other than `t` or `f`.
    #[error("Protocol error: bad boolean value")]
    BadBoolean,

    /// A null frame carried payload bytes.
    #[error("Protocol error: bad nil value")]
    BadNil,

    /// A big number frame held non-digit characters.
    #[error("Protocol error: bad big number value")]
    BadBigNumber,

    /// Aggregates nested beyond the supported depth.
    #[error("Protocol error: aggregates nested too deeply")]
    NestingTooDeep,

    /// An inline request had a quote with no closing partner.
    #[error("Protocol error: unbalanced quotes in request")]
    UnbalancedQuotes,

    /// An inline request exceeded the inline size limit.
    #[error("Protocol error: too big inline request")]
    InlineTooLarge,

    /// A multibulk request declared an invalid element count.
    #[error("Protocol error: invalid multibulk length")]
    BadMultibulkLength,

    /// A multibulk request declared an invalid bulk length.
    #[error("Protocol error: invalid bulk length")]
    BadBulkLength,

    /// A multibulk element did not start with `$`.
    #[error("Protocol error: expected '$', got {0:#04x}")]
    ExpectedBulk(u8),
}
