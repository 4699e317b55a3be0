//! cinder-protocol: RESP2/RESP3 wire protocol implementation.
//!
//! Provides an incremental, stack-based reader that accepts arbitrary
//! byte chunks, a direct-to-buffer serializer for every reply type, and
//! the legacy inline-command tokenizer.
//!
//! # quick start
//!
//! ```
//! use bytes::BytesMut;
//! use cinder_protocol::{Resp, RespReader};
//!
//! let mut reader = RespReader::new();
//! reader.feed(b"+OK\r\n");
//! let reply = reader.next_reply().unwrap().unwrap();
//! assert_eq!(reply, Resp::Simple("OK".into()));
//!
//! // serialize it back
//! let mut buf = BytesMut::new();
//! reply.serialize(&mut buf);
//! assert_eq!(&buf[..], b"+OK\r\n");
//! ```

pub mod error;
pub mod inline;
pub mod reader;
pub mod serialize;
pub mod value;

pub use error::ProtocolError;
pub use reader::RespReader;
pub use serialize::encode_command;
pub use value::Resp;
