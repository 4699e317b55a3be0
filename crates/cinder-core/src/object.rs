//! The tagged value container stored in the keyspace.
//!
//! An [`Object`] carries its type, a wire-level encoding, a 24-bit LRU
//! clock stamp, and the payload itself. The payload is a closed enum —
//! dispatch is by `match`, never by downcasting.

use std::collections::{HashMap, HashSet, VecDeque};

use bytes::Bytes;

use crate::memory::{MemUsage, COLLECTION_HEADER, STRING_HEADER};

/// Strings up to this many bytes are stored with the embedded encoding.
const EMBSTR_SIZE_LIMIT: usize = 44;

/// The user-visible type of a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    String,
    List,
    Set,
    ZSet,
    Hash,
    Stream,
}

impl ObjectKind {
    /// Returns the type name as reported to clients.
    pub fn name(self) -> &'static str {
        match self {
            ObjectKind::String => "string",
            ObjectKind::List => "list",
            ObjectKind::Set => "set",
            ObjectKind::ZSet => "zset",
            ObjectKind::Hash => "hash",
            ObjectKind::Stream => "stream",
        }
    }
}

/// Internal representation of a value, refining its [`ObjectKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Raw,
    Int,
    EmbStr,
    Ht,
    ZipList,
    IntSet,
    SkipList,
    QuickList,
    Stream,
    ListPack,
    ZipMap,
    LinkedList,
}

impl Encoding {
    /// `true` when the payload is an opaque byte sequence that reply
    /// emission can write as-is (integers must be formatted first).
    pub fn is_embedded(self) -> bool {
        matches!(self, Encoding::Raw | Encoding::EmbStr)
    }
}

/// One entry of a stream payload: an id pair plus field-value pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: (u64, u64),
    pub fields: Vec<(Bytes, Bytes)>,
}

/// The payload variants an [`Object`] can hold.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Binary-safe string data.
    Str(Bytes),
    /// A string that is exactly a 64-bit integer.
    Int(i64),
    /// Ordered sequence of binary-safe elements.
    List(VecDeque<Bytes>),
    /// Unordered set of unique members.
    Set(HashSet<Bytes>),
    /// Field-to-value map.
    Hash(HashMap<Bytes, Bytes>),
    /// Scored members, kept in insertion order at this layer.
    ZSet(Vec<(Bytes, f64)>),
    /// Append-only entries with stream ids.
    Stream(Vec<StreamEntry>),
}

/// A stored value: type tag, encoding, LRU stamp, payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    kind: ObjectKind,
    encoding: Encoding,
    /// 24-bit LRU clock stamp (see [`crate::evict`]).
    lru: u32,
    payload: Payload,
}

impl Object {
    /// Creates an object from explicit parts. The caller is responsible
    /// for pairing a valid encoding with the payload variant.
    pub fn new(kind: ObjectKind, encoding: Encoding, lru: u32, payload: Payload) -> Self {
        debug_assert!(encoding_valid_for(kind, encoding));
        Self {
            kind,
            encoding,
            lru,
            payload,
        }
    }

    /// Creates a string object, picking the encoding the way the data
    /// plane expects: pure decimal integers get `Int`, short strings
    /// `EmbStr`, everything else `Raw`.
    pub fn string(data: Bytes, lru: u32) -> Self {
        if let Some(n) = parse_exact_i64(&data) {
            return Self::new(ObjectKind::String, Encoding::Int, lru, Payload::Int(n));
        }
        let encoding = if data.len() <= EMBSTR_SIZE_LIMIT {
            Encoding::EmbStr
        } else {
            Encoding::Raw
        };
        Self::new(ObjectKind::String, encoding, lru, Payload::Str(data))
    }

    /// Creates an integer-encoded string object.
    pub fn from_int(n: i64, lru: u32) -> Self {
        Self::new(ObjectKind::String, Encoding::Int, lru, Payload::Int(n))
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Current LRU clock stamp.
    pub fn lru(&self) -> u32 {
        self.lru
    }

    /// Refreshes the LRU stamp to the given clock value.
    pub fn touch(&mut self, clock: u32) {
        self.lru = clock;
    }

    /// Returns the string payload as bytes, formatting `Int`-encoded
    /// values to decimal ASCII. `None` for non-string objects.
    pub fn string_bytes(&self) -> Option<Bytes> {
        match &self.payload {
            Payload::Str(data) => Some(data.clone()),
            Payload::Int(n) => Some(Bytes::from(n.to_string().into_bytes())),
            _ => None,
        }
    }
}

impl MemUsage for Object {
    fn mem_usage(&self) -> usize {
        match &self.payload {
            Payload::Str(data) => STRING_HEADER + data.len(),
            Payload::Int(_) => std::mem::size_of::<i64>(),
            Payload::List(items) => {
                COLLECTION_HEADER
                    + items
                        .iter()
                        .map(|b| STRING_HEADER + b.len())
                        .sum::<usize>()
            }
            Payload::Set(members) => {
                COLLECTION_HEADER
                    + members
                        .iter()
                        .map(|m| STRING_HEADER + m.len())
                        .sum::<usize>()
            }
            Payload::Hash(map) => {
                COLLECTION_HEADER
                    + map
                        .iter()
                        .map(|(k, v)| 2 * STRING_HEADER + k.len() + v.len())
                        .sum::<usize>()
            }
            Payload::ZSet(members) => {
                COLLECTION_HEADER
                    + members
                        .iter()
                        .map(|(m, _)| STRING_HEADER + m.len() + std::mem::size_of::<f64>())
                        .sum::<usize>()
            }
            Payload::Stream(entries) => {
                COLLECTION_HEADER
                    + entries
                        .iter()
                        .map(|e| {
                            16 + e
                                .fields
                                .iter()
                                .map(|(k, v)| 2 * STRING_HEADER + k.len() + v.len())
                                .sum::<usize>()
                        })
                        .sum::<usize>()
            }
        }
    }
}

/// Checks the encoding/kind pairing invariant.
fn encoding_valid_for(kind: ObjectKind, encoding: Encoding) -> bool {
    match kind {
        ObjectKind::String => matches!(encoding, Encoding::Raw | Encoding::Int | Encoding::EmbStr),
        ObjectKind::List => matches!(
            encoding,
            Encoding::QuickList | Encoding::ZipList | Encoding::ListPack | Encoding::LinkedList
        ),
        ObjectKind::Set => matches!(encoding, Encoding::Ht | Encoding::IntSet | Encoding::ListPack),
        ObjectKind::ZSet => matches!(encoding, Encoding::SkipList | Encoding::ZipList | Encoding::ListPack),
        ObjectKind::Hash => matches!(encoding, Encoding::Ht | Encoding::ZipMap | Encoding::ListPack),
        ObjectKind::Stream => matches!(encoding, Encoding::Stream),
    }
}

/// Parses a byte slice that is *exactly* a canonical decimal i64
/// (no leading zeros, no sign on zero). Returns `None` otherwise, so
/// values like `"007"` keep their raw representation.
fn parse_exact_i64(data: &[u8]) -> Option<i64> {
    if data.is_empty() || data.len() > 20 {
        return None;
    }
    let s = std::str::from_utf8(data).ok()?;
    let n: i64 = s.parse().ok()?;
    // round-trip check rejects leading zeros and "+42" style input
    if n.to_string().as_bytes() == data {
        Some(n)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_string_is_embedded() {
        let obj = Object::string(Bytes::from_static(b"hello"), 0);
        assert_eq!(obj.kind(), ObjectKind::String);
        assert_eq!(obj.encoding(), Encoding::EmbStr);
        assert!(obj.encoding().is_embedded());
    }

    #[test]
    fn long_string_is_raw() {
        let data = Bytes::from(vec![b'x'; EMBSTR_SIZE_LIMIT + 1]);
        let obj = Object::string(data, 0);
        assert_eq!(obj.encoding(), Encoding::Raw);
    }

    #[test]
    fn integer_string_gets_int_encoding() {
        let obj = Object::string(Bytes::from_static(b"12345"), 0);
        assert_eq!(obj.encoding(), Encoding::Int);
        assert!(!obj.encoding().is_embedded());
        assert_eq!(obj.string_bytes().unwrap(), Bytes::from_static(b"12345"));
    }

    #[test]
    fn leading_zero_is_not_int_encoded() {
        let obj = Object::string(Bytes::from_static(b"007"), 0);
        assert_eq!(obj.encoding(), Encoding::EmbStr);
    }

    #[test]
    fn negative_integer_round_trips() {
        let obj = Object::string(Bytes::from_static(b"-42"), 0);
        assert_eq!(obj.encoding(), Encoding::Int);
        assert_eq!(obj.string_bytes().unwrap(), Bytes::from_static(b"-42"));
    }

    #[test]
    fn touch_updates_lru() {
        let mut obj = Object::string(Bytes::from_static(b"v"), 10);
        assert_eq!(obj.lru(), 10);
        obj.touch(99);
        assert_eq!(obj.lru(), 99);
    }

    #[test]
    fn string_mem_usage_tracks_length() {
        let short = Object::string(Bytes::from_static(b"ab"), 0);
        let long = Object::string(Bytes::from(vec![b'y'; 100]), 0);
        assert!(long.mem_usage() > short.mem_usage());
        assert_eq!(long.mem_usage(), STRING_HEADER + 100);
    }

    #[test]
    fn non_string_has_no_string_bytes() {
        let obj = Object::new(
            ObjectKind::List,
            Encoding::QuickList,
            0,
            Payload::List(VecDeque::new()),
        );
        assert!(obj.string_bytes().is_none());
    }
}
