//! Incremental, stack-based protocol reader.
//!
//! The reader is fed arbitrary byte chunks and yields one complete value
//! at a time. Nested aggregates are parsed iteratively with an explicit
//! task stack: each aggregate pushes a task recording how many elements
//! it still needs; when a task's count reaches zero it pops and its
//! parent advances. No recursion, so hostile nesting depth costs a
//! bounded stack.
//!
//! Partial input is handled transactionally — an item either parses
//! completely (consuming its bytes) or not at all, so a read that ends
//! mid-frame resumes cleanly when more bytes arrive.
//!
//! On malformed input the reader records the error, discards its buffer,
//! and returns the stored error from every subsequent call until
//! [`RespReader::reset`].

use bytes::BytesMut;

use crate::error::ProtocolError;
use crate::value::Resp;

/// Maximum bulk payload size (512 MB).
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Maximum declared element count for an aggregate.
const MAX_ELEMENTS: i64 = 1024 * 1024;

/// Maximum aggregate nesting depth.
const MAX_DEPTH: usize = 64;

/// Consumed-byte threshold past which the buffer is compacted.
const COMPACT_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AggKind {
    Array,
    Map,
    Set,
    Push,
    /// The metadata pairs of an attribute frame, discarded on completion.
    Attribute,
    /// The single payload value an attribute frame decorates.
    AttributePayload,
}

struct Task {
    kind: AggKind,
    remaining: usize,
    items: Vec<Resp>,
}

enum Step {
    Value(Resp),
    Begin(AggKind, usize),
}

/// Stateful reader for the RESP2/RESP3 grammar.
pub struct RespReader {
    buf: BytesMut,
    pos: usize,
    stack: Vec<Task>,
    err: Option<ProtocolError>,
}

impl RespReader {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            pos: 0,
            stack: Vec::new(),
            err: None,
        }
    }

    /// Appends raw bytes from the transport. Ignored while the reader is
    /// in an error state (the buffer has already been discarded).
    pub fn feed(&mut self, data: &[u8]) {
        if self.err.is_none() {
            self.buf.extend_from_slice(data);
        }
    }

    /// Number of buffered bytes not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Clears the error state and all buffered data.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.pos = 0;
        self.stack.clear();
        self.err = None;
    }

    /// Yields the next complete value, `Ok(None)` when more bytes are
    /// needed, or the stored error once the stream is poisoned.
    pub fn next_reply(&mut self) -> Result<Option<Resp>, ProtocolError> {
        if let Some(e) = &self.err {
            return Err(e.clone());
        }

        loop {
            let step = match self.parse_item() {
                Ok(Some(step)) => step,
                Ok(None) => {
                    self.compact();
                    return Ok(None);
                }
                Err(e) => {
                    self.fail(e.clone());
                    return Err(e);
                }
            };

            match step {
                Step::Begin(AggKind::Attribute, 0) => {
                    // no metadata pairs; the decorated payload still follows
                    self.stack.push(Task {
                        kind: AggKind::AttributePayload,
                        remaining: 1,
                        items: Vec::new(),
                    });
                }
                Step::Begin(kind, 0) => {
                    if let Some(reply) = self.complete(empty_aggregate(kind)) {
                        self.compact();
                        return Ok(Some(reply));
                    }
                }
                Step::Begin(kind, n) => {
                    if self.stack.len() >= MAX_DEPTH {
                        let e = ProtocolError::NestingTooDeep;
                        self.fail(e.clone());
                        return Err(e);
                    }
                    self.stack.push(Task {
                        kind,
                        remaining: n,
                        items: Vec::new(),
                    });
                }
                Step::Value(v) => {
                    if let Some(reply) = self.complete(v) {
                        self.compact();
                        return Ok(Some(reply));
                    }
                }
            }
        }
    }

    /// Feeds a completed value into the task stack. Returns the full
    /// reply once the root completes.
    fn complete(&mut self, value: Resp) -> Option<Resp> {
        let mut value = value;
        loop {
            let Some(top) = self.stack.last_mut() else {
                return Some(value);
            };
            top.items.push(value);
            top.remaining -= 1;
            if top.remaining > 0 {
                return None;
            }

            let task = self.stack.pop().expect("stack top just observed");
            match task.kind {
                AggKind::Array => value = Resp::Array(task.items),
                AggKind::Set => value = Resp::Set(task.items),
                AggKind::Push => value = Resp::Push(task.items),
                AggKind::Map => value = Resp::Map(pair_up(task.items)),
                AggKind::Attribute => {
                    // metadata pairs parsed; drop them and wait for the
                    // payload value they decorate
                    self.stack.push(Task {
                        kind: AggKind::AttributePayload,
                        remaining: 1,
                        items: Vec::new(),
                    });
                    return None;
                }
                AggKind::AttributePayload => {
                    let mut items = task.items;
                    value = items.pop().expect("payload task holds one value");
                }
            }
        }
    }

    /// Parses one typed item starting at the current position.
    /// Transactional: the position only advances when the whole item
    /// (including any bulk payload) is available.
    fn parse_item(&mut self) -> Result<Option<Step>, ProtocolError> {
        let buf = &self.buf[..];
        let mut cur = self.pos;

        let Some(&type_byte) = buf.get(cur) else {
            return Ok(None);
        };
        cur += 1;

        let step = match type_byte {
            b'+' | b'-' => {
                let Some(line) = read_line(buf, &mut cur) else {
                    return Ok(None);
                };
                if memchr::memchr2(b'\r', b'\n', line).is_some() {
                    return Err(ProtocolError::EmbeddedNewline);
                }
                let text = String::from_utf8_lossy(line).into_owned();
                if type_byte == b'+' {
                    Step::Value(Resp::Simple(text))
                } else {
                    Step::Value(Resp::Error(text))
                }
            }
            b':' => {
                let Some(line) = read_line(buf, &mut cur) else {
                    return Ok(None);
                };
                Step::Value(Resp::Integer(parse_i64(line)?))
            }
            b',' => {
                let Some(line) = read_line(buf, &mut cur) else {
                    return Ok(None);
                };
                Step::Value(Resp::Double(parse_double(line)?))
            }
            b'_' => {
                let Some(line) = read_line(buf, &mut cur) else {
                    return Ok(None);
                };
                if !line.is_empty() {
                    return Err(ProtocolError::BadNil);
                }
                Step::Value(Resp::Null)
            }
            b'#' => {
                let Some(line) = read_line(buf, &mut cur) else {
                    return Ok(None);
                };
                let value = match line {
                    [b't'] | [b'T'] => true,
                    [b'f'] | [b'F'] => false,
                    _ => return Err(ProtocolError::BadBoolean),
                };
                Step::Value(Resp::Boolean(value))
            }
            b'(' => {
                let Some(line) = read_line(buf, &mut cur) else {
                    return Ok(None);
                };
                let digits = line.strip_prefix(b"-").unwrap_or(line);
                if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
                    return Err(ProtocolError::BadBigNumber);
                }
                Step::Value(Resp::BigNumber(
                    String::from_utf8_lossy(line).into_owned(),
                ))
            }
            b'$' | b'=' | b'!' => {
                let Some(line) = read_line(buf, &mut cur) else {
                    return Ok(None);
                };
                let len = parse_i64(line)?;
                if len == -1 {
                    Step::Value(Resp::Null)
                } else {
                    if len < 0 || len > MAX_BULK_LEN {
                        return Err(ProtocolError::LengthOutOfRange);
                    }
                    let len = len as usize;
                    if buf.len() - cur < len + 2 {
                        return Ok(None);
                    }
                    if buf[cur + len] != b'\r' || buf[cur + len + 1] != b'\n' {
                        return Err(ProtocolError::BadBulkLength);
                    }
                    let payload = &buf[cur..cur + len];
                    let value = match type_byte {
                        b'$' => Resp::Bulk(bytes::Bytes::copy_from_slice(payload)),
                        b'!' => Resp::BulkError(String::from_utf8_lossy(payload).into_owned()),
                        _ => {
                            // verbatim: 3-byte format tag, ':', then content
                            if len < 4 || payload[3] != b':' {
                                return Err(ProtocolError::MissingVerbatimSeparator);
                            }
                            Resp::Verbatim {
                                format: [payload[0], payload[1], payload[2]],
                                data: bytes::Bytes::copy_from_slice(&payload[4..]),
                            }
                        }
                    };
                    cur += len + 2;
                    Step::Value(value)
                }
            }
            b'*' | b'%' | b'~' | b'>' | b'|' => {
                let Some(line) = read_line(buf, &mut cur) else {
                    return Ok(None);
                };
                let count = parse_i64(line)?;
                if count == -1 && type_byte == b'*' {
                    // legacy null array
                    Step::Value(Resp::Null)
                } else {
                    if count < 0 || count > MAX_ELEMENTS {
                        return Err(ProtocolError::LengthOutOfRange);
                    }
                    let (kind, elements) = match type_byte {
                        b'*' => (AggKind::Array, count as usize),
                        b'~' => (AggKind::Set, count as usize),
                        b'>' => (AggKind::Push, count as usize),
                        // the wire count is the pair count; elements are doubled
                        b'%' => (AggKind::Map, count as usize * 2),
                        _ => (AggKind::Attribute, count as usize * 2),
                    };
                    Step::Begin(kind, elements)
                }
            }
            other => return Err(ProtocolError::BadTypeByte(other)),
        };

        self.pos = cur;
        Ok(Some(step))
    }

    /// Poisons the reader: the buffer is discarded and every subsequent
    /// read returns the stored error.
    fn fail(&mut self, e: ProtocolError) {
        self.buf.clear();
        self.pos = 0;
        self.stack.clear();
        self.err = Some(e);
    }

    /// Drops consumed bytes once enough have accumulated.
    fn compact(&mut self) {
        if self.pos >= COMPACT_THRESHOLD {
            let _ = self.buf.split_to(self.pos);
            self.pos = 0;
        }
    }
}

impl Default for RespReader {
    fn default() -> Self {
        Self::new()
    }
}

fn empty_aggregate(kind: AggKind) -> Resp {
    match kind {
        AggKind::Array => Resp::Array(Vec::new()),
        AggKind::Map => Resp::Map(Vec::new()),
        AggKind::Set => Resp::Set(Vec::new()),
        AggKind::Push => Resp::Push(Vec::new()),
        // attribute kinds never complete empty through this path
        AggKind::Attribute | AggKind::AttributePayload => Resp::Null,
    }
}

fn pair_up(items: Vec<Resp>) -> Vec<(Resp, Resp)> {
    let mut pairs = Vec::with_capacity(items.len() / 2);
    let mut it = items.into_iter();
    while let (Some(k), Some(v)) = (it.next(), it.next()) {
        pairs.push((k, v));
    }
    pairs
}

/// Returns the line content between `*cur` and the next CRLF, advancing
/// the cursor past the terminator. `None` when no CRLF is buffered yet.
fn read_line<'a>(buf: &'a [u8], cur: &mut usize) -> Option<&'a [u8]> {
    let start = *cur;
    let mut search = start;
    while let Some(offset) = memchr::memchr(b'\r', &buf[search..]) {
        let cr = search + offset;
        if cr + 1 < buf.len() {
            if buf[cr + 1] == b'\n' {
                *cur = cr + 2;
                return Some(&buf[start..cr]);
            }
            // bare \r: keep scanning; line validation catches it
            search = cr + 1;
        } else {
            return None;
        }
    }
    None
}

/// Parses a decimal i64 without allocating. Accumulates negatives
/// downward so `i64::MIN` stays representable.
fn parse_i64(line: &[u8]) -> Result<i64, ProtocolError> {
    if line.is_empty() {
        return Err(ProtocolError::BadInteger);
    }
    let (negative, digits) = match line[0] {
        b'-' => (true, &line[1..]),
        _ => (false, line),
    };
    if digits.is_empty() {
        return Err(ProtocolError::BadInteger);
    }

    let mut n: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(ProtocolError::BadInteger);
        }
        let d = (b - b'0') as i64;
        n = if negative {
            n.checked_mul(10).and_then(|n| n.checked_sub(d))
        } else {
            n.checked_mul(10).and_then(|n| n.checked_add(d))
        }
        .ok_or(ProtocolError::BadInteger)?;
    }
    Ok(n)
}

fn parse_double(line: &[u8]) -> Result<f64, ProtocolError> {
    let text = std::str::from_utf8(line).map_err(|_| ProtocolError::BadDouble)?;
    match text {
        t if t.eq_ignore_ascii_case("inf") => Ok(f64::INFINITY),
        t if t.eq_ignore_ascii_case("-inf") => Ok(f64::NEG_INFINITY),
        t if t.eq_ignore_ascii_case("nan") || t.eq_ignore_ascii_case("-nan") => Ok(f64::NAN),
        t => t.parse().map_err(|_| ProtocolError::BadDouble),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn read_one(input: &[u8]) -> Resp {
        let mut r = RespReader::new();
        r.feed(input);
        let reply = r
            .next_reply()
            .expect("parse should not error")
            .expect("input holds a complete value");
        assert_eq!(r.buffered(), 0, "should consume entire input");
        reply
    }

    fn read_err(input: &[u8]) -> ProtocolError {
        let mut r = RespReader::new();
        r.feed(input);
        r.next_reply().expect_err("input is malformed")
    }

    #[test]
    fn simple_string() {
        assert_eq!(read_one(b"+OK\r\n"), Resp::Simple("OK".into()));
        assert_eq!(
            read_one(b"+hello world\r\n"),
            Resp::Simple("hello world".into())
        );
    }

    #[test]
    fn error_line() {
        assert_eq!(
            read_one(b"-ERR unknown command\r\n"),
            Resp::Error("ERR unknown command".into())
        );
    }

    #[test]
    fn integers() {
        assert_eq!(read_one(b":42\r\n"), Resp::Integer(42));
        assert_eq!(read_one(b":0\r\n"), Resp::Integer(0));
        assert_eq!(read_one(b":-1\r\n"), Resp::Integer(-1));
        assert_eq!(
            read_one(b":9223372036854775807\r\n"),
            Resp::Integer(i64::MAX)
        );
        assert_eq!(
            read_one(b":-9223372036854775808\r\n"),
            Resp::Integer(i64::MIN)
        );
    }

    #[test]
    fn bulk_strings() {
        assert_eq!(read_one(b"$5\r\nhello\r\n"), Resp::bulk(b"hello"));
        assert_eq!(read_one(b"$0\r\n\r\n"), Resp::bulk(b""));
        assert_eq!(
            read_one(b"$4\r\n\x00\x01\x02\x03\r\n"),
            Resp::Bulk(Bytes::copy_from_slice(&[0, 1, 2, 3]))
        );
    }

    #[test]
    fn null_bulk_and_null_array_are_null() {
        assert_eq!(read_one(b"$-1\r\n"), Resp::Null);
        assert_eq!(read_one(b"*-1\r\n"), Resp::Null);
        assert_eq!(read_one(b"_\r\n"), Resp::Null);
    }

    #[test]
    fn doubles() {
        assert_eq!(read_one(b",3.25\r\n"), Resp::Double(3.25));
        assert_eq!(read_one(b",-1.5\r\n"), Resp::Double(-1.5));
        assert_eq!(read_one(b",10\r\n"), Resp::Double(10.0));
        assert_eq!(read_one(b",inf\r\n"), Resp::Double(f64::INFINITY));
        assert_eq!(read_one(b",-inf\r\n"), Resp::Double(f64::NEG_INFINITY));
    }

    #[test]
    fn booleans() {
        assert_eq!(read_one(b"#t\r\n"), Resp::Boolean(true));
        assert_eq!(read_one(b"#f\r\n"), Resp::Boolean(false));
        assert_eq!(read_one(b"#T\r\n"), Resp::Boolean(true));
        assert_eq!(read_err(b"#x\r\n"), ProtocolError::BadBoolean);
    }

    #[test]
    fn big_numbers() {
        assert_eq!(
            read_one(b"(3492890328409238509324850943850943825024385\r\n"),
            Resp::BigNumber("3492890328409238509324850943850943825024385".into())
        );
        assert_eq!(
            read_one(b"(-123\r\n"),
            Resp::BigNumber("-123".into())
        );
        assert_eq!(read_err(b"(12a\r\n"), ProtocolError::BadBigNumber);
    }

    #[test]
    fn bulk_error() {
        assert_eq!(
            read_one(b"!21\r\nSYNTAX invalid syntax\r\n"),
            Resp::BulkError("SYNTAX invalid syntax".into())
        );
    }

    #[test]
    fn verbatim_string() {
        assert_eq!(
            read_one(b"=15\r\ntxt:Some string\r\n"),
            Resp::Verbatim {
                format: *b"txt",
                data: Bytes::from_static(b"Some string"),
            }
        );
    }

    #[test]
    fn verbatim_missing_separator() {
        assert_eq!(
            read_err(b"=15\r\ntxtXSome string\r\n"),
            ProtocolError::MissingVerbatimSeparator
        );
    }

    #[test]
    fn arrays() {
        assert_eq!(
            read_one(b"*2\r\n+hello\r\n+world\r\n"),
            Resp::Array(vec![
                Resp::Simple("hello".into()),
                Resp::Simple("world".into())
            ])
        );
        assert_eq!(read_one(b"*0\r\n"), Resp::Array(vec![]));
    }

    #[test]
    fn nested_aggregates() {
        assert_eq!(
            read_one(b"*2\r\n*2\r\n:1\r\n:2\r\n*1\r\n:3\r\n"),
            Resp::Array(vec![
                Resp::Array(vec![Resp::Integer(1), Resp::Integer(2)]),
                Resp::Array(vec![Resp::Integer(3)]),
            ])
        );
    }

    #[test]
    fn map_doubles_the_wire_count() {
        assert_eq!(
            read_one(b"%2\r\n+a\r\n:1\r\n+b\r\n:2\r\n"),
            Resp::Map(vec![
                (Resp::Simple("a".into()), Resp::Integer(1)),
                (Resp::Simple("b".into()), Resp::Integer(2)),
            ])
        );
        assert_eq!(read_one(b"%0\r\n"), Resp::Map(vec![]));
    }

    #[test]
    fn set_and_push() {
        assert_eq!(
            read_one(b"~2\r\n:1\r\n:2\r\n"),
            Resp::Set(vec![Resp::Integer(1), Resp::Integer(2)])
        );
        assert_eq!(
            read_one(b">2\r\n+message\r\n+hi\r\n"),
            Resp::Push(vec![
                Resp::Simple("message".into()),
                Resp::Simple("hi".into())
            ])
        );
    }

    #[test]
    fn attributes_are_discarded() {
        // |1 with one key-value pair, decorating an integer
        assert_eq!(
            read_one(b"|1\r\n+ttl\r\n:3600\r\n:42\r\n"),
            Resp::Integer(42)
        );
        // zero attributes still decorate the next value
        assert_eq!(read_one(b"|0\r\n+OK\r\n"), Resp::Simple("OK".into()));
    }

    #[test]
    fn attribute_inside_array() {
        assert_eq!(
            read_one(b"*2\r\n|1\r\n+a\r\n:1\r\n:7\r\n:8\r\n"),
            Resp::Array(vec![Resp::Integer(7), Resp::Integer(8)])
        );
    }

    #[test]
    fn partial_input_resumes() {
        let mut r = RespReader::new();
        let frame = b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n";
        for &b in &frame[..frame.len() - 1] {
            r.feed(&[b]);
            assert_eq!(r.next_reply().unwrap(), None);
        }
        r.feed(&frame[frame.len() - 1..]);
        assert_eq!(
            r.next_reply().unwrap(),
            Some(Resp::Array(vec![Resp::bulk(b"GET"), Resp::bulk(b"foo")]))
        );
    }

    #[test]
    fn pipelined_frames_in_one_feed() {
        let mut r = RespReader::new();
        r.feed(b"+one\r\n+two\r\n:3\r\n");
        assert_eq!(r.next_reply().unwrap(), Some(Resp::Simple("one".into())));
        assert_eq!(r.next_reply().unwrap(), Some(Resp::Simple("two".into())));
        assert_eq!(r.next_reply().unwrap(), Some(Resp::Integer(3)));
        assert_eq!(r.next_reply().unwrap(), None);
    }

    #[test]
    fn unknown_type_byte() {
        assert_eq!(read_err(b"?weird\r\n"), ProtocolError::BadTypeByte(b'?'));
    }

    #[test]
    fn bad_integer() {
        assert_eq!(read_err(b":abc\r\n"), ProtocolError::BadInteger);
        assert_eq!(read_err(b":\r\n"), ProtocolError::BadInteger);
        assert_eq!(read_err(b":-\r\n"), ProtocolError::BadInteger);
    }

    #[test]
    fn negative_bulk_length_out_of_range() {
        assert_eq!(read_err(b"$-2\r\n"), ProtocolError::LengthOutOfRange);
        assert_eq!(read_err(b"*-2\r\n"), ProtocolError::LengthOutOfRange);
    }

    #[test]
    fn error_state_is_sticky_until_reset() {
        let mut r = RespReader::new();
        r.feed(b"?bogus\r\n");
        let first = r.next_reply().unwrap_err();
        assert_eq!(first, ProtocolError::BadTypeByte(b'?'));

        // buffer was discarded; feeding good data changes nothing
        r.feed(b"+OK\r\n");
        assert_eq!(r.next_reply().unwrap_err(), first);
        assert_eq!(r.buffered(), 0);

        r.reset();
        r.feed(b"+OK\r\n");
        assert_eq!(r.next_reply().unwrap(), Some(Resp::Simple("OK".into())));
    }

    #[test]
    fn nesting_depth_is_bounded() {
        let mut input = Vec::new();
        for _ in 0..MAX_DEPTH + 1 {
            input.extend_from_slice(b"*1\r\n");
        }
        input.extend_from_slice(b":1\r\n");
        assert_eq!(read_err(&input), ProtocolError::NestingTooDeep);
    }

    #[test]
    fn embedded_cr_in_simple_string() {
        assert_eq!(read_err(b"+bad\rvalue\r\n"), ProtocolError::EmbeddedNewline);
    }

    #[test]
    fn long_stream_compacts_without_losing_frames() {
        let mut r = RespReader::new();
        for i in 0..500 {
            r.feed(format!(":{i}\r\n").as_bytes());
        }
        for i in 0..500 {
            assert_eq!(r.next_reply().unwrap(), Some(Resp::Integer(i)));
        }
        assert_eq!(r.next_reply().unwrap(), None);
    }
}
