//! Direct-to-buffer serialization.
//!
//! Writes values into a `BytesMut` with no intermediate allocations.
//! Integer-to-ASCII conversion goes through `itoa` for stack-based
//! formatting. [`encode_command`] builds the client-side request frame
//! for a command name plus arguments.

use bytes::{BufMut, BytesMut};

use crate::value::Resp;

impl Resp {
    /// Serializes this value into `dst`, including the type prefix and
    /// trailing CRLF delimiters.
    pub fn serialize(&self, dst: &mut BytesMut) {
        match self {
            Resp::Simple(s) => {
                dst.put_u8(b'+');
                dst.put_slice(s.as_bytes());
                dst.put_slice(b"\r\n");
            }
            Resp::Error(msg) => {
                dst.put_u8(b'-');
                dst.put_slice(msg.as_bytes());
                dst.put_slice(b"\r\n");
            }
            Resp::Integer(n) => {
                dst.put_u8(b':');
                write_i64(*n, dst);
                dst.put_slice(b"\r\n");
            }
            Resp::Bulk(data) => {
                dst.put_u8(b'$');
                write_i64(data.len() as i64, dst);
                dst.put_slice(b"\r\n");
                dst.put_slice(data);
                dst.put_slice(b"\r\n");
            }
            Resp::Array(items) => {
                dst.put_u8(b'*');
                write_i64(items.len() as i64, dst);
                dst.put_slice(b"\r\n");
                for item in items {
                    item.serialize(dst);
                }
            }
            Resp::Null => {
                dst.put_slice(b"_\r\n");
            }
            Resp::Double(d) => {
                dst.put_u8(b',');
                if d.is_infinite() {
                    dst.put_slice(if *d > 0.0 { b"inf" } else { b"-inf" });
                } else if d.is_nan() {
                    dst.put_slice(b"nan");
                } else {
                    dst.put_slice(d.to_string().as_bytes());
                }
                dst.put_slice(b"\r\n");
            }
            Resp::Boolean(b) => {
                dst.put_slice(if *b { b"#t\r\n" } else { b"#f\r\n" });
            }
            Resp::BulkError(msg) => {
                dst.put_u8(b'!');
                write_i64(msg.len() as i64, dst);
                dst.put_slice(b"\r\n");
                dst.put_slice(msg.as_bytes());
                dst.put_slice(b"\r\n");
            }
            Resp::Verbatim { format, data } => {
                dst.put_u8(b'=');
                write_i64(data.len() as i64 + 4, dst);
                dst.put_slice(b"\r\n");
                dst.put_slice(format);
                dst.put_u8(b':');
                dst.put_slice(data);
                dst.put_slice(b"\r\n");
            }
            Resp::Map(pairs) => {
                dst.put_u8(b'%');
                write_i64(pairs.len() as i64, dst);
                dst.put_slice(b"\r\n");
                for (key, val) in pairs {
                    key.serialize(dst);
                    val.serialize(dst);
                }
            }
            Resp::Set(items) => {
                dst.put_u8(b'~');
                write_i64(items.len() as i64, dst);
                dst.put_slice(b"\r\n");
                for item in items {
                    item.serialize(dst);
                }
            }
            Resp::Push(items) => {
                dst.put_u8(b'>');
                write_i64(items.len() as i64, dst);
                dst.put_slice(b"\r\n");
                for item in items {
                    item.serialize(dst);
                }
            }
            Resp::BigNumber(digits) => {
                dst.put_u8(b'(');
                dst.put_slice(digits.as_bytes());
                dst.put_slice(b"\r\n");
            }
        }
    }
}

/// Builds a complete multibulk request frame for `name` with `args`,
/// the way a client serializes a command.
pub fn encode_command(name: &str, args: &[&[u8]], dst: &mut BytesMut) {
    dst.put_u8(b'*');
    write_i64(args.len() as i64 + 1, dst);
    dst.put_slice(b"\r\n");

    dst.put_u8(b'$');
    write_i64(name.len() as i64, dst);
    dst.put_slice(b"\r\n");
    dst.put_slice(name.as_bytes());
    dst.put_slice(b"\r\n");

    for arg in args {
        dst.put_u8(b'$');
        write_i64(arg.len() as i64, dst);
        dst.put_slice(b"\r\n");
        dst.put_slice(arg);
        dst.put_slice(b"\r\n");
    }
}

/// Writes an i64 as decimal ASCII directly into the buffer.
fn write_i64(val: i64, dst: &mut BytesMut) {
    let mut buf = itoa::Buffer::new();
    dst.put_slice(buf.format(val).as_bytes());
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::reader::RespReader;

    fn serialize(value: &Resp) -> Vec<u8> {
        let mut buf = BytesMut::new();
        value.serialize(&mut buf);
        buf.to_vec()
    }

    #[test]
    fn simple_and_error() {
        assert_eq!(serialize(&Resp::Simple("OK".into())), b"+OK\r\n");
        assert_eq!(serialize(&Resp::Error("ERR bad".into())), b"-ERR bad\r\n");
    }

    #[test]
    fn integers() {
        assert_eq!(serialize(&Resp::Integer(42)), b":42\r\n");
        assert_eq!(serialize(&Resp::Integer(-1)), b":-1\r\n");
    }

    #[test]
    fn bulk() {
        assert_eq!(serialize(&Resp::bulk(b"hello")), b"$5\r\nhello\r\n");
        assert_eq!(serialize(&Resp::bulk(b"")), b"$0\r\n\r\n");
    }

    #[test]
    fn null() {
        assert_eq!(serialize(&Resp::Null), b"_\r\n");
    }

    #[test]
    fn aggregates() {
        let frame = Resp::Array(vec![Resp::Simple("hi".into()), Resp::Integer(1)]);
        assert_eq!(serialize(&frame), b"*2\r\n+hi\r\n:1\r\n");

        let map = Resp::Map(vec![(Resp::Simple("k".into()), Resp::Integer(1))]);
        assert_eq!(serialize(&map), b"%1\r\n+k\r\n:1\r\n");
    }

    #[test]
    fn verbatim() {
        let v = Resp::Verbatim {
            format: *b"txt",
            data: Bytes::from_static(b"Some string"),
        };
        assert_eq!(serialize(&v), b"=15\r\ntxt:Some string\r\n");
    }

    #[test]
    fn encode_command_builds_multibulk() {
        let mut buf = BytesMut::new();
        encode_command("SET", &[b"foo", b"bar"], &mut buf);
        assert_eq!(&buf[..], b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n");
    }

    #[test]
    fn encode_command_no_args() {
        let mut buf = BytesMut::new();
        encode_command("PING", &[], &mut buf);
        assert_eq!(&buf[..], b"*1\r\n$4\r\nPING\r\n");
    }

    #[test]
    fn round_trip_covers_the_grammar() {
        let values = vec![
            Resp::Simple("OK".into()),
            Resp::Error("ERR nope".into()),
            Resp::Integer(i64::MAX),
            Resp::Integer(i64::MIN),
            Resp::bulk(b"binary\x00data"),
            Resp::bulk(b""),
            Resp::Null,
            Resp::Double(3.25),
            Resp::Double(-0.5),
            Resp::Double(f64::INFINITY),
            Resp::Double(f64::NEG_INFINITY),
            Resp::Boolean(true),
            Resp::Boolean(false),
            Resp::BulkError("SYNTAX invalid".into()),
            Resp::Verbatim {
                format: *b"txt",
                data: Bytes::from_static(b"hello"),
            },
            Resp::BigNumber("3492890328409238509324850943850943825024385".into()),
            Resp::Map(vec![
                (Resp::Simple("a".into()), Resp::Integer(1)),
                (Resp::bulk(b"b"), Resp::Null),
            ]),
            Resp::Set(vec![Resp::Integer(1), Resp::Integer(2)]),
            Resp::Push(vec![Resp::Simple("message".into()), Resp::bulk(b"hi")]),
            Resp::Array(vec![
                Resp::Array(vec![Resp::Integer(1)]),
                Resp::Map(vec![(Resp::Simple("x".into()), Resp::Boolean(false))]),
                Resp::Null,
            ]),
        ];

        for original in &values {
            let mut buf = BytesMut::new();
            original.serialize(&mut buf);

            let mut reader = RespReader::new();
            reader.feed(&buf);
            let parsed = reader
                .next_reply()
                .expect("round-trip parse should not error")
                .expect("round-trip parse should yield a value");

            assert_eq!(&parsed, original, "round-trip failed for {original:?}");
            assert_eq!(reader.buffered(), 0, "should consume the whole frame");
        }
    }
}
