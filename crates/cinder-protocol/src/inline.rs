//! Inline command tokenizer.
//!
//! Legacy non-prefixed requests ("SET foo bar\r\n", telnet style) are
//! split on whitespace with shell-like quoting: double quotes support
//! backslash escapes including `\xHH`, single quotes are literal except
//! for `\'`. A quote with no closing partner is a protocol error.

use bytes::Bytes;

use crate::error::ProtocolError;

/// Splits one inline request line into arguments.
///
/// Returns an empty vector for a blank line (the caller discards such
/// requests rather than dispatching them).
pub fn split_args(line: &[u8]) -> Result<Vec<Bytes>, ProtocolError> {
    let mut args = Vec::new();
    let mut i = 0;

    loop {
        // skip blanks between tokens
        while i < line.len() && line[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= line.len() {
            return Ok(args);
        }

        let mut current = Vec::new();
        let mut in_double = false;
        let mut in_single = false;

        loop {
            if in_double {
                if i >= line.len() {
                    return Err(ProtocolError::UnbalancedQuotes);
                }
                match line[i] {
                    b'\\' if i + 3 < line.len()
                        && line[i + 1] == b'x'
                        && line[i + 2].is_ascii_hexdigit()
                        && line[i + 3].is_ascii_hexdigit() =>
                    {
                        let hi = hex_value(line[i + 2]);
                        let lo = hex_value(line[i + 3]);
                        current.push(hi * 16 + lo);
                        i += 4;
                    }
                    b'\\' if i + 1 < line.len() => {
                        let c = match line[i + 1] {
                            b'n' => b'\n',
                            b'r' => b'\r',
                            b't' => b'\t',
                            b'b' => 0x08,
                            b'a' => 0x07,
                            other => other,
                        };
                        current.push(c);
                        i += 2;
                    }
                    b'"' => {
                        // closing quote must terminate the token
                        if i + 1 < line.len() && !line[i + 1].is_ascii_whitespace() {
                            return Err(ProtocolError::UnbalancedQuotes);
                        }
                        in_double = false;
                        i += 1;
                    }
                    c => {
                        current.push(c);
                        i += 1;
                    }
                }
            } else if in_single {
                if i >= line.len() {
                    return Err(ProtocolError::UnbalancedQuotes);
                }
                match line[i] {
                    b'\\' if i + 1 < line.len() && line[i + 1] == b'\'' => {
                        current.push(b'\'');
                        i += 2;
                    }
                    b'\'' => {
                        if i + 1 < line.len() && !line[i + 1].is_ascii_whitespace() {
                            return Err(ProtocolError::UnbalancedQuotes);
                        }
                        in_single = false;
                        i += 1;
                    }
                    c => {
                        current.push(c);
                        i += 1;
                    }
                }
            } else {
                if i >= line.len() || line[i].is_ascii_whitespace() {
                    break;
                }
                match line[i] {
                    b'"' => in_double = true,
                    b'\'' => in_single = true,
                    c => current.push(c),
                }
                i += 1;
            }

            if !in_double && !in_single && (i >= line.len() || line[i].is_ascii_whitespace()) {
                break;
            }
        }

        args.push(Bytes::from(current));
    }
}

fn hex_value(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        _ => c - b'A' + 10,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(line: &[u8]) -> Vec<Bytes> {
        split_args(line).expect("line should tokenize")
    }

    #[test]
    fn plain_tokens() {
        assert_eq!(split(b"SET foo bar"), vec!["SET", "foo", "bar"]);
    }

    #[test]
    fn collapses_repeated_whitespace() {
        assert_eq!(split(b"  GET \t key "), vec!["GET", "key"]);
    }

    #[test]
    fn empty_line_yields_no_tokens() {
        assert!(split(b"").is_empty());
        assert!(split(b"   ").is_empty());
    }

    #[test]
    fn double_quoted_token_with_spaces() {
        assert_eq!(split(b"SET k \"hello world\""), vec!["SET", "k", "hello world"]);
    }

    #[test]
    fn double_quote_escapes() {
        assert_eq!(split(br#""a\x41b""#), vec!["aAb"]);
        assert_eq!(split(br#""tab\there""#), vec!["tab\there"]);
        assert_eq!(split(br#""quote\"inside""#), vec!["quote\"inside"]);
    }

    #[test]
    fn single_quotes_are_literal() {
        assert_eq!(split(br#"'a "b" c'"#), vec![r#"a "b" c"#]);
        assert_eq!(split(br"'it\'s'"), vec!["it's"]);
    }

    #[test]
    fn unterminated_double_quote() {
        assert_eq!(
            split_args(b"SET k \"oops").unwrap_err(),
            ProtocolError::UnbalancedQuotes
        );
    }

    #[test]
    fn unterminated_single_quote() {
        assert_eq!(
            split_args(b"'oops").unwrap_err(),
            ProtocolError::UnbalancedQuotes
        );
    }

    #[test]
    fn closing_quote_must_end_the_token() {
        assert_eq!(
            split_args(b"\"a\"b").unwrap_err(),
            ProtocolError::UnbalancedQuotes
        );
    }

    #[test]
    fn empty_quoted_token() {
        assert_eq!(split(br#"SET k """#), vec!["SET", "k", ""]);
    }
}
