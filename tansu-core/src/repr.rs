//! Printable representation of byte strings.
//!
//! Row, column, and value bytes are arbitrary. For predicates, logs, and
//! config files they are rendered as ASCII with `\xHH` escapes for
//! everything outside the printable range, and parsed back exactly.

use std::fmt::Write as _;

use crate::error::{Error, Result};

/// Escape a byte string for display. Printable ASCII passes through;
/// backslash and double quote are escaped; everything else becomes \xHH.
pub fn repr_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'"' => out.push_str("\\\""),
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\x{:02x}", b);
            }
        }
    }
    out
}

/// Escape and double-quote a byte string.
pub fn quoted(bytes: &[u8]) -> String {
    format!("\"{}\"", repr_bytes(bytes))
}

/// Invert [`repr_bytes`]. Accepts \\, \", \', and \xHH escapes.
pub fn parse_repr(s: &str) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(s.len());
    let mut it = s.bytes();
    while let Some(b) = it.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match it.next() {
            Some(b'\\') => out.push(b'\\'),
            Some(b'"') => out.push(b'"'),
            Some(b'\'') => out.push(b'\''),
            Some(b'x') => {
                let hi = it.next().and_then(hex_val);
                let lo = it.next().and_then(hex_val);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => out.push(hi << 4 | lo),
                    _ => return Err(Error::value(format!("bad hex escape in {:?}", s))),
                }
            }
            Some(c) => {
                return Err(Error::value(format!("unknown escape '\\{}'", c as char)));
            }
            None => return Err(Error::value(format!("trailing backslash in {:?}", s))),
        }
    }
    Ok(out)
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repr_round_trip() {
        let cases: &[&[u8]] = &[b"", b"plain", b"foo\xff", b"\x00\x01", b"a\\b\"c"];
        for &case in cases {
            let shown = repr_bytes(case);
            assert_eq!(parse_repr(&shown).unwrap(), case);
        }
    }

    #[test]
    fn test_repr_escapes() {
        assert_eq!(repr_bytes(b"foo\xff"), "foo\\xff");
        assert_eq!(repr_bytes(b"a\"b"), "a\\\"b");
        assert_eq!(quoted(b"foo"), "\"foo\"");
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_repr("foo\\").is_err());
        assert!(parse_repr("\\q").is_err());
        assert!(parse_repr("\\x2").is_err());
        assert!(parse_repr("\\xzz").is_err());
    }
}
