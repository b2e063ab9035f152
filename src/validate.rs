// src/validate.rs
//
// Operator text → identifiers and byte lists.
//
// Accepted integer syntax is plain decimal digits, or a lowercase `0x` prefix
// followed by hex digits. Surrounding whitespace is ignored. Signs,
// underscores and other radix prefixes are rejected.

use thiserror::Error;

use crate::io::MAX_DATA_LEN;

/// Why a piece of operator text was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("not a decimal or 0x-prefixed hex integer")]
    InvalidFormat,
    #[error("expected 1 to 8 data bytes")]
    LengthOutOfRange,
    #[error("byte value outside 0-255")]
    ByteOutOfRange,
}

/// A `ParseError` tagged with the input field that produced it.
///
/// `Display` gives the operator-facing diagnostic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("ID Invalid")]
    Id(ParseError),
    #[error("Data Invalid")]
    Data(ParseError),
}

impl InputError {
    pub fn reason(&self) -> ParseError {
        match self {
            InputError::Id(e) | InputError::Data(e) => *e,
        }
    }
}

/// Parse one integer token.
///
/// `Err` when the text is malformed, `Ok(None)` when it is well formed but
/// does not fit in a u64.
fn parse_unsigned(text: &str) -> Result<Option<u64>, ParseError> {
    let text = text.trim();
    let (digits, radix) = match text.strip_prefix("0x") {
        Some(hex) => (hex, 16),
        None => (text, 10),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return Err(ParseError::InvalidFormat);
    }
    Ok(u64::from_str_radix(digits, radix).ok())
}

/// Parse a frame identifier. Width (11/29-bit) is not checked here.
pub fn parse_integer(text: &str) -> Result<u32, ParseError> {
    match parse_unsigned(text)? {
        Some(value) => u32::try_from(value).map_err(|_| ParseError::InvalidFormat),
        None => Err(ParseError::InvalidFormat),
    }
}

/// Parse a whitespace-separated list of 1 to 8 byte values.
///
/// A value outside 0-255 is reported as `ByteOutOfRange` even when another
/// token is malformed.
pub fn parse_byte_list(text: &str) -> Result<Vec<u8>, ParseError> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.is_empty() || tokens.len() > MAX_DATA_LEN {
        return Err(ParseError::LengthOutOfRange);
    }

    let mut bytes = Vec::with_capacity(tokens.len());
    let mut malformed = false;
    for token in tokens {
        match parse_unsigned(token) {
            Ok(Some(value)) if value <= u8::MAX as u64 => bytes.push(value as u8),
            Ok(_) => return Err(ParseError::ByteOutOfRange),
            Err(_) => malformed = true,
        }
    }

    if malformed {
        Err(ParseError::InvalidFormat)
    } else {
        Ok(bytes)
    }
}

/// `parse_integer` with the failure tagged as an identifier error.
pub fn parse_id_field(text: &str) -> Result<u32, InputError> {
    parse_integer(text).map_err(InputError::Id)
}

/// `parse_byte_list` with the failure tagged as a data error.
pub fn parse_data_field(text: &str) -> Result<Vec<u8>, InputError> {
    parse_byte_list(text).map_err(InputError::Data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_agrees_with_native_parse() {
        for value in [0u32, 1, 9, 10, 255, 256, 2047, 2048, 65535, 536_870_911, u32::MAX] {
            let text = value.to_string();
            assert_eq!(parse_integer(&text), Ok(text.parse::<u32>().unwrap()));
        }
    }

    #[test]
    fn test_hex_agrees_with_native_parse() {
        for text in ["0x0", "0x1A", "0x1a", "0x7FF", "0x800", "0x1FFFFFFF", "0xffffffff", "0x00FF"] {
            let expected = u32::from_str_radix(&text[2..], 16).unwrap();
            assert_eq!(parse_integer(text), Ok(expected), "{}", text);
        }
    }

    #[test]
    fn test_invalid_integer_format() {
        for text in ["", " ", "0x", "1A", "0X1A", "-1", "+1", "1.0", "1_000", "0b101", "0o7", "abc", "0x1G", "1 2"] {
            assert_eq!(parse_integer(text), Err(ParseError::InvalidFormat), "{:?}", text);
        }
    }

    #[test]
    fn test_integer_overflow_is_invalid() {
        assert_eq!(parse_integer("4294967296"), Err(ParseError::InvalidFormat));
        assert_eq!(parse_integer("0x100000000"), Err(ParseError::InvalidFormat));
        assert_eq!(
            parse_integer("99999999999999999999999"),
            Err(ParseError::InvalidFormat)
        );
    }

    #[test]
    fn test_surrounding_whitespace_ignored() {
        assert_eq!(parse_integer("  42 "), Ok(42));
        assert_eq!(parse_integer("\t0x10\n"), Ok(16));
    }

    #[test]
    fn test_byte_list_in_order() {
        assert_eq!(parse_byte_list("1 2 0xFF"), Ok(vec![1, 2, 255]));
        assert_eq!(parse_byte_list("  7  "), Ok(vec![7]));
        assert_eq!(parse_byte_list("0 1 2 3 4 5 6 7"), Ok((0..8).collect()));
        assert_eq!(parse_byte_list("0x0a\t0x0B"), Ok(vec![10, 11]));
    }

    #[test]
    fn test_byte_list_length() {
        assert_eq!(parse_byte_list(""), Err(ParseError::LengthOutOfRange));
        assert_eq!(parse_byte_list("   "), Err(ParseError::LengthOutOfRange));
        assert_eq!(
            parse_byte_list("1 2 3 4 5 6 7 8 9"),
            Err(ParseError::LengthOutOfRange)
        );
        // Length is checked before token syntax
        assert_eq!(
            parse_byte_list("x x x x x x x x x"),
            Err(ParseError::LengthOutOfRange)
        );
    }

    #[test]
    fn test_byte_out_of_range_wins() {
        assert_eq!(parse_byte_list("1 2 256"), Err(ParseError::ByteOutOfRange));
        assert_eq!(parse_byte_list("0x100"), Err(ParseError::ByteOutOfRange));
        assert_eq!(parse_byte_list("zz 300"), Err(ParseError::ByteOutOfRange));
        assert_eq!(parse_byte_list("300 zz"), Err(ParseError::ByteOutOfRange));
        assert_eq!(
            parse_byte_list("99999999999999999999999"),
            Err(ParseError::ByteOutOfRange)
        );
    }

    #[test]
    fn test_malformed_byte_token() {
        assert_eq!(parse_byte_list("1 two 3"), Err(ParseError::InvalidFormat));
        assert_eq!(parse_byte_list("-1"), Err(ParseError::InvalidFormat));
        assert_eq!(parse_byte_list("0x"), Err(ParseError::InvalidFormat));
    }

    #[test]
    fn test_field_tags() {
        let err = parse_id_field("zz").unwrap_err();
        assert_eq!(err.to_string(), "ID Invalid");
        assert_eq!(err.reason(), ParseError::InvalidFormat);

        let err = parse_data_field("1 2 256").unwrap_err();
        assert_eq!(err.to_string(), "Data Invalid");
        assert_eq!(err, InputError::Data(ParseError::ByteOutOfRange));
    }
}
