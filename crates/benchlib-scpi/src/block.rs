//! IEEE-488.2 definite-length arbitrary block framing.
//!
//! A block is `#`, one ASCII digit `d` (1-9) giving the number of length
//! digits, `d` decimal digits giving the payload length, then exactly that
//! many payload bytes:
//!
//! ```text
//! #3012<12 bytes of payload>
//! ```
//!
//! `#0` introduces an indefinite-length block terminated by a newline; it is
//! rejected here because binary payloads may legitimately contain newlines.

/// Header errors. The link turns these into operator-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("response does not start with '#'")]
    NotABlock,

    #[error("Malformed binary header: ndig not a digit")]
    BadDigitCount,

    #[error("Indefinite-length block (#0) not supported")]
    Indefinite,

    #[error("Malformed binary header: invalid length")]
    BadLength,
}

/// A parsed block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Number of length digits, 1-9.
    pub digit_count: usize,
    /// Payload length in bytes.
    pub payload_len: usize,
}

impl BlockHeader {
    /// Bytes occupied by `#`, the digit count and the length digits.
    pub fn header_len(&self) -> usize {
        2 + self.digit_count
    }
}

/// Outcome of [`parse_header`] on a possibly incomplete buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderParse {
    Complete(BlockHeader),
    /// The buffer must hold at least this many bytes before the header can
    /// be decoded.
    NeedMore(usize),
}

/// Decode the header at the start of `buf`.
///
/// Errors are reported as soon as the bytes seen so far prove the header
/// invalid; otherwise `NeedMore` says how many bytes are required.
pub fn parse_header(buf: &[u8]) -> Result<HeaderParse, HeaderError> {
    let Some(&first) = buf.first() else {
        return Ok(HeaderParse::NeedMore(2));
    };
    if first != b'#' {
        return Err(HeaderError::NotABlock);
    }

    let Some(&ndig) = buf.get(1) else {
        return Ok(HeaderParse::NeedMore(2));
    };
    if !ndig.is_ascii_digit() {
        return Err(HeaderError::BadDigitCount);
    }
    let digit_count = usize::from(ndig - b'0');
    if digit_count == 0 {
        return Err(HeaderError::Indefinite);
    }

    let header_len = 2 + digit_count;
    if buf.len() < header_len {
        return Ok(HeaderParse::NeedMore(header_len));
    }

    let digits = &buf[2..header_len];
    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(HeaderError::BadLength);
    }
    let payload_len = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or(HeaderError::BadLength)?;

    Ok(HeaderParse::Complete(BlockHeader {
        digit_count,
        payload_len,
    }))
}

/// Frame `payload` as a definite-length block.
///
/// Returns `None` when the length needs more than nine digits.
pub fn encode_block(payload: &[u8]) -> Option<Vec<u8>> {
    let len = payload.len().to_string();
    if len.len() > 9 {
        return None;
    }
    let mut out = Vec::with_capacity(2 + len.len() + payload.len());
    out.push(b'#');
    out.push(b'0' + len.len() as u8);
    out.extend_from_slice(len.as_bytes());
    out.extend_from_slice(payload);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_header() {
        assert_eq!(
            parse_header(b"#3012abc"),
            Ok(HeaderParse::Complete(BlockHeader {
                digit_count: 3,
                payload_len: 12
            }))
        );
        assert_eq!(
            parse_header(b"#10"),
            Ok(HeaderParse::Complete(BlockHeader {
                digit_count: 1,
                payload_len: 0
            }))
        );
    }

    #[test]
    fn partial_header_asks_for_more() {
        assert_eq!(parse_header(b""), Ok(HeaderParse::NeedMore(2)));
        assert_eq!(parse_header(b"#"), Ok(HeaderParse::NeedMore(2)));
        assert_eq!(parse_header(b"#5"), Ok(HeaderParse::NeedMore(7)));
        assert_eq!(parse_header(b"#512"), Ok(HeaderParse::NeedMore(7)));
    }

    #[test]
    fn rejects_malformed_headers() {
        assert_eq!(parse_header(b"1.25\n"), Err(HeaderError::NotABlock));
        assert_eq!(parse_header(b"#A123"), Err(HeaderError::BadDigitCount));
        assert_eq!(parse_header(b"#0data\n"), Err(HeaderError::Indefinite));
        assert_eq!(parse_header(b"#21x"), Err(HeaderError::BadLength));
    }

    #[test]
    fn encode_picks_digit_count() {
        assert_eq!(encode_block(b"").unwrap(), b"#10");
        assert_eq!(encode_block(&[7u8; 9]).unwrap()[..3], *b"#19");
        assert_eq!(encode_block(&[7u8; 10]).unwrap()[..4], *b"#210");
        assert_eq!(encode_block(&[0u8; 12345]).unwrap()[..7], *b"#512345");
    }

    #[test]
    fn encoded_header_parses_back() {
        let framed = encode_block(&[0xAAu8; 100]).unwrap();
        let HeaderParse::Complete(h) = parse_header(&framed).unwrap() else {
            panic!("expected complete header");
        };
        assert_eq!(h.header_len(), 5);
        assert_eq!(h.payload_len, 100);
        assert_eq!(framed.len(), h.header_len() + 100);
    }
}
