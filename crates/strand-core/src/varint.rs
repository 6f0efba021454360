//! Unsigned LEB128 varints.
//!
//! Used for multiaddr protocol codes, multihash headers and record framing. Decoding is
//! strict: at most ten bytes, and no redundant trailing zero groups such as `[0x81, 0x00]`.

use crate::error::ParseError;

/// Longest encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// Append the encoding of `value` to `out`.
pub fn encode_to(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Encode `value` into a fresh buffer.
#[must_use]
pub fn encode(value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(value));
    encode_to(value, &mut out);
    out
}

/// Number of bytes `value` takes once encoded.
#[must_use]
pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

/// Decode a varint from the front of `bytes`, returning the value and the remainder.
///
/// # Errors
///
/// [`ParseError::Truncated`] if the input ends mid-varint, [`ParseError::InvalidVarint`]
/// on overflow or a non-minimal encoding.
pub fn decode(bytes: &[u8]) -> Result<(u64, &[u8]), ParseError> {
    let mut value: u64 = 0;
    for (n, byte) in bytes.iter().enumerate() {
        if n >= MAX_VARINT_LEN {
            return Err(ParseError::InvalidVarint);
        }
        let low = u64::from(byte & 0x7f);
        if n == MAX_VARINT_LEN - 1 && low > 1 {
            return Err(ParseError::InvalidVarint);
        }
        value |= low << (7 * n);

        if byte & 0x80 == 0 {
            if n > 0 && *byte == 0 {
                return Err(ParseError::InvalidVarint);
            }
            return Ok((value, &bytes[n + 1..]));
        }
    }
    Err(ParseError::Truncated)
}

/// Decode a `usize` length prefix.
///
/// # Errors
///
/// As [`decode`], plus [`ParseError::InvalidVarint`] if the value does not fit a `usize`.
pub fn decode_usize(bytes: &[u8]) -> Result<(usize, &[u8]), ParseError> {
    let (value, rest) = decode(bytes)?;
    let value = usize::try_from(value).map_err(|_| ParseError::InvalidVarint)?;
    Ok((value, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_encodings() {
        assert_eq!(encode(0), vec![0x00]);
        assert_eq!(encode(0x11), vec![0x11]);
        assert_eq!(encode(300), vec![0xAC, 0x02]);
        assert_eq!(encode(421), vec![0xA5, 0x03]);
        assert_eq!(encode(u64::MAX).len(), MAX_VARINT_LEN);
    }

    #[test]
    fn test_decode_returns_remainder() {
        let (value, rest) = decode(&[0xAC, 0x02, 0xFF]).unwrap();
        assert_eq!(value, 300);
        assert_eq!(rest, &[0xFF]);
    }

    #[test]
    fn test_encoded_len_matches() {
        for value in [0u64, 127, 128, 16_383, 16_384, u64::from(u32::MAX), u64::MAX] {
            assert_eq!(encoded_len(value), encode(value).len());
            assert_eq!(decode(&encode(value)).unwrap().0, value);
        }
    }

    #[test]
    fn test_reject_truncated() {
        assert_eq!(decode(&[]), Err(ParseError::Truncated));
        assert_eq!(decode(&[0x80]), Err(ParseError::Truncated));
    }

    #[test]
    fn test_reject_non_minimal() {
        assert_eq!(decode(&[0x81, 0x00]), Err(ParseError::InvalidVarint));
    }

    #[test]
    fn test_reject_overflow() {
        let too_long = [0xFFu8; 11];
        assert_eq!(decode(&too_long), Err(ParseError::InvalidVarint));

        let mut over = vec![0xFFu8; 9];
        over.push(0x02);
        assert_eq!(decode(&over), Err(ParseError::InvalidVarint));
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn decode_inverts_encode(value in any::<u64>(), tail in proptest::collection::vec(any::<u8>(), 0..4)) {
                let mut bytes = encode(value);
                prop_assert_eq!(bytes.len(), encoded_len(value));
                bytes.extend_from_slice(&tail);
                let (decoded, rest) = decode(&bytes).unwrap();
                prop_assert_eq!(decoded, value);
                prop_assert_eq!(rest, &tail[..]);
            }

            #[test]
            fn decoded_values_are_minimal(bytes in proptest::collection::vec(any::<u8>(), 0..12)) {
                if let Ok((value, rest)) = decode(&bytes) {
                    prop_assert_eq!(encode(value).len(), bytes.len() - rest.len());
                }
            }
        }
    }
}
