//! Fixed-width decimal encoding for stored counter values.
//!
//! Attribute stores compare values as strings, so every counter is persisted as
//! a zero-padded decimal of exactly [`MAX_DIGITS`] characters. With a fixed width,
//! lexicographic order and numeric order agree, which keeps range queries over
//! the table meaningful.
//!
//! Signed counters are stored in excess-2^63 form: the sign bit of the `i64` is
//! flipped and the result is encoded as an unsigned magnitude.
//!
//! ```text
//!   i64::MIN  ->  00000000000000000000
//!         -1  ->  09223372036854775807
//!          0  ->  09223372036854775808
//!   i64::MAX  ->  18446744073709551615
//! ```
//!
//! # Examples
//!
//! ```rust
//! use accumulatori::encoding::{decode_value, encode_value};
//!
//! let stored = encode_value(42);
//! assert_eq!(stored.len(), accumulatori::encoding::MAX_DIGITS);
//! assert_eq!(decode_value(&stored).unwrap(), 42);
//! assert!(encode_value(-3) < encode_value(2));
//! ```

use crate::error::EncodingError;

/// Width of every encoded value, enough for `u64::MAX`.
pub const MAX_DIGITS: usize = 20;

const SIGN_BIT: u64 = 1 << 63;

/// Encodes an unsigned magnitude as a zero-padded decimal string.
#[inline]
pub fn encode_magnitude(value: u64) -> String {
    format!("{:0width$}", value, width = MAX_DIGITS)
}

/// Decodes a zero-padded decimal string produced by [`encode_magnitude`].
pub fn decode_magnitude(encoded: &str) -> Result<u64, EncodingError> {
    if encoded.len() != MAX_DIGITS {
        return Err(EncodingError::Length {
            expected: MAX_DIGITS,
            found: encoded.len(),
        });
    }
    if !encoded.bytes().all(|b| b.is_ascii_digit()) {
        return Err(EncodingError::NotDecimal(encoded.to_string()));
    }
    encoded
        .parse::<u64>()
        .map_err(|_| EncodingError::Overflow(encoded.to_string()))
}

/// Encodes a signed counter value.
#[inline]
pub fn encode_value(value: i64) -> String {
    encode_magnitude((value as u64) ^ SIGN_BIT)
}

/// Decodes a signed counter value produced by [`encode_value`].
#[inline]
pub fn decode_value(encoded: &str) -> Result<i64, EncodingError> {
    decode_magnitude(encoded).map(|m| (m ^ SIGN_BIT) as i64)
}
