//! DNA nucleotide encoding
//!
//! 2-bit encoding of the DNA alphabet:
//! - A (65/97)  -> 00
//! - C (67/99)  -> 01
//! - G (71/103) -> 10
//! - T (84/116) -> 11
//!
//! With this mapping the complement of a base is its bitwise negation
//! in 2 bits (`b ^ 0b11`). Any symbol outside {A,C,G,T} is invalid
//! input to the core and must be filtered upstream.

use thiserror::Error;

/// Error type for encoding operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    /// The input byte is not a valid DNA base (A/C/G/T)
    #[error("Invalid DNA base: {0:?}")]
    InvalidBase(u8),
    /// The input string length is not a supported k-mer length
    #[error("K-mer length must be in [{min}, {max}], got {actual}")]
    InvalidLength {
        /// Smallest supported k-mer length
        min: usize,
        /// Largest supported k-mer length
        max: usize,
        /// Actual string length
        actual: usize,
    },
}

/// Encode a single DNA nucleotide to 2 bits
#[inline]
pub const fn encode_base(base: u8) -> Result<u8, EncodingError> {
    match base {
        b'A' | b'a' => Ok(0b00),
        b'C' | b'c' => Ok(0b01),
        b'G' | b'g' => Ok(0b10),
        b'T' | b't' => Ok(0b11),
        _ => Err(EncodingError::InvalidBase(base)),
    }
}

/// Decode a 2-bit value to a DNA nucleotide (uppercase)
#[inline]
pub const fn decode_base(bits: u8) -> u8 {
    match bits & 0b11 {
        0b00 => b'A',
        0b01 => b'C',
        0b10 => b'G',
        _ => b'T',
    }
}

/// Complement of an encoded base (A <-> T, C <-> G)
#[inline]
pub const fn complement_base(bits: u8) -> u8 {
    (bits ^ 0b11) & 0b11
}

/// Encode a DNA sequence to one 2-bit code per byte
///
/// # Errors
/// Returns an error if the sequence contains invalid bases
pub fn encode_sequence(sequence: &[u8]) -> Result<Vec<u8>, EncodingError> {
    sequence.iter().map(|&b| encode_base(b)).collect()
}

/// Decode a sequence of 2-bit codes back to a DNA string
pub fn decode_sequence(codes: &[u8]) -> String {
    codes.iter().map(|&c| decode_base(c) as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_base() {
        assert_eq!(encode_base(b'A').unwrap(), 0b00);
        assert_eq!(encode_base(b'c').unwrap(), 0b01);
        assert_eq!(encode_base(b'G').unwrap(), 0b10);
        assert_eq!(encode_base(b't').unwrap(), 0b11);

        assert!(encode_base(b'N').is_err());
        assert!(encode_base(b'X').is_err());
        assert!(encode_base(b' ').is_err());
    }

    #[test]
    fn test_complement_base() {
        assert_eq!(complement_base(0b00), 0b11); // A -> T
        assert_eq!(complement_base(0b11), 0b00); // T -> A
        assert_eq!(complement_base(0b01), 0b10); // C -> G
        assert_eq!(complement_base(0b10), 0b01); // G -> C
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        for seq in ["ACGT", "AAAA", "TTTT", "GATTACA"] {
            let encoded = encode_sequence(seq.as_bytes()).unwrap();
            assert_eq!(decode_sequence(&encoded), seq);
        }
    }

    #[test]
    fn test_encode_mixed_case() {
        assert_eq!(
            encode_sequence(b"acgt").unwrap(),
            encode_sequence(b"ACGT").unwrap()
        );
    }

    #[test]
    fn test_encode_invalid() {
        assert!(encode_sequence(b"ACGTN").is_err());
    }
}
