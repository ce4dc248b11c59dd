//! Packed k-mer value type
//!
//! A k-mer is stored as `2k` bits of a u64 (k <= 31), most significant
//! base first. The container framework treats it as an opaque key: it
//! only relies on equality, hashing, the iterator-based constructor and
//! the minimizer prefix projection defined here.

use crate::constants::{is_valid_k, MAX_K, MIN_K};
use crate::encoding::{complement_base, decode_base, encode_base, EncodingError};
use std::fmt;

/// A fixed-width DNA k-mer packed 2 bits per base
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Kmer {
    bits: u64,
    k: u8,
}

impl Kmer {
    /// Build a k-mer from an iterator over encoded bases (2-bit codes).
    ///
    /// The first base yielded becomes the most significant base. The
    /// iterator must yield at least `k` bases; extra bases are ignored.
    pub fn from_bases<I>(k: usize, bases: I) -> Self
    where
        I: IntoIterator<Item = u8>,
    {
        debug_assert!(is_valid_k(k), "k must be in [1, {}]", MAX_K);
        let mut bits = 0u64;
        let mut taken = 0usize;
        for b in bases.into_iter().take(k) {
            debug_assert!(b < 4, "encoded base out of range");
            bits = (bits << 2) | b as u64;
            taken += 1;
        }
        debug_assert_eq!(taken, k, "iterator yielded fewer than k bases");
        Self { bits, k: k as u8 }
    }

    /// Parse a k-mer from DNA text
    pub fn parse(s: &str) -> Result<Self, EncodingError> {
        let raw = s.as_bytes();
        if !is_valid_k(raw.len()) {
            return Err(EncodingError::InvalidLength {
                min: MIN_K,
                max: MAX_K,
                actual: raw.len(),
            });
        }
        let mut bits = 0u64;
        for &b in raw {
            bits = (bits << 2) | encode_base(b)? as u64;
        }
        Ok(Self {
            bits,
            k: raw.len() as u8,
        })
    }

    /// K-mer length in bases
    #[inline]
    pub fn k(&self) -> usize {
        self.k as usize
    }

    /// The packed bit representation
    #[inline]
    pub fn bits(&self) -> u64 {
        self.bits
    }

    /// Encoded base at position `i` (0 = leftmost)
    #[inline]
    pub fn base_at(&self, i: usize) -> u8 {
        debug_assert!(i < self.k());
        ((self.bits >> (2 * (self.k() - 1 - i))) & 0b11) as u8
    }

    /// Iterate over the encoded bases, leftmost first
    pub fn bases(&self) -> impl Iterator<Item = u8> + '_ {
        (0..self.k()).map(move |i| self.base_at(i))
    }

    /// The leading `m` bases as a packed integer (the minimizer bit
    /// pattern projection)
    #[inline]
    pub fn prefix(&self, m: usize) -> u64 {
        debug_assert!(m >= 1 && m <= self.k());
        self.bits >> (2 * (self.k() - m))
    }

    /// Reverse complement of this k-mer
    pub fn reverse_complement(&self) -> Self {
        let k = self.k();
        let mut bits = 0u64;
        for i in 0..k {
            bits = (bits << 2) | complement_base(self.base_at(k - 1 - i)) as u64;
        }
        Self { bits, k: self.k }
    }

    /// Canonical form: the smaller of the k-mer and its reverse
    /// complement under the packed-integer order
    pub fn canonical(&self) -> Self {
        let rc = self.reverse_complement();
        if rc.bits < self.bits {
            rc
        } else {
            *self
        }
    }
}

impl fmt::Display for Kmer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.bases() {
            write!(f, "{}", decode_base(b) as char)?;
        }
        Ok(())
    }
}
