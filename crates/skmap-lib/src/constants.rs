//! Constants and small helpers shared across the library.

/// Default seed for all hash functions
pub const DEFAULT_SEED: u64 = 1;

/// Maximum k-mer size supported (keys pack into a u64)
pub const MAX_K: usize = 31;

/// Minimum k-mer size supported
pub const MIN_K: usize = 1;

/// Maximum minimizer width for the supermer path.
///
/// The minimizer-load histogram has `4^m` cells and is all-reduced in
/// full, so `m` must stay small enough for the histogram to be
/// addressable (m = 12 gives 16 Mi cells).
pub const MAX_MINIMIZER_LEN: usize = 12;

/// Default fraction of load growth that invalidates a cached
/// minimizer-to-rank assignment
pub const DEFAULT_REBIN_THRESHOLD: f64 = 0.5;

/// Version number
pub const VERSION: (u8, u8, u8) = (0, 1, 0);

/// Check if a k-mer size is valid
#[inline]
pub const fn is_valid_k(k: usize) -> bool {
    k >= MIN_K && k <= MAX_K
}
