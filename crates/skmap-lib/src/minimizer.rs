//! Rolling minimizers
//!
//! An m-mer rolls through an encoded base sequence as a 2m-bit integer
//! (`(val << 2) | base`, masked to `4^m - 1`); comparisons on the
//! integer define the minimizer's total order. A k-window's minimizer
//! is the minimum of the `k - m + 1` m-mers inside the window,
//! maintained incrementally by a monotonic deque.

use crate::kmer::Kmer;
use std::collections::VecDeque;

/// Rolling m-mer over encoded bases
#[derive(Clone, Debug)]
pub struct Mmer {
    val: u64,
    m: usize,
    mask: u64,
}

impl Mmer {
    /// Create a rolling m-mer of width `m` bases
    pub fn new(m: usize) -> Self {
        assert!(m >= 1 && 2 * m <= 64, "minimizer must fit a machine word");
        let mask = if m == 32 {
            u64::MAX
        } else {
            (1u64 << (2 * m)) - 1
        };
        Self { val: 0, m, mask }
    }

    /// Load the first `m` bases from an iterator
    pub fn init<I>(&mut self, bases: I)
    where
        I: IntoIterator<Item = u8>,
    {
        self.val = 0;
        for base in bases.into_iter().take(self.m) {
            self.val = (self.val << 2) | base as u64;
        }
    }

    /// Shift in one base, dropping the oldest
    #[inline]
    pub fn next(&mut self, base: u8) {
        debug_assert!(base < 4);
        self.val = ((self.val << 2) | base as u64) & self.mask;
    }

    /// The current m-mer value
    #[inline]
    pub fn value(&self) -> u64 {
        self.val & self.mask
    }

    /// Width in bases
    pub fn m(&self) -> usize {
        self.m
    }
}

/// Sliding minimum of the m-mers inside a k-window
///
/// Feed encoded bases one at a time; once `k` bases have been seen,
/// every further push yields the minimizer of the k-window ending at
/// that base. The deque keeps (m-mer index, value) pairs with strictly
/// increasing values front to back; the front is the window minimum.
pub struct MinimizerWindow {
    k: usize,
    m: usize,
    mmer: Mmer,
    pos: usize,
    deque: VecDeque<(usize, u64)>,
}

impl MinimizerWindow {
    /// Create a window of `k` bases over m-mers of width `m`
    pub fn new(k: usize, m: usize) -> Self {
        assert!(m >= 1 && m <= k, "m must satisfy 1 <= m <= k");
        Self {
            k,
            m,
            mmer: Mmer::new(m),
            pos: 0,
            deque: VecDeque::new(),
        }
    }

    /// Feed one encoded base. Returns the minimizer of the k-window
    /// ending at this base once the window is full.
    pub fn push(&mut self, base: u8) -> Option<u64> {
        self.mmer.next(base);
        self.pos += 1;
        if self.pos < self.m {
            return None;
        }

        // the m-mer starting at pos - m just completed
        let idx = self.pos - self.m;
        let val = self.mmer.value();
        while let Some(&(_, back)) = self.deque.back() {
            if back >= val {
                self.deque.pop_back();
            } else {
                break;
            }
        }
        self.deque.push_back((idx, val));

        if self.pos < self.k {
            return None;
        }
        // evict m-mers that start before the current window
        let window_start = self.pos - self.k;
        while let Some(&(front_idx, _)) = self.deque.front() {
            if front_idx < window_start {
                self.deque.pop_front();
            } else {
                break;
            }
        }
        Some(self.deque.front().expect("window holds an m-mer").1)
    }

    /// Forget all fed bases
    pub fn reset(&mut self) {
        self.pos = 0;
        self.deque.clear();
    }

    /// Window width in bases
    pub fn k(&self) -> usize {
        self.k
    }

    /// Minimizer width in bases
    pub fn m(&self) -> usize {
        self.m
    }
}

/// Minimizer of a single k-window given as an iterator over encoded
/// bases (at least `k` of them; extras are ignored)
pub fn window_minimizer<I>(k: usize, m: usize, bases: I) -> u64
where
    I: IntoIterator<Item = u8>,
{
    let mut window = MinimizerWindow::new(k, m);
    let mut last = 0u64;
    for base in bases.into_iter().take(k) {
        if let Some(min) = window.push(base) {
            last = min;
        }
    }
    last
}

/// Minimizer of a single packed k-mer.
///
/// Seeds the roll with the key's prefix projection (its leading m-mer)
/// and shifts the remaining bases through the mask; a lone window needs
/// no deque state. Agrees with [`window_minimizer`] over the same
/// bases.
pub fn kmer_minimizer(kmer: &Kmer, m: usize) -> u64 {
    let k = kmer.k();
    debug_assert!(m >= 1 && m <= k, "m must satisfy 1 <= m <= k");
    let mask = if m == 32 {
        u64::MAX
    } else {
        (1u64 << (2 * m)) - 1
    };
    let mut mmer = kmer.prefix(m);
    let mut min = mmer;
    for i in m..k {
        mmer = ((mmer << 2) | kmer.base_at(i) as u64) & mask;
        min = min.min(mmer);
    }
    min
}
