//! Supermers
//!
//! A supermer is a maximal run of consecutive k-windows sharing one
//! minimizer, stored once as `run + k - 1` encoded bases and re-expanded
//! into k-mers at the receiving rank. Every length-k window of a
//! supermer has the supermer's minimizer, so routing a supermer by its
//! minimizer routes every k-mer it contains.

use crate::kmer::Kmer;
use crate::minimizer::MinimizerWindow;
use rayon::prelude::*;

/// A variable-length run of encoded bases paired with its minimizer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Supermer {
    minimizer: u64,
    bases: Vec<u8>,
}

impl Supermer {
    /// Assemble a supermer from parts. The caller guarantees that every
    /// k-window of `bases` has minimizer `minimizer`.
    pub fn new(minimizer: u64, bases: Vec<u8>) -> Self {
        Self { minimizer, bases }
    }

    /// The minimizer shared by every k-window
    #[inline]
    pub fn minimizer(&self) -> u64 {
        self.minimizer
    }

    /// Length in bases
    pub fn len(&self) -> usize {
        self.bases.len()
    }

    /// Whether the supermer holds no bases
    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    /// The encoded bases
    pub fn bases(&self) -> &[u8] {
        &self.bases
    }

    /// Number of k-mers a length-s supermer re-expands into: `s - k + 1`
    pub fn kmer_count(&self, k: usize) -> usize {
        debug_assert!(self.bases.len() >= k);
        self.bases.len() - k + 1
    }

    /// Re-expand into the k-mers of every length-k window
    pub fn kmers(&self, k: usize) -> impl Iterator<Item = Kmer> + '_ {
        (0..self.kmer_count(k))
            .map(move |i| Kmer::from_bases(k, self.bases[i..i + k].iter().copied()))
    }
}

/// Split an encoded base sequence into supermers covering every
/// k-window exactly once.
///
/// A new supermer starts whenever the window minimizer value changes;
/// sequences shorter than `k` produce nothing.
pub fn split_supermers(seq: &[u8], k: usize, m: usize) -> Vec<Supermer> {
    if seq.len() < k {
        return Vec::new();
    }
    let mut window = MinimizerWindow::new(k, m);
    let mut out = Vec::new();
    // (minimizer, start base) of the supermer being extended
    let mut current: Option<(u64, usize)> = None;

    for (i, &base) in seq.iter().enumerate() {
        let Some(min) = window.push(base) else {
            continue;
        };
        let window_start = i + 1 - k;
        match current {
            Some((cur_min, _)) if cur_min == min => {
                // window extends the current run by one base
            }
            Some((cur_min, start)) => {
                // run ended at the previous window; its last base is
                // the previous window's last, at window_start + k - 2
                out.push(Supermer::new(cur_min, seq[start..window_start + k - 1].to_vec()));
                current = Some((min, window_start));
            }
            None => current = Some((min, window_start)),
        }
    }
    if let Some((min, start)) = current {
        out.push(Supermer::new(min, seq[start..].to_vec()));
    }
    out
}

/// Split a batch of sequences in parallel; supermers never cross
/// sequence boundaries, so each sequence splits independently.
pub fn split_supermers_batch(seqs: &[Vec<u8>], k: usize, m: usize) -> Vec<Supermer> {
    seqs.par_iter()
        .flat_map_iter(|seq| split_supermers(seq, k, m))
        .collect()
}
