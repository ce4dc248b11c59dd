//! Minimizer load histogram and greedy rank binning
//!
//! K-mer frequencies are heavy-tailed: a handful of high-frequency
//! minimizers would overload a few ranks under hash-mod routing. Every
//! rank therefore accumulates a local histogram of k-mer counts per
//! minimizer value, the histograms are all-reduced, and the identical
//! global histogram is greedily bin-packed (longest processing time
//! first) into a minimizer-to-rank routing array that every rank
//! computes deterministically.

use crate::supermer::Supermer;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tracing::info;

/// Per-minimizer k-mer counts, one cell per possible m-mer value
#[derive(Clone, Debug)]
pub struct MinimizerHistogram {
    m: usize,
    counts: Vec<u64>,
}

impl MinimizerHistogram {
    /// Create a zeroed histogram with `4^m` cells
    pub fn new(m: usize) -> Self {
        assert!(2 * m < usize::BITS as usize, "histogram width overflow");
        Self {
            m,
            counts: vec![0; 1usize << (2 * m)],
        }
    }

    /// Minimizer width in bases
    pub fn m(&self) -> usize {
        self.m
    }

    /// The per-minimizer counts
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Record `kmers` k-mers carrying `minimizer`
    pub fn record(&mut self, minimizer: u64, kmers: u64) {
        self.counts[minimizer as usize] += kmers;
    }

    /// Account one supermer: a length-s supermer contributes `s - k + 1`
    /// k-mers to its minimizer's cell
    pub fn add_supermer(&mut self, supermer: &Supermer, k: usize) {
        self.record(supermer.minimizer(), supermer.kmer_count(k) as u64);
    }

    /// Total k-mers accounted
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

/// Greedy longest-processing-time assignment of minimizers to ranks.
///
/// Minimizers are taken in descending load order (ties broken by index)
/// and each goes to the currently least-loaded rank (ties broken by
/// rank index). Deterministic given the same input, so every rank
/// computes the identical array.
pub fn lpt_assign(loads: &[u64], num_ranks: usize) -> Vec<u32> {
    assert!(num_ranks > 0 && num_ranks <= u32::MAX as usize);

    let mut order: Vec<usize> = (0..loads.len()).collect();
    order.sort_unstable_by(|&a, &b| loads[b].cmp(&loads[a]).then(a.cmp(&b)));

    let mut bins: BinaryHeap<Reverse<(u64, u32)>> = (0..num_ranks as u32)
        .map(|rank| Reverse((0u64, rank)))
        .collect();
    let mut assignment = vec![0u32; loads.len()];
    for idx in order {
        let Reverse((load, rank)) = bins.pop().expect("at least one rank");
        assignment[idx] = rank;
        bins.push(Reverse((load + loads[idx], rank)));
    }
    assignment
}

/// A cached minimizer-to-rank routing, identical on every rank
pub struct MinimizerRouting {
    map: Vec<u32>,
    load_at_binning: u64,
}

impl MinimizerRouting {
    /// Bin-pack the globally reduced histogram over `num_ranks` ranks
    pub fn build(global_counts: &[u64], num_ranks: usize) -> Self {
        let map = lpt_assign(global_counts, num_ranks);
        let total: u64 = global_counts.iter().sum();

        let mut rank_loads = vec![0u64; num_ranks];
        for (minimizer, &rank) in map.iter().enumerate() {
            rank_loads[rank as usize] += global_counts[minimizer];
        }
        let max_load = rank_loads.iter().copied().max().unwrap_or(0);
        info!(
            total_kmers = total,
            max_rank_load = max_load,
            ranks = num_ranks,
            "built minimizer routing"
        );

        Self {
            map,
            load_at_binning: total,
        }
    }

    /// Home rank of a minimizer value
    #[inline]
    pub fn rank_of(&self, minimizer: u64) -> usize {
        self.map[minimizer as usize] as usize
    }

    /// The full minimizer-to-rank array
    pub fn map(&self) -> &[u32] {
        &self.map
    }

    /// Global k-mer load when this routing was built
    pub fn load_at_binning(&self) -> u64 {
        self.load_at_binning
    }

    /// Whether the global load has grown past the rebin threshold since
    /// this routing was built
    pub fn stale(&self, current_total: u64, threshold: f64) -> bool {
        current_total as f64 > self.load_at_binning as f64 * (1.0 + threshold)
    }
}
