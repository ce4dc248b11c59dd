//! All-to-all redistribution of value sequences
//!
//! Given a vector and a rank function, [`distribute_by`] permutes the
//! vector into rank-ordered segments, exchanges per-rank counts, and
//! ships the payload so that on return every rank holds exactly the
//! subset of the global input routed to it. Ordering between elements
//! from different source ranks is unspecified; within one source rank
//! the original order is preserved.

use crate::comm::{Communicator, Wire};

/// Outcome of one redistribution
pub struct Distributed<T> {
    /// Received elements, grouped by source rank (source order within
    /// each group preserved)
    pub items: Vec<T>,
    /// Number of elements received from each source rank
    pub recv_counts: Vec<usize>,
    /// Number of elements this rank sent to each destination
    pub send_counts: Vec<usize>,
    /// For each input index, the element's offset in the permuted send
    /// order; lets a caller un-permute positional replies
    pub origin_offsets: Vec<usize>,
}

/// Route every element of `items` to the rank chosen by `rank_of`.
///
/// Collective: every rank of the communicator must call this, even with
/// an empty input.
pub fn distribute_by<T, C, F>(items: Vec<T>, rank_of: F, comm: &C) -> Distributed<T>
where
    T: Wire,
    C: Communicator,
    F: Fn(&T) -> usize,
{
    let p = comm.size();
    let ranks: Vec<usize> = items.iter().map(|item| rank_of(item)).collect();

    let mut send_counts = vec![0usize; p];
    for &r in &ranks {
        debug_assert!(r < p, "rank function out of range");
        send_counts[r] += 1;
    }

    // stable permutation into per-destination buckets
    let displs = displacements(&send_counts);
    let mut cursors = vec![0usize; p];
    let mut origin_offsets = Vec::with_capacity(items.len());
    let mut parts: Vec<Vec<T>> = send_counts.iter().map(|&c| Vec::with_capacity(c)).collect();
    for (item, r) in items.into_iter().zip(ranks) {
        origin_offsets.push(displs[r] + cursors[r]);
        cursors[r] += 1;
        parts[r].push(item);
    }

    let (items, recv_counts) = comm.all_to_allv(parts);
    Distributed {
        items,
        recv_counts,
        send_counts,
        origin_offsets,
    }
}

/// Exclusive prefix sums of `counts`
pub fn displacements(counts: &[usize]) -> Vec<usize> {
    let mut displs = Vec::with_capacity(counts.len());
    let mut acc = 0usize;
    for &c in counts {
        displs.push(acc);
        acc += c;
    }
    displs
}
