//! Ring-streamed find
//!
//! The straightforward find allocates every reply batch before a single
//! all-to-all-v; for large multimaps the reply volume can exceed
//! memory. This variant bounds transient reply memory to two in-flight
//! batches per rank by walking the peers in a ring:
//!
//! 1. distribute the (transformed, deduplicated) query keys,
//! 2. count the exact reply size per source rank and exchange the
//!    sizes,
//! 3. allocate the reply output once, sized to the total,
//! 4. post receives for every source in the skewed order
//!    `(self + P - i) mod P`, then for each step `i` look up the
//!    segment for `(self + i) mod P`, post its send, and wait on the
//!    *previous* send before the next lookup.
//!
//! The skew points different ranks at different peers in the same step,
//! spreading network pressure instead of incasting one receiver.

use crate::comm::Communicator;
use crate::distribute::{displacements, distribute_by};
use crate::map::MapEngine;
use crate::policy::KeyPolicy;
use crate::store::{LocalStore, RecordPred};
use std::hash::Hash;
use tracing::debug;

/// Collective ring-streamed find. Returns the matches for keys this
/// rank contributed, grouped by the rank that answered.
pub(crate) fn find_overlap_collective<K, V, P, C, S>(
    engine: &MapEngine<K, P, C>,
    store: &S,
    mut keys: Vec<K>,
    rank_of: &dyn Fn(&K) -> usize,
    pred: RecordPred<'_, K, V>,
) -> Vec<(K, V)>
where
    K: Copy + Eq + Hash + Send + 'static,
    V: Clone + Send + 'static,
    P: KeyPolicy<K>,
    C: Communicator,
    S: LocalStore<K, V>,
{
    if engine.globally_empty(keys.len()) {
        return Vec::new();
    }
    engine.transform_keys(&mut keys);
    let keys = engine.dedup_stored(keys);
    let policy = engine.policy();

    let p = engine.num_ranks();
    if p == 1 {
        // exact count first so a single allocation holds the output
        let mut total = 0usize;
        for key in &keys {
            let probe = policy.store_transform(*key);
            total += store.count_key(&probe, pred);
        }
        let mut out = Vec::with_capacity(total);
        for key in &keys {
            let probe = policy.store_transform(*key);
            store.find_into(&probe, pred, &mut out);
        }
        return out;
    }

    let comm = engine.comm();
    let me = comm.rank();

    let dist = distribute_by(keys, |key| rank_of(key), comm);
    let keys = dist.items;
    let recv_displs = displacements(&dist.recv_counts);

    // exact counting pass: true reply size per source rank
    let mut send_counts = vec![0u64; p];
    for src in 0..p {
        let segment = &keys[recv_displs[src]..recv_displs[src] + dist.recv_counts[src]];
        let mut replies = 0usize;
        for key in segment {
            let probe = policy.store_transform(*key);
            replies += store.count_key(&probe, pred);
        }
        send_counts[src] = replies as u64;
    }
    let resp_counts = comm.all_to_all(&send_counts);
    let resp_total: u64 = resp_counts.iter().sum();
    let max_send = send_counts.iter().copied().max().unwrap_or(0);
    debug!(
        rank = me,
        resp_total,
        max_send,
        "overlap find: reply sizes exchanged"
    );

    // post receives for every source, skewed so no step incasts one rank
    let mut pending = Vec::with_capacity(p);
    for i in 0..p {
        let recv_from = (me + p - i) % p;
        pending.push((recv_from, comm.irecv::<(K, V)>(recv_from, i as u64)));
    }

    // ring of sends, one outstanding at a time; the lookup for step i
    // overlaps the in-flight send from step i-1
    let mut in_flight = None;
    for i in 0..p {
        let send_to = (me + i) % p;
        let segment = &keys[recv_displs[send_to]..recv_displs[send_to] + dist.recv_counts[send_to]];
        let mut batch = Vec::with_capacity(send_counts[send_to] as usize);
        for key in segment {
            let probe = policy.store_transform(*key);
            store.find_into(&probe, pred, &mut batch);
        }
        let request = comm.isend(send_to, i as u64, batch);
        if let Some(previous) = in_flight.replace(request) {
            previous.wait();
        }
    }
    if let Some(last) = in_flight {
        last.wait();
    }

    // drain the receives into the single reply buffer, stitched in
    // source-rank order
    let mut chunks: Vec<Option<Vec<(K, V)>>> = (0..p).map(|_| None).collect();
    for (src, request) in pending {
        let chunk = request.wait();
        debug_assert_eq!(chunk.len() as u64, resp_counts[src]);
        chunks[src] = Some(chunk);
    }
    let mut results = Vec::with_capacity(resp_total as usize);
    for chunk in chunks.into_iter().flatten() {
        results.extend(chunk);
    }
    results
}
