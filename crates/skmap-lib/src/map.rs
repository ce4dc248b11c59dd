//! Distributed map façades
//!
//! [`MapEngine`] composes the communicator and the key policy and
//! implements the collective machinery every variant shares: the
//! globally-empty check, input transform, store-transform dedup,
//! distribution, and the count/find/erase exchanges. The thin façades
//! ([`DistMap`], [`DistMultiMap`], [`DistReductionMap`]) own their
//! local store and differ only in insertion semantics.
//!
//! Every public operation is *collective*: all ranks of the group must
//! invoke it. Preconditions are checked collectively, so an operation
//! with empty input on some (or all) ranks still executes its full
//! collective call sequence and no rank deadlocks.

use crate::comm::Communicator;
use crate::distribute::{displacements, distribute_by};
use crate::policy::KeyPolicy;
use crate::store::{LocalMap, LocalMultiMap, LocalStore, RecordPred};
use ahash::RandomState;
use std::collections::HashSet;
use std::hash::Hash;
use std::marker::PhantomData;
use tracing::debug;

// Seed for the transient dedup sets; unrelated to the policy hashers.
const DEDUP_SEED: u64 = 0x5eed_5eed_5eed_5eed;

/// Shared collective machinery: communicator + key policy
pub struct MapEngine<K, P, C> {
    comm: C,
    policy: P,
    _key: PhantomData<fn(K) -> K>,
}

impl<K, P, C> MapEngine<K, P, C>
where
    K: Copy + Eq + Hash + Send + 'static,
    P: KeyPolicy<K>,
    C: Communicator,
{
    /// Compose an engine from a communicator and a policy
    pub fn new(comm: C, policy: P) -> Self {
        Self {
            comm,
            policy,
            _key: PhantomData,
        }
    }

    /// The underlying communicator
    pub fn comm(&self) -> &C {
        &self.comm
    }

    /// The key policy
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// This rank's index
    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    /// Number of ranks in the group
    pub fn num_ranks(&self) -> usize {
        self.comm.size()
    }

    /// Hash-mod home rank of a key: `dist_digest(key) mod P`
    #[inline]
    pub fn hash_rank(&self, key: &K) -> usize {
        (self.policy.dist_digest(key) % self.comm.size() as u64) as usize
    }

    /// Collective: true iff the batch is empty on every rank
    pub(crate) fn globally_empty(&self, local_len: usize) -> bool {
        self.comm.all_reduce_sum(&[local_len as u64])[0] == 0
    }

    pub(crate) fn transform_keys(&self, keys: &mut [K]) {
        for key in keys.iter_mut() {
            *key = self.policy.input_transform(*key);
        }
    }

    pub(crate) fn transform_entries<V>(&self, entries: &mut [(K, V)]) {
        for entry in entries.iter_mut() {
            entry.0 = self.policy.input_transform(entry.0);
        }
    }

    /// Deduplicate under the store transform, keeping first occurrences
    /// in order
    pub(crate) fn dedup_stored(&self, keys: Vec<K>) -> Vec<K> {
        let state = RandomState::with_seeds(DEDUP_SEED, !DEDUP_SEED, DEDUP_SEED, !DEDUP_SEED);
        let mut seen = HashSet::with_capacity_and_hasher(keys.len(), state);
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if seen.insert(self.policy.store_transform(key)) {
                out.push(key);
            }
        }
        out
    }

    /// Collective count: one `(key, count)` reply per distinct
    /// transformed key this rank contributed
    pub(crate) fn count_collective<V, S>(
        &self,
        store: &S,
        mut keys: Vec<K>,
        rank_of: &dyn Fn(&K) -> usize,
        pred: RecordPred<'_, K, V>,
    ) -> Vec<(K, u64)>
    where
        S: LocalStore<K, V>,
    {
        if self.globally_empty(keys.len()) {
            return Vec::new();
        }
        self.transform_keys(&mut keys);
        let keys = self.dedup_stored(keys);

        if self.comm.size() == 1 {
            return keys
                .iter()
                .map(|key| {
                    let probe = self.policy.store_transform(*key);
                    (*key, store.count_key(&probe, pred) as u64)
                })
                .collect();
        }

        let dist = distribute_by(keys, |key| rank_of(key), &self.comm);
        debug!(
            rank = self.comm.rank(),
            queries = dist.items.len(),
            "count: distributed query batch"
        );

        let mut results = Vec::with_capacity(dist.items.len());
        for key in &dist.items {
            let probe = self.policy.store_transform(*key);
            results.push((*key, store.count_key(&probe, pred) as u64));
        }

        // one reply per received key: the inbound receive counts are
        // exactly the reply send counts
        let mut results = results.into_iter();
        let parts: Vec<Vec<(K, u64)>> = dist
            .recv_counts
            .iter()
            .map(|&c| results.by_ref().take(c).collect())
            .collect();
        let (replies, _) = self.comm.all_to_allv(parts);
        replies
    }

    /// Collective find via a single all-to-all-v of replies
    pub(crate) fn find_collective<V, S>(
        &self,
        store: &S,
        mut keys: Vec<K>,
        rank_of: &dyn Fn(&K) -> usize,
        pred: RecordPred<'_, K, V>,
    ) -> Vec<(K, V)>
    where
        V: Clone + Send + 'static,
        S: LocalStore<K, V>,
    {
        if self.globally_empty(keys.len()) {
            return Vec::new();
        }
        self.transform_keys(&mut keys);
        let keys = self.dedup_stored(keys);

        if self.comm.size() == 1 {
            let mut out = Vec::new();
            for key in &keys {
                let probe = self.policy.store_transform(*key);
                store.find_into(&probe, pred, &mut out);
            }
            return out;
        }

        let dist = distribute_by(keys, |key| rank_of(key), &self.comm);
        let displs = displacements(&dist.recv_counts);

        let p = self.comm.size();
        let mut parts = Vec::with_capacity(p);
        for src in 0..p {
            let segment = &dist.items[displs[src]..displs[src] + dist.recv_counts[src]];
            let mut out = Vec::new();
            for key in segment {
                let probe = self.policy.store_transform(*key);
                store.find_into(&probe, pred, &mut out);
            }
            parts.push(out);
        }
        let (replies, _) = self.comm.all_to_allv(parts);
        debug!(
            rank = self.comm.rank(),
            replies = replies.len(),
            "find: reply exchange complete"
        );
        replies
    }

    /// Collective erase; returns the local number of records removed
    pub(crate) fn erase_collective<V, S>(
        &self,
        store: &mut S,
        mut keys: Vec<K>,
        rank_of: &dyn Fn(&K) -> usize,
        pred: RecordPred<'_, K, V>,
    ) -> usize
    where
        S: LocalStore<K, V>,
    {
        if self.globally_empty(keys.len()) {
            return 0;
        }
        self.transform_keys(&mut keys);
        let keys = if self.comm.size() > 1 {
            distribute_by(keys, |key| rank_of(key), &self.comm).items
        } else {
            keys
        };
        // dedup after distribution, in store-transformed space
        let keys = self.dedup_stored(keys);

        let before = store.len();
        for key in &keys {
            let probe = self.policy.store_transform(*key);
            store.erase_key(&probe, pred);
        }
        before - store.len()
    }

    /// Collective sum of a per-rank quantity
    pub(crate) fn global_sum(&self, local: u64) -> u64 {
        self.comm.all_reduce_sum(&[local])[0]
    }
}

macro_rules! facade_common {
    () => {
        /// Number of records in this rank's shard
        pub fn local_size(&self) -> usize {
            self.store.len()
        }

        /// Number of distinct keys in this rank's shard
        pub fn local_unique_size(&self) -> usize {
            self.store.unique_len()
        }

        /// Collective: total records across all ranks
        pub fn size(&self) -> u64 {
            self.engine.global_sum(self.store.len() as u64)
        }

        /// Distinct keys held by this rank's shard
        pub fn local_keys(&self) -> Vec<K> {
            self.store.keys()
        }

        /// Average records per distinct key on this rank
        pub fn local_multiplicity(&self) -> f64 {
            let unique = self.store.unique_len();
            if unique == 0 {
                1.0
            } else {
                self.store.len() as f64 / unique as f64
            }
        }

        /// Remove every local record matching `pred` (local operation)
        pub fn erase_where(&mut self, pred: impl Fn(&K, &V) -> bool) -> usize {
            self.store.erase_where(&pred)
        }

        /// The engine behind this façade
        pub fn engine(&self) -> &MapEngine<K, P, C> {
            &self.engine
        }
    };
}

/// Distributed single-valued map
///
/// At most one value per key; a later insert of an existing key is
/// dropped rather than overwriting, matching emplace semantics.
pub struct DistMap<K, V, P, C> {
    engine: MapEngine<K, P, C>,
    store: LocalMap<K, V>,
}

impl<K, V, P, C> DistMap<K, V, P, C>
where
    K: Copy + Eq + Hash + Send + 'static,
    V: Clone + Send + 'static,
    P: KeyPolicy<K>,
    C: Communicator,
{
    /// Create an empty map over the group
    pub fn new(comm: C, policy: P, store_state: RandomState) -> Self {
        Self {
            engine: MapEngine::new(comm, policy),
            store: LocalMap::with_hasher(store_state),
        }
    }

    facade_common!();

    /// Collective insert; returns the local net records added
    pub fn insert(&mut self, batch: Vec<(K, V)>) -> usize {
        self.insert_if(batch, |_, _| true)
    }

    /// Collective filtered insert
    pub fn insert_if(&mut self, mut batch: Vec<(K, V)>, pred: impl Fn(&K, &V) -> bool) -> usize {
        let engine = &self.engine;
        if engine.globally_empty(batch.len()) {
            return 0;
        }
        engine.transform_entries(&mut batch);
        let batch = if engine.num_ranks() > 1 {
            distribute_by(batch, |entry| engine.hash_rank(&entry.0), engine.comm()).items
        } else {
            batch
        };
        let before = self.store.len();
        self.store.reserve(batch.len());
        for (key, value) in batch {
            let key = self.engine.policy().store_transform(key);
            if pred(&key, &value) {
                self.store.insert_first(key, value);
            }
        }
        self.store.len() - before
    }

    /// Collective find; returns matches for keys this rank contributed
    pub fn find(&self, keys: Vec<K>) -> Vec<(K, V)> {
        self.find_if(keys, |_, _| true)
    }

    /// Collective filtered find
    pub fn find_if(&self, keys: Vec<K>, pred: impl Fn(&K, &V) -> bool) -> Vec<(K, V)> {
        let engine = &self.engine;
        engine.find_collective(&self.store, keys, &|key| engine.hash_rank(key), &pred)
    }

    /// Collective find with ring-streamed replies (bounded peak memory)
    pub fn find_overlap(&self, keys: Vec<K>) -> Vec<(K, V)> {
        let engine = &self.engine;
        crate::overlap::find_overlap_collective(
            engine,
            &self.store,
            keys,
            &|key| engine.hash_rank(key),
            &|_, _| true,
        )
    }

    /// Collective count per distinct key
    pub fn count(&self, keys: Vec<K>) -> Vec<(K, u64)> {
        self.count_if(keys, |_, _| true)
    }

    /// Collective filtered count
    pub fn count_if(&self, keys: Vec<K>, pred: impl Fn(&K, &V) -> bool) -> Vec<(K, u64)> {
        let engine = &self.engine;
        engine.count_collective(&self.store, keys, &|key| engine.hash_rank(key), &pred)
    }

    /// Collective erase; returns local records removed (sum across
    /// ranks for the global total)
    pub fn erase(&mut self, keys: Vec<K>) -> usize {
        self.erase_if(keys, |_, _| true)
    }

    /// Collective filtered erase
    pub fn erase_if(&mut self, keys: Vec<K>, pred: impl Fn(&K, &V) -> bool) -> usize {
        let engine = &self.engine;
        engine.erase_collective(&mut self.store, keys, &|key| engine.hash_rank(key), &pred)
    }

    /// This rank's local store
    pub fn local_store(&self) -> &LocalMap<K, V> {
        &self.store
    }
}

/// Distributed multimap
///
/// Keeps every inserted record; `find` returns the full equal range of
/// each queried key. The default `find` is the ring-streamed variant,
/// since multimap reply volumes are the ones that blow up memory.
pub struct DistMultiMap<K, V, P, C> {
    engine: MapEngine<K, P, C>,
    store: LocalMultiMap<K, V>,
}

impl<K, V, P, C> DistMultiMap<K, V, P, C>
where
    K: Copy + Eq + Hash + Send + 'static,
    V: Clone + Send + 'static,
    P: KeyPolicy<K>,
    C: Communicator,
{
    /// Create an empty multimap over the group
    pub fn new(comm: C, policy: P, store_state: RandomState) -> Self {
        Self {
            engine: MapEngine::new(comm, policy),
            store: LocalMultiMap::with_hasher(store_state),
        }
    }

    facade_common!();

    /// Collective insert; never deduplicates. Returns the local records
    /// added.
    pub fn insert(&mut self, batch: Vec<(K, V)>) -> usize {
        self.insert_if(batch, |_, _| true)
    }

    /// Collective filtered insert
    pub fn insert_if(&mut self, mut batch: Vec<(K, V)>, pred: impl Fn(&K, &V) -> bool) -> usize {
        let engine = &self.engine;
        if engine.globally_empty(batch.len()) {
            return 0;
        }
        engine.transform_entries(&mut batch);
        let batch = if engine.num_ranks() > 1 {
            distribute_by(batch, |entry| engine.hash_rank(&entry.0), engine.comm()).items
        } else {
            batch
        };
        let before = self.store.len();
        self.store.reserve(batch.len());
        for (key, value) in batch {
            let key = self.engine.policy().store_transform(key);
            if pred(&key, &value) {
                self.store.append(key, value);
            }
        }
        self.store.len() - before
    }

    /// Collective find (ring-streamed); returns the equal range of each
    /// key this rank contributed
    pub fn find(&self, keys: Vec<K>) -> Vec<(K, V)> {
        let engine = &self.engine;
        crate::overlap::find_overlap_collective(
            engine,
            &self.store,
            keys,
            &|key| engine.hash_rank(key),
            &|_, _| true,
        )
    }

    /// Collective find via a single all-to-all-v of replies
    pub fn find_a2a(&self, keys: Vec<K>) -> Vec<(K, V)> {
        self.find_if(keys, |_, _| true)
    }

    /// Collective filtered find (single all-to-all-v)
    pub fn find_if(&self, keys: Vec<K>, pred: impl Fn(&K, &V) -> bool) -> Vec<(K, V)> {
        let engine = &self.engine;
        engine.find_collective(&self.store, keys, &|key| engine.hash_rank(key), &pred)
    }

    /// Collective count per distinct key
    pub fn count(&self, keys: Vec<K>) -> Vec<(K, u64)> {
        self.count_if(keys, |_, _| true)
    }

    /// Collective filtered count
    pub fn count_if(&self, keys: Vec<K>, pred: impl Fn(&K, &V) -> bool) -> Vec<(K, u64)> {
        let engine = &self.engine;
        engine.count_collective(&self.store, keys, &|key| engine.hash_rank(key), &pred)
    }

    /// Collective erase of whole equal ranges; returns local records
    /// removed
    pub fn erase(&mut self, keys: Vec<K>) -> usize {
        self.erase_if(keys, |_, _| true)
    }

    /// Collective filtered erase
    pub fn erase_if(&mut self, keys: Vec<K>, pred: impl Fn(&K, &V) -> bool) -> usize {
        let engine = &self.engine;
        engine.erase_collective(&mut self.store, keys, &|key| engine.hash_rank(key), &pred)
    }

    /// This rank's local store
    pub fn local_store(&self) -> &LocalMultiMap<K, V> {
        &self.store
    }
}

/// Distributed reduction map
///
/// Inserting an existing key folds the old and new values with the
/// combining function, called as `combine(old, new)`. The function is
/// not assumed to be associative or commutative.
pub struct DistReductionMap<K, V, P, C, F> {
    engine: MapEngine<K, P, C>,
    store: LocalMap<K, V>,
    combine: F,
}

impl<K, V, P, C, F> DistReductionMap<K, V, P, C, F>
where
    K: Copy + Eq + Hash + Send + 'static,
    V: Clone + Send + 'static,
    P: KeyPolicy<K>,
    C: Communicator,
    F: Fn(V, V) -> V,
{
    /// Create an empty reduction map over the group
    pub fn new(comm: C, policy: P, store_state: RandomState, combine: F) -> Self {
        Self {
            engine: MapEngine::new(comm, policy),
            store: LocalMap::with_hasher(store_state),
            combine,
        }
    }

    facade_common!();

    /// Collective insert with reduction of duplicates; returns the
    /// local net records added (newly created keys)
    pub fn insert(&mut self, mut batch: Vec<(K, V)>) -> usize {
        let engine = &self.engine;
        if engine.globally_empty(batch.len()) {
            return 0;
        }
        engine.transform_entries(&mut batch);
        let batch = if engine.num_ranks() > 1 {
            distribute_by(batch, |entry| engine.hash_rank(&entry.0), engine.comm()).items
        } else {
            batch
        };
        let before = self.store.len();
        self.store.reserve(batch.len());
        for (key, value) in batch {
            let key = self.engine.policy().store_transform(key);
            self.store.merge(key, value, &self.combine);
        }
        self.store.len() - before
    }

    /// Collective find
    pub fn find(&self, keys: Vec<K>) -> Vec<(K, V)> {
        let engine = &self.engine;
        engine.find_collective(&self.store, keys, &|key| engine.hash_rank(key), &|_, _| true)
    }

    /// Collective count per distinct key
    pub fn count(&self, keys: Vec<K>) -> Vec<(K, u64)> {
        let engine = &self.engine;
        engine.count_collective(&self.store, keys, &|key| engine.hash_rank(key), &|_, _| true)
    }

    /// Collective erase; returns local records removed
    pub fn erase(&mut self, keys: Vec<K>) -> usize {
        let engine = &self.engine;
        engine.erase_collective(&mut self.store, keys, &|key| engine.hash_rank(key), &|_, _| true)
    }

    /// This rank's local store
    pub fn local_store(&self) -> &LocalMap<K, V> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::spawn_group;
    use crate::kmer::Kmer;
    use crate::policy::KmerPolicy;

    fn kmers(strs: &[&str]) -> Vec<Kmer> {
        strs.iter().map(|s| Kmer::parse(s).unwrap()).collect()
    }

    fn entries(strs: &[&str]) -> Vec<(Kmer, u32)> {
        strs.iter()
            .enumerate()
            .map(|(i, s)| (Kmer::parse(s).unwrap(), i as u32))
            .collect()
    }

    #[test]
    fn test_dist_map_insert_find_two_ranks() {
        let results = spawn_group(2, |comm| {
            let policy = KmerPolicy::identity(1);
            let mut map = DistMap::new(comm, policy.clone(), policy.store_state());
            let batch = if map.engine().rank() == 0 {
                entries(&["ACG", "CGT", "GTA"])
            } else {
                entries(&["TAC"])
            };
            map.insert(batch);

            let found = map.find(kmers(&["ACG", "TAC", "TTT"]));
            let total = map.size();
            (found.len(), total)
        });
        for (found, total) in results {
            // every rank queried the same 3 keys, 2 exist
            assert_eq!(found, 2);
            assert_eq!(total, 4);
        }
    }

    #[test]
    fn test_dist_map_no_overwrite() {
        let results = spawn_group(1, |comm| {
            let policy = KmerPolicy::identity(1);
            let mut map = DistMap::new(comm, policy.clone(), policy.store_state());
            let kmer = Kmer::parse("ACGT").unwrap();
            let added = map.insert(vec![(kmer, 1u32), (kmer, 2u32)]);
            (added, map.find(vec![kmer]))
        });
        let (added, found) = &results[0];
        assert_eq!(*added, 1);
        assert_eq!(found, &vec![(Kmer::parse("ACGT").unwrap(), 1u32)]);
    }

    #[test]
    fn test_reduction_map_combines_in_order() {
        let results = spawn_group(2, |comm| {
            let policy = KmerPolicy::identity(1);
            let mut map = DistReductionMap::new(
                comm,
                policy.clone(),
                policy.store_state(),
                |old: u64, new: u64| old * 10 + new,
            );
            let kmer = Kmer::parse("ACGTA").unwrap();
            // both ranks contribute the same key; the receiving rank
            // folds them as combine(old, new)
            map.insert(vec![(kmer, map.engine().rank() as u64 + 1)]);
            map.find(vec![kmer])
        });
        for found in results {
            assert_eq!(found.len(), 1);
            // rank 0's value arrives first: combine(1, 2) = 12
            assert_eq!(found[0].1, 12);
        }
    }

    #[test]
    fn test_multimap_equal_range_and_counts() {
        let results = spawn_group(2, |comm| {
            let policy = KmerPolicy::identity(1);
            let mut map = DistMultiMap::new(comm, policy.clone(), policy.store_state());
            let kmer = Kmer::parse("ACGTA").unwrap();
            let rank = map.engine().rank() as u32;
            map.insert(vec![(kmer, rank), (kmer, rank + 10)]);

            let keys = if map.engine().rank() == 0 {
                vec![kmer]
            } else {
                vec![]
            };
            let found = map.find_a2a(keys);
            (map.engine().rank(), found, map.size())
        });
        for (rank, found, total) in results {
            assert_eq!(total, 4);
            if rank == 0 {
                assert_eq!(found.len(), 4, "equal range spans both source ranks");
            } else {
                assert!(found.is_empty());
            }
        }
    }

    #[test]
    fn test_empty_batches_complete_collectively() {
        let results = spawn_group(2, |comm| {
            let policy = KmerPolicy::identity(1);
            let mut map = DistMap::<Kmer, u32, _, _>::new(comm, policy.clone(), policy.store_state());
            let added = map.insert(vec![]);
            let found = map.find(vec![]);
            let counted = map.count(vec![]);
            let erased = map.erase(vec![]);
            (added, found.len(), counted.len(), erased, map.size())
        });
        assert_eq!(results, vec![(0, 0, 0, 0, 0), (0, 0, 0, 0, 0)]);
    }

    #[test]
    fn test_insert_if_filters_records() {
        let results = spawn_group(2, |comm| {
            let policy = KmerPolicy::identity(1);
            let mut map = DistMultiMap::new(comm, policy.clone(), policy.store_state());
            let kmer = Kmer::parse("ACGTA").unwrap();
            let rank = map.engine().rank() as u32;
            // rank 0 offers 0..4, rank 1 offers 10..14; only evens pass
            let batch: Vec<(Kmer, u32)> = (0..4).map(|i| (kmer, rank * 10 + i)).collect();
            let added = map.insert_if(batch, |_, value| value % 2 == 0);
            let added_global = map.engine().comm().all_reduce_sum(&[added as u64])[0];

            let mut found = map.find(vec![kmer]);
            found.sort();
            (added_global, found, map.size())
        });
        for (added_global, found, total) in results {
            assert_eq!(added_global, 4, "odd values must be rejected at insert");
            assert_eq!(total, 4);
            let values: Vec<u32> = found.iter().map(|&(_, value)| value).collect();
            assert_eq!(values, vec![0, 2, 10, 12]);
        }
    }

    #[test]
    fn test_find_if_and_count_if_filter_replies() {
        let results = spawn_group(2, |comm| {
            let policy = KmerPolicy::identity(1);
            let mut map = DistMultiMap::new(comm, policy.clone(), policy.store_state());
            let kmer = Kmer::parse("ACGTA").unwrap();
            let rank = map.engine().rank() as u32;
            // rank 0 stores 0 and 1, rank 1 stores 10 and 11
            map.insert(vec![(kmer, rank * 10), (kmer, rank * 10 + 1)]);

            let mut found = map.find_if(vec![kmer], |_, value| *value < 10);
            found.sort();
            let counted = map.count_if(vec![kmer], |_, value| *value < 10);
            let unfiltered = map.count(vec![kmer]);
            (found, counted, unfiltered)
        });
        for (found, counted, unfiltered) in results {
            let values: Vec<u32> = found.iter().map(|&(_, value)| value).collect();
            assert_eq!(values, vec![0, 1], "find_if must drop values >= 10");
            assert_eq!(counted, vec![(Kmer::parse("ACGTA").unwrap(), 2)]);
            assert_eq!(unfiltered, vec![(Kmer::parse("ACGTA").unwrap(), 4)]);
        }
    }

    #[test]
    fn test_erase_if_removes_only_matching() {
        let results = spawn_group(2, |comm| {
            let policy = KmerPolicy::identity(1);
            let mut map = DistMultiMap::new(comm, policy.clone(), policy.store_state());
            let kmer = Kmer::parse("ACGTA").unwrap();
            let rank = map.engine().rank() as u32;
            map.insert(vec![(kmer, rank * 10), (kmer, rank * 10 + 1)]);

            let erased = map.erase_if(vec![kmer], |_, value| value % 2 == 1);
            let erased_global = map.engine().comm().all_reduce_sum(&[erased as u64])[0];

            let mut survivors = map.find(vec![kmer]);
            survivors.sort();
            (erased_global, survivors, map.size())
        });
        for (erased_global, survivors, total) in results {
            assert_eq!(erased_global, 2, "exactly the odd values are erased");
            assert_eq!(total, 2);
            let values: Vec<u32> = survivors.iter().map(|&(_, value)| value).collect();
            assert_eq!(values, vec![0, 10]);
        }
    }

    #[test]
    fn test_dist_map_insert_if_rejects_whole_entries() {
        let results = spawn_group(1, |comm| {
            let policy = KmerPolicy::identity(1);
            let mut map = DistMap::new(comm, policy.clone(), policy.store_state());
            let keep = Kmer::parse("ACG").unwrap();
            let drop = Kmer::parse("TTT").unwrap();
            let added = map.insert_if(
                vec![(keep, 2u32), (drop, 3u32)],
                |_, value| value % 2 == 0,
            );
            (added, map.find(vec![keep, drop]))
        });
        let (added, found) = &results[0];
        assert_eq!(*added, 1);
        assert_eq!(found, &vec![(Kmer::parse("ACG").unwrap(), 2u32)]);
    }

    #[test]
    fn test_local_keys_and_multiplicity() {
        let results = spawn_group(1, |comm| {
            let policy = KmerPolicy::identity(1);
            let mut map = DistMultiMap::new(comm, policy.clone(), policy.store_state());
            let empty_multiplicity = map.local_multiplicity();

            let a = Kmer::parse("ACG").unwrap();
            let b = Kmer::parse("TTT").unwrap();
            map.insert(vec![(a, 1u32), (a, 2), (a, 3), (b, 4)]);

            let mut keys = map.local_keys();
            keys.sort();
            (empty_multiplicity, keys, map.local_multiplicity())
        });
        let (empty_multiplicity, keys, multiplicity) = &results[0];
        assert_eq!(*empty_multiplicity, 1.0);
        assert_eq!(
            keys,
            &vec![Kmer::parse("ACG").unwrap(), Kmer::parse("TTT").unwrap()]
        );
        // 4 records over 2 distinct keys
        assert_eq!(*multiplicity, 2.0);
    }

    #[test]
    fn test_erase_where_local_sweep() {
        let results = spawn_group(1, |comm| {
            let policy = KmerPolicy::identity(1);
            let mut map = DistMultiMap::new(comm, policy.clone(), policy.store_state());
            let a = Kmer::parse("ACG").unwrap();
            let b = Kmer::parse("TTT").unwrap();
            map.insert(vec![(a, 1u32), (a, 2), (b, 3), (b, 4)]);

            let removed = map.erase_where(|_, value| value % 2 == 1);
            (removed, map.local_size(), map.local_unique_size())
        });
        assert_eq!(results[0], (2, 2, 2));
    }

    #[test]
    fn test_canonical_policy_merges_strands() {
        let results = spawn_group(2, |comm| {
            let policy = KmerPolicy::canonical(1);
            let mut map = DistReductionMap::new(
                comm,
                policy.clone(),
                policy.store_state(),
                |old: u64, new: u64| old + new,
            );
            let kmer = Kmer::parse("AAACC").unwrap();
            let rc = kmer.reverse_complement();
            let rank = map.engine().rank();
            // rank 0 inserts the forward strand, rank 1 the reverse
            let batch = if rank == 0 {
                vec![(kmer, 1u64)]
            } else {
                vec![(rc, 1u64)]
            };
            map.insert(batch);
            map.count(vec![kmer])
        });
        for counts in results {
            assert_eq!(counts.len(), 1);
            assert_eq!(counts[0].1, 1, "both strands fold into one key");
        }
    }
}
