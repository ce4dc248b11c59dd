//! Distributed k-mer counting map
//!
//! [`KmerCountMap`] folds k-mer occurrences under additive reduction
//! across a rank group. K-mers can be inserted directly, or through the
//! supermer path: producers split sequences into supermers, account
//! per-minimizer loads, and the map routes supermers by a greedily
//! balanced minimizer-to-rank assignment before re-expanding them at
//! their home rank.
//!
//! Routing is coherent for queries: count/find/erase compute each key's
//! minimizer and follow the same minimizer-to-rank map that placed the
//! records (or the baseline `hash(minimizer) mod P` before any binning).

use crate::binning::{MinimizerHistogram, MinimizerRouting};
use crate::comm::Communicator;
use crate::constants::{
    is_valid_k, DEFAULT_REBIN_THRESHOLD, DEFAULT_SEED, MAX_K, MAX_MINIMIZER_LEN,
};
use crate::distribute::distribute_by;
use crate::kmer::Kmer;
use crate::map::MapEngine;
use crate::minimizer::kmer_minimizer;
use crate::policy::{check_rank_consistency, KmerPolicy, PolicyError};
use crate::store::{LocalMap, LocalStore};
use crate::supermer::Supermer;
use thiserror::Error;
use tracing::{debug, info};

/// Errors detected while constructing a counting map
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// K-mer width outside the supported range
    #[error("k must be in [1, {max}], got {k}")]
    InvalidK {
        /// Requested k
        k: usize,
        /// Largest supported k
        max: usize,
    },
    /// Minimizer wider than the k-mer
    #[error("m must satisfy m <= k, got m={m}, k={k}")]
    MinimizerTooWide {
        /// Requested m
        m: usize,
        /// Requested k
        k: usize,
    },
    /// Minimizer histogram would not be addressable
    #[error("minimizer histogram has 4^m cells; m={m} exceeds the maximum of {max}")]
    HistogramTooWide {
        /// Requested m
        m: usize,
        /// Largest supported m
        max: usize,
    },
    /// The communicator has no ranks
    #[error("communicator has no ranks")]
    EmptyCommunicator,
    /// The requested transforms cannot route queries to the records
    #[error(
        "canonical input transform is incompatible with minimizer routing: \
         the minimizer of a canonical form is not a function of the supermer minimizer"
    )]
    InconsistentPolicy,
    /// The sampled transform/rank consistency check failed
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

/// Configuration of a [`KmerCountMap`]
///
/// `k` and `m` are immutable for the lifetime of a map instance.
#[derive(Debug, Clone)]
pub struct CountingConfig {
    /// K-mer width in bases
    pub k: usize,
    /// Minimizer width in bases (m <= k)
    pub m: usize,
    /// Seed for the policy hashers
    pub seed: u64,
    /// Merge each k-mer with its reverse complement. Rejected: see
    /// [`ConfigError::InconsistentPolicy`].
    pub canonical: bool,
    /// Fraction of global load growth that triggers rebinning
    pub rebin_threshold: f64,
}

impl CountingConfig {
    /// Create a validated configuration with default seed and threshold
    pub fn new(k: usize, m: usize) -> Result<Self, ConfigError> {
        let config = Self {
            k,
            m,
            seed: DEFAULT_SEED,
            canonical: false,
            rebin_threshold: DEFAULT_REBIN_THRESHOLD,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_k(self.k) {
            return Err(ConfigError::InvalidK { k: self.k, max: MAX_K });
        }
        if self.m > self.k {
            return Err(ConfigError::MinimizerTooWide { m: self.m, k: self.k });
        }
        if self.m > MAX_MINIMIZER_LEN {
            return Err(ConfigError::HistogramTooWide {
                m: self.m,
                max: MAX_MINIMIZER_LEN,
            });
        }
        if self.canonical {
            return Err(ConfigError::InconsistentPolicy);
        }
        Ok(())
    }
}

/// Distributed counting map over packed k-mers
pub struct KmerCountMap<C> {
    engine: MapEngine<Kmer, KmerPolicy, C>,
    store: LocalMap<Kmer, u64>,
    k: usize,
    m: usize,
    rebin_threshold: f64,
    local_load: MinimizerHistogram,
    routing: Option<MinimizerRouting>,
}

/// Routing function shared by insertion and queries: a key follows its
/// minimizer through the balanced map once one exists, or through the
/// baseline `hash(minimizer) mod P` before any binning.
fn minimizer_rank<'a, C: Communicator>(
    engine: &'a MapEngine<Kmer, KmerPolicy, C>,
    routing: Option<&'a MinimizerRouting>,
    k: usize,
    m: usize,
) -> impl Fn(&Kmer) -> usize + 'a {
    move |key: &Kmer| {
        debug_assert_eq!(key.k(), k);
        let minimizer = kmer_minimizer(key, m);
        match routing {
            Some(r) => r.rank_of(minimizer),
            None => {
                (engine.policy().minimizer_digest(minimizer) % engine.num_ranks() as u64) as usize
            }
        }
    }
}

impl<C: Communicator> KmerCountMap<C> {
    /// Create an empty counting map over the group.
    ///
    /// Fails fast on invalid parameters, an empty communicator, or a
    /// policy whose transforms and distribution hash are inconsistent.
    pub fn new(comm: C, config: CountingConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        if comm.size() == 0 {
            return Err(ConfigError::EmptyCommunicator);
        }
        let policy = KmerPolicy::identity(config.seed);
        check_rank_consistency(&policy, config.k, comm.size())?;
        let store = LocalMap::with_hasher(policy.store_state());
        Ok(Self {
            engine: MapEngine::new(comm, policy),
            store,
            k: config.k,
            m: config.m,
            rebin_threshold: config.rebin_threshold,
            local_load: MinimizerHistogram::new(config.m),
            routing: None,
        })
    }

    /// K-mer width
    pub fn k(&self) -> usize {
        self.k
    }

    /// Minimizer width
    pub fn m(&self) -> usize {
        self.m
    }

    /// The engine behind this map
    pub fn engine(&self) -> &MapEngine<Kmer, KmerPolicy, C> {
        &self.engine
    }

    /// The current minimizer-to-rank routing, if binning has run
    pub fn routing(&self) -> Option<&MinimizerRouting> {
        self.routing.as_ref()
    }

    /// Collective direct insert: each k-mer contributes one occurrence.
    /// Returns the local net records added (newly seen keys).
    pub fn insert(&mut self, kmers: Vec<Kmer>) -> usize {
        let engine = &self.engine;
        if engine.globally_empty(kmers.len()) {
            return 0;
        }
        let batch = if engine.num_ranks() > 1 {
            let rank_of = minimizer_rank(engine, self.routing.as_ref(), self.k, self.m);
            distribute_by(kmers, |key| rank_of(key), engine.comm()).items
        } else {
            kmers
        };
        let before = self.store.len();
        self.store.reserve(batch.len());
        for kmer in batch {
            self.store.merge(kmer, 1, &|old, new| old + new);
        }
        self.store.len() - before
    }

    /// Collective supermer insert.
    ///
    /// Accounts the local minimizer-load histogram, all-reduces it,
    /// (re)builds the balanced routing when needed, distributes the
    /// supermers, and re-expands them into counted k-mers at their home
    /// rank. Returns the local net records added.
    pub fn insert_supermers(&mut self, batch: Vec<Supermer>) -> usize {
        if self.engine.globally_empty(batch.len()) {
            return 0;
        }

        // account loads before distribution
        for supermer in &batch {
            self.local_load.add_supermer(supermer, self.k);
        }

        // every rank now holds the identical global histogram
        let global = self.engine.comm().all_reduce_sum(self.local_load.counts());
        let total: u64 = global.iter().sum();

        // the cached assignment survives until the load outgrows it;
        // the staleness decision is identical on every rank
        let rebuild = match &self.routing {
            None => true,
            Some(routing) => routing.stale(total, self.rebin_threshold),
        };
        if rebuild {
            if self.routing.is_some() {
                info!(total_kmers = total, "rebinning minimizer routing");
            }
            let routing = MinimizerRouting::build(&global, self.engine.num_ranks());
            self.redistribute_records(&routing);
            self.routing = Some(routing);
        }
        let routing = self.routing.as_ref().expect("routing built above");

        let dist = distribute_by(
            batch,
            |supermer| routing.rank_of(supermer.minimizer()),
            self.engine.comm(),
        );
        debug!(
            rank = self.engine.rank(),
            supermers = dist.items.len(),
            "supermer insert: distribution complete"
        );

        let incoming: usize = dist.items.iter().map(|sm| sm.kmer_count(self.k)).sum();
        let before = self.store.len();
        self.store.reserve(incoming);
        for supermer in &dist.items {
            for kmer in supermer.kmers(self.k) {
                self.store.merge(kmer, 1, &|old, new| old + new);
            }
        }
        self.store.len() - before
    }

    /// Collective: move every stored record to its home rank under a
    /// new routing, so queries keep finding records after rebinning.
    fn redistribute_records(&mut self, routing: &MinimizerRouting) {
        if self.engine.num_ranks() == 1 {
            return;
        }
        let m = self.m;
        let records = self.store.drain_records();
        let moved = records.len();
        let dist = distribute_by(
            records,
            |(key, _)| routing.rank_of(kmer_minimizer(key, m)),
            self.engine.comm(),
        );
        self.store.reserve(dist.items.len());
        for (key, count) in dist.items {
            self.store.merge(key, count, &|old, new| old + new);
        }
        if moved > 0 {
            debug!(
                rank = self.engine.rank(),
                sent = moved,
                received = self.store.len(),
                "redistributed records under new routing"
            );
        }
    }

    /// Collective count: one `(key, occurrences)` entry per distinct
    /// key this rank contributed; absent keys report 0.
    pub fn count(&self, keys: Vec<Kmer>) -> Vec<(Kmer, u64)> {
        let engine = &self.engine;
        if engine.globally_empty(keys.len()) {
            return Vec::new();
        }
        let mut keys = keys;
        engine.transform_keys(&mut keys);
        let keys = engine.dedup_stored(keys);

        if engine.num_ranks() == 1 {
            return keys
                .iter()
                .map(|key| (*key, self.store.get(key).copied().unwrap_or(0)))
                .collect();
        }

        let rank_of = minimizer_rank(engine, self.routing.as_ref(), self.k, self.m);
        let dist = distribute_by(keys, |key| rank_of(key), engine.comm());
        let mut replies = Vec::with_capacity(dist.items.len());
        for key in &dist.items {
            replies.push((*key, self.store.get(key).copied().unwrap_or(0)));
        }
        // reply using the inbound receive counts as send counts
        let mut replies = replies.into_iter();
        let parts: Vec<Vec<(Kmer, u64)>> = dist
            .recv_counts
            .iter()
            .map(|&c| replies.by_ref().take(c).collect())
            .collect();
        let (replies, _) = engine.comm().all_to_allv(parts);
        replies
    }

    /// Collective find: `(key, occurrences)` for the present keys this
    /// rank contributed
    pub fn find(&self, keys: Vec<Kmer>) -> Vec<(Kmer, u64)> {
        let engine = &self.engine;
        let rank_of = minimizer_rank(engine, self.routing.as_ref(), self.k, self.m);
        engine.find_collective(&self.store, keys, &rank_of, &|_, _| true)
    }

    /// Collective find with ring-streamed replies
    pub fn find_overlap(&self, keys: Vec<Kmer>) -> Vec<(Kmer, u64)> {
        let engine = &self.engine;
        let rank_of = minimizer_rank(engine, self.routing.as_ref(), self.k, self.m);
        crate::overlap::find_overlap_collective(engine, &self.store, keys, &rank_of, &|_, _| true)
    }

    /// Collective erase; returns local records removed
    pub fn erase(&mut self, keys: Vec<Kmer>) -> usize {
        let engine = &self.engine;
        let rank_of = minimizer_rank(engine, self.routing.as_ref(), self.k, self.m);
        engine.erase_collective(&mut self.store, keys, &rank_of, &|_, _| true)
    }

    /// Number of records (distinct k-mers) in this rank's shard
    pub fn local_size(&self) -> usize {
        self.store.len()
    }

    /// Number of distinct k-mers in this rank's shard
    pub fn local_unique_size(&self) -> usize {
        self.store.unique_len()
    }

    /// Collective: total records across all ranks
    pub fn size(&self) -> u64 {
        self.engine.global_sum(self.store.len() as u64)
    }

    /// Sum of occurrence counts held by this rank
    pub fn local_kmer_total(&self) -> u64 {
        self.store.iter().map(|(_, &count)| count).sum()
    }

    /// Collective: global sum of occurrence counts
    pub fn global_kmer_total(&self) -> u64 {
        self.engine.global_sum(self.local_kmer_total())
    }

    /// This rank's local store
    pub fn local_store(&self) -> &LocalMap<Kmer, u64> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::spawn_group;
    use crate::encoding::encode_sequence;
    use crate::minimizer::window_minimizer;
    use crate::supermer::split_supermers;

    fn kmer(s: &str) -> Kmer {
        Kmer::parse(s).unwrap()
    }

    #[test]
    fn test_config_validation() {
        assert!(CountingConfig::new(21, 7).is_ok());
        assert!(matches!(
            CountingConfig::new(0, 1),
            Err(ConfigError::InvalidK { .. })
        ));
        assert!(matches!(
            CountingConfig::new(5, 7),
            Err(ConfigError::MinimizerTooWide { .. })
        ));
        assert!(matches!(
            CountingConfig::new(31, 14),
            Err(ConfigError::HistogramTooWide { .. })
        ));
        let canonical = CountingConfig {
            canonical: true,
            ..CountingConfig::new(21, 7).unwrap()
        };
        assert!(matches!(
            canonical.validate(),
            Err(ConfigError::InconsistentPolicy)
        ));
    }

    #[test]
    fn test_single_rank_counts() {
        let results = spawn_group(1, |comm| {
            let mut map = KmerCountMap::new(comm, CountingConfig::new(3, 2).unwrap()).unwrap();
            let seq = encode_sequence(b"ACGTACG").unwrap();
            map.insert_supermers(split_supermers(&seq, 3, 2));
            map.count(vec![kmer("ACG"), kmer("CGT"), kmer("TTT")])
        });
        let counts = &results[0];
        assert!(counts.contains(&(kmer("ACG"), 2)));
        assert!(counts.contains(&(kmer("CGT"), 1)));
        assert!(counts.contains(&(kmer("TTT"), 0)));
    }

    #[test]
    fn test_direct_insert_matches_supermer_insert() {
        let totals = spawn_group(2, |comm| {
            let config = CountingConfig::new(5, 3).unwrap();
            let seq = encode_sequence(b"ACGTACGTTGCAACGT").unwrap();
            let mut map = KmerCountMap::new(comm, config).unwrap();
            map.insert_supermers(split_supermers(&seq, 5, 3));
            let supermer_total = map.global_kmer_total();
            let supermer_size = map.size();
            (supermer_total, supermer_size)
        });
        let directs = spawn_group(2, |comm| {
            let config = CountingConfig::new(5, 3).unwrap();
            let seq = encode_sequence(b"ACGTACGTTGCAACGT").unwrap();
            let kmers: Vec<Kmer> = seq
                .windows(5)
                .map(|w| Kmer::from_bases(5, w.iter().copied()))
                .collect();
            let mut map = KmerCountMap::new(comm, config).unwrap();
            map.insert(kmers);
            (map.global_kmer_total(), map.size())
        });
        assert_eq!(totals[0], directs[0]);
    }

    #[test]
    fn test_records_live_at_their_minimizer_rank() {
        let results = spawn_group(3, |comm| {
            let config = CountingConfig::new(7, 3).unwrap();
            let mut map = KmerCountMap::new(comm, config).unwrap();
            let seq = encode_sequence(b"ACGTACGTTGCAACGTTTGACGATCAGTACCA").unwrap();
            map.insert_supermers(split_supermers(&seq, 7, 3));

            let rank = map.engine().rank();
            let routing_map: Vec<u32> = map.routing().unwrap().map().to_vec();
            let misplaced = map
                .local_store()
                .iter()
                .filter(|(key, _)| {
                    let min = window_minimizer(7, 3, key.bases());
                    routing_map[min as usize] as usize != rank
                })
                .count();
            misplaced
        });
        assert_eq!(results, vec![0, 0, 0]);
    }

    #[test]
    fn test_rebinning_redistributes_records() {
        let results = spawn_group(2, |comm| {
            let mut config = CountingConfig::new(5, 2).unwrap();
            config.rebin_threshold = 0.0; // rebin on every load change
            let mut map = KmerCountMap::new(comm, config).unwrap();

            let first = encode_sequence(b"ACGTACGTA").unwrap();
            map.insert_supermers(split_supermers(&first, 5, 2));

            // a second corpus skews the histogram and forces a rebin
            let second = encode_sequence(b"TTTTTTTTTTTTTTTT").unwrap();
            map.insert_supermers(split_supermers(&second, 5, 2));

            map.count(vec![kmer("ACGTA"), kmer("TTTTT")])
        });
        for counts in results {
            assert!(counts.contains(&(kmer("ACGTA"), 2)));
            assert!(counts.contains(&(kmer("TTTTT"), 12)));
        }
    }

    #[test]
    fn test_empty_supermer_batches_everywhere() {
        let results = spawn_group(2, |comm| {
            let mut map = KmerCountMap::new(comm, CountingConfig::new(5, 2).unwrap()).unwrap();
            let added = map.insert_supermers(vec![]);
            (added, map.size(), map.global_kmer_total())
        });
        assert_eq!(results, vec![(0, 0, 0), (0, 0, 0)]);
    }
}
