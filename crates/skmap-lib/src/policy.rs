//! Key policies: transforms, hashing, and rank mapping
//!
//! A policy bundles the per-key machinery every distributed container
//! needs: the *input transform* (normalization applied once at the
//! collective API boundary, e.g. canonicalizing a DNA strand), the
//! *store transform* (the form keys take inside a local store), and two
//! decorrelated hashers. The *distribution* hasher selects a home rank;
//! the *storage* hasher drives local bucket placement. Keeping the two
//! seeded differently keeps both placements uniform simultaneously.

use crate::kmer::Kmer;
use ahash::RandomState;
use std::hash::BuildHasher;
use thiserror::Error;

/// Errors detected while validating a policy at container construction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// Two keys that are equal under the store transform were mapped to
    /// different ranks; batch queries would miss records
    #[error(
        "store-equal keys route to different ranks ({left} vs {right}); \
         the input transform, store transform and distribution hash are inconsistent"
    )]
    RankInconsistency {
        /// Rank of the first key
        left: usize,
        /// Rank of the second key
        right: usize,
    },
}

/// Per-key machinery used by the distributed containers
///
/// `dist_digest` and `store_digest` must be deterministic across ranks
/// for a fixed policy value; every rank constructs the policy from the
/// same seed.
pub trait KeyPolicy<K>: Clone {
    /// Normalize a key at the collective API boundary
    fn input_transform(&self, key: K) -> K;

    /// The form a key takes inside a local store
    fn store_transform(&self, key: K) -> K;

    /// Digest used to select a home rank
    fn dist_digest(&self, key: &K) -> u64;

    /// Digest used for local bucket placement
    fn store_digest(&self, key: &K) -> u64;

    /// Key equality in store-transformed space
    fn key_eq(&self, a: &K, b: &K) -> bool;
}

/// Maps keys (or key projections of tuples) to a rank in `[0, P)`
#[derive(Clone)]
pub struct KeyToRank<P> {
    policy: P,
    num_ranks: usize,
}

impl<P> KeyToRank<P> {
    /// Create a mapper over `num_ranks` ranks
    pub fn new(policy: P, num_ranks: usize) -> Self {
        debug_assert!(num_ranks > 0);
        Self { policy, num_ranks }
    }
}

impl<P> KeyToRank<P> {
    /// Home rank of a bare key
    #[inline]
    pub fn rank_of<K>(&self, key: &K) -> usize
    where
        P: KeyPolicy<K>,
    {
        (self.policy.dist_digest(key) % self.num_ranks as u64) as usize
    }

    /// Home rank of a (key, value) pair, projecting to the key
    #[inline]
    pub fn rank_of_entry<K, V>(&self, entry: &(K, V)) -> usize
    where
        P: KeyPolicy<K>,
    {
        self.rank_of(&entry.0)
    }
}

/// Key policy for packed k-mers
///
/// The input transform is either the identity or the canonical form
/// (minimum of the k-mer and its reverse complement); the store
/// transform is the identity. The distribution digest takes the upper
/// 32 bits of a seeded ahash digest so it stays decorrelated from the
/// storage digest even for keys that collide in their low bits.
#[derive(Clone)]
pub struct KmerPolicy {
    canonical: bool,
    seed: u64,
    dist_state: RandomState,
    store_state: RandomState,
}

// Derives the storage seed from the distribution seed.
const STORE_SEED_SALT: u64 = 0x9e37_79b9_7f4a_7c15;

impl KmerPolicy {
    /// Create a policy with the given seed
    pub fn new(seed: u64, canonical: bool) -> Self {
        let store_seed = seed.wrapping_add(STORE_SEED_SALT);
        Self {
            canonical,
            seed,
            dist_state: RandomState::with_seeds(seed, !seed, seed, !seed),
            store_state: RandomState::with_seeds(store_seed, !store_seed, store_seed, !store_seed),
        }
    }

    /// Identity input transform (count strands separately)
    pub fn identity(seed: u64) -> Self {
        Self::new(seed, false)
    }

    /// Canonical input transform (merge a k-mer with its reverse
    /// complement)
    pub fn canonical(seed: u64) -> Self {
        Self::new(seed, true)
    }

    /// The seed this policy was built from
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Whether the input transform canonicalizes strands
    pub fn is_canonical(&self) -> bool {
        self.canonical
    }

    /// Seeded hasher state for local stores, decorrelated from the
    /// distribution digest
    pub fn store_state(&self) -> RandomState {
        self.store_state.clone()
    }

    /// Distribution digest of a raw minimizer value; the baseline
    /// minimizer router is `minimizer_digest(min) mod P`
    #[inline]
    pub fn minimizer_digest(&self, minimizer: u64) -> u64 {
        self.dist_state.hash_one(&minimizer) >> 32
    }
}

impl KeyPolicy<Kmer> for KmerPolicy {
    #[inline]
    fn input_transform(&self, key: Kmer) -> Kmer {
        if self.canonical {
            key.canonical()
        } else {
            key
        }
    }

    #[inline]
    fn store_transform(&self, key: Kmer) -> Kmer {
        key
    }

    #[inline]
    fn dist_digest(&self, key: &Kmer) -> u64 {
        self.dist_state.hash_one(key) >> 32
    }

    #[inline]
    fn store_digest(&self, key: &Kmer) -> u64 {
        self.store_state.hash_one(key)
    }

    #[inline]
    fn key_eq(&self, a: &Kmer, b: &Kmer) -> bool {
        a == b
    }
}

/// Verify that keys which collapse under the store transform are routed
/// to the same rank.
///
/// Run once at container construction. The check samples k-mers
/// deterministically from the policy seed and pairs each with its
/// reverse complement, the only non-trivial collapse the k-mer
/// transforms can produce.
pub fn check_rank_consistency(
    policy: &KmerPolicy,
    k: usize,
    num_ranks: usize,
) -> Result<(), PolicyError> {
    const SAMPLES: usize = 256;
    let mapper = KeyToRank::new(policy.clone(), num_ranks);
    let mut state = policy.seed().wrapping_add(1);
    for _ in 0..SAMPLES {
        let sample = splitmix64(&mut state);
        let kmer = Kmer::from_bases(k, (0..k).map(|i| ((sample >> (2 * (i % 32))) & 0b11) as u8));
        let a = policy.input_transform(kmer);
        let b = policy.input_transform(kmer.reverse_complement());
        if policy.store_transform(a) == policy.store_transform(b) {
            let (ra, rb) = (mapper.rank_of(&a), mapper.rank_of(&b));
            if ra != rb {
                return Err(PolicyError::RankInconsistency { left: ra, right: rb });
            }
        }
    }
    Ok(())
}

#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digests_deterministic_across_policies() {
        let p1 = KmerPolicy::identity(42);
        let p2 = KmerPolicy::identity(42);
        let p3 = KmerPolicy::identity(43);
        let kmer = Kmer::parse("ACGTACG").unwrap();

        assert_eq!(p1.dist_digest(&kmer), p2.dist_digest(&kmer));
        assert_ne!(p1.dist_digest(&kmer), p3.dist_digest(&kmer));
    }

    #[test]
    fn test_dist_and_store_digests_decorrelated() {
        let policy = KmerPolicy::identity(1);
        let kmer = Kmer::parse("ACGTACG").unwrap();
        assert_ne!(policy.dist_digest(&kmer), policy.store_digest(&kmer));
    }

    #[test]
    fn test_canonical_transform_merges_strands() {
        let policy = KmerPolicy::canonical(1);
        let kmer = Kmer::parse("GGTTT").unwrap();
        let rc = kmer.reverse_complement();
        assert_eq!(policy.input_transform(kmer), policy.input_transform(rc));
    }

    #[test]
    fn test_rank_of_entry_projects_key() {
        let mapper = KeyToRank::new(KmerPolicy::identity(1), 7);
        let kmer = Kmer::parse("ACGTA").unwrap();
        assert_eq!(mapper.rank_of(&kmer), mapper.rank_of_entry(&(kmer, 99u64)));
    }

    #[test]
    fn test_rank_consistency_identity() {
        let policy = KmerPolicy::identity(7);
        assert!(check_rank_consistency(&policy, 21, 8).is_ok());
    }

    #[test]
    fn test_rank_consistency_canonical() {
        // canonical(x) == canonical(rc(x)) bitwise, so the digests and
        // therefore the ranks agree
        let policy = KmerPolicy::canonical(7);
        assert!(check_rank_consistency(&policy, 21, 8).is_ok());
    }
}
