// skmap: distributed supermer-routed k-mer counting maps
//
// A family of distributed associative containers for genomic k-mer
// workloads on bulk-synchronous rank groups, fed by a minimizer-aware,
// load-balanced supermer distribution path.

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod constants;
pub mod encoding;
pub mod kmer;
pub mod policy;
pub mod comm;
pub mod distribute;
pub mod store;
pub mod map;
pub mod overlap;
pub mod minimizer;
pub mod supermer;
pub mod binning;
pub mod counting;

// Re-export common types at crate root
pub use comm::{spawn_group, Communicator, ThreadComm};
pub use counting::{ConfigError, CountingConfig, KmerCountMap};
pub use kmer::Kmer;
pub use map::{DistMap, DistMultiMap, DistReductionMap, MapEngine};
pub use minimizer::{Mmer, MinimizerWindow};
pub use policy::{KeyPolicy, KeyToRank, KmerPolicy};
pub use supermer::{split_supermers, split_supermers_batch, Supermer};

/// Version information
pub fn version() -> (u8, u8, u8) {
    constants::VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let (major, minor, patch) = version();
        assert_eq!(major, 0);
        assert_eq!(minor, 1);
        assert_eq!(patch, 0);
    }
}
