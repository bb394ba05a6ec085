use rand::seq::SliceRandom;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Whether (and how) a component randomizes its input order.
///
/// Seeds are plain `u64` so per-rank derivation stays `base_seed + rank`;
/// every worker must be able to derive its own rng from the shared base seed
/// and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Shuffle {
    #[default]
    DontShuffle,
    Seeded(u64),
}

impl Shuffle {
    /// Rng shared by every rank (file-order decisions all workers must agree
    /// on).
    pub fn base_rng(self) -> Option<ChaCha8Rng> {
        match self {
            Shuffle::DontShuffle => None,
            Shuffle::Seeded(seed) => Some(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    /// Rng private to one rank, seeded `base_seed + rank`.
    pub fn rng_for_rank(self, rank: usize) -> Option<ChaCha8Rng> {
        match self {
            Shuffle::DontShuffle => None,
            Shuffle::Seeded(seed) => Some(ChaCha8Rng::seed_from_u64(seed + rank as u64)),
        }
    }
}

/// Shuffle a slice in place with a throwaway rng derived from `seed`.
pub fn deterministic_shuffle<T>(items: &mut [T], seed: u64) {
    items.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_order() {
        let mut a: Vec<u32> = (0..100).collect();
        let mut b: Vec<u32> = (0..100).collect();
        deterministic_shuffle(&mut a, 42);
        deterministic_shuffle(&mut b, 42);
        assert_eq!(a, b);

        let mut c: Vec<u32> = (0..100).collect();
        deterministic_shuffle(&mut c, 43);
        assert_ne!(a, c);
    }

    #[test]
    fn rank_rngs_diverge() {
        use rand::RngCore;
        let v0 = Shuffle::Seeded(7).rng_for_rank(0).unwrap().next_u64();
        let v1 = Shuffle::Seeded(7).rng_for_rank(1).unwrap().next_u64();
        // rank 1 of seed 7 is rank 0 of seed 8
        let v8 = Shuffle::Seeded(8).rng_for_rank(0).unwrap().next_u64();
        assert_ne!(v0, v1);
        assert_eq!(v1, v8);
    }

    #[test]
    fn dont_shuffle_has_no_rng() {
        assert!(Shuffle::DontShuffle.base_rng().is_none());
        assert!(Shuffle::DontShuffle.rng_for_rank(3).is_none());
    }
}
