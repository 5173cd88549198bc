//! Seedable randomness used while building trees.
//!
//! Each tree owns its own generator derived from the index seed and the tree
//! number, so trees can be built on any thread in any order and still come
//! out identical.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Seed used when the caller never sets one.
pub const DEFAULT_SEED: u64 = 1_234_567_890_987_654_321;

/// Odd constant used to spread tree numbers across the seed space.
const TREE_SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// Randomness required by split selection.
pub trait RandomSource {
    /// Uniform index in `0..n`. `n` must be non-zero.
    fn index(&mut self, n: usize) -> usize;

    /// Fair coin.
    fn flip(&mut self) -> bool;

    /// Uniform value in `[0, 1)`.
    fn uniform(&mut self) -> f64;

    /// Standard normal draw.
    fn gaussian(&mut self) -> f32 {
        // Box-Muller; 1 - u keeps the log argument in (0, 1]
        let u1 = 1.0 - self.uniform();
        let u2 = self.uniform();
        ((-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()) as f32
    }
}

/// `RandomSource` backed by `rand`'s seedable standard generator.
#[derive(Debug, Clone)]
pub struct SeededRandom {
    rng: StdRng,
}

impl SeededRandom {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generator for tree number `tree` of an index seeded with `seed`.
    #[must_use]
    pub fn for_tree(seed: u64, tree: usize) -> Self {
        let mixed = seed ^ (tree as u64 + 1).wrapping_mul(TREE_SEED_STRIDE);
        Self::new(mixed)
    }
}

impl RandomSource for SeededRandom {
    fn index(&mut self, n: usize) -> usize {
        debug_assert!(n > 0, "index() needs a non-empty range");
        self.rng.random_range(0..n)
    }

    fn flip(&mut self) -> bool {
        self.rng.random_bool(0.5)
    }

    fn uniform(&mut self) -> f64 {
        self.rng.random::<f64>()
    }
}
