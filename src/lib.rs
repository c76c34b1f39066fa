pub mod error;
pub mod math;
pub mod ml;

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

pub use error::{Error, Result};

/// Seed used whenever a configuration leaves its seed unset.
pub const DEFAULT_SEED: u64 = 42;

/// Generator for one run, seeded from `seed` or [`DEFAULT_SEED`].
pub fn seeded_rng(seed: Option<u64>) -> ChaCha20Rng {
    ChaCha20Rng::seed_from_u64(seed.unwrap_or(DEFAULT_SEED))
}
