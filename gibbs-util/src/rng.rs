//! Random streams.
//!
//! Every worker of every sweep gets its own `SmallRng`, seeded from the
//! run's base seed, the sweep number and the worker index. No generator is
//! shared between threads or model instances.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Seed of worker `worker` in sweep `sweep`
pub fn stream_seed(base: u64, sweep: usize, worker: usize) -> u64 {
    (base | 1).wrapping_mul(sweep as u64 + 1) ^ (worker as u64).wrapping_mul(2654435761)
}

/// Generator of worker `worker` in sweep `sweep`
pub fn stream(base: u64, sweep: usize, worker: usize) -> SmallRng {
    SmallRng::seed_from_u64(stream_seed(base, sweep, worker))
}

/// Fair coin
#[inline]
pub fn coin<R: Rng + ?Sized>(rng: &mut R) -> bool {
    rng.random::<f64>() < 0.5
}

/// Uniform index in `lo..hi`
#[inline]
pub fn uniform<R: Rng + ?Sized>(rng: &mut R, lo: usize, hi: usize) -> usize {
    rng.random_range(lo..hi)
}
