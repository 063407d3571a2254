//! Categorical draws from unnormalized weights.

use rand::Rng;

/// Index `j` with `cumsum[j-1] <= r < cumsum[j]` by a linear scan with a
/// running upper edge. Falls through to the last index when `r` reaches
/// the total through rounding.
#[inline]
pub fn invert_cumulative(probs: &[f64], r: f64) -> usize {
    debug_assert!(!probs.is_empty());
    let last = probs.len() - 1;
    let mut id = 0;
    let mut max = probs[0];
    while r >= max && id < last {
        id += 1;
        max += probs[id];
    }
    id
}

/// Draw an index with probability proportional to `probs[j]`, where
/// `total` is the sum of `probs`.
#[inline]
pub fn sample_index<R: Rng + ?Sized>(probs: &[f64], total: f64, rng: &mut R) -> usize {
    let r = rng.random::<f64>() * total;
    invert_cumulative(probs, r)
}
