//! Seeded construction of the starting simplex.

use crate::procedures::Constraints;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

/// Builds `n + 1` vertices for `n` bounded parameters. Every coordinate is
/// one of the parameter's `{min, low_guide, high_guide, max}`.
///
/// Vertex `i > 0` differs from the base vertex only in coordinate `i - 1`,
/// and always by a non-zero amount, so the edge vectors are linearly
/// independent. Bounds with `min == max` admit no such move and must be
/// filtered out by the caller.
pub fn initial_simplex(bounds: &[Constraints], seed: u64) -> Vec<Vec<f64>> {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);

    let base: Vec<f64> = bounds
        .iter()
        .map(|b| {
            let guides = [b.low_guide, b.high_guide];
            guides.choose(&mut rng).copied().unwrap_or(b.low_guide)
        })
        .collect();

    let mut simplex = Vec::with_capacity(bounds.len() + 1);
    simplex.push(base.clone());
    for (i, b) in bounds.iter().enumerate() {
        let others: Vec<f64> = b.candidates().into_iter().filter(|c| *c != base[i]).collect();
        let mut vertex = base.clone();
        vertex[i] = others.choose(&mut rng).copied().unwrap_or(b.max);
        simplex.push(vertex);
    }
    simplex
}
