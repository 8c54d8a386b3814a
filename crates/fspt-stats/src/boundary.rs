//! Distance-to-boundary uniformity test.
//!
//! Points uniform over a box stay, on average, at predictable distances
//! from its faces. The test maps every sample to its L-inf distance to
//! the nearest face, scaled by the box's largest half-length, and runs a
//! two-sided K-S comparison of the empirical CDF of those depths against
//! the analytic CDF they would have under uniformity. A large p-value
//! means "plausibly uniform": there is no density structure left for a
//! split to find.

use log::trace;

use crate::kolmogorov::kolmogorov_cdf;

/// p-value of the uniformity test for `samples` (row-major, one row per
/// point, `bounds.len()` columns) inside the box `bounds`.
///
/// Returns 1 for an empty sample (nothing contradicts uniformity) and 0
/// for a single point (no support for it either).
pub fn uniformity_p_value(samples: &[f32], bounds: &[(f32, f32)]) -> f64 {
    let d = bounds.len();
    assert!(d > 0, "empty feature box");
    assert_eq!(samples.len() % d, 0);
    let n = samples.len() / d;
    if n == 0 {
        return 1.0;
    }
    if n == 1 {
        return 0.0;
    }
    let stat = ks_statistic(samples, bounds);
    let p = 1.0 - kolmogorov_cdf(n, stat);
    trace!("uniformity test: n={n}, D={stat:.6}, p={p:.6}");
    p
}

/// The two-sided K-S statistic between the empirical depth distribution
/// of `samples` and the uniform null.
pub fn ks_statistic(samples: &[f32], bounds: &[(f32, f32)]) -> f64 {
    let d = bounds.len();
    let n = samples.len() / d;
    let r = largest_half_length(bounds);
    debug_assert!(r > 0.0, "degenerate feature box");

    let mut depths: Vec<f32> = samples
        .chunks_exact(d)
        .map(|x| boundary_distance(x, bounds) / r)
        .collect();
    fspt_num::sort::sort_floats(&mut depths);

    let nf = n as f64;
    let mut sup = 0.0f64;
    for (i, &y) in depths.iter().enumerate() {
        let theoretical = null_cdf(bounds, r, y);
        let below = i as f64 / nf - theoretical;
        let above = (i + 1) as f64 / nf - theoretical;
        sup = sup.max(below.abs()).max(above.abs());
    }
    sup
}

/// L-inf distance from `x` to the nearest face of the box.
fn boundary_distance(x: &[f32], bounds: &[(f32, f32)]) -> f32 {
    let mut min = f32::INFINITY;
    for (xi, &(lo, hi)) in x.iter().zip(bounds) {
        min = min.min(xi - lo).min(hi - xi);
    }
    min
}

/// CDF of the scaled boundary distance under uniformity:
/// `F(y) = 1 - prod_i (1 - k_i * y)` with `k_i = 2R / (hi_i - lo_i)`.
fn null_cdf(bounds: &[(f32, f32)], r: f32, y: f32) -> f64 {
    let mut cum = 1.0f64;
    for &(lo, hi) in bounds {
        let k = 2.0 * r as f64 / (hi - lo) as f64;
        cum *= 1.0 - k * y as f64;
    }
    (1.0 - cum).clamp(0.0, 1.0)
}

fn largest_half_length(bounds: &[(f32, f32)]) -> f32 {
    bounds
        .iter()
        .map(|&(lo, hi)| (hi - lo) / 2.0)
        .fold(0.0, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    const UNIT_SQUARE: [(f32, f32); 2] = [(0.0, 1.0), (0.0, 1.0)];

    fn uniform_cloud(rng: &mut ChaCha8Rng, n: usize, bounds: &[(f32, f32)]) -> Vec<f32> {
        let mut xs = Vec::with_capacity(n * bounds.len());
        for _ in 0..n {
            for &(lo, hi) in bounds {
                xs.push(rng.gen_range(lo..hi));
            }
        }
        xs
    }

    #[test]
    fn empty_and_singleton_edge_cases() {
        assert_eq!(uniformity_p_value(&[], &UNIT_SQUARE), 1.0);
        assert_eq!(uniformity_p_value(&[0.3, 0.4], &UNIT_SQUARE), 0.0);
    }

    #[test]
    fn uniform_cloud_is_not_rejected() {
        let mut rng = ChaCha8Rng::seed_from_u64(2222222);
        let xs = uniform_cloud(&mut rng, 500, &UNIT_SQUARE);
        let p = uniformity_p_value(&xs, &UNIT_SQUARE);
        assert!(p > 0.01, "uniform sample rejected with p = {p}");
    }

    #[test]
    fn clustered_cloud_is_rejected() {
        // Everything packed into one corner of the box.
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let corner = [(0.0f32, 0.1), (0.0, 0.1)];
        let xs = uniform_cloud(&mut rng, 500, &corner);
        let p = uniformity_p_value(&xs, &UNIT_SQUARE);
        assert!(p < 1e-6, "clustered sample accepted with p = {p}");
    }

    #[test]
    fn centered_cloud_is_rejected() {
        let mut rng = ChaCha8Rng::seed_from_u64(10);
        let center = [(0.45f32, 0.55), (0.45, 0.55)];
        let xs = uniform_cloud(&mut rng, 500, &center);
        let p = uniformity_p_value(&xs, &UNIT_SQUARE);
        assert!(p < 1e-6, "centered sample accepted with p = {p}");
    }

    #[test]
    fn anisotropic_box_keeps_uniform_samples() {
        let bounds = [(0.0f32, 10.0), (-1.0, 1.0), (5.0, 5.5)];
        let mut rng = ChaCha8Rng::seed_from_u64(77);
        let xs = uniform_cloud(&mut rng, 400, &bounds);
        let p = uniformity_p_value(&xs, &bounds);
        assert!(p > 0.01, "uniform sample rejected with p = {p}");
    }

    fn h0_fraction_below(trials: usize, n: usize, alpha: f64) -> f64 {
        let mut rng = ChaCha8Rng::seed_from_u64(2222222);
        let bounds = [(0.0f32, 1.0), (0.0, 1.0), (0.0, 1.0)];
        let mut hits = 0;
        for _ in 0..trials {
            let xs = uniform_cloud(&mut rng, n, &bounds);
            if uniformity_p_value(&xs, &bounds) <= alpha {
                hits += 1;
            }
        }
        hits as f64 / trials as f64
    }

    #[test]
    fn p_values_roughly_uniform_under_h0() {
        let trials = 200;
        let frac = h0_fraction_below(trials, 200, 0.1);
        // 3-sigma band around 0.1 for 200 trials.
        let sigma = (0.1f64 * 0.9 / trials as f64).sqrt();
        assert!(
            (frac - 0.1).abs() <= 3.0 * sigma,
            "fraction below 0.1 was {frac}"
        );
    }

    // Full calibration from the validation protocol; slow, run with
    // `cargo test -- --ignored`.
    #[test]
    #[ignore]
    fn p_values_uniform_under_h0_full() {
        let trials = 10_000;
        for alpha in [0.01f64, 0.05, 0.1] {
            let frac = h0_fraction_below(trials, 200, alpha);
            let sigma = (alpha * (1.0 - alpha) / trials as f64).sqrt();
            assert!(
                (frac - alpha).abs() <= 3.0 * sigma,
                "alpha {alpha}: fraction {frac}"
            );
        }
    }
}
