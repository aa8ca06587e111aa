//! Adaptive sigma search: pick a sigma threshold that targets
//! a specific rejection rate, rather than trusting a fixed operator guess.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::consts::{ADAPTIVE_SIGMA_MAX_ITER, ADAPTIVE_SIGMA_SAMPLE_FRACTION, ADAPTIVE_SIGMA_TOLERANCE};

use super::estimators::{combine, Estimator};

/// Measured rejection rate of a trial sigma on a spatial sample of pixel
/// stacks.
fn rejection_rate(stacks: &[Vec<f32>], sigma: f32) -> f64 {
    let mut total = 0usize;
    let mut rejected = 0usize;
    for stack in stacks {
        let (_, kept) = combine(Estimator::SigmaClip, stack, None, sigma, sigma, 0);
        total += stack.len();
        rejected += stack.len().saturating_sub(kept);
    }
    if total == 0 {
        0.0
    } else {
        rejected as f64 / total as f64
    }
}

/// Bisect on `sigma` in `[lo, hi]` until the measured rejection rate on a 1%
/// spatial sample of `pixel_stacks` is within [`ADAPTIVE_SIGMA_TOLERANCE`] of
/// `target_rate`, or [`ADAPTIVE_SIGMA_MAX_ITER`] iterations are spent.
///
/// `pixel_stacks` is the full set of per-pixel sample vectors (one per pixel
/// position, each holding one value per contributing frame); only a random
/// 1% subset is evaluated per trial to keep the search cheap.
pub fn search_sigma(pixel_stacks: &[Vec<f32>], target_rate: f64, seed: u64) -> f32 {
    if pixel_stacks.is_empty() {
        return 3.0;
    }

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let sample_size = ((pixel_stacks.len() as f64 * ADAPTIVE_SIGMA_SAMPLE_FRACTION).ceil() as usize)
        .max(1)
        .min(pixel_stacks.len());
    let mut indices: Vec<usize> = (0..pixel_stacks.len()).collect();
    let (chosen, _) = indices.partial_shuffle(&mut rng, sample_size);
    let sample: Vec<Vec<f32>> = chosen.iter().map(|&i| pixel_stacks[i].clone()).collect();

    let mut lo = 0.5f32;
    let mut hi = 6.0f32;

    for _ in 0..ADAPTIVE_SIGMA_MAX_ITER {
        let mid = (lo + hi) / 2.0;
        let rate = rejection_rate(&sample, mid);
        if (rate - target_rate).abs() <= ADAPTIVE_SIGMA_TOLERANCE {
            return mid;
        }
        // A tighter sigma rejects more; loosening it rejects less.
        if rate > target_rate {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    (lo + hi) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_target_rate_yields_tighter_sigma() {
        let stacks: Vec<Vec<f32>> = (0..200)
            .map(|i| {
                let mut v = vec![10.0; 20];
                if i % 5 == 0 {
                    v[0] = 1000.0;
                }
                v
            })
            .collect();
        let loose = search_sigma(&stacks, 0.005, 1);
        let tight = search_sigma(&stacks, 0.15, 1);
        assert!(tight <= loose);
    }

    #[test]
    fn empty_stacks_returns_default() {
        assert_eq!(search_sigma(&[], 0.01, 1), 3.0);
    }
}
