//! Robust statistics kernel. No dependency on any other module.

use ndarray::Array2;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::consts::{
    EPSILON, LOCATION_SCALE_CONVERGENCE, LOCATION_SCALE_MAX_ITER, LOCATION_SCALE_SAMPLE_CAP,
    MAD_TO_SIGMA, NOISE_LAPLACIAN_SCALE, QN_CONSTANT,
};

/// Output of [`basic`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BasicStats {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    pub stddev: f32,
}

/// Selects the location/scale estimator used by [`location_scale`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LocationScaleMode {
    MeanStddev,
    MedianMad,
    Ikss,
    #[serde(alias = "SampledSigmaClipQn")]
    SampledSigmaClipQn,
}

impl Default for LocationScaleMode {
    fn default() -> Self {
        LocationScaleMode::SampledSigmaClipQn
    }
}

/// Single pass over finite samples: min/max/mean/stddev. Non-finite values
/// are ignored and never propagate into the result.
pub fn basic(pixels: &[f32]) -> BasicStats {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    let mut sum = 0.0f64;
    let mut count = 0u64;

    for &v in pixels {
        if !v.is_finite() {
            continue;
        }
        if v < min {
            min = v;
        }
        if v > max {
            max = v;
        }
        sum += v as f64;
        count += 1;
    }

    if count == 0 {
        return BasicStats::default();
    }

    let mean = sum / count as f64;
    let mut var_sum = 0.0f64;
    for &v in pixels {
        if !v.is_finite() {
            continue;
        }
        let d = v as f64 - mean;
        var_sum += d * d;
    }
    let stddev = (var_sum / count as f64).sqrt();

    BasicStats {
        min,
        max,
        mean: mean as f32,
        stddev: stddev as f32,
    }
}

fn median_of(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        *values.select_nth_unstable_by(mid, |a, b| a.partial_cmp(b).unwrap()).1
    } else {
        let (_, upper, _) = values.select_nth_unstable_by(mid, |a, b| a.partial_cmp(b).unwrap());
        let upper_val = *upper;
        let lower_val = values[..mid].iter().copied().fold(f32::MIN, f32::max);
        (lower_val + upper_val) / 2.0
    }
}

fn mad_of(values: &[f32], center: f32) -> f32 {
    let mut deviations: Vec<f32> = values.iter().map(|&v| (v - center).abs()).collect();
    median_of(&mut deviations)
}

/// Qn-like robust scale: `2.2219 * first-quartile(|xi - xj|)` over a sampled
/// set of pairwise absolute differences.
fn qn_estimate(values: &[f32], rng: &mut Xoshiro256PlusPlus) -> f32 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    // Cap the pair count so Qn stays O(sample) rather than O(sample^2).
    let max_pairs = 20_000usize;
    let mut diffs: Vec<f32> = Vec::new();
    if n * (n - 1) / 2 <= max_pairs {
        for i in 0..n {
            for j in (i + 1)..n {
                diffs.push((values[i] - values[j]).abs());
            }
        }
    } else {
        diffs.reserve(max_pairs);
        for _ in 0..max_pairs {
            let i = rng.gen_range(0..n);
            let mut j = rng.gen_range(0..n);
            if j == i {
                j = (j + 1) % n;
            }
            diffs.push((values[i] - values[j]).abs());
        }
    }
    if diffs.is_empty() {
        return 0.0;
    }
    let quartile_idx = (diffs.len() as f64 * 0.25) as usize;
    let quartile_idx = quartile_idx.min(diffs.len() - 1);
    let (_, quartile, _) =
        diffs.select_nth_unstable_by(quartile_idx, |a, b| a.partial_cmp(b).unwrap());
    QN_CONSTANT * *quartile
}

/// Location and scale estimators. `seed` makes mode 3's
/// sampling deterministic and reproducible per frame id.
pub fn location_scale(pixels: &[f32], mode: LocationScaleMode, seed: u64) -> (f32, f32) {
    let finite: Vec<f32> = pixels.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return (0.0, 0.0);
    }

    match mode {
        LocationScaleMode::MeanStddev => {
            let b = basic(&finite);
            (b.mean, b.stddev)
        }
        LocationScaleMode::MedianMad => {
            let mut v = finite.clone();
            let med = median_of(&mut v);
            let mad = mad_of(&finite, med);
            (med, MAD_TO_SIGMA * mad)
        }
        LocationScaleMode::Ikss => ikss(&finite),
        LocationScaleMode::SampledSigmaClipQn => sampled_sigma_clip_qn(&finite, seed),
    }
}

/// Iterative k-step S-estimator: repeatedly recenter on the median and
/// rescale on the MAD-derived sigma, shrinking the window each pass.
fn ikss(values: &[f32]) -> (f32, f32) {
    let mut retained: Vec<f32> = values.to_vec();
    let mut location = 0.0f32;
    let mut scale = 0.0f32;

    for iter in 0..LOCATION_SCALE_MAX_ITER {
        if retained.is_empty() {
            break;
        }
        let mut v = retained.clone();
        location = median_of(&mut v);
        let mad = mad_of(&retained, location);
        scale = (MAD_TO_SIGMA * mad).max(EPSILON);

        let k = if iter == 0 { 3.0 } else { 2.5 };
        let lo = location - k * scale;
        let hi = location + k * scale;
        let before = retained.len();
        retained.retain(|&x| x >= lo && x <= hi);
        if retained.len() == before {
            break;
        }
    }
    (location, scale)
}

/// Sampled, sigma-clipped median + Qn, the default location/scale estimator.
fn sampled_sigma_clip_qn(values: &[f32], seed: u64) -> (f32, f32) {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);

    let mut sample: Vec<f32> = if values.len() > LOCATION_SCALE_SAMPLE_CAP {
        let mut indices: Vec<usize> = (0..values.len()).collect();
        let (chosen, _) = indices.partial_shuffle(&mut rng, LOCATION_SCALE_SAMPLE_CAP);
        chosen.iter().map(|&i| values[i]).collect()
    } else {
        values.to_vec()
    };

    let mut location = 0.0f32;
    for iter in 0..LOCATION_SCALE_MAX_ITER {
        if sample.is_empty() {
            break;
        }
        let mut v = sample.clone();
        location = median_of(&mut v);
        let mad = mad_of(&sample, location);
        let s = (MAD_TO_SIGMA * mad).max(EPSILON);

        let k = if iter == 0 { 3.0 } else { 2.5 };
        let lo = location - k * s;
        let hi = location + k * s;
        let before = sample.len();
        sample.retain(|&x| x >= lo && x <= hi);
        let changed = (before - sample.len()) as f64 / before.max(1) as f64;
        if changed < LOCATION_SCALE_CONVERGENCE {
            break;
        }
    }

    let scale = qn_estimate(&sample, &mut rng);
    (location, scale)
}

/// High-pass Laplacian convolution followed by MAD, scaled to estimate the
/// standard deviation of the underlying additive white noise.
pub fn noise(data: &Array2<f32>) -> f32 {
    let (h, w) = data.dim();
    if h < 3 || w < 3 {
        return 0.0;
    }

    let mut responses = Vec::with_capacity((h - 2) * (w - 2));
    for row in 1..h - 1 {
        for col in 1..w - 1 {
            let center = data[[row, col]];
            let up = data[[row - 1, col]];
            let down = data[[row + 1, col]];
            let left = data[[row, col - 1]];
            let right = data[[row, col + 1]];
            if [center, up, down, left, right].iter().all(|v| v.is_finite()) {
                responses.push((4.0 * center - up - down - left - right).abs());
            }
        }
    }
    if responses.is_empty() {
        return 0.0;
    }
    let mut v = responses.clone();
    let med = median_of(&mut v);
    let mad = mad_of(&responses, med);
    MAD_TO_SIGMA * mad * NOISE_LAPLACIAN_SCALE
}

/// Histogram with `bins` equal-width buckets across the finite data range.
pub fn histogram(pixels: &[f32], bins: usize) -> Vec<u64> {
    let mut counts = vec![0u64; bins.max(1)];
    let b = basic(pixels);
    let range = (b.max - b.min).max(EPSILON);
    for &v in pixels {
        if !v.is_finite() {
            continue;
        }
        let idx = (((v - b.min) / range) * bins as f32) as usize;
        counts[idx.min(bins - 1)] += 1;
    }
    counts
}

/// Returns `(bin_center, bin_count)` of the histogram mode, the peak used
/// by automatic black-point logic.
pub fn histogram_peak(pixels: &[f32], bins: usize) -> (f32, u64) {
    let counts = histogram(pixels, bins);
    let b = basic(pixels);
    let range = (b.max - b.min).max(EPSILON);
    let (peak_idx, &peak_count) = counts
        .iter()
        .enumerate()
        .max_by_key(|&(_, &c)| c)
        .unwrap_or((0, &0));
    let bin_center = b.min + (peak_idx as f32 + 0.5) * (range / counts.len() as f32);
    (bin_center, peak_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn basic_ignores_nonfinite() {
        let data = [1.0, 2.0, f32::NAN, 3.0, f32::INFINITY];
        let b = basic(&data);
        assert_eq!(b.min, 1.0);
        assert_eq!(b.max, 3.0);
        assert_relative_eq!(b.mean, 2.0, epsilon = 1e-5);
    }

    #[test]
    fn median_mad_matches_hand_computation() {
        let data = [1.0, 2.0, 3.0, 4.0, 100.0];
        let (loc, scale) = location_scale(&data, LocationScaleMode::MedianMad, 1);
        assert_relative_eq!(loc, 3.0, epsilon = 1e-5);
        assert!(scale > 0.0);
    }

    #[test]
    fn sampled_mode_is_seed_deterministic() {
        let data: Vec<f32> = (0..5000).map(|i| (i as f32 * 0.0173).sin() * 10.0).collect();
        let a = location_scale(&data, LocationScaleMode::SampledSigmaClipQn, 42);
        let b = location_scale(&data, LocationScaleMode::SampledSigmaClipQn, 42);
        assert_eq!(a, b);
    }

    #[test]
    fn noise_estimate_scales_with_injected_sigma() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        let w = 64;
        let h = 64;
        let mut low = Array2::<f32>::zeros((h, w));
        let mut high = Array2::<f32>::zeros((h, w));
        for r in 0..h {
            for c in 0..w {
                low[[r, c]] = rng.gen_range(-1.0f32..1.0);
                high[[r, c]] = rng.gen_range(-4.0f32..4.0);
            }
        }
        assert!(noise(&high) > noise(&low));
    }

    #[test]
    fn histogram_sums_to_sample_count() {
        let data: Vec<f32> = (0..1000).map(|i| i as f32 / 1000.0).collect();
        let h = histogram(&data, 10);
        assert_eq!(h.iter().sum::<u64>(), 1000);
    }
}
