//! Per-pixel combination estimators.

use crate::consts::{EPSILON, SIGMA_CLIP_MAX_ITER};

/// Which per-pixel estimator combines a stack of aligned samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Estimator {
    Median,
    Mean,
    SigmaClip,
    WinsorizedSigmaClip,
    LinearFit,
    Auto,
}

impl Default for Estimator {
    fn default() -> Self {
        Estimator::SigmaClip
    }
}

fn median(values: &mut [f32]) -> f32 {
    let n = values.len();
    if n == 0 {
        return f32::NAN;
    }
    let mid = n / 2;
    if n % 2 == 1 {
        *values.select_nth_unstable_by(mid, |a, b| a.partial_cmp(b).unwrap()).1
    } else {
        let (_, upper, _) = values.select_nth_unstable_by(mid, |a, b| a.partial_cmp(b).unwrap());
        let upper_val = *upper;
        let lower_val = values[..mid].iter().copied().fold(f32::MIN, f32::max);
        (lower_val + upper_val) / 2.0
    }
}

fn mean(values: &[f32], weights: Option<&[f32]>) -> f32 {
    match weights {
        Some(w) => {
            let total: f32 = w.iter().sum();
            if total.abs() < EPSILON {
                return if values.is_empty() {
                    f32::NAN
                } else {
                    values.iter().sum::<f32>() / values.len() as f32
                };
            }
            values.iter().zip(w).map(|(v, w)| v * w).sum::<f32>() / total
        }
        None if values.is_empty() => f32::NAN,
        None => values.iter().sum::<f32>() / values.len() as f32,
    }
}

/// Weighted median: sort by value, then walk the cumulative weight until it
/// crosses half the total weight.
fn weighted_median(values: &[f32], weights: &[f32]) -> f32 {
    if values.is_empty() {
        return f32::NAN;
    }
    let mut pairs: Vec<(f32, f32)> = values.iter().copied().zip(weights.iter().copied()).collect();
    pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
    let total: f32 = pairs.iter().map(|&(_, w)| w).sum();
    if total.abs() < EPSILON {
        let mut v: Vec<f32> = pairs.iter().map(|&(val, _)| val).collect();
        return median(&mut v);
    }
    let half = total / 2.0;
    let mut cumulative = 0.0f32;
    for &(value, weight) in &pairs {
        cumulative += weight;
        if cumulative >= half {
            return value;
        }
    }
    pairs.last().unwrap().0
}

/// Minimum surviving-sample count below which `combine` reports `NaN`
/// instead of the estimator's result: `max(2, required_for_mode(estimator))`.
fn required_for_mode(estimator: Estimator) -> usize {
    match estimator {
        Estimator::Median | Estimator::Mean | Estimator::Auto => 1,
        Estimator::SigmaClip | Estimator::WinsorizedSigmaClip | Estimator::LinearFit => 2,
    }
}

/// Combine `samples` (with matching optional `weights`) under `sigma_low` /
/// `sigma_high` rejection thresholds, where applicable. `reference_index`
/// picks which sample position [`linear_fit`] evaluates its fitted line at.
/// Returns the combined value and the count of samples actually used
/// (post-rejection); fewer than `max(2, required_for_mode)` surviving
/// samples yields `NaN`.
pub fn combine(
    estimator: Estimator,
    samples: &[f32],
    weights: Option<&[f32]>,
    sigma_low: f32,
    sigma_high: f32,
    reference_index: usize,
) -> (f32, usize) {
    let finite: Vec<(f32, f32)> = samples
        .iter()
        .zip(weights.map(|w| w.iter().copied().collect::<Vec<_>>()).unwrap_or_else(|| vec![1.0; samples.len()]))
        .filter(|(v, _)| v.is_finite())
        .map(|(&v, w)| (v, w))
        .collect();

    if finite.is_empty() {
        return (f32::NAN, 0);
    }

    let values: Vec<f32> = finite.iter().map(|&(v, _)| v).collect();
    let weight_vals: Vec<f32> = finite.iter().map(|&(_, w)| w).collect();

    let (value, count) = match estimator {
        Estimator::Median => (weighted_median(&values, &weight_vals), values.len()),
        Estimator::Mean => (mean(&values, Some(&weight_vals)), values.len()),
        Estimator::SigmaClip => sigma_clip(&values, &weight_vals, sigma_low, sigma_high, false),
        Estimator::WinsorizedSigmaClip => sigma_clip(&values, &weight_vals, sigma_low, sigma_high, true),
        Estimator::LinearFit => linear_fit(&values, &weight_vals, sigma_high, reference_index),
        Estimator::Auto => {
            if values.len() >= 6 {
                sigma_clip(&values, &weight_vals, sigma_low, sigma_high, true)
            } else if values.len() >= 3 {
                sigma_clip(&values, &weight_vals, sigma_low, sigma_high, false)
            } else {
                (mean(&values, Some(&weight_vals)), values.len())
            }
        }
    };

    let required = required_for_mode(estimator).max(2);
    if count < required {
        (f32::NAN, count)
    } else {
        (value, count)
    }
}

/// Iteratively reject outliers beyond `[loc - sigma_low*s, loc + sigma_high*s]`.
/// When `winsorize` is set, rejected samples are clamped to the nearest bound
/// instead of being dropped, so their weight is retained but their influence
/// on the mean is capped.
fn sigma_clip(values: &[f32], weights: &[f32], sigma_low: f32, sigma_high: f32, winsorize: bool) -> (f32, usize) {
    let mut working: Vec<f32> = values.to_vec();
    let mut working_weights: Vec<f32> = weights.to_vec();

    for _ in 0..SIGMA_CLIP_MAX_ITER {
        if working.len() < 2 {
            break;
        }
        let mut sorted = working.clone();
        let loc = median(&mut sorted);
        let variance = working.iter().map(|v| (v - loc).powi(2)).sum::<f32>() / working.len() as f32;
        let s = variance.sqrt().max(EPSILON);

        let lo = loc - sigma_low * s;
        let hi = loc + sigma_high * s;

        if winsorize {
            let mut changed = false;
            for v in working.iter_mut() {
                if *v < lo {
                    *v = lo;
                    changed = true;
                } else if *v > hi {
                    *v = hi;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        } else {
            let mut kept_values = Vec::with_capacity(working.len());
            let mut kept_weights = Vec::with_capacity(working.len());
            let before = working.len();
            for (v, w) in working.iter().zip(working_weights.iter()) {
                if *v >= lo && *v <= hi {
                    kept_values.push(*v);
                    kept_weights.push(*w);
                }
            }
            if kept_values.len() == before || kept_values.is_empty() {
                working = kept_values;
                working_weights = kept_weights;
                break;
            }
            working = kept_values;
            working_weights = kept_weights;
        }
    }

    (mean(&working, Some(&working_weights)), working.len())
}

/// Weighted least-squares fit of `value = slope*index + intercept`.
fn fit_weighted_line(indices: &[f32], values: &[f32], weights: &[f32]) -> (f32, f32) {
    let total_weight: f32 = weights.iter().sum::<f32>().max(EPSILON);
    let mean_idx = indices.iter().zip(weights).map(|(i, w)| i * w).sum::<f32>() / total_weight;
    let mean_val = values.iter().zip(weights).map(|(v, w)| v * w).sum::<f32>() / total_weight;

    let mut num = 0.0f32;
    let mut den = 0.0f32;
    for ((&i, &v), &w) in indices.iter().zip(values).zip(weights) {
        let di = i - mean_idx;
        num += w * di * (v - mean_val);
        den += w * di * di;
    }

    if den.abs() < EPSILON {
        return (0.0, mean_val);
    }
    let slope = num / den;
    (slope, mean_val - slope * mean_idx)
}

/// Robust against slow drift (e.g. twilight) across the sample sequence: fit
/// `value = slope*index + intercept` by least squares, reject points whose
/// residual exceeds `sigma_high` MADs from the line, refit on survivors, and
/// report the refit line's value at `reference_index`.
fn linear_fit(values: &[f32], weights: &[f32], sigma_high: f32, reference_index: usize) -> (f32, usize) {
    let n = values.len();
    if n < 2 {
        return (values.first().copied().unwrap_or(f32::NAN), n);
    }

    let indices: Vec<f32> = (0..n).map(|i| i as f32).collect();
    let (slope, intercept) = fit_weighted_line(&indices, values, weights);

    let mut abs_residuals: Vec<f32> = indices
        .iter()
        .zip(values)
        .map(|(&i, &v)| (v - (slope * i + intercept)).abs())
        .collect();
    let mad = median(&mut abs_residuals).max(EPSILON);
    let threshold = sigma_high * mad;

    let mut kept_idx = Vec::with_capacity(n);
    let mut kept_val = Vec::with_capacity(n);
    let mut kept_w = Vec::with_capacity(n);
    for i in 0..n {
        let residual = (values[i] - (slope * indices[i] + intercept)).abs();
        if residual <= threshold {
            kept_idx.push(indices[i]);
            kept_val.push(values[i]);
            kept_w.push(weights[i]);
        }
    }

    let (final_slope, final_intercept, count) = if kept_idx.len() >= 2 && kept_idx.len() < n {
        let (s, b) = fit_weighted_line(&kept_idx, &kept_val, &kept_w);
        (s, b, kept_idx.len())
    } else {
        (slope, intercept, n)
    };

    let eval_idx = reference_index.min(n - 1) as f32;
    (final_slope * eval_idx + final_intercept, count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_rejects_single_outlier() {
        let samples = [10.0, 10.1, 9.9, 10.05, 500.0];
        let (v, n) = combine(Estimator::Median, &samples, None, 3.0, 3.0, 0);
        assert!((v - 10.0).abs() < 1.0);
        assert_eq!(n, samples.len());
    }

    #[test]
    fn weighted_median_favors_heavier_sample() {
        let samples = [10.0, 20.0, 30.0];
        let weights = [1.0, 1.0, 10.0];
        let (v, _) = combine(Estimator::Median, &samples, Some(&weights), 3.0, 3.0, 0);
        assert_eq!(v, 30.0);
    }

    #[test]
    fn sigma_clip_removes_cosmic_ray() {
        let samples = [100.0, 101.0, 99.0, 100.5, 99.5, 5000.0];
        let (v, n) = combine(Estimator::SigmaClip, &samples, None, 3.0, 3.0, 0);
        assert!((v - 100.0).abs() < 2.0);
        assert_eq!(n, 5);
    }

    #[test]
    fn winsorized_keeps_sample_count() {
        let samples = [100.0, 101.0, 99.0, 100.5, 99.5, 5000.0];
        let (_, n) = combine(Estimator::WinsorizedSigmaClip, &samples, None, 3.0, 3.0, 0);
        assert_eq!(n, samples.len());
    }

    #[test]
    fn mean_is_plain_average_without_weights() {
        let samples = [1.0, 2.0, 3.0, 4.0];
        let (v, _) = combine(Estimator::Mean, &samples, None, 3.0, 3.0, 0);
        assert!((v - 2.5).abs() < 1e-5);
    }

    #[test]
    fn nan_samples_are_excluded() {
        let samples = [1.0, f32::NAN, 3.0];
        let (v, n) = combine(Estimator::Mean, &samples, None, 3.0, 3.0, 0);
        assert_eq!(n, 2);
        assert!((v - 2.0).abs() < 1e-5);
    }

    #[test]
    fn single_surviving_sample_yields_nan() {
        let samples = [1.0, f32::NAN];
        let (v, n) = combine(Estimator::SigmaClip, &samples, None, 3.0, 3.0, 0);
        assert_eq!(n, 1);
        assert!(v.is_nan());
    }

    #[test]
    fn auto_picks_winsorized_above_six_samples() {
        let samples = [100.0, 101.0, 99.0, 100.5, 99.5, 100.2, 5000.0];
        let (_, n) = combine(Estimator::Auto, &samples, None, 3.0, 3.0, 0);
        assert_eq!(n, samples.len());
    }

    #[test]
    fn auto_picks_mean_below_three_samples() {
        let samples = [1.0, 3.0];
        let (v, n) = combine(Estimator::Auto, &samples, None, 3.0, 3.0, 0);
        assert_eq!(n, 2);
        assert!((v - 2.0).abs() < 1e-5);
    }

    #[test]
    fn linear_fit_rejects_outlier_and_evaluates_at_reference() {
        let samples = [10.0, 10.1, 9.9, 500.0, 10.05];
        let (v, n) = combine(Estimator::LinearFit, &samples, None, 3.0, 3.0, 2);
        assert!((v - 10.0).abs() < 1.0);
        assert_eq!(n, 4);
    }
}
