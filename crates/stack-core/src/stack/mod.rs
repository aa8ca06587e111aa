//! Pixel stacking. Depends on [`crate::stats`].

pub mod adaptive;
pub mod estimators;
pub mod weights;

use ndarray::Array2;
use rayon::prelude::*;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::error::{Result, StackError};

pub use estimators::Estimator;
pub use weights::{compute_weights, WeightInputs, WeightMode};

/// Combine a set of aligned, same-shape frames into one result.
///
/// `frames[f][row, col]` indexes frame `f`'s pixel at `(row, col)`; all
/// frames must share dimensions (checked by the caller/orchestrator before
/// this point; a mismatch here is a programming error, not a runtime one).
pub fn combine_stack(
    frames: &[Array2<f32>],
    weights: &[f32],
    estimator: Estimator,
    sigma_low: f32,
    sigma_high: f32,
    reference_index: usize,
) -> Result<Array2<f32>> {
    if frames.is_empty() {
        return Err(StackError::StackEmpty);
    }
    let (h, w) = frames[0].dim();
    let mut out = Array2::<f32>::zeros((h, w));

    let combine_row = |row: usize, out_row: &mut [f32]| {
        let mut sample = vec![0.0f32; frames.len()];
        for col in 0..w {
            for (f, frame) in frames.iter().enumerate() {
                sample[f] = frame[[row, col]];
            }
            let (value, _) =
                estimators::combine(estimator, &sample, Some(weights), sigma_low, sigma_high, reference_index);
            out_row[col] = value;
        }
    };

    if h * w >= PARALLEL_PIXEL_THRESHOLD {
        out.axis_iter_mut(ndarray::Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(row, mut out_row)| combine_row(row, out_row.as_slice_mut().unwrap()));
    } else {
        for row in 0..h {
            let mut row_buf = vec![0.0f32; w];
            combine_row(row, &mut row_buf);
            for col in 0..w {
                out[[row, col]] = row_buf[col];
            }
        }
    }

    Ok(out)
}

/// Collect a 1% spatial sample of per-pixel stacks from `frames`, for
/// [`adaptive::search_sigma`].
pub fn sample_pixel_stacks(frames: &[Array2<f32>], seed: u64) -> Vec<Vec<f32>> {
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    if frames.is_empty() {
        return Vec::new();
    }
    let (h, w) = frames[0].dim();
    let total = h * w;
    let sample_size = ((total as f64) * crate::consts::ADAPTIVE_SIGMA_SAMPLE_FRACTION).ceil() as usize;
    let sample_size = sample_size.max(1).min(total);

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut indices: Vec<usize> = (0..total).collect();
    let (chosen, _) = indices.partial_shuffle(&mut rng, sample_size);

    chosen
        .iter()
        .map(|&idx| {
            let row = idx / w;
            let col = idx % w;
            frames.iter().map(|f| f[[row, col]]).collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_stack_rejects_outlier_frame() {
        let base = Array2::<f32>::from_elem((8, 8), 100.0);
        let mut spiked = base.clone();
        spiked[[4, 4]] = 50_000.0;
        let frames = vec![base.clone(), base.clone(), base.clone(), spiked];
        let weights = vec![1.0; 4];
        let result = combine_stack(&frames, &weights, Estimator::SigmaClip, 3.0, 3.0, 0).unwrap();
        assert!((result[[4, 4]] - 100.0).abs() < 5.0);
    }

    #[test]
    fn combine_stack_empty_input_errors() {
        let result = combine_stack(&[], &[], Estimator::Median, 3.0, 3.0, 0);
        assert!(matches!(result, Err(StackError::StackEmpty)));
    }

    #[test]
    fn sample_pixel_stacks_is_seed_deterministic() {
        let frames = vec![Array2::<f32>::from_elem((16, 16), 1.0), Array2::<f32>::from_elem((16, 16), 2.0)];
        let a = sample_pixel_stacks(&frames, 9);
        let b = sample_pixel_stacks(&frames, 9);
        assert_eq!(a, b);
    }
}
