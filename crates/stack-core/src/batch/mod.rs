//! Memory-bounded batch orchestration. Ties together nearly
//! every other module: calibration, bad-pixel, background, detection,
//! alignment, normalization, weighting, and stacking.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use ndarray::Array2;

use crate::consts::{EPSILON, MEMORY_WORKINGSET_FACTOR};
use crate::detect::{detect_stars, DetectParams};
use crate::error::{Result, StackError};
use crate::frame::{Stats, StackResult};
use crate::stack::WeightMode;
use crate::stats::{basic, location_scale, noise, LocationScaleMode};

/// Outcome of attempting to process a single frame through the per-frame
/// pipeline stages. Dropped frames carry the error that caused the drop,
/// logged by the orchestrator and excluded from the stack.
pub enum FrameOutcome<T> {
    Kept(T),
    Dropped(StackError),
}

/// Derive the number of frames that may be held in memory at once, given a
/// budget in bytes and one frame's pixel footprint.
///
/// `B = w*h*4*F` where `F` approximates the working set per frame (raw +
/// calibrated + background + aligned + scratch buffers).
pub fn derive_max_concurrent(width: usize, height: usize, memory_budget_bytes: u64) -> Result<usize> {
    let per_frame_bytes = (width * height * 4 * MEMORY_WORKINGSET_FACTOR) as u64;
    if per_frame_bytes == 0 {
        return Err(StackError::MemoryBudget("frame has zero pixels".into()));
    }
    if per_frame_bytes > memory_budget_bytes {
        return Err(StackError::MemoryBudget(format!(
            "a single frame's working set ({per_frame_bytes} bytes) exceeds the budget ({memory_budget_bytes} bytes)"
        )));
    }
    Ok((memory_budget_bytes / per_frame_bytes).max(1) as usize)
}

/// Deterministically shuffle `frame_ids` with `seed`, then split into chunks
/// of at most `batch_size`.
pub fn partition_batches(frame_ids: &[u64], batch_size: usize, seed: u64) -> Vec<Vec<u64>> {
    if batch_size == 0 {
        return vec![frame_ids.to_vec()];
    }
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut shuffled = frame_ids.to_vec();
    shuffled.shuffle(&mut rng);
    shuffled.chunks(batch_size).map(|c| c.to_vec()).collect()
}

/// Accumulator that folds successive batch stacks into one running result
/// without holding every source frame in memory simultaneously.
///
/// Batches are folded by a plain weighted mean, weighted by the number of
/// frames each batch actually contributed: each batch is itself already the
/// robust combine of its own frames, so a second round of outlier rejection
/// across batches would just be throwing away whole batches' worth of signal
/// rather than individual bad pixels.
pub struct IncrementalAccumulator {
    detect_params: DetectParams,
    location_scale_mode: LocationScaleMode,
    seed: u64,
    output_gamma: Option<f32>,
    sigma_low: f32,
    sigma_high: f32,
    batches: Vec<(Array2<f32>, f32)>, // (combined pixels, weight = frames_combined)
}

impl IncrementalAccumulator {
    pub fn new(
        detect_params: DetectParams,
        location_scale_mode: LocationScaleMode,
        seed: u64,
        output_gamma: Option<f32>,
        sigma_low: f32,
        sigma_high: f32,
    ) -> Self {
        Self {
            detect_params,
            location_scale_mode,
            seed,
            output_gamma,
            sigma_low,
            sigma_high,
            batches: Vec::new(),
        }
    }

    pub fn push_batch(&mut self, pixels: Array2<f32>, frames_combined: usize) {
        self.batches.push((pixels, frames_combined.max(1) as f32));
    }

    /// Record the sigma thresholds actually used by a batch, for reporting
    /// in the final [`StackResult`].
    pub fn record_sigma(&mut self, sigma_low: f32, sigma_high: f32) {
        self.sigma_low = sigma_low;
        self.sigma_high = sigma_high;
    }

    /// Fold all pushed batches into a final [`StackResult`]: weighted-mean
    /// the pixels, run star detection and full stats on the finished stack,
    /// then apply the optional output gamma.
    pub fn finish(self) -> Result<StackResult> {
        if self.batches.is_empty() {
            return Err(StackError::StackEmpty);
        }

        let total_frames: usize = self.batches.iter().map(|(_, w)| *w as usize).sum();
        let pixels = weighted_mean_fold(&self.batches);

        let basic_stats = basic(pixels.as_slice().unwrap_or(&[]));
        let (location, scale) = location_scale(pixels.as_slice().unwrap_or(&[]), self.location_scale_mode, self.seed);
        let stats = Stats {
            min: basic_stats.min,
            max: basic_stats.max,
            mean: basic_stats.mean,
            stddev: basic_stats.stddev,
            location,
            scale,
            noise: noise(&pixels),
            histogram_mode: None,
            histogram_mode_value: None,
        };

        let found = detect_stars(&pixels, self.detect_params, self.seed);
        let hfr = found.median_hfr();
        let stars = if found.is_empty() { None } else { Some(found) };

        let pixels = match self.output_gamma {
            Some(g) if g > 0.0 && (g - 1.0).abs() > EPSILON => apply_gamma(&pixels, g),
            _ => pixels,
        };

        Ok(StackResult {
            pixels,
            stats,
            stars,
            hfr,
            frames_combined: total_frames,
            sig_low: self.sigma_low,
            sig_high: self.sigma_high,
        })
    }
}

/// Elementwise weighted mean across batches, weighted by `frames_combined`.
fn weighted_mean_fold(batches: &[(Array2<f32>, f32)]) -> Array2<f32> {
    let (h, w) = batches[0].0.dim();
    let total_weight: f32 = batches.iter().map(|(_, wt)| *wt).sum();
    if total_weight <= EPSILON {
        return Array2::<f32>::zeros((h, w));
    }
    let mut out = Array2::<f32>::zeros((h, w));
    for (pixels, weight) in batches {
        out.scaled_add(*weight / total_weight, pixels);
    }
    out
}

/// Gamma correction: `output = clamp(input, 0, 1) ^ (1 / gamma)`.
fn apply_gamma(pixels: &Array2<f32>, gamma: f32) -> Array2<f32> {
    let inv_gamma = 1.0 / gamma;
    pixels.mapv(|v| v.clamp(0.0, 1.0).powf(inv_gamma))
}

/// Convenience default weight mode used when a batch config doesn't specify
/// one explicitly (kept here, not in `stack::weights`, since it encodes a
/// batch-orchestration policy rather than a stacking-math default).
pub fn default_weight_mode() -> WeightMode {
    WeightMode::Unweighted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_budget_rejects_oversized_single_frame() {
        let result = derive_max_concurrent(10_000, 10_000, 1024);
        assert!(matches!(result, Err(StackError::MemoryBudget(_))));
    }

    #[test]
    fn memory_budget_allows_multiple_small_frames() {
        let max = derive_max_concurrent(100, 100, 10_000_000).unwrap();
        assert!(max > 1);
    }

    #[test]
    fn partition_is_seed_deterministic() {
        let ids: Vec<u64> = (0..20).collect();
        let a = partition_batches(&ids, 5, 7);
        let b = partition_batches(&ids, 5, 7);
        assert_eq!(a, b);
    }

    #[test]
    fn partition_covers_every_id_exactly_once() {
        let ids: Vec<u64> = (0..17).collect();
        let batches = partition_batches(&ids, 5, 3);
        let mut flat: Vec<u64> = batches.into_iter().flatten().collect();
        flat.sort_unstable();
        assert_eq!(flat, ids);
    }

    #[test]
    fn incremental_accumulator_matches_single_batch_mean() {
        let mut acc = IncrementalAccumulator::new(DetectParams::default(), LocationScaleMode::default(), 1, None, 3.0, 3.0);
        acc.push_batch(Array2::<f32>::from_elem((4, 4), 10.0), 5);
        acc.push_batch(Array2::<f32>::from_elem((4, 4), 20.0), 5);
        let result = acc.finish().unwrap();
        assert!((result.pixels[[0, 0]] - 15.0).abs() < 1.0);
        assert_eq!(result.frames_combined, 10);
    }

    #[test]
    fn incremental_accumulator_applies_output_gamma() {
        let mut acc = IncrementalAccumulator::new(DetectParams::default(), LocationScaleMode::default(), 1, Some(2.0), 3.0, 3.0);
        acc.push_batch(Array2::<f32>::from_elem((4, 4), 0.25), 3);
        let result = acc.finish().unwrap();
        assert!((result.pixels[[0, 0]] - 0.5).abs() < 1e-3);
    }
}
