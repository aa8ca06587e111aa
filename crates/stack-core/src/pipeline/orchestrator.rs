//! End-to-end run: per-frame preprocessing, reference
//! selection, postprocessing, weighting, and batch-folded stacking.

use tracing::warn;

use crate::align::{align_stars, warp_frame, OutOfBoundsMode};
use crate::badpixel;
use crate::background;
use crate::batch::{derive_max_concurrent, partition_batches, FrameOutcome, IncrementalAccumulator};
use crate::detect::detect_stars;
use crate::error::{Result, StackError};
use crate::frame::{CalibrationFrame, Frame, StarList, Stats};
use crate::normalize::{normalize, NormalizeContext};
use crate::reference::{candidates_from_frames, select_reference};
use crate::stack::weights::{compute_weights, WeightInputs};
use crate::stack::{self};
use crate::stats::{basic, location_scale, noise};

use super::config::{PipelineConfig, SigmaMode};

/// Dark/flat calibration frames shared across the whole run, if provided.
#[derive(Clone, Debug, Default)]
pub struct CalibrationFrames {
    pub dark: Option<CalibrationFrame>,
    pub flat: Option<CalibrationFrame>,
}

/// Run the per-frame preprocessing stages (calibration, bad-pixel cleanup,
/// background flattening, star detection), populating `Frame::stats`,
/// `Frame::stars`, and `Frame::hfr`.
pub fn preprocess_frame(mut frame: Frame, config: &PipelineConfig, calibration: &CalibrationFrames) -> FrameOutcome<Frame> {
    if let Some(dark) = &calibration.dark {
        match crate::calibration::dark_subtract(&frame.data, dark) {
            Ok(d) => frame.data = d,
            Err(e) => return FrameOutcome::Dropped(e),
        }
    }
    if let Some(flat) = &calibration.flat {
        match crate::calibration::flat_divide(&frame.data, flat) {
            Ok(d) => frame.data = d,
            Err(e) => return FrameOutcome::Dropped(e),
        }
    }
    if config.calibration.bin_factor >= 2 {
        frame.data = crate::calibration::bin_nxn(&frame.data, config.calibration.bin_factor as usize);
    }
    if config.calibration.norm_range {
        frame.data = crate::calibration::norm_range(&frame.data);
    }

    let (cleaned, _replaced) = badpixel::clean(&frame.data, config.bad_pixel.sigma_low, config.bad_pixel.sigma_high);
    frame.data = cleaned;

    if config.background.enabled {
        let (flattened, _level) = background::flatten(
            &frame.data,
            config.background.tile_size,
            config.background.back_sigma,
            config.background.reject_fraction,
        );
        frame.data = flattened;
    }

    let basic_stats = basic(frame.data.as_slice().unwrap_or(&[]));
    let (location, scale) = location_scale(
        frame.data.as_slice().unwrap_or(&[]),
        config.normalize.location_scale_mode,
        frame.id,
    );
    let noise_estimate = noise(&frame.data);

    frame.stats = Some(Stats {
        min: basic_stats.min,
        max: basic_stats.max,
        mean: basic_stats.mean,
        stddev: basic_stats.stddev,
        location,
        scale,
        noise: noise_estimate,
        histogram_mode: None,
        histogram_mode_value: None,
    });

    let stars = detect_stars(&frame.data, config.star_detect.into(), frame.id);
    if stars.is_empty() {
        return FrameOutcome::Dropped(StackError::NoStars { frame_id: frame.id });
    }
    frame.hfr = stars.median_hfr();
    frame.stars = Some(stars);

    FrameOutcome::Kept(frame)
}

/// Align and normalize a non-reference frame against the batch reference.
pub fn postprocess_frame(mut frame: Frame, reference: &Frame, config: &PipelineConfig) -> FrameOutcome<Frame> {
    if config.alignment.enabled {
        let empty = StarList::default();
        let ref_stars = reference.stars.as_ref().unwrap_or(&empty);
        let own_stars = frame.stars.as_ref().unwrap_or(&empty);
        match align_stars(ref_stars, own_stars, frame.id, config.alignment.align_k, config.alignment.align_t) {
            Ok(xform) => {
                frame.data = warp_frame(&frame.data, &xform, OutOfBoundsMode::Nan, 0.0);
                frame.transform = Some(xform);
            }
            Err(e) => return FrameOutcome::Dropped(e),
        }
    }

    if let Some(ref_stats) = &reference.stats {
        frame.data = normalize(
            &frame.data,
            config.normalize.mode,
            NormalizeContext::LightStacking,
            ref_stats.location,
            ref_stats.scale,
            frame.id,
        );
    }

    FrameOutcome::Kept(frame)
}

/// Resolve the sigma thresholds for this run, running the adaptive search if
/// configured. Explicit thresholds always take priority when
/// both are somehow present, since an operator-specified sigma is a direct
/// instruction the pipeline should not second-guess.
fn resolve_sigma(frames: &[Frame], sigma_mode: &SigmaMode, seed: u64) -> (f32, f32) {
    match sigma_mode {
        SigmaMode::Explicit { sigma_low, sigma_high } => (*sigma_low, *sigma_high),
        SigmaMode::Adaptive { target_rejection_rate_low, target_rejection_rate_high } => {
            let pixel_data: Vec<ndarray::Array2<f32>> = frames.iter().map(|f| f.data.clone()).collect();
            let sample = stack::sample_pixel_stacks(&pixel_data, seed);
            let sigma_low = stack::adaptive::search_sigma(&sample, *target_rejection_rate_low, seed);
            let sigma_high = stack::adaptive::search_sigma(&sample, *target_rejection_rate_high, seed);
            (sigma_low, sigma_high)
        }
    }
}

/// Process one batch of already-loaded, already-preprocessed frames into a
/// combined result: pick a reference if none is supplied, align+normalize
/// the rest, drop failures, weight, and stack.
pub fn run_batch(
    frames: Vec<Frame>,
    config: &PipelineConfig,
    pinned_reference_id: Option<u64>,
) -> Result<(ndarray::Array2<f32>, usize, u64, f32, f32)> {
    if frames.is_empty() {
        return Err(StackError::StackEmpty);
    }

    let candidates = candidates_from_frames(&frames);
    let reference_id = match pinned_reference_id {
        Some(id) => id,
        None => select_reference(&candidates)?.frame_id,
    };

    let reference_index = frames
        .iter()
        .position(|f| f.id == reference_id)
        .ok_or_else(|| StackError::NoReference(format!("reference frame {reference_id} missing from batch")))?;
    let reference = frames[reference_index].clone();

    let mut processed: Vec<Frame> = Vec::with_capacity(frames.len());
    for frame in frames {
        if frame.id == reference_id {
            processed.push(frame);
            continue;
        }
        match postprocess_frame(frame, &reference, config) {
            FrameOutcome::Kept(f) => processed.push(f),
            FrameOutcome::Dropped(e) => {
                warn!(reason = %e, "dropping frame during postprocessing");
            }
        }
    }

    if processed.is_empty() {
        return Err(StackError::StackEmpty);
    }

    let weight_inputs: Vec<WeightInputs> = processed
        .iter()
        .map(|f| WeightInputs {
            exposure_seconds: f.header.exposure_seconds,
            noise: f.stats.as_ref().map(|s| s.noise).unwrap_or(1.0),
        })
        .collect();
    let weights = compute_weights(config.stack.weight_mode, &weight_inputs);

    let sigma_mode = config.stack.sigma.clone().unwrap_or_default();
    let (sigma_low, sigma_high) = resolve_sigma(&processed, &sigma_mode, config.batch.seed);

    let processed_reference_index = processed.iter().position(|f| f.id == reference_id).unwrap_or(0);

    let pixel_frames: Vec<ndarray::Array2<f32>> = processed.iter().map(|f| f.data.clone()).collect();
    let combined = stack::combine_stack(
        &pixel_frames,
        &weights,
        config.stack.estimator,
        sigma_low,
        sigma_high,
        processed_reference_index,
    )?;

    Ok((combined, processed.len(), reference_id, sigma_low, sigma_high))
}

/// Full multi-batch run: partition frame ids into memory-bounded batches,
/// run each batch, and fold results incrementally.
pub fn run_pipeline(
    frames_by_id: std::collections::HashMap<u64, Frame>,
    config: &PipelineConfig,
) -> Result<crate::frame::StackResult> {
    let frame_ids: Vec<u64> = frames_by_id.keys().copied().collect();
    if frame_ids.is_empty() {
        return Err(StackError::StackEmpty);
    }

    let (height, width) = frames_by_id.values().next().map(|f| f.data.dim()).unwrap();
    let max_concurrent = if config.batch.max_concurrent > 0 {
        config.batch.max_concurrent
    } else {
        derive_max_concurrent(width, height, config.batch.memory_budget_bytes)?
    };

    let batches = partition_batches(&frame_ids, max_concurrent, config.batch.seed);
    let mut accumulator = IncrementalAccumulator::new(
        config.star_detect.into(),
        config.normalize.location_scale_mode,
        config.batch.seed,
        config.batch.output_gamma,
        3.0,
        3.0,
    );
    let mut pinned_reference: Option<u64> = None;
    let mut frames_by_id = frames_by_id;

    for (batch_idx, batch_ids) in batches.into_iter().enumerate() {
        let batch_frames: Vec<Frame> = batch_ids
            .iter()
            .filter_map(|id| frames_by_id.remove(id))
            .collect();

        let reference_for_batch = if batch_idx == 0 { None } else { pinned_reference };
        match run_batch(batch_frames, config, reference_for_batch) {
            Ok((pixels, count, reference_id, sigma_low, sigma_high)) => {
                if batch_idx == 0 {
                    pinned_reference = Some(reference_id);
                }
                accumulator.record_sigma(sigma_low, sigma_high);
                accumulator.push_batch(pixels, count);
            }
            Err(e) => {
                warn!(batch = batch_idx, reason = %e, "batch produced no usable stack");
            }
        }
    }

    accumulator.finish()
}
