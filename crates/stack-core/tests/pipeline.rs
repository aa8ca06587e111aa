//! End-to-end scenarios exercising the full per-frame + batch pipeline.

use std::collections::HashMap;

use ndarray::Array2;
use stack_core::error::StackError;
use stack_core::frame::{Frame, FrameHeader};
use stack_core::pipeline::orchestrator::{preprocess_frame, run_batch, CalibrationFrames};
use stack_core::pipeline::run_pipeline;
use stack_core::pipeline::PipelineConfig;
use stack_core::batch::FrameOutcome;

fn synthetic_frame(id: u64, offset_x: isize, offset_y: isize) -> Frame {
    let mut data = Array2::<f32>::from_elem((96, 96), 100.0);
    let stars = [(20isize, 20isize, 6000.0f32), (60, 30, 5000.0), (40, 70, 4500.0)];
    for &(sx, sy, amp) in &stars {
        let cx = sx + offset_x;
        let cy = sy + offset_y;
        for dr in -4isize..=4 {
            for dc in -4isize..=4 {
                let r = cy + dr;
                let c = cx + dc;
                if r < 0 || r >= 96 || c < 0 || c >= 96 {
                    continue;
                }
                let dist_sq = (dr * dr + dc * dc) as f32;
                data[[r as usize, c as usize]] += amp * (-dist_sq / 4.0).exp();
            }
        }
    }
    Frame::new(id, data, FrameHeader { exposure_seconds: 30.0, ..Default::default() })
}

#[test]
fn three_star_frames_stack_to_a_consistent_result() {
    let config = PipelineConfig::default();
    let calibration = CalibrationFrames::default();

    let mut frames = HashMap::new();
    for (id, (dx, dy)) in [(0isize, 0isize), (2, -1), (-1, 3)].into_iter().enumerate() {
        let frame = synthetic_frame(id as u64, dx, dy);
        match preprocess_frame(frame, &config, &calibration) {
            FrameOutcome::Kept(f) => {
                frames.insert(f.id, f);
            }
            FrameOutcome::Dropped(e) => panic!("unexpected drop: {e}"),
        }
    }

    let result = run_pipeline(frames, &config).unwrap();
    assert_eq!(result.width(), 96);
    assert_eq!(result.height(), 96);
    assert!(result.frames_combined >= 1);

    // The brightest synthetic star should still be well above background,
    // somewhere near its nominal (20,20) position regardless of which
    // frame's own (unwarped) coordinate system was picked as reference.
    let mut peak = f32::MIN;
    for r in 15..26 {
        for c in 15..26 {
            peak = peak.max(result.pixels[[r, c]]);
        }
    }
    assert!(peak > 50.0);
}

#[test]
fn dimension_mismatch_against_a_dark_frame_is_fatal() {
    use stack_core::calibration::dark_subtract;
    use stack_core::frame::CalibrationFrame;

    let light = Array2::<f32>::zeros((64, 64));
    let dark = CalibrationFrame { data: Array2::<f32>::zeros((32, 32)) };
    let err = dark_subtract(&light, &dark).unwrap_err();
    assert!(matches!(err, StackError::DimensionMismatch { .. }));
}

#[test]
fn run_batch_rejects_a_frame_with_too_few_stars() {
    let config = PipelineConfig::default();
    let calibration = CalibrationFrames::default();

    let good = synthetic_frame(0, 0, 0);
    let blank = Frame::new(1, Array2::<f32>::from_elem((96, 96), 100.0), FrameHeader::default());

    let mut frames = Vec::new();
    match preprocess_frame(good, &config, &calibration) {
        FrameOutcome::Kept(f) => frames.push(f),
        FrameOutcome::Dropped(e) => panic!("unexpected drop: {e}"),
    }
    match preprocess_frame(blank, &config, &calibration) {
        FrameOutcome::Kept(_) => panic!("blank frame should have no detectable stars"),
        FrameOutcome::Dropped(e) => assert!(matches!(e, StackError::NoStars { .. })),
    }

    let (_, combined_count, _, _, _) = run_batch(frames, &config, None).unwrap();
    assert_eq!(combined_count, 1);
}
