use std::collections::HashMap;
use std::path::PathBuf;

use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use stack_core::batch::FrameOutcome;
use stack_core::frame::CalibrationFrame;
use stack_core::io::fits::load_fits;
use stack_core::normalize::NormalizeMode;
use stack_core::pipeline::config::SigmaMode;
use stack_core::pipeline::orchestrator::{preprocess_frame, CalibrationFrames};
use stack_core::pipeline::{run_pipeline, PipelineConfig};
use stack_core::stack::Estimator;
use stack_core::stats::LocationScaleMode;

use super::{resolve_auto_extension, resolve_primary_output};

#[derive(Args)]
pub struct StackArgs {
    /// Light frames to calibrate and stack.
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Optional pipeline configuration file (TOML). Defaults are used for
    /// anything not specified.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Optional dark frame, same dimensions as the lights.
    #[arg(long)]
    pub dark: Option<PathBuf>,

    /// Optional flat frame, same dimensions as the lights.
    #[arg(long)]
    pub flat: Option<PathBuf>,

    /// Output path, or `%auto` to place it beside the first input.
    #[arg(long, default_value = "%auto")]
    pub output: String,

    /// Run log path, or `%auto` to derive it from `--output` by swapping
    /// its extension for `.log`.
    #[arg(long, default_value = "%auto")]
    pub log: String,

    /// Bad-pixel low sigma.
    #[arg(long)]
    pub bp_sig_low: Option<f32>,
    /// Bad-pixel high sigma.
    #[arg(long)]
    pub bp_sig_high: Option<f32>,

    /// Star detection threshold sigma.
    #[arg(long)]
    pub star_sig: Option<f32>,
    /// Cosmetic bad-pixel sigma ahead of star detection (-1 = auto).
    #[arg(long)]
    pub star_bp_sig: Option<f32>,
    /// Star local-maxima/non-max-suppression radius, in pixels.
    #[arg(long)]
    pub star_radius: Option<usize>,

    /// Background tile side, in pixels (0 disables background extraction).
    #[arg(long)]
    pub back_grid: Option<usize>,
    /// Per-tile pixel exclusion threshold above tile location.
    #[arg(long)]
    pub back_sigma: Option<f32>,
    /// Fraction of brightest tiles replaced by their neighbors' median.
    #[arg(long)]
    pub back_clip: Option<f64>,

    /// Whether to align frames before stacking (0/1).
    #[arg(long)]
    pub align: Option<u8>,
    /// Top-K stars used to build alignment triangle fingerprints.
    #[arg(long)]
    pub align_k: Option<usize>,
    /// Maximum accepted alignment residual RMS, in pixels.
    #[arg(long)]
    pub align_t: Option<f32>,

    /// Location/scale estimator used throughout the pipeline (0-3, see
    /// `LocationScaleMode`).
    #[arg(long)]
    pub ls_est: Option<u8>,

    /// Affine-rescale calibrated frames to `[0,1]` (0/1).
    #[arg(long)]
    pub norm_range: Option<bool>,
    /// Per-frame normalize mode ahead of stacking (0=none, 1=location-scale,
    /// 2=black-point-only, 3=auto).
    #[arg(long)]
    pub norm_hist: Option<u8>,

    /// Per-pixel stacking estimator (0=median .. 5=auto).
    #[arg(long)]
    pub st_mode: Option<u8>,
    /// Adaptive search target for the low-side rejection rate, in percent.
    #[arg(long)]
    pub st_clip_perc_low: Option<f64>,
    /// Adaptive search target for the high-side rejection rate, in percent.
    #[arg(long)]
    pub st_clip_perc_high: Option<f64>,
    /// Explicit low sigma threshold (-1 = use adaptive search instead).
    #[arg(long)]
    pub st_sig_low: Option<f32>,
    /// Explicit high sigma threshold (-1 = use adaptive search instead).
    #[arg(long)]
    pub st_sig_high: Option<f32>,
    /// Per-frame weight scheme (0=unweighted, 1=exposure, 2=inverse-noise).
    #[arg(long)]
    pub st_weight: Option<u8>,
    /// Memory budget for the batch orchestrator, in MiB.
    #[arg(long)]
    pub st_memory: Option<u64>,
}

/// Apply any explicitly-passed flags on top of `config`, which was already
/// loaded from `--config` (or defaulted). A flag left unset keeps whatever
/// the config file (or its own defaults) already specified.
fn apply_overrides(config: &mut PipelineConfig, args: &StackArgs) {
    if let Some(v) = args.bp_sig_low {
        config.bad_pixel.sigma_low = v;
    }
    if let Some(v) = args.bp_sig_high {
        config.bad_pixel.sigma_high = v;
    }

    if let Some(v) = args.star_sig {
        config.star_detect.star_sigma = v;
    }
    if let Some(v) = args.star_bp_sig {
        config.star_detect.star_bp_sig = v;
    }
    if let Some(v) = args.star_radius {
        config.star_detect.star_radius = v;
    }

    if let Some(v) = args.back_grid {
        config.background.enabled = v > 0;
        config.background.tile_size = v;
    }
    if let Some(v) = args.back_sigma {
        config.background.back_sigma = v;
    }
    if let Some(v) = args.back_clip {
        config.background.reject_fraction = v;
    }

    if let Some(v) = args.align {
        config.alignment.enabled = v != 0;
    }
    if let Some(v) = args.align_k {
        config.alignment.align_k = v;
    }
    if let Some(v) = args.align_t {
        config.alignment.align_t = v;
    }

    if let Some(v) = args.ls_est {
        config.normalize.location_scale_mode = match v {
            0 => LocationScaleMode::MeanStddev,
            1 => LocationScaleMode::MedianMad,
            2 => LocationScaleMode::Ikss,
            _ => LocationScaleMode::SampledSigmaClipQn,
        };
    }

    if let Some(v) = args.norm_range {
        config.calibration.norm_range = v;
    }
    if let Some(v) = args.norm_hist {
        config.normalize.mode = match v {
            0 => NormalizeMode::None,
            1 => NormalizeMode::LocationScale,
            2 => NormalizeMode::BlackPointOnly,
            _ => NormalizeMode::Auto,
        };
    }

    if let Some(v) = args.st_mode {
        config.stack.estimator = match v {
            0 => Estimator::Median,
            1 => Estimator::Mean,
            2 => Estimator::SigmaClip,
            3 => Estimator::WinsorizedSigmaClip,
            4 => Estimator::LinearFit,
            _ => Estimator::Auto,
        };
    }
    if let Some(v) = args.st_weight {
        config.stack.weight_mode = match v {
            1 => stack_core::stack::WeightMode::ExposureProportional,
            2 => stack_core::stack::WeightMode::InverseNoise,
            _ => stack_core::stack::WeightMode::Unweighted,
        };
    }
    if args.st_sig_low.is_some() || args.st_sig_high.is_some() {
        let low = args.st_sig_low.unwrap_or(3.0);
        let high = args.st_sig_high.unwrap_or(3.0);
        if low >= 0.0 && high >= 0.0 {
            config.stack.sigma = Some(SigmaMode::Explicit { sigma_low: low, sigma_high: high });
        }
    } else if args.st_clip_perc_low.is_some() || args.st_clip_perc_high.is_some() {
        config.stack.sigma = Some(SigmaMode::Adaptive {
            target_rejection_rate_low: args.st_clip_perc_low.unwrap_or(0.5) / 100.0,
            target_rejection_rate_high: args.st_clip_perc_high.unwrap_or(0.5) / 100.0,
        });
    }
    if let Some(mib) = args.st_memory {
        config.batch.memory_budget_bytes = mib * 1024 * 1024;
    }
}

pub fn run(args: StackArgs) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_toml_str(&std::fs::read_to_string(path)?)?,
        None => PipelineConfig::default(),
    };
    apply_overrides(&mut config, &args);

    let calibration = CalibrationFrames {
        dark: args.dark.as_ref().map(|p| load_calibration(p)).transpose()?,
        flat: args.flat.as_ref().map(|p| load_calibration(p)).transpose()?,
    };

    let progress = ProgressBar::new(args.inputs.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("=>-"),
    );

    let mut frames = HashMap::new();
    for (idx, path) in args.inputs.iter().enumerate() {
        progress.set_message(format!("loading {}", path.display()));
        let frame = load_fits(path, idx as u64)?;
        match preprocess_frame(frame, &config, &calibration) {
            FrameOutcome::Kept(f) => {
                frames.insert(f.id, f);
            }
            FrameOutcome::Dropped(e) => {
                tracing::warn!(frame = %path.display(), reason = %e, "dropped during preprocessing");
            }
        }
        progress.inc(1);
    }
    progress.finish_with_message("preprocessing complete");

    let result = run_pipeline(frames, &config)?;

    let input_dir = args.inputs[0].parent().unwrap_or_else(|| std::path::Path::new("."));
    let output_path = resolve_primary_output(&args.output, input_dir, "stacked.fits");
    stack_core::io::fits::save_fits(&output_path, &result.pixels)?;

    let log_path = resolve_auto_extension(&args.log, &output_path, "log");
    let log_body = format!(
        "frames_combined={}\nsig_low={:.3}\nsig_high={:.3}\nhfr={}\nmean={:.3}\nnoise={:.3}\n",
        result.frames_combined,
        result.sig_low,
        result.sig_high,
        result.hfr.map(|v| v.to_string()).unwrap_or_else(|| "n/a".into()),
        result.stats.mean,
        result.stats.noise,
    );
    std::fs::write(&log_path, log_body)?;

    println!(
        "{} {} frames -> {} (mean={:.2}, log={})",
        style("stacked").green().bold(),
        result.frames_combined,
        output_path.display(),
        result.stats.mean,
        log_path.display(),
    );
    Ok(())
}

fn load_calibration(path: &PathBuf) -> anyhow::Result<CalibrationFrame> {
    let frame = load_fits(path, 0)?;
    Ok(CalibrationFrame { data: frame.data })
}
