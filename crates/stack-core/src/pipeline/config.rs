//! Pipeline configuration. One small serde struct per concern;
//! `PipelineConfig` is what the CLI deserializes from a TOML file (or
//! builds from flags).

use serde::{Deserialize, Serialize};

use crate::detect::DetectParams;
use crate::normalize::NormalizeMode;
use crate::stack::{Estimator, WeightMode};
use crate::stats::LocationScaleMode;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub dark_path: Option<String>,
    pub flat_path: Option<String>,
    pub bin_factor: u32,
    pub norm_range: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            dark_path: None,
            flat_path: None,
            bin_factor: 1,
            norm_range: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BadPixelConfig {
    pub sigma_low: f32,
    pub sigma_high: f32,
}

impl Default for BadPixelConfig {
    fn default() -> Self {
        Self {
            sigma_low: 3.0,
            sigma_high: 5.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Off by default: a grid side of 0 disables extraction entirely.
    pub enabled: bool,
    pub tile_size: usize,
    /// Per-tile pixel exclusion threshold, in units of scale above the
    /// tile's own location, applied before the tile's location is taken.
    pub back_sigma: f32,
    pub reject_fraction: f64,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tile_size: 64,
            back_sigma: 1.5,
            reject_fraction: 0.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StarDetectConfig {
    pub star_sigma: f32,
    pub star_radius: usize,
    pub max_aperture_radius: f32,
    /// Cosmetic bad-pixel sigma applied before candidate search; negative
    /// means auto (resolves to 5.0 for light frames).
    pub star_bp_sig: f32,
}

impl Default for StarDetectConfig {
    fn default() -> Self {
        let d = DetectParams::default();
        Self {
            star_sigma: d.star_sigma,
            star_radius: d.star_radius,
            max_aperture_radius: d.max_aperture_radius,
            star_bp_sig: -1.0,
        }
    }
}

impl From<StarDetectConfig> for DetectParams {
    fn from(c: StarDetectConfig) -> Self {
        DetectParams {
            star_sigma: c.star_sigma,
            star_radius: c.star_radius,
            max_aperture_radius: c.max_aperture_radius,
            star_bp_sig: if c.star_bp_sig < 0.0 { 5.0 } else { c.star_bp_sig },
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    pub align_k: usize,
    /// Maximum accepted residual RMS, in pixels, for an alignment to be kept.
    pub align_t: f32,
    pub enabled: bool,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            align_k: crate::consts::DEFAULT_ALIGN_K,
            align_t: 1.0,
            enabled: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    pub mode: NormalizeMode,
    pub location_scale_mode: LocationScaleMode,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            mode: NormalizeMode::default(),
            location_scale_mode: LocationScaleMode::default(),
        }
    }
}

/// How the stacker picks its rejection sigma.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SigmaMode {
    /// Use the operator-specified thresholds directly.
    Explicit { sigma_low: f32, sigma_high: f32 },
    /// Search independently for a low-side and high-side threshold that each
    /// hit their own target rejection rate.
    Adaptive {
        target_rejection_rate_low: f64,
        target_rejection_rate_high: f64,
    },
}

impl Default for SigmaMode {
    fn default() -> Self {
        SigmaMode::Explicit {
            sigma_low: 3.0,
            sigma_high: 3.0,
        }
    }
}

impl std::fmt::Display for SigmaMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SigmaMode::Explicit { sigma_low, sigma_high } => {
                write!(f, "explicit(low={sigma_low}, high={sigma_high})")
            }
            SigmaMode::Adaptive { target_rejection_rate_low, target_rejection_rate_high } => {
                write!(f, "adaptive(low={target_rejection_rate_low}, high={target_rejection_rate_high})")
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub estimator: Estimator,
    pub weight_mode: WeightMode,
    #[serde(skip)]
    pub sigma: Option<SigmaMode>,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            estimator: Estimator::default(),
            weight_mode: WeightMode::default(),
            sigma: Some(SigmaMode::default()),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub memory_budget_bytes: u64,
    pub max_concurrent: usize,
    pub seed: u64,
    /// Gamma applied to the finished stack, after all batches are folded.
    /// `None` (or 1.0) leaves the output untouched.
    pub output_gamma: Option<f32>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            memory_budget_bytes: 2 * 1024 * 1024 * 1024,
            max_concurrent: 0, // 0 means "derive from memory budget"
            seed: 0,
            output_gamma: None,
        }
    }
}

/// The full set of knobs for one stacking run.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub calibration: CalibrationConfig,
    pub bad_pixel: BadPixelConfig,
    pub background: BackgroundConfig,
    pub star_detect: StarDetectConfig,
    pub alignment: AlignmentConfig,
    pub normalize: NormalizeConfig,
    pub stack: StackConfig,
    pub batch: BatchConfig,
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> crate::error::Result<Self> {
        toml::from_str(text).map_err(|e| crate::error::StackError::Format(format!("invalid config: {e}")))
    }

    pub fn to_toml_string(&self) -> crate::error::Result<String> {
        toml::to_string_pretty(self).map_err(|e| crate::error::StackError::Format(format!("cannot serialize config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let config = PipelineConfig::default();
        let text = config.to_toml_string().unwrap();
        let parsed = PipelineConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed.bad_pixel.sigma_low, config.bad_pixel.sigma_low);
        assert_eq!(parsed.batch.memory_budget_bytes, config.batch.memory_budget_bytes);
    }

    #[test]
    fn sigma_mode_display_is_human_readable() {
        let explicit = SigmaMode::Explicit { sigma_low: 3.0, sigma_high: 3.0 };
        assert_eq!(format!("{explicit}"), "explicit(low=3, high=3)");
    }
}
