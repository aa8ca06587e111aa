//! Histogram normalization kernel. Depends on [`crate::stats`].

use ndarray::Array2;

use crate::consts::EPSILON;
use crate::stats::{location_scale, LocationScaleMode};

/// Normalization strategy applied to a frame before stacking, relative to a
/// shared reference location/scale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum NormalizeMode {
    /// No adjustment.
    None,
    /// Affine match of both location and scale to the reference.
    LocationScale,
    /// Shift only the black point (location), leave scale untouched.
    BlackPointOnly,
    /// Pipeline picks the mode appropriate to the calling context: see
    /// [`resolve_mode`].
    Auto,
}

impl Default for NormalizeMode {
    fn default() -> Self {
        NormalizeMode::Auto
    }
}

/// Which step a [`normalize`] call is part of, used to resolve
/// [`NormalizeMode::Auto`] into a concrete mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NormalizeContext {
    /// Per-frame normalization ahead of light stacking.
    LightStacking,
    /// Channel combination (RGB/ARGB/LRGB), where channels should keep their
    /// own relative levels.
    ChannelCombination,
}

/// Resolve `mode` to a concrete, non-`Auto` mode for `context`.
pub fn resolve_mode(mode: NormalizeMode, context: NormalizeContext) -> NormalizeMode {
    match mode {
        NormalizeMode::Auto => match context {
            NormalizeContext::LightStacking => NormalizeMode::LocationScale,
            NormalizeContext::ChannelCombination => NormalizeMode::None,
        },
        other => other,
    }
}

/// Normalize `data` against `(ref_location, ref_scale)`, computing this
/// frame's own location/scale with the same estimator the reference used.
pub fn normalize(
    data: &Array2<f32>,
    mode: NormalizeMode,
    context: NormalizeContext,
    ref_location: f32,
    ref_scale: f32,
    seed: u64,
) -> Array2<f32> {
    match resolve_mode(mode, context) {
        NormalizeMode::None => data.clone(),
        NormalizeMode::LocationScale => {
            let (loc, scale) = location_scale(data.as_slice().unwrap_or(&[]), LocationScaleMode::SampledSigmaClipQn, seed);
            let scale = scale.max(EPSILON);
            let gain = ref_scale / scale;
            data.mapv(|v| (v - loc) * gain + ref_location)
        }
        NormalizeMode::BlackPointOnly => {
            let (loc, _) = location_scale(data.as_slice().unwrap_or(&[]), LocationScaleMode::SampledSigmaClipQn, seed);
            let offset = ref_location - loc;
            data.mapv(|v| v + offset)
        }
        NormalizeMode::Auto => unreachable!("resolve_mode never returns Auto"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_scale_mode_matches_reference_stats() {
        let reference = Array2::<f32>::from_shape_fn((32, 32), |(r, c)| (r + c) as f32 + 100.0);
        let target = Array2::<f32>::from_shape_fn((32, 32), |(r, c)| ((r + c) as f32) * 2.0 + 50.0);
        let (ref_loc, ref_scale) = location_scale(reference.as_slice().unwrap(), LocationScaleMode::SampledSigmaClipQn, 1);

        let normalized = normalize(
            &target,
            NormalizeMode::LocationScale,
            NormalizeContext::LightStacking,
            ref_loc,
            ref_scale.max(EPSILON),
            2,
        );
        let (norm_loc, _) = location_scale(normalized.as_slice().unwrap(), LocationScaleMode::SampledSigmaClipQn, 1);
        assert!((norm_loc - ref_loc).abs() < ref_scale.max(1.0));
    }

    #[test]
    fn none_mode_is_identity() {
        let data = Array2::<f32>::from_elem((8, 8), 5.0);
        let normalized = normalize(&data, NormalizeMode::None, NormalizeContext::LightStacking, 0.0, 1.0, 1);
        assert_eq!(normalized, data);
    }

    #[test]
    fn black_point_only_preserves_spread() {
        let data = Array2::<f32>::from_shape_fn((16, 16), |(r, c)| (r + c) as f32);
        let normalized = normalize(&data, NormalizeMode::BlackPointOnly, NormalizeContext::LightStacking, 50.0, 1.0, 1);
        let spread_before = data.iter().cloned().fold(f32::MIN, f32::max) - data.iter().cloned().fold(f32::MAX, f32::min);
        let spread_after = normalized.iter().cloned().fold(f32::MIN, f32::max) - normalized.iter().cloned().fold(f32::MAX, f32::min);
        assert!((spread_before - spread_after).abs() < 1e-3);
    }

    #[test]
    fn auto_resolves_by_context() {
        assert_eq!(resolve_mode(NormalizeMode::Auto, NormalizeContext::LightStacking), NormalizeMode::LocationScale);
        assert_eq!(resolve_mode(NormalizeMode::Auto, NormalizeContext::ChannelCombination), NormalizeMode::None);
    }
}
