//! Per-frame weighting schemes feeding the combination estimators.

/// How much each frame contributes to a weighted mean/sigma-clip combine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum WeightMode {
    Unweighted,
    ExposureProportional,
    InverseNoise,
}

impl Default for WeightMode {
    fn default() -> Self {
        WeightMode::Unweighted
    }
}

/// A frame's inputs to weight computation.
#[derive(Clone, Copy, Debug)]
pub struct WeightInputs {
    pub exposure_seconds: f64,
    pub noise: f32,
}

/// Compute one weight per frame, in the same order as `inputs`.
pub fn compute_weights(mode: WeightMode, inputs: &[WeightInputs]) -> Vec<f32> {
    match mode {
        WeightMode::Unweighted => vec![1.0; inputs.len()],
        WeightMode::ExposureProportional => inputs
            .iter()
            .map(|i| i.exposure_seconds.max(0.0) as f32)
            .map(|w| if w > 0.0 { w } else { 1.0 })
            .collect(),
        WeightMode::InverseNoise => {
            let min_noise = inputs.iter().map(|i| i.noise).fold(f32::INFINITY, f32::min);
            let max_noise = inputs.iter().map(|i| i.noise).fold(f32::NEG_INFINITY, f32::max);
            let range = (max_noise - min_noise).max(crate::consts::EPSILON);
            inputs
                .iter()
                .map(|i| 1.0 / (1.0 + 4.0 * (i.noise - min_noise) / range))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unweighted_is_all_ones() {
        let inputs = vec![WeightInputs { exposure_seconds: 10.0, noise: 1.0 }; 3];
        let w = compute_weights(WeightMode::Unweighted, &inputs);
        assert_eq!(w, vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn inverse_noise_favors_quieter_frames() {
        let inputs = vec![
            WeightInputs { exposure_seconds: 10.0, noise: 1.0 },
            WeightInputs { exposure_seconds: 10.0, noise: 4.0 },
        ];
        let w = compute_weights(WeightMode::InverseNoise, &inputs);
        assert!(w[0] > w[1]);
    }

    #[test]
    fn exposure_proportional_scales_with_time() {
        let inputs = vec![
            WeightInputs { exposure_seconds: 5.0, noise: 1.0 },
            WeightInputs { exposure_seconds: 20.0, noise: 1.0 },
        ];
        let w = compute_weights(WeightMode::ExposureProportional, &inputs);
        assert!(w[1] > w[0]);
    }
}
