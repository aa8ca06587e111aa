//! Calibration kernel: dark subtract, flat divide, debayer, binning.

use ndarray::Array2;

use crate::error::{Result, StackError};
use crate::frame::{CalibrationFrame, CfaPattern, DebayerChannel};
use crate::stats::basic;

fn check_dims(what: &str, got: &Array2<f32>, want: &Array2<f32>) -> Result<()> {
    let (gh, gw) = got.dim();
    let (wh, ww) = want.dim();
    if (gh, gw) != (wh, ww) {
        return Err(StackError::DimensionMismatch {
            what: what.to_string(),
            got_w: gw,
            got_h: gh,
            want_w: ww,
            want_h: wh,
        });
    }
    Ok(())
}

/// `p <- p - d` pixelwise. Dark axes must equal light axes (fatal otherwise).
pub fn dark_subtract(light: &Array2<f32>, dark: &CalibrationFrame) -> Result<Array2<f32>> {
    check_dims("dark frame", light, &dark.data)?;
    Ok(light - &dark.data)
}

/// `p <- p * mean(flat) / flat` pixelwise. Zero/non-finite flat pixels yield
/// NaN, to be repaired by the bad-pixel pass downstream.
pub fn flat_divide(light: &Array2<f32>, flat: &CalibrationFrame) -> Result<Array2<f32>> {
    check_dims("flat frame", light, &flat.data)?;
    let flat_mean = basic(flat.data.as_slice().unwrap_or(&[])).mean;
    if !flat_mean.is_finite() || flat_mean.abs() < crate::consts::EPSILON {
        return Err(StackError::NumericDegenerate("flat frame has zero mean".into()));
    }
    let mut out = Array2::<f32>::zeros(light.dim());
    for ((o, &l), &f) in out.iter_mut().zip(light.iter()).zip(flat.data.iter()) {
        *o = if f.is_finite() && f.abs() > crate::consts::EPSILON {
            l * flat_mean / f
        } else {
            f32::NAN
        };
    }
    Ok(out)
}

/// Extract one channel of a Bayer mosaic via half-resolution selection (no
/// interpolation). Output axes become `w/2 x h/2`.
pub fn debayer_select(data: &Array2<f32>, pattern: CfaPattern, channel: DebayerChannel) -> Array2<f32> {
    let (h, w) = data.dim();
    let out_h = h / 2;
    let out_w = w / 2;

    // (row_parity, col_parity) within the 2x2 cell for R and each G, B.
    let (r_pos, g1_pos, g2_pos, b_pos): ((usize, usize), (usize, usize), (usize, usize), (usize, usize)) =
        match pattern {
            CfaPattern::Rggb => ((0, 0), (0, 1), (1, 0), (1, 1)),
            CfaPattern::Grbg => ((0, 1), (0, 0), (1, 1), (1, 0)),
            CfaPattern::Gbrg => ((1, 0), (0, 0), (1, 1), (0, 1)),
            CfaPattern::Bggr => ((1, 1), (0, 1), (1, 0), (0, 0)),
        };

    let mut out = Array2::<f32>::zeros((out_h, out_w));
    for cell_row in 0..out_h {
        for cell_col in 0..out_w {
            let base_r = cell_row * 2;
            let base_c = cell_col * 2;
            let value = match channel {
                DebayerChannel::R => data[[base_r + r_pos.0, base_c + r_pos.1]],
                DebayerChannel::B => data[[base_r + b_pos.0, base_c + b_pos.1]],
                DebayerChannel::G => {
                    let g1 = data[[base_r + g1_pos.0, base_c + g1_pos.1]];
                    let g2 = data[[base_r + g2_pos.0, base_c + g2_pos.1]];
                    (g1 + g2) * 0.5
                }
            };
            out[[cell_row, cell_col]] = value;
        }
    }
    out
}

/// Average non-overlapping `n x n` blocks. Output axes `floor(w/n) x floor(h/n)`.
pub fn bin_nxn(data: &Array2<f32>, n: usize) -> Array2<f32> {
    assert!(n >= 2, "binning factor must be >= 2");
    let (h, w) = data.dim();
    let out_h = h / n;
    let out_w = w / n;
    let mut out = Array2::<f32>::zeros((out_h, out_w));
    let inv_area = 1.0 / (n * n) as f32;

    for oy in 0..out_h {
        for ox in 0..out_w {
            let mut sum = 0.0f32;
            for dy in 0..n {
                for dx in 0..n {
                    sum += data[[oy * n + dy, ox * n + dx]];
                }
            }
            out[[oy, ox]] = sum * inv_area;
        }
    }
    out
}

/// Affine rescale to `[0,1]` using the observed min/max.
pub fn norm_range(data: &Array2<f32>) -> Array2<f32> {
    let b = basic(data.as_slice().unwrap_or(&[]));
    let range = (b.max - b.min).max(crate::consts::EPSILON);
    data.mapv(|v| ((v - b.min) / range).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent_calibration_with_zero_dark_and_unit_flat() {
        let light = Array2::<f32>::from_shape_fn((8, 8), |(r, c)| (r * 8 + c) as f32);
        let dark = CalibrationFrame { data: Array2::<f32>::zeros((8, 8)) };
        let flat = CalibrationFrame { data: Array2::<f32>::from_elem((8, 8), 1.0) };

        let after_dark = dark_subtract(&light, &dark).unwrap();
        assert_eq!(after_dark, light);

        let after_flat = flat_divide(&after_dark, &flat).unwrap();
        assert_eq!(after_flat, light);
    }

    #[test]
    fn dimension_mismatch_is_fatal() {
        let light = Array2::<f32>::zeros((8, 8));
        let dark = CalibrationFrame { data: Array2::<f32>::zeros((7, 8)) };
        assert!(matches!(
            dark_subtract(&light, &dark),
            Err(StackError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn binning_halves_axes_and_averages() {
        let data = Array2::<f32>::from_elem((4, 4), 2.0);
        let binned = bin_nxn(&data, 2);
        assert_eq!(binned.dim(), (2, 2));
        assert!((binned[[0, 0]] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn debayer_rggb_halves_axes() {
        let data = Array2::<f32>::from_shape_fn((4, 4), |(r, c)| (r + c) as f32);
        let red = debayer_select(&data, CfaPattern::Rggb, DebayerChannel::R);
        assert_eq!(red.dim(), (2, 2));
        assert_eq!(red[[0, 0]], data[[0, 0]]);
    }
}
