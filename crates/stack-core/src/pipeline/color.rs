//! RGB/ARGB/LRGB channel combination. Three or four
//! independently-stacked channels are combined into one perceptual-space
//! image; luminance can optionally modulate the chroma channels.

use ndarray::Array2;

use crate::error::{Result, StackError};

fn check_same_shape(a: &Array2<f32>, b: &Array2<f32>, what: &str) -> Result<()> {
    if a.dim() != b.dim() {
        let (ah, aw) = a.dim();
        let (bh, bw) = b.dim();
        return Err(StackError::DimensionMismatch {
            what: what.to_string(),
            got_w: bw,
            got_h: bh,
            want_w: aw,
            want_h: ah,
        });
    }
    Ok(())
}

/// Plain RGB combination: three pre-stacked channels, no luminance layer.
pub fn combine_rgb(r: &Array2<f32>, g: &Array2<f32>, b: &Array2<f32>) -> Result<[Array2<f32>; 3]> {
    check_same_shape(r, g, "green channel")?;
    check_same_shape(r, b, "blue channel")?;
    Ok([r.clone(), g.clone(), b.clone()])
}

/// ARGB: an extra "alpha" (typically a narrowband or clear) channel is
/// screen-blended additively on top of each color channel.
pub fn combine_argb(r: &Array2<f32>, g: &Array2<f32>, b: &Array2<f32>, alpha: &Array2<f32>, alpha_strength: f32) -> Result<[Array2<f32>; 3]> {
    check_same_shape(r, g, "green channel")?;
    check_same_shape(r, b, "blue channel")?;
    check_same_shape(r, alpha, "alpha channel")?;

    let blend = |channel: &Array2<f32>| -> Array2<f32> {
        ndarray::Zip::from(channel).and(alpha).map_collect(|&c, &a| c + alpha_strength * a)
    };
    Ok([blend(r), blend(g), blend(b)])
}

/// LRGB: replace the combined image's luminance with an independently
/// stacked, typically higher-SNR luminance frame, preserving chroma ratios.
///
/// Converts to a simple YCbCr-like space: `Y' = (r+g+b)/3` is replaced by
/// `luminance`, then the color is reconstructed by rescaling each channel by
/// `luminance / Y'` (guarding against division by zero).
pub fn combine_lrgb(r: &Array2<f32>, g: &Array2<f32>, b: &Array2<f32>, luminance: &Array2<f32>) -> Result<[Array2<f32>; 3]> {
    check_same_shape(r, g, "green channel")?;
    check_same_shape(r, b, "blue channel")?;
    check_same_shape(r, luminance, "luminance channel")?;

    let epsilon = crate::consts::EPSILON;
    let mut out_r = Array2::<f32>::zeros(r.dim());
    let mut out_g = Array2::<f32>::zeros(r.dim());
    let mut out_b = Array2::<f32>::zeros(r.dim());

    for ((((idx, &rv), &gv), &bv), &lv) in r
        .indexed_iter()
        .zip(g.iter())
        .zip(b.iter())
        .zip(luminance.iter())
    {
        let original_luma = (rv + gv + bv) / 3.0;
        let gain = if original_luma.abs() > epsilon { lv / original_luma } else { 1.0 };
        out_r[idx] = rv * gain;
        out_g[idx] = gv * gain;
        out_b[idx] = bv * gain;
    }

    Ok([out_r, out_g, out_b])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_combination_preserves_channels() {
        let r = Array2::<f32>::from_elem((4, 4), 1.0);
        let g = Array2::<f32>::from_elem((4, 4), 2.0);
        let b = Array2::<f32>::from_elem((4, 4), 3.0);
        let combined = combine_rgb(&r, &g, &b).unwrap();
        assert_eq!(combined[0][[0, 0]], 1.0);
        assert_eq!(combined[1][[0, 0]], 2.0);
        assert_eq!(combined[2][[0, 0]], 3.0);
    }

    #[test]
    fn lrgb_matches_luminance_average() {
        let r = Array2::<f32>::from_elem((4, 4), 10.0);
        let g = Array2::<f32>::from_elem((4, 4), 10.0);
        let b = Array2::<f32>::from_elem((4, 4), 10.0);
        let luminance = Array2::<f32>::from_elem((4, 4), 20.0);
        let combined = combine_lrgb(&r, &g, &b, &luminance).unwrap();
        let new_luma = (combined[0][[0, 0]] + combined[1][[0, 0]] + combined[2][[0, 0]]) / 3.0;
        assert!((new_luma - 20.0).abs() < 1e-3);
    }

    #[test]
    fn mismatched_dimensions_error() {
        let r = Array2::<f32>::zeros((4, 4));
        let g = Array2::<f32>::zeros((5, 4));
        let b = Array2::<f32>::zeros((4, 4));
        assert!(combine_rgb(&r, &g, &b).is_err());
    }
}
