//! Bad-pixel & cosmetic kernel. Depends on [`crate::stats`].

use ndarray::Array2;

/// Reflect-pad a coordinate into `[0, len)`.
#[inline]
fn reflect(i: isize, len: usize) -> usize {
    if len <= 1 {
        return 0;
    }
    let len = len as isize;
    let mut i = i;
    // Reflect without repeating the edge pixel (ndarray has no native padding op).
    while i < 0 || i >= len {
        if i < 0 {
            i = -i - 1;
        } else if i >= len {
            i = 2 * len - i - 1;
        }
    }
    i as usize
}

fn neighborhood_3x3(data: &Array2<f32>, row: usize, col: usize) -> [f32; 9] {
    let (h, w) = data.dim();
    let mut out = [0.0f32; 9];
    let mut idx = 0;
    for dr in -1isize..=1 {
        for dc in -1isize..=1 {
            let r = reflect(row as isize + dr, h);
            let c = reflect(col as isize + dc, w);
            out[idx] = data[[r, c]];
            idx += 1;
        }
    }
    out
}

fn median9(values: &mut [f32; 9]) -> f32 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    values[4]
}

fn mad9(values: &[f32; 9], center: f32) -> f32 {
    let mut deviations: [f32; 9] = [0.0; 9];
    for (i, &v) in values.iter().enumerate() {
        deviations[i] = (v - center).abs();
    }
    median9(&mut deviations)
}

/// Clean hot/cold pixels against the local 3x3 neighborhood median and MAD.
///
/// For each pixel: compute the 3x3 neighborhood median `m` and local MAD
/// `s`; if `p - m > sig_high*s` (hot) or `m - p > sig_low*s` (cold), replace
/// with `m`. Operates on a copy; edges use reflect padding.
pub fn clean(data: &Array2<f32>, sig_low: f32, sig_high: f32) -> (Array2<f32>, usize) {
    let (h, w) = data.dim();
    let mut out = data.clone();
    let mut replaced = 0usize;

    for row in 0..h {
        for col in 0..w {
            let p = data[[row, col]];
            if !p.is_finite() {
                let mut neighborhood = neighborhood_3x3(data, row, col);
                let m = median9(&mut neighborhood);
                out[[row, col]] = m;
                replaced += 1;
                continue;
            }
            let neighborhood = neighborhood_3x3(data, row, col);
            let m = median9(&mut neighborhood.clone());
            let s = mad9(&neighborhood, m).max(crate::consts::EPSILON);

            let hot = p - m > sig_high * s;
            let cold = m - p > sig_low * s;
            if hot || cold {
                out[[row, col]] = m;
                replaced += 1;
            }
        }
    }

    (out, replaced)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hot_pixel_is_replaced() {
        let mut data = Array2::<f32>::from_elem((16, 16), 100.0);
        data[[8, 8]] = 100.0 + 50.0 * 3.0; // injected hot pixel well above sig_high*scale
        let (cleaned, replaced) = clean(&data, 3.0, 5.0);
        assert_eq!(replaced, 1);
        assert!((cleaned[[8, 8]] - 100.0).abs() < 1e-3);
    }

    #[test]
    fn uniform_frame_is_untouched() {
        let data = Array2::<f32>::from_elem((16, 16), 42.0);
        let (cleaned, replaced) = clean(&data, 3.0, 5.0);
        assert_eq!(replaced, 0);
        assert_eq!(cleaned, data);
    }
}
