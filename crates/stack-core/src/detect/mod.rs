//! Star detection kernel. Depends on [`crate::stats`] and
//! [`crate::badpixel`].

use ndarray::Array2;

use crate::consts::EPSILON;
use crate::frame::{Star, StarList};
use crate::stats::{location_scale, LocationScaleMode};

/// Tunable parameters for [`detect_stars`].
#[derive(Clone, Copy, Debug)]
pub struct DetectParams {
    /// Detection threshold, in units of scale above location.
    pub star_sigma: f32,
    /// Radius (px) for local-maxima search and non-maximum suppression.
    pub star_radius: usize,
    /// Maximum aperture radius (px) searched when measuring half-flux radius.
    pub max_aperture_radius: f32,
    /// Cosmetic bad-pixel sigma applied to a scratch copy of the frame
    /// before candidate search, to keep salt-and-pepper noise from being
    /// mistaken for stars. Non-positive disables the pass.
    pub star_bp_sig: f32,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            star_sigma: 10.0,
            star_radius: 16,
            max_aperture_radius: 12.0,
            star_bp_sig: 5.0,
        }
    }
}

/// Detect stars in a background-flattened, bad-pixel-cleaned frame.
///
/// Whether `mass` is measured against the frame's zero point or against the
/// local background is decided per-module (see `DESIGN.md`): this
/// implementation subtracts `location` from every summed pixel, since the
/// input is expected to already be background-flattened and a location
/// offset of zero is the common case, but subtracting keeps mass comparable
/// across frames whose residual background level differs slightly.
pub fn detect_stars(data: &Array2<f32>, params: DetectParams, seed: u64) -> StarList {
    let (h, w) = data.dim();
    if h < 3 || w < 3 {
        return StarList::default();
    }

    let cleaned;
    let data = if params.star_bp_sig > 0.0 {
        let (c, _) = crate::badpixel::clean(data, params.star_bp_sig, params.star_bp_sig);
        cleaned = c;
        &cleaned
    } else {
        data
    };

    let (location, scale) = location_scale(
        data.as_slice().unwrap_or(&[]),
        LocationScaleMode::SampledSigmaClipQn,
        seed,
    );
    let threshold = location + params.star_sigma * scale.max(EPSILON);

    let mut candidates: Vec<(usize, usize, f32)> = Vec::new();
    let r = params.star_radius as isize;
    for row in 0..h {
        for col in 0..w {
            let p = data[[row, col]];
            if !p.is_finite() || p < threshold {
                continue;
            }
            if is_local_maximum(data, row, col, r) {
                candidates.push((row, col, p));
            }
        }
    }

    // Non-maximum suppression: sort by peak value descending, keep a
    // candidate only if no already-kept star is within star_radius.
    candidates.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap());
    let mut kept: Vec<(usize, usize, f32)> = Vec::new();
    let min_dist_sq = (params.star_radius * params.star_radius) as f32;
    'outer: for cand in candidates {
        for &(kr, kc, _) in &kept {
            let dr = cand.0 as f32 - kr as f32;
            let dc = cand.1 as f32 - kc as f32;
            if dr * dr + dc * dc < min_dist_sq {
                continue 'outer;
            }
        }
        kept.push(cand);
    }

    let mut stars: Vec<Star> = kept
        .into_iter()
        .map(|(row, col, _)| {
            let (mass, hfr) = measure_star(data, row, col, location, params.max_aperture_radius);
            Star {
                x: col as f32,
                y: row as f32,
                mass,
                hfr,
            }
        })
        .collect();

    stars.sort_by(|a, b| b.mass.partial_cmp(&a.mass).unwrap());
    StarList(stars)
}

fn is_local_maximum(data: &Array2<f32>, row: usize, col: usize, radius: isize) -> bool {
    let (h, w) = data.dim();
    let p = data[[row, col]];
    for dr in -radius..=radius {
        for dc in -radius..=radius {
            if dr == 0 && dc == 0 {
                continue;
            }
            let nr = row as isize + dr;
            let nc = col as isize + dc;
            if nr < 0 || nr >= h as isize || nc < 0 || nc >= w as isize {
                continue;
            }
            let q = data[[nr as usize, nc as usize]];
            if q.is_finite() && q > p {
                return false;
            }
        }
    }
    true
}

/// Sum flux and half-flux radius within an expanding circular aperture
/// centered on `(row, col)`, background-subtracted against `location`.
fn measure_star(data: &Array2<f32>, row: usize, col: usize, location: f32, max_radius: f32) -> (f32, f32) {
    let (h, w) = data.dim();
    let r_max = max_radius.ceil() as isize;

    let mut total_flux = 0.0f32;
    let mut samples: Vec<(f32, f32)> = Vec::new(); // (radius, flux above background)
    for dr in -r_max..=r_max {
        for dc in -r_max..=r_max {
            let nr = row as isize + dr;
            let nc = col as isize + dc;
            if nr < 0 || nr >= h as isize || nc < 0 || nc >= w as isize {
                continue;
            }
            let dist = ((dr * dr + dc * dc) as f32).sqrt();
            if dist > max_radius {
                continue;
            }
            let v = data[[nr as usize, nc as usize]];
            if !v.is_finite() {
                continue;
            }
            let flux = (v - location).max(0.0);
            total_flux += flux;
            samples.push((dist, flux));
        }
    }

    if total_flux <= EPSILON {
        return (0.0, 0.0);
    }

    samples.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
    let half = total_flux * 0.5;
    let mut running = 0.0f32;
    let mut hfr = max_radius;
    for (dist, flux) in samples {
        running += flux;
        if running >= half {
            hfr = dist;
            break;
        }
    }

    (total_flux, hfr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_star_field(w: usize, h: usize, stars: &[(usize, usize, f32)]) -> Array2<f32> {
        let mut data = Array2::<f32>::from_elem((h, w), 100.0);
        for &(sx, sy, amp) in stars {
            for dr in -4isize..=4 {
                for dc in -4isize..=4 {
                    let r = sy as isize + dr;
                    let c = sx as isize + dc;
                    if r < 0 || r >= h as isize || c < 0 || c >= w as isize {
                        continue;
                    }
                    let dist_sq = (dr * dr + dc * dc) as f32;
                    let v = amp * (-dist_sq / 4.0).exp();
                    data[[r as usize, c as usize]] += v;
                }
            }
        }
        data
    }

    #[test]
    fn detects_three_isolated_stars() {
        let data = synthetic_star_field(64, 64, &[(10, 10, 5000.0), (40, 20, 4000.0), (30, 50, 3000.0)]);
        let stars = detect_stars(&data, DetectParams::default(), 1);
        assert_eq!(stars.len(), 3);
    }

    #[test]
    fn brightest_star_sorts_first() {
        let data = synthetic_star_field(64, 64, &[(10, 10, 2000.0), (40, 20, 8000.0)]);
        let stars = detect_stars(&data, DetectParams::default(), 1);
        assert!(stars.0[0].mass >= stars.0[1].mass);
    }

    #[test]
    fn empty_field_yields_no_stars() {
        let data = Array2::<f32>::from_elem((64, 64), 100.0);
        let stars = detect_stars(&data, DetectParams::default(), 1);
        assert!(stars.is_empty());
    }
}
