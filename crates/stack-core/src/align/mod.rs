//! Star-pattern alignment kernel. Depends on [`crate::detect`].

use std::collections::HashMap;

use ndarray::Array2;

use crate::consts::{ALIGN_MATCH_RADIUS_PX, ALIGN_MIN_INLIERS, DEFAULT_ALIGN_K, EPSILON};
use crate::error::{Result, StackError};
use crate::frame::{SimilarityXform, Star, StarList};

/// Fingerprint of a star triple: the two largest-to-smallest side-length
/// ratios, invariant to rotation, translation and (near-)uniform scale.
#[derive(Clone, Copy, Debug)]
struct TriangleKey {
    ratio_a: i32,
    ratio_b: i32,
}

const FINGERPRINT_QUANT: f32 = 200.0;

fn triangle_key(a: (f32, f32), b: (f32, f32), c: (f32, f32)) -> Option<(TriangleKey, [usize; 3])> {
    let d_ab = dist(a, b);
    let d_bc = dist(b, c);
    let d_ca = dist(c, a);
    let mut sides = [(d_ab, 0usize), (d_bc, 1usize), (d_ca, 2usize)];
    sides.sort_by(|x, y| y.0.partial_cmp(&x.0).unwrap());
    let (longest, _) = sides[0];
    if longest < EPSILON {
        return None;
    }
    let ratio_a = sides[1].0 / longest;
    let ratio_b = sides[2].0 / longest;
    Some((
        TriangleKey {
            ratio_a: (ratio_a * FINGERPRINT_QUANT).round() as i32,
            ratio_b: (ratio_b * FINGERPRINT_QUANT).round() as i32,
        },
        [0, 1, 2],
    ))
}

fn dist(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Build every triangle fingerprint from the top-`k` stars of a list.
fn triangles(stars: &[Star], k: usize) -> Vec<(TriangleKey, (usize, usize, usize))> {
    let n = stars.len().min(k);
    let mut out = Vec::new();
    for i in 0..n {
        for j in (i + 1)..n {
            for l in (j + 1)..n {
                let pi = (stars[i].x, stars[i].y);
                let pj = (stars[j].x, stars[j].y);
                let pl = (stars[l].x, stars[l].y);
                if let Some((key, _)) = triangle_key(pi, pj, pl) {
                    out.push((key, (i, j, l)));
                }
            }
        }
    }
    out
}

/// Estimate the similarity transform mapping `target` stars onto `reference`
/// stars via triangle-fingerprint correspondence voting, then refine with a
/// least-squares fit over nearest-neighbor inliers.
pub fn align_stars(
    reference: &StarList,
    target: &StarList,
    frame_id: u64,
    align_k: usize,
    align_t: f32,
) -> Result<SimilarityXform> {
    let k = if align_k == 0 { DEFAULT_ALIGN_K } else { align_k };
    let ref_tris = triangles(&reference.0, k);
    let tgt_tris = triangles(&target.0, k);

    let mut ref_index: HashMap<(i32, i32), Vec<(usize, usize, usize)>> = HashMap::new();
    for (key, idxs) in &ref_tris {
        ref_index.entry((key.ratio_a, key.ratio_b)).or_default().push(*idxs);
    }

    // Vote on candidate correspondences in a coarse (dx, dy) bucket space.
    let mut votes: HashMap<(i32, i32), Vec<(usize, usize)>> = HashMap::new();
    for (key, (ti, tj, tl)) in &tgt_tris {
        if let Some(matches) = ref_index.get(&(key.ratio_a, key.ratio_b)) {
            for &(ri, rj, rl) in matches {
                for (t_idx, r_idx) in [(*ti, ri), (*tj, rj), (*tl, rl)] {
                    let t_star = target.0[t_idx];
                    let r_star = reference.0[r_idx];
                    let dx = (r_star.x - t_star.x).round() as i32;
                    let dy = (r_star.y - t_star.y).round() as i32;
                    votes.entry((dx, dy)).or_default().push((t_idx, r_idx));
                }
            }
        }
    }

    let best_bucket = votes
        .into_iter()
        .max_by_key(|(_, pairs)| pairs.len())
        .map(|(_, pairs)| pairs);

    let Some(mut pairs) = best_bucket else {
        return Err(StackError::AlignmentFailed {
            frame_id,
            residual_px: f32::INFINITY,
            inliers: 0,
        });
    };
    pairs.sort_unstable();
    pairs.dedup();

    if pairs.len() < ALIGN_MIN_INLIERS {
        return Err(StackError::AlignmentFailed {
            frame_id,
            residual_px: f32::INFINITY,
            inliers: pairs.len(),
        });
    }

    let correspondences: Vec<(Star, Star)> = pairs
        .iter()
        .map(|&(t, r)| (target.0[t], reference.0[r]))
        .collect();

    let xform = least_squares_similarity(&correspondences);
    let (residual, inliers) = refine_inliers(&xform, &correspondences);

    if inliers.len() < ALIGN_MIN_INLIERS {
        return Err(StackError::AlignmentFailed {
            frame_id,
            residual_px: residual,
            inliers: inliers.len(),
        });
    }

    let refined = least_squares_similarity(&inliers);
    let (final_residual, final_inliers) = refine_inliers(&refined, &inliers);

    if final_inliers.len() < ALIGN_MIN_INLIERS {
        return Err(StackError::AlignmentFailed {
            frame_id,
            residual_px: final_residual,
            inliers: final_inliers.len(),
        });
    }
    if final_residual > align_t {
        return Err(StackError::AlignmentFailed {
            frame_id,
            residual_px: final_residual,
            inliers: final_inliers.len(),
        });
    }

    Ok(SimilarityXform {
        residual_px: final_residual,
        match_count: final_inliers.len(),
        ..refined
    })
}

/// Closed-form least-squares similarity transform (Umeyama, scale+rotation
/// only, no reflection) from `target -> reference` point correspondences.
fn least_squares_similarity(pairs: &[(Star, Star)]) -> SimilarityXform {
    let n = pairs.len() as f32;
    if n < 2.0 {
        return SimilarityXform::identity();
    }

    let (mut tx_mean, mut ty_mean, mut rx_mean, mut ry_mean) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
    for (t, r) in pairs {
        tx_mean += t.x;
        ty_mean += t.y;
        rx_mean += r.x;
        ry_mean += r.y;
    }
    tx_mean /= n;
    ty_mean /= n;
    rx_mean /= n;
    ry_mean /= n;

    let mut sxx = 0.0f32;
    let mut sxy_cross = 0.0f32; // sum(t' . r') as cos-like term
    let mut sxy_skew = 0.0f32; // sum(t'.x*r'.y - t'.y*r'.x) as sin-like term
    for (t, r) in pairs {
        let tdx = t.x - tx_mean;
        let tdy = t.y - ty_mean;
        let rdx = r.x - rx_mean;
        let rdy = r.y - ry_mean;
        sxx += tdx * tdx + tdy * tdy;
        sxy_cross += tdx * rdx + tdy * rdy;
        sxy_skew += tdx * rdy - tdy * rdx;
    }

    if sxx < EPSILON {
        return SimilarityXform::identity();
    }

    let a = sxy_cross / sxx; // scale * cos(rotation)
    let b = sxy_skew / sxx; // scale * sin(rotation)
    let scale = (a * a + b * b).sqrt().max(EPSILON);
    let rotation = b.atan2(a);

    let (s, c) = rotation.sin_cos();
    let tx = rx_mean - scale * (c * tx_mean - s * ty_mean);
    let ty = ry_mean - scale * (s * tx_mean + c * ty_mean);

    SimilarityXform {
        scale,
        rotation,
        tx,
        ty,
        residual_px: 0.0,
        match_count: pairs.len(),
    }
}

/// Keep only correspondences within `ALIGN_MATCH_RADIUS_PX` of the predicted
/// position, and report the RMS residual over the surviving set.
fn refine_inliers(xform: &SimilarityXform, pairs: &[(Star, Star)]) -> (f32, Vec<(Star, Star)>) {
    let mut inliers = Vec::new();
    let mut sum_sq = 0.0f32;
    for &(t, r) in pairs {
        let (px, py) = xform.apply(t.x, t.y);
        let d = ((px - r.x).powi(2) + (py - r.y).powi(2)).sqrt();
        if d <= ALIGN_MATCH_RADIUS_PX {
            inliers.push((t, r));
            sum_sq += d * d;
        }
    }
    let rms = if inliers.is_empty() {
        f32::INFINITY
    } else {
        (sum_sq / inliers.len() as f32).sqrt()
    };
    (rms, inliers)
}

/// Bilinear sample of `data` at fractional coordinates; out-of-bounds yields
/// `None` (caller decides between `NaN`-fill and "own location" fallback).
fn bilinear_sample(data: &Array2<f32>, x: f32, y: f32) -> Option<f32> {
    let (h, w) = data.dim();
    if x < 0.0 || y < 0.0 || x > (w - 1) as f32 || y > (h - 1) as f32 {
        return None;
    }
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let top = data[[y0, x0]] * (1.0 - fx) + data[[y0, x1]] * fx;
    let bottom = data[[y1, x0]] * (1.0 - fx) + data[[y1, x1]] * fx;
    Some(top * (1.0 - fy) + bottom * fy)
}

/// How to fill samples that land outside the source frame during resampling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutOfBoundsMode {
    Nan,
    OwnLocation,
}

/// Resample `data` onto the reference grid using the inverse of `xform`,
/// row-parallel once the frame clears [`crate::consts::PARALLEL_PIXEL_THRESHOLD`].
pub fn warp_frame(data: &Array2<f32>, xform: &SimilarityXform, fill: OutOfBoundsMode, fill_value: f32) -> Array2<f32> {
    use rayon::prelude::*;

    let (h, w) = data.dim();
    let inverse = xform.invert();
    let mut out = Array2::<f32>::zeros((h, w));

    if h * w >= crate::consts::PARALLEL_PIXEL_THRESHOLD {
        out.axis_iter_mut(ndarray::Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(row, mut out_row)| {
                for col in 0..w {
                    let (sx, sy) = inverse.apply(col as f32, row as f32);
                    out_row[col] = bilinear_sample(data, sx, sy).unwrap_or(match fill {
                        OutOfBoundsMode::Nan => f32::NAN,
                        OutOfBoundsMode::OwnLocation => fill_value,
                    });
                }
            });
    } else {
        for row in 0..h {
            for col in 0..w {
                let (sx, sy) = inverse.apply(col as f32, row as f32);
                out[[row, col]] = bilinear_sample(data, sx, sy).unwrap_or(match fill {
                    OutOfBoundsMode::Nan => f32::NAN,
                    OutOfBoundsMode::OwnLocation => fill_value,
                });
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_stars(offset_x: f32, offset_y: f32) -> StarList {
        let base = [(10.0, 10.0), (40.0, 15.0), (25.0, 45.0), (60.0, 50.0), (15.0, 60.0)];
        StarList(
            base.iter()
                .enumerate()
                .map(|(i, &(x, y))| Star {
                    x: x + offset_x,
                    y: y + offset_y,
                    mass: 1000.0 - i as f32,
                    hfr: 2.0,
                })
                .collect(),
        )
    }

    #[test]
    fn pure_translation_is_recovered() {
        let reference = grid_stars(0.0, 0.0);
        let target = grid_stars(-3.0, 5.0);
        let xform = align_stars(&reference, &target, 1, 5, 1.0).unwrap();
        assert!((xform.tx - 3.0).abs() < 0.5);
        assert!((xform.ty + 5.0).abs() < 0.5);
    }

    #[test]
    fn too_few_stars_fails() {
        let reference = StarList(vec![Star { x: 1.0, y: 1.0, mass: 1.0, hfr: 1.0 }]);
        let target = StarList(vec![Star { x: 1.0, y: 1.0, mass: 1.0, hfr: 1.0 }]);
        assert!(align_stars(&reference, &target, 42, 5, 1.0).is_err());
    }

    #[test]
    fn residual_above_align_t_is_rejected() {
        let reference = grid_stars(0.0, 0.0);
        let target = grid_stars(-3.0, 5.0);
        assert!(align_stars(&reference, &target, 1, 5, -1.0).is_err());
    }

    #[test]
    fn warp_identity_is_lossless_inside_bounds() {
        let data = Array2::<f32>::from_shape_fn((32, 32), |(r, c)| (r * 32 + c) as f32);
        let warped = warp_frame(&data, &SimilarityXform::identity(), OutOfBoundsMode::Nan, 0.0);
        for r in 0..32 {
            for c in 0..32 {
                assert!((warped[[r, c]] - data[[r, c]]).abs() < 1e-3);
            }
        }
    }
}
