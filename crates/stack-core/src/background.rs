//! Background extraction kernel. Depends on [`crate::stats`].

use ndarray::Array2;

use crate::consts::EPSILON;
use crate::stats::{basic, location_scale, LocationScaleMode};

/// Gridded background model: per-tile robust location sampled on a coarse
/// grid, smoothed back up to full resolution by bilinear interpolation.
#[derive(Clone, Debug)]
pub struct BackgroundModel {
    tiles: Array2<f32>,
    tile_size: usize,
    width: usize,
    height: usize,
}

impl BackgroundModel {
    /// Build a background model by robustly estimating the location of each
    /// `tile_size x tile_size` grid cell, excluding individual pixels more
    /// than `back_sigma` scales above the tile's own location (foreground
    /// rejection), then clipping the brightest `reject_fraction` of tiles
    /// (foreground-contaminated cells) to the median of their immediate grid
    /// neighbors.
    pub fn fit(data: &Array2<f32>, tile_size: usize, back_sigma: f32, reject_fraction: f64) -> Self {
        let (h, w) = data.dim();
        let tiles_y = h.div_ceil(tile_size).max(1);
        let tiles_x = w.div_ceil(tile_size).max(1);

        let mut tiles = Array2::<f32>::zeros((tiles_y, tiles_x));
        for ty in 0..tiles_y {
            for tx in 0..tiles_x {
                let r0 = ty * tile_size;
                let r1 = (r0 + tile_size).min(h);
                let c0 = tx * tile_size;
                let c1 = (c0 + tile_size).min(w);
                let mut samples = Vec::with_capacity((r1 - r0) * (c1 - c0));
                for r in r0..r1 {
                    for c in c0..c1 {
                        samples.push(data[[r, c]]);
                    }
                }
                let seed = (ty * tiles_x + tx) as u64;
                let (loc0, scale0) = location_scale(&samples, LocationScaleMode::MedianMad, seed);
                let threshold = loc0 + back_sigma * scale0.max(EPSILON);
                let below: Vec<f32> = samples.iter().copied().filter(|&v| v <= threshold).collect();
                let loc = if below.is_empty() {
                    loc0
                } else {
                    location_scale(&below, LocationScaleMode::MedianMad, seed).0
                };
                tiles[[ty, tx]] = loc;
            }
        }

        reject_bright_tiles(&mut tiles, reject_fraction);

        Self {
            tiles,
            tile_size,
            width: w,
            height: h,
        }
    }

    /// Bilinearly sample the smoothed background surface at full-resolution
    /// pixel coordinates `(row, col)`.
    pub fn sample(&self, row: usize, col: usize) -> f32 {
        let (tiles_y, tiles_x) = self.tiles.dim();
        if tiles_y == 1 && tiles_x == 1 {
            return self.tiles[[0, 0]];
        }

        let fy = (row as f32 + 0.5) / self.tile_size as f32 - 0.5;
        let fx = (col as f32 + 0.5) / self.tile_size as f32 - 0.5;

        let y0 = fy.floor().clamp(0.0, (tiles_y - 1) as f32) as usize;
        let x0 = fx.floor().clamp(0.0, (tiles_x - 1) as f32) as usize;
        let y1 = (y0 + 1).min(tiles_y - 1);
        let x1 = (x0 + 1).min(tiles_x - 1);

        let wy = (fy - y0 as f32).clamp(0.0, 1.0);
        let wx = (fx - x0 as f32).clamp(0.0, 1.0);

        let top = self.tiles[[y0, x0]] * (1.0 - wx) + self.tiles[[y0, x1]] * wx;
        let bottom = self.tiles[[y1, x0]] * (1.0 - wx) + self.tiles[[y1, x1]] * wx;
        top * (1.0 - wy) + bottom * wy
    }

    /// Evaluate the surface over the whole frame.
    pub fn surface(&self) -> Array2<f32> {
        Array2::from_shape_fn((self.height, self.width), |(r, c)| self.sample(r, c))
    }
}

/// Replace the brightest `reject_fraction` of tiles with the median of their
/// immediate grid neighbors, so stars/nebulosity don't bias the model.
fn reject_bright_tiles(tiles: &mut Array2<f32>, reject_fraction: f64) {
    let (ty, tx) = tiles.dim();
    let total = ty * tx;
    if total <= 1 || reject_fraction <= 0.0 {
        return;
    }
    let n_reject = ((total as f64) * reject_fraction).round() as usize;
    if n_reject == 0 {
        return;
    }

    let mut flat: Vec<(usize, usize, f32)> = Vec::with_capacity(total);
    for r in 0..ty {
        for c in 0..tx {
            flat.push((r, c, tiles[[r, c]]));
        }
    }
    flat.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap());

    let original = tiles.clone();
    for &(r, c, _) in flat.iter().take(n_reject) {
        let mut neighbors = Vec::with_capacity(8);
        for dr in -1isize..=1 {
            for dc in -1isize..=1 {
                if dr == 0 && dc == 0 {
                    continue;
                }
                let nr = r as isize + dr;
                let nc = c as isize + dc;
                if nr >= 0 && nr < ty as isize && nc >= 0 && nc < tx as isize {
                    neighbors.push(original[[nr as usize, nc as usize]]);
                }
            }
        }
        if !neighbors.is_empty() {
            let mid = neighbors.len() / 2;
            let (_, median, _) = neighbors.select_nth_unstable_by(mid, |a, b| a.partial_cmp(b).unwrap());
            tiles[[r, c]] = *median;
        }
    }
}

/// Subtract the fitted background surface. Clamping negative residuals to
/// zero is intentionally not done here; the bad-pixel/stacking stages are
/// expected to tolerate small negative offsets from noise.
pub fn subtract(data: &Array2<f32>, model: &BackgroundModel) -> Array2<f32> {
    let surface = model.surface();
    data - &surface
}

/// Convenience: fit + subtract in one call, returning the flattened frame and
/// the model's global level at the frame mean (useful for logging).
pub fn flatten(data: &Array2<f32>, tile_size: usize, back_sigma: f32, reject_fraction: f64) -> (Array2<f32>, f32) {
    let model = BackgroundModel::fit(data, tile_size, back_sigma, reject_fraction);
    let flattened = subtract(data, &model);
    let level = basic(model.tiles.as_slice().unwrap_or(&[])).mean;
    (flattened, level.max(EPSILON))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_frame_has_near_zero_residual() {
        let data = Array2::<f32>::from_elem((64, 64), 100.0);
        let (flattened, _) = flatten(&data, 16, 1.5, 0.1);
        for &v in flattened.iter() {
            assert!(v.abs() < 1e-3);
        }
    }

    #[test]
    fn bright_star_tile_does_not_bias_neighbors() {
        let mut data = Array2::<f32>::from_elem((64, 64), 100.0);
        for r in 30..34 {
            for c in 30..34 {
                data[[r, c]] = 50_000.0;
            }
        }
        let model = BackgroundModel::fit(&data, 16, 1.5, 0.2);
        // A far tile should remain near the true background level.
        assert!((model.sample(4, 4) - 100.0).abs() < 50.0);
    }

    #[test]
    fn sample_matches_exact_tile_centers() {
        let data = Array2::<f32>::from_shape_fn((32, 32), |(r, c)| (r + c) as f32);
        let model = BackgroundModel::fit(&data, 8, 1.5, 0.0);
        let surf = model.surface();
        assert_eq!(surf.dim(), (32, 32));
    }

    #[test]
    fn back_sigma_excludes_bright_pixels_from_tile_location() {
        let mut data = Array2::<f32>::from_elem((16, 16), 100.0);
        for r in 6..10 {
            for c in 6..10 {
                data[[r, c]] = 10_000.0;
            }
        }
        let model = BackgroundModel::fit(&data, 16, 1.5, 0.0);
        assert!((model.sample(0, 0) - 100.0).abs() < 5.0);
    }
}
