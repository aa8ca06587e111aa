//! PNG egress for preview and final outputs. The stacking pipeline's
//! canonical output is [`super::fits`]; this is the human-viewable side
//! channel.

use std::path::Path;

use image::{ImageBuffer, Luma, Rgb};
use ndarray::Array2;

use crate::error::{Result, StackError};

fn to_u16(value: f32, black: f32, white: f32) -> u16 {
    let span = (white - black).max(crate::consts::EPSILON);
    (((value - black) / span).clamp(0.0, 1.0) * u16::MAX as f32) as u16
}

/// Save a mono stack result as a 16-bit PNG, stretched linearly across
/// `[black, white]`.
pub fn save_png_mono(path: &Path, data: &Array2<f32>, black: f32, white: f32) -> Result<()> {
    let (h, w) = data.dim();
    let mut buf: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::new(w as u32, h as u32);
    for (x, y, pixel) in buf.enumerate_pixels_mut() {
        let v = data[[y as usize, x as usize]];
        *pixel = Luma([to_u16(v, black, white)]);
    }
    buf.save(path).map_err(StackError::Image)
}

/// Save three pre-stacked channels as a 16-bit RGB PNG.
pub fn save_png_rgb(path: &Path, channels: &[Array2<f32>; 3], black: f32, white: f32) -> Result<()> {
    let (h, w) = channels[0].dim();
    for c in channels.iter() {
        if c.dim() != (h, w) {
            return Err(StackError::DimensionMismatch {
                what: "rgb channel".to_string(),
                got_w: c.ncols(),
                got_h: c.nrows(),
                want_w: w,
                want_h: h,
            });
        }
    }

    let mut buf: ImageBuffer<Rgb<u16>, Vec<u16>> = ImageBuffer::new(w as u32, h as u32);
    for (x, y, pixel) in buf.enumerate_pixels_mut() {
        let r = to_u16(channels[0][[y as usize, x as usize]], black, white);
        let g = to_u16(channels[1][[y as usize, x as usize]], black, white);
        let b = to_u16(channels[2][[y as usize, x as usize]], black, white);
        *pixel = Rgb([r, g, b]);
    }
    buf.save(path).map_err(StackError::Image)
}

/// Save a histogram as a simple bar-chart PNG (used by the `stats` command).
pub fn save_histogram_png(path: &Path, counts: &[u64], width: u32, height: u32) -> Result<()> {
    let mut buf: ImageBuffer<Luma<u8>, Vec<u8>> = ImageBuffer::new(width, height);
    let max_count = counts.iter().copied().max().unwrap_or(1).max(1);
    let bin_width = (width as usize / counts.len().max(1)).max(1) as u32;

    for (i, &count) in counts.iter().enumerate() {
        let bar_height = ((count as f64 / max_count as f64) * height as f64) as u32;
        let x0 = (i as u32) * bin_width;
        for x in x0..(x0 + bin_width).min(width) {
            for y in (height - bar_height)..height {
                buf.put_pixel(x, y, Luma([255]));
            }
        }
    }
    buf.save(path).map_err(StackError::Image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_png_mono_writes_a_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.png");
        let data = Array2::<f32>::from_shape_fn((8, 8), |(r, c)| (r + c) as f32);
        save_png_mono(&path, &data, 0.0, 14.0).unwrap();
        assert!(path.exists());
    }
}
