//! Minimal FITS-like ingress/egress. Headers are the 2880-byte,
//! 80-character-card ASCII blocks defined by the FITS standard; we read only
//! the keywords the pipeline cares about and ignore the rest.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use memmap2::Mmap;
use ndarray::Array2;

use crate::error::{Result, StackError};
use crate::frame::{CfaPattern, Frame, FrameHeader};

const BLOCK_SIZE: usize = 2880;
const CARD_SIZE: usize = 80;

#[derive(Default)]
struct RawHeader {
    cards: HashMap<String, String>,
}

impl RawHeader {
    fn get(&self, key: &str) -> Option<&str> {
        self.cards.get(key).map(|s| s.as_str())
    }

    fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key)?.trim().parse().ok()
    }

    fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key)?.trim().parse().ok()
    }
}

fn parse_card(card: &[u8]) -> Option<(String, String)> {
    let text = String::from_utf8_lossy(card);
    let (key, rest) = text.split_at(text.find('=').unwrap_or(8).min(8));
    let key = key.trim().to_string();
    if key.is_empty() || key == "COMMENT" || key == "HISTORY" {
        return None;
    }
    let value_part = rest.trim_start_matches('=').trim();
    let value = if let Some(stripped) = value_part.strip_prefix('\'') {
        stripped.split('\'').next().unwrap_or("").trim().to_string()
    } else {
        value_part.split('/').next().unwrap_or("").trim().to_string()
    };
    Some((key, value))
}

fn read_header<R: Read>(reader: &mut R) -> Result<RawHeader> {
    let mut header = RawHeader::default();
    loop {
        let mut block = [0u8; BLOCK_SIZE];
        reader.read_exact(&mut block).map_err(StackError::Io)?;
        let mut ended = false;
        for card in block.chunks(CARD_SIZE) {
            let keyword = String::from_utf8_lossy(&card[0..8.min(card.len())]);
            if keyword.trim() == "END" {
                ended = true;
                continue;
            }
            if let Some((k, v)) = parse_card(card) {
                header.cards.insert(k, v);
            }
        }
        if ended {
            break;
        }
    }
    Ok(header)
}

fn skip_padding<R: Read>(reader: &mut R, data_bytes: usize) -> Result<()> {
    let remainder = data_bytes % BLOCK_SIZE;
    if remainder != 0 {
        let pad = BLOCK_SIZE - remainder;
        let mut buf = vec![0u8; pad];
        reader.read_exact(&mut buf).map_err(StackError::Io)?;
    }
    Ok(())
}

fn normalize_sample(raw: f64, bzero: f64, bscale: f64) -> f32 {
    (raw * bscale + bzero) as f32
}

fn read_plane<R: Read>(reader: &mut R, bitpix: i64, count: usize, bzero: f64, bscale: f64) -> Result<Vec<f32>> {
    let mut out = Vec::with_capacity(count);
    match bitpix {
        8 => {
            for _ in 0..count {
                let v = reader.read_u8().map_err(StackError::Io)?;
                out.push(normalize_sample(v as f64, bzero, bscale));
            }
        }
        16 => {
            for _ in 0..count {
                let v = reader.read_i16::<BigEndian>().map_err(StackError::Io)?;
                out.push(normalize_sample(v as f64, bzero, bscale));
            }
        }
        32 => {
            for _ in 0..count {
                let v = reader.read_i32::<BigEndian>().map_err(StackError::Io)?;
                out.push(normalize_sample(v as f64, bzero, bscale));
            }
        }
        -32 => {
            for _ in 0..count {
                let v = reader.read_f32::<BigEndian>().map_err(StackError::Io)?;
                out.push(normalize_sample(v as f64, bzero, bscale));
            }
        }
        -64 => {
            for _ in 0..count {
                let v = reader.read_f64::<BigEndian>().map_err(StackError::Io)?;
                out.push(normalize_sample(v, bzero, bscale));
            }
        }
        other => {
            return Err(StackError::Format(format!("unsupported BITPIX {other}")));
        }
    }
    Ok(out)
}

fn parse_bayer_pattern(raw: &str) -> Option<CfaPattern> {
    match raw.to_ascii_uppercase().as_str() {
        "RGGB" => Some(CfaPattern::Rggb),
        "GRBG" => Some(CfaPattern::Grbg),
        "GBRG" => Some(CfaPattern::Gbrg),
        "BGGR" => Some(CfaPattern::Bggr),
        _ => None,
    }
}

/// Load a single-plane (NAXIS=2) or channel-major (NAXIS=3) FITS-like image,
/// normalizing every sample to `f32` via `value*BSCALE + BZERO`.
///
/// For NAXIS=3, only the first channel plane is returned as the working
/// `Frame`; callers needing all channels should use [`load_fits_channels`].
pub fn load_fits(path: &Path, frame_id: u64) -> Result<Frame> {
    let file = File::open(path).map_err(StackError::Io)?;
    // SAFETY: the file is not expected to be mutated by another process
    // while the pipeline holds it open; mmap avoids copying large frames
    // through an intermediate buffer before they're parsed into place.
    let mmap = unsafe { Mmap::map(&file) }.map_err(StackError::Io)?;
    let mut reader = Cursor::new(&mmap[..]);
    let header = read_header(&mut reader)?;

    let bitpix = header.get_i64("BITPIX").ok_or_else(|| StackError::Format("missing BITPIX".into()))?;
    let naxis = header.get_i64("NAXIS").ok_or_else(|| StackError::Format("missing NAXIS".into()))?;
    let naxis1 = header.get_i64("NAXIS1").ok_or_else(|| StackError::Format("missing NAXIS1".into()))? as usize;
    let naxis2 = header.get_i64("NAXIS2").ok_or_else(|| StackError::Format("missing NAXIS2".into()))? as usize;
    let naxis3 = if naxis >= 3 { header.get_i64("NAXIS3").unwrap_or(1) as usize } else { 1 };

    let bzero = header.get_f64("BZERO").unwrap_or(0.0);
    let bscale = header.get_f64("BSCALE").unwrap_or(1.0);

    let plane_count = naxis1 * naxis2;
    let total_count = plane_count * naxis3;
    let bytes_per_sample = bitpix.unsigned_abs() as usize / 8;

    let all = read_plane(&mut reader, bitpix, total_count, bzero, bscale)?;
    skip_padding(&mut reader, total_count * bytes_per_sample)?;

    let plane = &all[..plane_count];
    let data = Array2::from_shape_vec((naxis2, naxis1), plane.to_vec())
        .map_err(|e| StackError::Format(format!("reshape failed: {e}")))?;

    let frame_header = FrameHeader {
        exposure_seconds: header.get_f64("EXPTIME").unwrap_or(0.0),
        timestamp_unix: 0.0,
        bayer_pattern: header.get("BAYERPAT").and_then(parse_bayer_pattern),
        xbinning: header.get_i64("XBINNING").unwrap_or(1) as u32,
        ybinning: header.get_i64("YBINNING").unwrap_or(1) as u32,
    };

    Ok(Frame::new(frame_id, data, frame_header))
}

fn write_card<W: Write>(writer: &mut W, keyword: &str, value: &str) -> Result<()> {
    let card = format!("{:<8}= {:<70}", keyword, value);
    let mut bytes = card.into_bytes();
    bytes.truncate(CARD_SIZE);
    bytes.resize(CARD_SIZE, b' ');
    writer.write_all(&bytes).map_err(StackError::Io)
}

fn write_header<W: Write>(writer: &mut W, width: usize, height: usize, channels: Option<usize>) -> Result<()> {
    let mut cards = Vec::new();
    cards.push(("SIMPLE".to_string(), "T".to_string()));
    cards.push(("BITPIX".to_string(), "-32".to_string()));
    match channels {
        Some(n) => {
            cards.push(("NAXIS".to_string(), "3".to_string()));
            cards.push(("NAXIS1".to_string(), width.to_string()));
            cards.push(("NAXIS2".to_string(), height.to_string()));
            cards.push(("NAXIS3".to_string(), n.to_string()));
        }
        None => {
            cards.push(("NAXIS".to_string(), "2".to_string()));
            cards.push(("NAXIS1".to_string(), width.to_string()));
            cards.push(("NAXIS2".to_string(), height.to_string()));
        }
    }
    cards.push(("BZERO".to_string(), "0".to_string()));
    cards.push(("BSCALE".to_string(), "1".to_string()));

    let mut written = 0usize;
    for (k, v) in &cards {
        write_card(writer, k, v)?;
        written += CARD_SIZE;
    }
    let end_card = format!("{:<80}", "END");
    writer.write_all(end_card.as_bytes()).map_err(StackError::Io)?;
    written += CARD_SIZE;

    let remainder = written % BLOCK_SIZE;
    if remainder != 0 {
        let pad = BLOCK_SIZE - remainder;
        writer.write_all(&vec![b' '; pad]).map_err(StackError::Io)?;
    }
    Ok(())
}

/// Write a 32-bit float, single-plane (mono) FITS-like image.
pub fn save_fits(path: &Path, data: &Array2<f32>) -> Result<()> {
    let (h, w) = data.dim();
    let file = File::create(path).map_err(StackError::Io)?;
    let mut writer = std::io::BufWriter::new(file);
    write_header(&mut writer, w, h, None)?;

    for &v in data.iter() {
        writer.write_f32::<BigEndian>(v).map_err(StackError::Io)?;
    }
    let data_bytes = h * w * 4;
    let remainder = data_bytes % BLOCK_SIZE;
    if remainder != 0 {
        let pad = BLOCK_SIZE - remainder;
        writer.write_all(&vec![0u8; pad]).map_err(StackError::Io)?;
    }
    Ok(())
}

/// Write a 3-channel, channel-major 32-bit float FITS-like RGB image.
pub fn save_fits_rgb(path: &Path, channels: &[Array2<f32>; 3]) -> Result<()> {
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

    let file = File::create(path).map_err(StackError::Io)?;
    let mut writer = std::io::BufWriter::new(file);
    write_header(&mut writer, w, h, Some(3))?;

    for channel in channels {
        for &v in channel.iter() {
            writer.write_f32::<BigEndian>(v).map_err(StackError::Io)?;
        }
    }
    let data_bytes = h * w * 4 * 3;
    let remainder = data_bytes % BLOCK_SIZE;
    if remainder != 0 {
        let pad = BLOCK_SIZE - remainder;
        writer.write_all(&vec![0u8; pad]).map_err(StackError::Io)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_a_mono_image() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.fits");
        let data = Array2::<f32>::from_shape_fn((16, 16), |(r, c)| (r * 16 + c) as f32);
        save_fits(&path, &data).unwrap();

        let loaded = load_fits(&path, 1).unwrap();
        assert_eq!(loaded.width(), 16);
        assert_eq!(loaded.height(), 16);
        for (a, b) in loaded.data.iter().zip(data.iter()) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn parses_bayer_pattern_card() {
        assert_eq!(parse_bayer_pattern("RGGB"), Some(CfaPattern::Rggb));
        assert_eq!(parse_bayer_pattern("unknown"), None);
    }
}
