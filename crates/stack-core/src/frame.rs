use ndarray::Array2;

/// A single calibration/light exposure.
///
/// Pixel data is row-major, shape `(height, width)`, single-precision float.
/// A `Frame` is exclusively owned by whichever pipeline stage currently holds
/// it; stages consume and replace it rather than aliasing the buffer, so it
/// can be dropped promptly once the stacker has read it.
#[derive(Clone, Debug)]
pub struct Frame {
    pub id: u64,
    pub data: Array2<f32>,
    pub header: FrameHeader,
    pub stats: Option<Stats>,
    pub stars: Option<StarList>,
    pub hfr: Option<f32>,
    pub transform: Option<SimilarityXform>,
}

impl Frame {
    pub fn new(id: u64, data: Array2<f32>, header: FrameHeader) -> Self {
        Self {
            id,
            data,
            header,
            stats: None,
            stars: None,
            hfr: None,
            transform: None,
        }
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }
}

/// Bayer color filter array phase, when the sensor mosaic is known.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CfaPattern {
    Rggb,
    Grbg,
    Gbrg,
    Bggr,
}

/// Single-channel extraction target for debayering a CFA frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DebayerChannel {
    R,
    G,
    B,
}

/// Per-frame metadata preserved/propagated from the loader collaborator.
#[derive(Clone, Debug, Default)]
pub struct FrameHeader {
    pub exposure_seconds: f64,
    pub timestamp_unix: f64,
    pub bayer_pattern: Option<CfaPattern>,
    pub xbinning: u32,
    pub ybinning: u32,
}

/// Robust per-frame statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct Stats {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    pub stddev: f32,
    pub location: f32,
    pub scale: f32,
    pub noise: f32,
    pub histogram_mode: Option<u32>,
    pub histogram_mode_value: Option<f32>,
}

/// A detected star candidate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Star {
    pub x: f32,
    pub y: f32,
    pub mass: f32,
    pub hfr: f32,
}

/// An ordered set of stars, descending by `mass`.
///
/// Invariant: coordinates lie in `[0,w) x [0,h)` and no two stars sit
/// within `star_radius` pixels of each other (non-maximum suppression
/// enforces this at construction time in [`crate::detect`]).
#[derive(Clone, Debug, Default)]
pub struct StarList(pub Vec<Star>);

impl StarList {
    pub fn median_hfr(&self) -> Option<f32> {
        if self.0.is_empty() {
            return None;
        }
        let mut hfrs: Vec<f32> = self.0.iter().map(|s| s.hfr).collect();
        let mid = hfrs.len() / 2;
        if hfrs.len() % 2 == 1 {
            Some(*hfrs.select_nth_unstable_by(mid, |a, b| a.partial_cmp(b).unwrap()).1)
        } else {
            let (_, upper, _) = hfrs.select_nth_unstable_by(mid, |a, b| a.partial_cmp(b).unwrap());
            let upper_val = *upper;
            let lower_val = hfrs[..mid].iter().copied().fold(f32::MIN, f32::max);
            Some((lower_val + upper_val) / 2.0)
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn top_k(&self, k: usize) -> &[Star] {
        &self.0[..self.0.len().min(k)]
    }
}

/// Rotation + uniform scale + translation mapping a frame onto the reference.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimilarityXform {
    pub scale: f32,
    pub rotation: f32,
    pub tx: f32,
    pub ty: f32,
    pub residual_px: f32,
    pub match_count: usize,
}

impl SimilarityXform {
    pub fn identity() -> Self {
        Self {
            scale: 1.0,
            rotation: 0.0,
            tx: 0.0,
            ty: 0.0,
            residual_px: 0.0,
            match_count: 0,
        }
    }

    /// Map a point from this frame's pixel space into the reference's.
    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        let (s, c) = self.rotation.sin_cos();
        let sx = self.scale * (c * x - s * y) + self.tx;
        let sy = self.scale * (s * x + c * y) + self.ty;
        (sx, sy)
    }

    /// The inverse mapping, used to resample a frame onto the reference grid.
    pub fn invert(&self) -> Self {
        let inv_scale = if self.scale.abs() > crate::consts::EPSILON {
            1.0 / self.scale
        } else {
            1.0
        };
        let (s, c) = self.rotation.sin_cos();
        // Inverse rotation is the transpose of the rotation matrix.
        let itx = -inv_scale * (c * self.tx + s * self.ty);
        let ity = -inv_scale * (-s * self.tx + c * self.ty);
        Self {
            scale: inv_scale,
            rotation: -self.rotation,
            tx: itx,
            ty: ity,
            residual_px: self.residual_px,
            match_count: self.match_count,
        }
    }
}

/// A calibration exposure (dark or flat). Same shape invariant as `Frame`.
#[derive(Clone, Debug)]
pub struct CalibrationFrame {
    pub data: Array2<f32>,
}

impl CalibrationFrame {
    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }
}

/// Final combined result of a stacking run.
#[derive(Clone, Debug)]
pub struct StackResult {
    pub pixels: Array2<f32>,
    pub stats: Stats,
    pub stars: Option<StarList>,
    pub hfr: Option<f32>,
    pub frames_combined: usize,
    pub sig_low: f32,
    pub sig_high: f32,
}

impl StackResult {
    pub fn width(&self) -> usize {
        self.pixels.ncols()
    }

    pub fn height(&self) -> usize {
        self.pixels.nrows()
    }
}
