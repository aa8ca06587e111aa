use thiserror::Error;

/// Error taxonomy for the stacking engine.
///
/// `Io`/`Format`/`NoStars`/`AlignmentFailed` are fatal only for primary
/// outputs; elsewhere they drop the offending frame and the batch continues
/// (see [`crate::batch::FrameOutcome`]).
#[derive(Error, Debug)]
pub enum StackError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame header or data: {0}")]
    Format(String),

    #[error("dimension mismatch: {what} is {got_w}x{got_h}, expected {want_w}x{want_h}")]
    DimensionMismatch {
        what: String,
        got_w: usize,
        got_h: usize,
        want_w: usize,
        want_h: usize,
    },

    #[error("no stars detected in frame {frame_id}")]
    NoStars { frame_id: u64 },

    #[error("alignment failed for frame {frame_id}: residual={residual_px:.3}px inliers={inliers}")]
    AlignmentFailed {
        frame_id: u64,
        residual_px: f32,
        inliers: usize,
    },

    #[error("no usable reference frame: {0}")]
    NoReference(String),

    #[error("memory budget too small to fit a single frame: {0}")]
    MemoryBudget(String),

    #[error("all frames were dropped from the stack")]
    StackEmpty,

    #[error("numerically degenerate input: {0}")]
    NumericDegenerate(String),

    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, StackError>;
