/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Minimum frame count to use frame-level Rayon parallelism.
pub const PARALLEL_FRAME_THRESHOLD: usize = 4;

/// Small epsilon to avoid division by zero in floating-point comparisons.
pub const EPSILON: f32 = 1e-10;

/// Laplacian high-pass kernel used by the noise estimator.
pub const LAPLACIAN_KERNEL: [[f32; 3]; 3] = [[0.0, -1.0, 0.0], [-1.0, 4.0, -1.0], [0.0, -1.0, 0.0]];

/// Scale factor converting MAD of the Laplacian response to white-noise sigma.
pub const NOISE_LAPLACIAN_SCALE: f32 = 0.4082482905; // 1/sqrt(6)

/// Consistency constant turning MAD into a normal-equivalent sigma estimate.
pub const MAD_TO_SIGMA: f32 = 1.4826;

/// Consistency constant turning Qn into a normal-equivalent sigma estimate.
pub const QN_CONSTANT: f32 = 2.2219;

/// Cap on the sample drawn for mode-3 location/scale estimation.
pub const LOCATION_SCALE_SAMPLE_CAP: usize = 128_000;

/// Max iterations of the sigma-clipped sampled median/Qn estimator.
pub const LOCATION_SCALE_MAX_ITER: usize = 8;

/// Convergence threshold (fraction of retained-set change) for mode 3.
pub const LOCATION_SCALE_CONVERGENCE: f64 = 0.001;

/// Max iterations for sigma-clip / winsorized sigma-clip stacking.
pub const SIGMA_CLIP_MAX_ITER: usize = 5;

/// Max bisection iterations for adaptive sigma search.
pub const ADAPTIVE_SIGMA_MAX_ITER: usize = 8;

/// Fraction of pixels sampled for the adaptive sigma trial stack.
pub const ADAPTIVE_SIGMA_SAMPLE_FRACTION: f64 = 0.01;

/// Tolerance (fraction) the adaptive sigma search targets for rejection rate.
pub const ADAPTIVE_SIGMA_TOLERANCE: f64 = 0.0005;

/// Estimated working-set multiplier per frame (raw + calibrated + background + aligned + scratch).
pub const MEMORY_WORKINGSET_FACTOR: usize = 6;

/// Default top-K stars taken from each frame for triangle alignment.
pub const DEFAULT_ALIGN_K: usize = 20;

/// Nearest-neighbor match radius (px) used during alignment refinement.
pub const ALIGN_MATCH_RADIUS_PX: f32 = 2.0;

/// Minimum inlier count for an accepted alignment.
pub const ALIGN_MIN_INLIERS: usize = 3;
