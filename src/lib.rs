pub use pano_align as align;
pub use pano_core as core;
pub use pano_dnn as dnn;
pub use pano_features as features;
pub use pano_imgproc as imgproc;
pub use pano_photo as photo;
pub use pano_runtime as runtime;
pub use pano_stitch as stitch;

pub use pano_core::{PixelFormat, RawImage};
pub use pano_stitch::{RefinementModel, StitchConfig, StitchError, StitchOutput, StitchReport, Stitcher};

/// Initialize a single global Rayon thread pool for all CPU-parallel routines.
///
/// Call this once at application startup before stitching.
/// Repeated calls are idempotent and return the first initialization result.
///
/// Priority order:
/// 1. explicit `num_threads`
/// 2. `PANO_CPU_THREADS` env var
/// 3. Rayon default
pub fn init_thread_pool(num_threads: Option<usize>) -> Result<(), String> {
    pano_core::init_global_thread_pool(num_threads).map_err(|e| e.to_string())
}

/// Stitches `images` with `config` and no refiner, observer or cancellation.
pub fn stitch(images: Vec<RawImage>, config: StitchConfig) -> pano_stitch::Result<StitchOutput> {
    Stitcher::new(config)?.stitch(images)
}
