//! Neural refinement of panorama composites
//!
//! This crate fills the uncovered border of a composite with an inpainting
//! network run through the ONNX Runtime, or with the model-free
//! [`TeleaInpainter`]. Both sit behind the [`Inference`] trait so the pipeline
//! never depends on a concrete runtime.

use image::RgbaImage;

pub mod blob;
pub mod inpaint;
pub mod mask;
pub mod telea;

pub use blob::*;
pub use inpaint::*;
pub use mask::*;
pub use telea::{fast_march_inpaint, TeleaInpainter, DEFAULT_INPAINT_RADIUS};

pub type Result<T> = std::result::Result<T, DnnError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DnnError {
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("ONNX Runtime error: {0}")]
    OrtError(String),

    #[error("Invalid model output: {0}")]
    InvalidOutput(String),
}

/// A pure image-to-image model. Implementations must not mutate weights.
pub trait Inference: Send + Sync {
    fn name(&self) -> &str;

    fn infer(&self, image: &RgbaImage) -> Result<RgbaImage>;
}
