//! Core data model shared by every stage of the panorama pipeline.
//!
//! Images enter through [`ImageStore::ingest`], keypoints and descriptors are
//! attached per image, pairwise correspondences become [`Transform`]s, and the
//! generic [`robust::Ransac`] engine estimates those transforms.

pub mod descriptor;
pub mod geometry;
pub mod image;
pub mod keypoint;
pub mod robust;
pub mod runtime;
pub mod store;

pub use self::descriptor::{Descriptor, Descriptors, DESCRIPTOR_BITS, DESCRIPTOR_BYTES};
pub use self::geometry::{
    hartley_normalization, normalize_homography, project_point, Correspondence, Transform,
    TransformKind,
};
pub use self::image::{ColorSpace, Image, PixelFormat, RawImage};
pub use self::keypoint::{FeatureMatch, KeyPoint, KeyPoints, Matches};
pub use self::robust::{Ransac, RobustConfig, RobustModel, RobustResult};
pub use self::runtime::{init_global_thread_pool, read_cpu_threads_from_env, BufferPool, CPU_THREADS_ENV};
pub use self::store::{ImageStore, RejectedImage};

pub use ::image::{GrayImage, RgbaImage};

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid image dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Buffer length mismatch: expected {expected} bytes, got {actual}")]
    BufferLength { expected: usize, actual: usize },

    #[error("Image of {width}x{height} overflows the addressable buffer size")]
    BufferOverflow { width: u32, height: u32 },

    #[error("Thread pool error: {0}")]
    ThreadPool(String),
}
