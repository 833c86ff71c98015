//! Canvas compositing of aligned images.
//!
//! # Algorithms
//!
//! - **Canvas fitting**: integer bounding box of every warped image
//! - **Warping**: inverse-mapped bilinear resampling into per-image layers
//! - **Gain compensation**: Brown–Lowe per-image exposure gains
//! - **Blending**: feathered or hard-seam compositing with normalised weights
//!
//! # Example
//!
//! ```no_run
//! # use pano_photo::{Compositor, CompositorConfig, Placement};
//! # fn run(placements: &[Placement<'_>]) -> pano_photo::Result<()> {
//! let composition = Compositor::new(CompositorConfig::default()).compose(placements)?;
//! println!("{}x{}", composition.composite.image.width(), composition.composite.image.height());
//! # Ok(())
//! # }
//! ```

pub mod blend;
pub mod canvas;
pub mod compositor;
pub mod gain;
pub mod warp;

pub use blend::*;
pub use canvas::*;
pub use compositor::*;
pub use gain::*;
pub use warp::*;

pub type Result<T> = std::result::Result<T, PhotoError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PhotoError {
    #[error("Canvas of {width}x{height} exceeds the limit of {limit} pixels")]
    CanvasTooLarge { width: u64, height: u64, limit: u64 },

    #[error("Image {0} warps behind the projective horizon")]
    DegenerateWarp(usize),

    #[error("No image could be placed on the canvas")]
    EmptyCanvas,
}
