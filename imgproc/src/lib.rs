//! Pixel-level helpers for the panorama pipeline: grayscale conversion,
//! Gaussian blur and Sobel gradients, resizing and pyramids, RGBA sampling
//! and warping, mask morphology, and seeded synthetic scenes for tests.
//!
//! Every operation is total; degenerate sizes produce empty outputs.

pub mod color;
pub mod convolve;
pub mod geometry;
pub mod morph;
pub mod resize;
pub mod synthetic;

pub use color::*;
pub use convolve::*;
pub use geometry::*;
pub use morph::*;
pub use resize::*;
