//! Global alignment of verified image pairs.
//!
//! Accepted pairs become weighted edges of a [`StitchGraph`]; every connected
//! component is one panorama with a reference image and initial transforms
//! chained along a maximum spanning tree. [`bundle_adjust`] then refines all
//! transforms of a component jointly over every inlier correspondence.

pub mod bundle_adjustment;
pub mod graph;

pub use bundle_adjustment::*;
pub use graph::*;

pub type Result<T> = std::result::Result<T, AlignError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AlignError {
    #[error("Image {0} is not a node of the stitch graph")]
    UnknownImage(usize),

    #[error("Transform between images {i} and {j} cannot be chained")]
    SingularTransform { i: usize, j: usize },

    #[error("Convergence failure: {0}")]
    ConvergenceFailure(String),
}
