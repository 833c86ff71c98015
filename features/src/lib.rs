//! Feature extraction, descriptor matching and pairwise geometric verification.

pub mod descriptor;
pub mod fast;
pub mod harris;
pub mod matcher;
pub mod orb;
pub mod pairwise;
pub mod ransac;

pub use descriptor::{extract_image_features, DescriptorExtractor};
pub use fast::{fast_detect, fast_score};
pub use harris::HarrisScorer;
pub use matcher::Matcher;
pub use orb::Orb;
pub use pairwise::{
    candidate_pairs, match_pair, match_pairs, pair_seed, MatchingStrategy, PairDiagnostic,
    PairGeometry, PairOutcome, PairResult, PairwiseConfig,
};
pub use ransac::{
    estimate_transform, fit_homography, fit_similarity, HomographyEstimator, SimilarityEstimator,
};

use pano_core::{Descriptors, KeyPoints};

pub type Result<T> = std::result::Result<T, FeatureError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FeatureError {
    #[error("Image of {width}x{height} is smaller than the {min_size}px descriptor window")]
    ImageTooSmall {
        width: u32,
        height: u32,
        min_size: u32,
    },

    #[error("No keypoints detected")]
    NoKeypoints,

    #[error("Detection error: {0}")]
    DetectionError(String),
}

/// Keypoints and descriptors of one image, in full-resolution coordinates.
///
/// `keypoints` and `descriptors` are parallel: descriptor `k` belongs to keypoint `k`.
#[derive(Debug, Clone)]
pub struct ImageFeatures {
    pub image_index: usize,
    pub width: u32,
    pub height: u32,
    pub keypoints: KeyPoints,
    pub descriptors: Descriptors,
}

impl ImageFeatures {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}
