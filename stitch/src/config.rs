use std::path::PathBuf;
use std::time::Duration;

use pano_align::BundleAdjustmentConfig;
use pano_core::{RobustConfig, TransformKind};
use pano_dnn::DEFAULT_INPAINT_RADIUS;
use pano_features::{MatchingStrategy, Orb, PairwiseConfig};
use pano_photo::{BlendMode, CompositorConfig, DEFAULT_MAX_CANVAS_PIXELS};

use crate::{Result, StitchError};

/// 700 x 700 working pixels for feature detection.
pub const DEFAULT_WORK_PIXELS: u64 = 490_000;

/// Completer used to fill the uncovered border when refinement is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefinementModel {
    /// ONNX inpainting network loaded from `model_path`.
    #[default]
    Onnx,
    /// Fast marching inpainting; needs no model file.
    Telea { radius: u32 },
}

#[derive(Debug, Clone)]
pub struct StitchConfig {
    pub max_keypoints_per_image: usize,
    /// Lowe ratio: a match is kept when `best < ratio * second`.
    pub match_ratio_threshold: f32,
    /// Inlier reprojection threshold in pixels.
    pub ransac_threshold: f64,
    /// Inclusive: a pair with exactly this many inliers still forms an edge.
    pub min_inliers_per_pair: usize,
    pub enable_neural_refinement: bool,
    pub model_path: Option<PathBuf>,
    pub refinement_model: RefinementModel,
    pub seed: u64,
    pub transform_kind: TransformKind,
    pub matching: MatchingStrategy,
    pub cross_check: bool,
    pub min_matches_per_pair: usize,
    pub ransac_max_iterations: usize,
    pub ransac_confidence: f64,
    pub pyramid_levels: u32,
    pub work_pixels: u64,
    pub bundle_adjustment: BundleAdjustmentConfig,
    pub blend_mode: BlendMode,
    pub gain_compensation: bool,
    pub max_canvas_pixels: u64,
    pub refinement_timeout: Duration,
    /// Worker threads; `None` falls back to `PANO_CPU_THREADS`, then to the core count.
    pub num_threads: Option<usize>,
    pub pin_threads: bool,
}

impl Default for StitchConfig {
    fn default() -> Self {
        Self {
            max_keypoints_per_image: 500,
            match_ratio_threshold: 0.7,
            ransac_threshold: 3.0,
            min_inliers_per_pair: 16,
            enable_neural_refinement: false,
            model_path: None,
            refinement_model: RefinementModel::Onnx,
            seed: 0,
            transform_kind: TransformKind::Homography,
            matching: MatchingStrategy::Exhaustive,
            cross_check: false,
            min_matches_per_pair: 20,
            ransac_max_iterations: 2000,
            ransac_confidence: 0.995,
            pyramid_levels: 3,
            work_pixels: DEFAULT_WORK_PIXELS,
            bundle_adjustment: BundleAdjustmentConfig::default(),
            blend_mode: BlendMode::Feather,
            gain_compensation: true,
            max_canvas_pixels: DEFAULT_MAX_CANVAS_PIXELS,
            refinement_timeout: Duration::from_secs(30),
            num_threads: None,
            pin_threads: false,
        }
    }
}

impl StitchConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_transform_kind(mut self, kind: TransformKind) -> Self {
        self.transform_kind = kind;
        self
    }

    pub fn with_matching(mut self, matching: MatchingStrategy) -> Self {
        self.matching = matching;
        self
    }

    pub fn with_max_keypoints(mut self, n: usize) -> Self {
        self.max_keypoints_per_image = n;
        self
    }

    pub fn with_neural_refinement(mut self, model_path: impl Into<PathBuf>) -> Self {
        self.enable_neural_refinement = true;
        self.model_path = Some(model_path.into());
        self.refinement_model = RefinementModel::Onnx;
        self
    }

    pub fn with_telea_refinement(mut self) -> Self {
        self.enable_neural_refinement = true;
        self.refinement_model = RefinementModel::Telea {
            radius: DEFAULT_INPAINT_RADIUS,
        };
        self
    }

    pub fn with_blend_mode(mut self, mode: BlendMode) -> Self {
        self.blend_mode = mode;
        self
    }

    pub fn with_num_threads(mut self, n: usize) -> Self {
        self.num_threads = Some(n);
        self
    }

    pub fn with_refinement_timeout(mut self, timeout: Duration) -> Self {
        self.refinement_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| -> Result<()> { Err(StitchError::InvalidConfig(msg)) };

        if self.max_keypoints_per_image == 0 {
            return invalid("max_keypoints_per_image must be >= 1".into());
        }
        if !(self.match_ratio_threshold > 0.0 && self.match_ratio_threshold <= 1.0) {
            return invalid(format!(
                "match_ratio_threshold must be in (0, 1], got {}",
                self.match_ratio_threshold
            ));
        }
        if !(self.ransac_threshold.is_finite() && self.ransac_threshold > 0.0) {
            return invalid(format!("ransac_threshold must be > 0, got {}", self.ransac_threshold));
        }
        let min_samples = self.transform_kind.min_samples();
        if self.min_inliers_per_pair < min_samples {
            return invalid(format!(
                "min_inliers_per_pair must be >= {min_samples} for {:?}",
                self.transform_kind
            ));
        }
        if self.ransac_max_iterations == 0 {
            return invalid("ransac_max_iterations must be >= 1".into());
        }
        if !(self.ransac_confidence > 0.0 && self.ransac_confidence < 1.0) {
            return invalid(format!(
                "ransac_confidence must be in (0, 1), got {}",
                self.ransac_confidence
            ));
        }
        if self.pyramid_levels == 0 {
            return invalid("pyramid_levels must be >= 1".into());
        }
        if self.work_pixels == 0 || self.max_canvas_pixels == 0 {
            return invalid("work_pixels and max_canvas_pixels must be >= 1".into());
        }
        if let MatchingStrategy::Sequential { window: 0 } = self.matching {
            return invalid("sequential matching window must be >= 1".into());
        }
        if self.num_threads == Some(0) {
            return invalid("num_threads must be >= 1".into());
        }
        if let RefinementModel::Telea { radius: 0 } = self.refinement_model {
            return invalid("inpainting radius must be >= 1".into());
        }
        if self.refinement_timeout.is_zero() {
            return invalid("refinement_timeout must be > 0".into());
        }
        let ba = &self.bundle_adjustment;
        if !(ba.tolerance.is_finite() && ba.tolerance >= 0.0 && ba.initial_lambda > 0.0) {
            return invalid("bundle adjustment tolerance and lambda must be finite and non-negative".into());
        }
        Ok(())
    }

    pub(crate) fn extractor(&self) -> Orb {
        Orb::new()
            .with_n_features(self.max_keypoints_per_image)
            .with_n_levels(self.pyramid_levels)
    }

    pub(crate) fn pairwise(&self) -> PairwiseConfig {
        PairwiseConfig {
            ratio_threshold: self.match_ratio_threshold,
            cross_check: self.cross_check,
            min_matches: self.min_matches_per_pair,
            min_inliers: self.min_inliers_per_pair,
            kind: self.transform_kind,
            ransac: RobustConfig::default()
                .with_threshold(self.ransac_threshold)
                .with_max_iterations(self.ransac_max_iterations)
                .with_confidence(self.ransac_confidence)
                .with_seed(self.seed),
        }
    }

    pub(crate) fn compositor(&self) -> CompositorConfig {
        CompositorConfig::default()
            .with_blend_mode(self.blend_mode)
            .with_gain_compensation(self.gain_compensation)
            .with_max_canvas_pixels(self.max_canvas_pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(StitchConfig::default().validate().is_ok());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let bad = [
            StitchConfig {
                match_ratio_threshold: 0.0,
                ..Default::default()
            },
            StitchConfig {
                ransac_threshold: f64::NAN,
                ..Default::default()
            },
            StitchConfig {
                min_inliers_per_pair: 3,
                ..Default::default()
            },
            StitchConfig {
                num_threads: Some(0),
                ..Default::default()
            },
            StitchConfig {
                matching: MatchingStrategy::Sequential { window: 0 },
                ..Default::default()
            },
            StitchConfig {
                refinement_model: RefinementModel::Telea { radius: 0 },
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(StitchError::InvalidConfig(_))));
        }
    }

    #[test]
    fn refinement_builders_pick_the_completer() {
        let onnx = StitchConfig::default().with_neural_refinement("lama.onnx");
        assert!(onnx.enable_neural_refinement);
        assert_eq!(onnx.refinement_model, RefinementModel::Onnx);

        let telea = onnx.with_telea_refinement();
        assert!(telea.enable_neural_refinement);
        assert_eq!(telea.refinement_model, RefinementModel::Telea { radius: 3 });
        assert!(telea.validate().is_ok());
    }

    #[test]
    fn similarity_allows_fewer_inliers() {
        let config = StitchConfig {
            min_inliers_per_pair: 3,
            ..Default::default()
        }
        .with_transform_kind(TransformKind::Similarity);
        assert!(config.validate().is_ok());
    }
}
