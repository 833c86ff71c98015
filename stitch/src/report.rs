use pano_align::BundleOutcome;
use pano_features::{PairDiagnostic, PairOutcome};

use crate::state::StitchStage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionReason {
    /// The input buffer failed validation at ingest.
    InvalidBuffer,
    /// The image is too small for the descriptor window or has no keypoints.
    FeatureExtraction,
    /// No accepted pair links the image to any other image.
    NotConnected,
    /// Its transform folds the image behind the projective horizon.
    DegenerateWarp,
    /// Its panorama would exceed `max_canvas_pixels`.
    CanvasTooLarge,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Exclusion {
    pub index: usize,
    pub reason: ExclusionReason,
    pub detail: String,
}

impl Exclusion {
    pub fn new(index: usize, reason: ExclusionReason, detail: impl Into<String>) -> Self {
        Self {
            index,
            reason,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StitchStatus {
    /// Every input image is part of the primary panorama.
    Full,
    Partial,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefinementOutcome {
    Disabled,
    /// No model could be loaded.
    Unavailable(String),
    /// The model ran but returned an error; the composite is unrefined.
    Failed(String),
    TimedOut,
    Applied { model: String },
}

impl RefinementOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, RefinementOutcome::Applied { .. })
    }
}

/// Alignment result of one connected component.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentReport {
    pub indices: Vec<usize>,
    pub reference: usize,
    pub outcome: BundleOutcome,
    pub initial_rms: f64,
    pub final_rms: f64,
    pub iterations: usize,
    /// Exposure gain per entry of `indices` that reached the canvas.
    pub gains: Vec<(usize, f32)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StitchReport {
    pub status: StitchStatus,
    pub input_count: usize,
    /// Images of the primary composite, ascending.
    pub used: Vec<usize>,
    /// Sorted by image index. Images placed in an additional panorama are
    /// listed as `NotConnected` to the primary one.
    pub excluded: Vec<Exclusion>,
    pub pairs: Vec<PairDiagnostic>,
    /// Primary component first.
    pub components: Vec<ComponentReport>,
    pub refinement: RefinementOutcome,
    pub stages: Vec<StitchStage>,
}

impl StitchReport {
    pub fn accepted_pairs(&self) -> impl Iterator<Item = &PairDiagnostic> {
        self.pairs.iter().filter(|p| p.outcome == PairOutcome::Accepted)
    }

    pub fn exclusion(&self, index: usize) -> Option<&Exclusion> {
        self.excluded.iter().find(|e| e.index == index)
    }
}
