//! End-to-end panorama stitching.
//!
//! [`Stitcher`] drives the stages in order: ingest, feature extraction,
//! pairwise matching, graph construction, bundle adjustment, compositing and
//! optional neural refinement. Data problems in single images or pairs are
//! recorded in the [`StitchReport`] and never abort the run; only the absence
//! of any connectable pair does.
//!
//! # Example
//!
//! ```no_run
//! # use pano_core::RawImage;
//! # use pano_stitch::{StitchConfig, Stitcher};
//! # fn run(images: Vec<RawImage>) -> pano_stitch::Result<()> {
//! let output = Stitcher::new(StitchConfig::default().with_seed(7))?.stitch(images)?;
//! println!("{:?}: {} images", output.report.status, output.composite.indices.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod observer;
pub mod pipeline;
pub mod report;
pub mod state;

pub use config::{RefinementModel, StitchConfig, DEFAULT_WORK_PIXELS};
pub use observer::{NoopObserver, StitchObserver};
pub use pipeline::{StitchOutput, Stitcher};
pub use report::{
    ComponentReport, Exclusion, ExclusionReason, RefinementOutcome, StitchReport, StitchStatus,
};
pub use state::{StageMachine, StitchStage};

pub type Result<T> = std::result::Result<T, StitchError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StitchError {
    #[error("No panorama could be formed; {} image(s) excluded", .excluded.len())]
    NoValidPanorama { excluded: Vec<Exclusion> },

    #[error("Stitching was cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Illegal stage transition {from:?} -> {to:?}")]
    IllegalTransition { from: StitchStage, to: StitchStage },

    #[error("Alignment error: {0}")]
    Alignment(#[from] pano_align::AlignError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] pano_runtime::Error),
}
