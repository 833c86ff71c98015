use crate::state::StitchStage;

/// Receives stage changes and per-stage progress from a running [`Stitcher`].
///
/// Progress during extraction is reported from worker threads, so callbacks
/// should return quickly.
///
/// [`Stitcher`]: crate::Stitcher
pub trait StitchObserver: Send + Sync {
    fn on_stage(&self, _stage: StitchStage) {}

    /// `done` of `total` work items of `stage` have finished.
    fn on_progress(&self, _stage: StitchStage, _done: usize, _total: usize) {}
}

pub struct NoopObserver;

impl StitchObserver for NoopObserver {}
