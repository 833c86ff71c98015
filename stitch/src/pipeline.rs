use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pano_align::{bundle_adjust_all, GraphNode, StitchGraph};
use pano_core::{ImageStore, RawImage};
use pano_dnn::{Inference, OnnxInpainter, TeleaInpainter};
use pano_features::{candidate_pairs, extract_image_features, match_pairs, ImageFeatures, PairGeometry};
use pano_photo::{Composite, Compositor, PhotoError, Placement};
use pano_runtime::{available_cores, run_with_deadline, scheduler, CancellationToken, DeadlineOutcome, ResourceGroup};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{RefinementModel, StitchConfig};
use crate::observer::{NoopObserver, StitchObserver};
use crate::report::{ComponentReport, Exclusion, ExclusionReason, RefinementOutcome, StitchReport, StitchStatus};
use crate::state::{StageMachine, StitchStage};
use crate::{Result, StitchError};

const WORKER_GROUP: &str = "stitch";

#[derive(Debug, Clone)]
pub struct StitchOutput {
    /// The panorama with the most images; ties go to the lowest image index.
    pub composite: Composite,
    /// Further independent panoramas, ordered by their lowest image index.
    pub additional: Vec<Composite>,
    pub report: StitchReport,
}

pub struct Stitcher {
    config: StitchConfig,
    refiner: Option<Arc<dyn Inference>>,
    observer: Arc<dyn StitchObserver>,
    token: CancellationToken,
}

/// A composed component together with its alignment report.
struct Panorama {
    composite: Composite,
    report: ComponentReport,
}

impl Stitcher {
    pub fn new(config: StitchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            refiner: None,
            observer: Arc::new(NoopObserver),
            token: CancellationToken::new(),
        })
    }

    /// Uses `refiner` instead of the configured completer when refinement is enabled.
    pub fn with_refiner(mut self, refiner: Arc<dyn Inference>) -> Self {
        self.refiner = Some(refiner);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn StitchObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn config(&self) -> &StitchConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Runs the whole pipeline over `images`. Input positions become image
    /// indices in the report and in every [`Composite`].
    pub fn stitch(&self, images: Vec<RawImage>) -> Result<StitchOutput> {
        let mut machine = StageMachine::new();
        match self.run(images, &mut machine) {
            Ok(output) => Ok(output),
            Err(e) => {
                machine.abort();
                self.observer.on_stage(StitchStage::Aborted);
                warn!(error = %e, stages = ?machine.history(), "stitching aborted");
                Err(e)
            }
        }
    }

    fn run(&self, images: Vec<RawImage>, machine: &mut StageMachine) -> Result<StitchOutput> {
        let group = self.worker_group()?;
        let mut excluded: Vec<Exclusion> = Vec::new();

        // Extracting
        self.advance(machine, StitchStage::Extracting)?;
        let store = ImageStore::ingest(images);
        for r in store.rejected() {
            excluded.push(Exclusion::new(r.index, ExclusionReason::InvalidBuffer, r.error.to_string()));
        }
        info!(
            inputs = store.input_count(),
            valid = store.len(),
            threads = group.num_threads(),
            "stitching started"
        );
        let features = self.extract(&store, &group, &mut excluded);
        self.check_cancelled()?;

        // Aligning
        self.advance(machine, StitchStage::Aligning)?;
        let pairs = candidate_pairs(features.len(), self.config.matching);
        let pairwise = self.config.pairwise();
        let results = group.install(|| match_pairs(&features, &pairs, &pairwise, || self.token.is_cancelled()));
        self.check_cancelled()?;
        self.observer.on_progress(StitchStage::Aligning, results.len(), pairs.len());
        let geometries: Vec<PairGeometry> = results.iter().filter_map(|r| r.geometry.clone()).collect();
        let diagnostics: Vec<_> = results.into_iter().map(|r| r.diagnostic).collect();
        info!(pairs = diagnostics.len(), accepted = geometries.len(), "pairwise matching done");

        // GraphBuilt
        let nodes: Vec<GraphNode> = features
            .iter()
            .map(|f| GraphNode::new(f.image_index, f.width, f.height))
            .collect();
        drop(features);
        let graph = StitchGraph::build(
            &nodes,
            &geometries,
            self.config.min_inliers_per_pair,
            self.config.transform_kind,
        );
        for index in graph.isolated() {
            debug!(image = index, "image shares no accepted pair");
            excluded.push(Exclusion::new(
                index,
                ExclusionReason::NotConnected,
                "no accepted pair with any other image",
            ));
        }
        let components = graph.components()?;
        if components.is_empty() {
            return Err(no_panorama(excluded));
        }
        self.advance(machine, StitchStage::GraphBuilt)?;
        self.check_cancelled()?;

        // BundleAdjusted
        let adjusted = group.install(|| bundle_adjust_all(&components, &self.config.bundle_adjustment));
        self.observer
            .on_progress(StitchStage::BundleAdjusted, adjusted.len(), components.len());
        self.advance(machine, StitchStage::BundleAdjusted)?;
        self.check_cancelled()?;

        // Composited
        let compositor = Compositor::new(self.config.compositor());
        let mut panoramas: Vec<Panorama> = Vec::with_capacity(components.len());
        for (done, (component, result)) in components.iter().zip(&adjusted).enumerate() {
            self.check_cancelled()?;
            let placements: Vec<Placement<'_>> = component
                .nodes
                .iter()
                .zip(&result.transforms)
                .filter_map(|(node, &transform)| {
                    store.get(node.index).map(|image| Placement { image, transform })
                })
                .collect();

            match group.install(|| compositor.compose(&placements)) {
                Ok(composition) => {
                    for (index, e) in &composition.excluded {
                        excluded.push(Exclusion::new(*index, ExclusionReason::DegenerateWarp, e.to_string()));
                    }
                    let gains = composition
                        .composite
                        .indices
                        .iter()
                        .copied()
                        .zip(composition.gains.iter().copied())
                        .collect();
                    let report = ComponentReport {
                        indices: component.indices(),
                        reference: component.reference,
                        outcome: result.outcome.clone(),
                        initial_rms: result.initial_rms,
                        final_rms: result.final_rms,
                        iterations: result.iterations,
                        gains,
                    };
                    if composition.composite.indices.len() >= 2 {
                        panoramas.push(Panorama {
                            composite: composition.composite,
                            report,
                        });
                    } else {
                        for &index in &composition.composite.indices {
                            excluded.push(Exclusion::new(
                                index,
                                ExclusionReason::NotConnected,
                                "every linked image was excluded",
                            ));
                        }
                    }
                }
                Err(e) => {
                    let reason = match e {
                        PhotoError::CanvasTooLarge { .. } => ExclusionReason::CanvasTooLarge,
                        PhotoError::DegenerateWarp(_) | PhotoError::EmptyCanvas => ExclusionReason::DegenerateWarp,
                    };
                    warn!(reference = component.reference, error = %e, "component could not be composited");
                    for index in component.indices() {
                        excluded.push(Exclusion::new(index, reason, e.to_string()));
                    }
                }
            }
            self.observer
                .on_progress(StitchStage::Composited, done + 1, components.len());
        }

        let Some(primary_pos) = primary_position(&panoramas) else {
            return Err(no_panorama(excluded));
        };
        self.advance(machine, StitchStage::Composited)?;

        let primary = panoramas.remove(primary_pos);
        for (n, other) in panoramas.iter().enumerate() {
            for &index in &other.composite.indices {
                excluded.push(Exclusion::new(
                    index,
                    ExclusionReason::NotConnected,
                    format!("part of additional panorama {n}"),
                ));
            }
        }

        // Refined
        let (composite, refinement) = self.refine(primary.composite, group.num_threads())?;
        if refinement.is_applied() {
            self.advance(machine, StitchStage::Refined)?;
        }
        self.advance(machine, StitchStage::Done)?;

        excluded.sort_by_key(|e| e.index);
        let used = composite.indices.clone();
        let status = if used.len() == store.input_count() {
            StitchStatus::Full
        } else {
            StitchStatus::Partial
        };
        let mut components = vec![primary.report];
        components.extend(panoramas.iter().map(|p| p.report.clone()));

        info!(
            ?status,
            used = used.len(),
            excluded = excluded.len(),
            additional = panoramas.len(),
            width = composite.image.width(),
            height = composite.image.height(),
            "stitching finished"
        );
        Ok(StitchOutput {
            composite,
            additional: panoramas.into_iter().map(|p| p.composite).collect(),
            report: StitchReport {
                status,
                input_count: store.input_count(),
                used,
                excluded,
                pairs: diagnostics,
                components,
                refinement,
                stages: machine.history().to_vec(),
            },
        })
    }

    /// Bounded pool for this run: `num_threads`, else `PANO_CPU_THREADS`,
    /// else one thread per available core.
    fn worker_group(&self) -> Result<Arc<ResourceGroup>> {
        let cores = available_cores();
        let threads = self
            .config
            .num_threads
            .or_else(|| pano_core::read_cpu_threads_from_env().ok().flatten())
            .unwrap_or_else(|| cores.len().max(1));
        let pinned = self.config.pin_threads.then_some(cores);
        Ok(scheduler().get_or_create_group(WORKER_GROUP, threads, pinned)?)
    }

    fn extract(&self, store: &ImageStore, group: &ResourceGroup, excluded: &mut Vec<Exclusion>) -> Vec<ImageFeatures> {
        let extractor = self.config.extractor();
        let total = store.len();
        let done = AtomicUsize::new(0);

        let results: Vec<_> = group.install(|| {
            store
                .images()
                .par_iter()
                .map(|image| {
                    if self.token.is_cancelled() {
                        return None;
                    }
                    let result = extract_image_features(image, &extractor, self.config.work_pixels);
                    let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                    self.observer.on_progress(StitchStage::Extracting, n, total);
                    Some((image.index(), result))
                })
                .collect()
        });

        let mut features = Vec::with_capacity(total);
        for (index, result) in results.into_iter().flatten() {
            match result {
                Ok(f) => features.push(f),
                Err(e) => {
                    warn!(image = index, error = %e, "feature extraction failed, excluded");
                    excluded.push(Exclusion::new(index, ExclusionReason::FeatureExtraction, e.to_string()));
                }
            }
        }
        features
    }

    /// Runs the refiner on `composite` within `refinement_timeout`. Every
    /// failure returns the composite unchanged; only cancellation is an error.
    fn refine(&self, composite: Composite, threads: usize) -> Result<(Composite, RefinementOutcome)> {
        if !self.config.enable_neural_refinement {
            return Ok((composite, RefinementOutcome::Disabled));
        }
        let refiner = match self.load_refiner(threads) {
            Ok(r) => r,
            Err(reason) => {
                warn!(%reason, "neural refinement unavailable, keeping unrefined composite");
                return Ok((composite, RefinementOutcome::Unavailable(reason)));
            }
        };

        let model = refiner.name().to_string();
        let input = composite.image.clone();
        let outcome = run_with_deadline("refine", self.config.refinement_timeout, &self.token, move || {
            refiner.infer(&input)
        });

        let outcome = match outcome {
            Ok(DeadlineOutcome::Completed(Ok(image))) if image.dimensions() == composite.image.dimensions() => {
                info!(%model, "neural refinement applied");
                let refined = Composite { image, ..composite };
                return Ok((refined, RefinementOutcome::Applied { model }));
            }
            Ok(DeadlineOutcome::Completed(Ok(image))) => RefinementOutcome::Failed(format!(
                "model returned {}x{}, expected {}x{}",
                image.width(),
                image.height(),
                composite.image.width(),
                composite.image.height()
            )),
            Ok(DeadlineOutcome::Completed(Err(e))) => RefinementOutcome::Failed(e.to_string()),
            Ok(DeadlineOutcome::TimedOut) => RefinementOutcome::TimedOut,
            Ok(DeadlineOutcome::Cancelled) => return Err(StitchError::Cancelled),
            Err(e) => RefinementOutcome::Failed(e.to_string()),
        };
        warn!(%model, ?outcome, "neural refinement skipped");
        Ok((composite, outcome))
    }

    fn load_refiner(&self, threads: usize) -> std::result::Result<Arc<dyn Inference>, String> {
        if let Some(refiner) = &self.refiner {
            return Ok(Arc::clone(refiner));
        }
        match self.config.refinement_model {
            RefinementModel::Telea { radius } => Ok(Arc::new(TeleaInpainter::new(radius))),
            RefinementModel::Onnx => {
                let path = self
                    .config
                    .model_path
                    .as_ref()
                    .ok_or_else(|| "no model path configured".to_string())?;
                let inpainter = OnnxInpainter::from_file(path, threads).map_err(|e| e.to_string())?;
                Ok(Arc::new(inpainter))
            }
        }
    }

    fn advance(&self, machine: &mut StageMachine, stage: StitchStage) -> Result<()> {
        machine.advance(stage)?;
        self.observer.on_stage(stage);
        Ok(())
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(StitchError::Cancelled);
        }
        Ok(())
    }
}

/// Largest panorama by image count; ties to the lowest first image index.
fn primary_position(panoramas: &[Panorama]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (pos, p) in panoramas.iter().enumerate() {
        let better = best.map_or(true, |b| {
            let current = &panoramas[b].composite.indices;
            let candidate = &p.composite.indices;
            candidate.len() > current.len() || (candidate.len() == current.len() && candidate[0] < current[0])
        });
        if better {
            best = Some(pos);
        }
    }
    best
}

fn no_panorama(mut excluded: Vec<Exclusion>) -> StitchError {
    excluded.sort_by_key(|e| e.index);
    warn!(excluded = excluded.len(), "no connectable image pair");
    StitchError::NoValidPanorama { excluded }
}
