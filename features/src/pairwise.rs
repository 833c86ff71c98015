//! Pairwise matching and geometric verification over candidate image pairs.

use pano_core::{Correspondence, Matches, RobustConfig, Transform, TransformKind};
use rayon::prelude::*;
use tracing::debug;

use crate::matcher::Matcher;
use crate::ransac::estimate_transform;
use crate::ImageFeatures;

/// Which image pairs are matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchingStrategy {
    /// Every unordered pair.
    #[default]
    Exhaustive,
    /// Each image against the next `window` images in input order.
    Sequential { window: usize },
}

#[derive(Debug, Clone)]
pub struct PairwiseConfig {
    pub ratio_threshold: f32,
    pub cross_check: bool,
    pub min_matches: usize,
    pub min_inliers: usize,
    pub kind: TransformKind,
    pub ransac: RobustConfig,
}

impl Default for PairwiseConfig {
    fn default() -> Self {
        Self {
            ratio_threshold: 0.7,
            cross_check: false,
            min_matches: 20,
            min_inliers: 16,
            kind: TransformKind::Homography,
            ransac: RobustConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairOutcome {
    Accepted,
    /// Fewer ratio-test survivors than `min_matches`.
    InsufficientMatches,
    /// No model, fewer than `min_inliers`, or failing `inliers > 8 + 0.3 * matches`.
    InsufficientInliers,
    /// A model was found but it flips, folds or over-scales the image.
    Degenerate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PairDiagnostic {
    pub i: usize,
    pub j: usize,
    pub matches: usize,
    pub inliers: usize,
    pub outcome: PairOutcome,
}

/// Verified geometry of pair `(i, j)`: `transform` maps image `j` into image `i`.
#[derive(Debug, Clone)]
pub struct PairGeometry {
    pub i: usize,
    pub j: usize,
    pub transform: Transform,
    /// Inlier correspondences with `src` in image `j` and `dst` in image `i`.
    pub inliers: Vec<Correspondence>,
}

#[derive(Debug, Clone)]
pub struct PairResult {
    pub diagnostic: PairDiagnostic,
    pub geometry: Option<PairGeometry>,
}

/// Candidate pairs as positions `(a, b)`, `a < b`, into a list of `n` images.
pub fn candidate_pairs(n: usize, strategy: MatchingStrategy) -> Vec<(usize, usize)> {
    let window = match strategy {
        MatchingStrategy::Exhaustive => n,
        MatchingStrategy::Sequential { window } => window.max(1),
    };
    (0..n)
        .flat_map(|a| (a + 1..n.min(a + 1 + window)).map(move |b| (a, b)))
        .collect()
}

/// Per-pair RNG seed; independent of scheduling order.
pub fn pair_seed(seed: u64, i: usize, j: usize) -> u64 {
    seed ^ (((i as u64) << 32) | (j as u64 & 0xFFFF_FFFF))
}

/// Brown–Lowe probabilistic verification of a match set.
fn passes_confidence_test(inliers: usize, matches: usize) -> bool {
    inliers as f64 > 8.0 + 0.3 * matches as f64
}

pub fn match_pair(a: &ImageFeatures, b: &ImageFeatures, config: &PairwiseConfig) -> PairResult {
    let (i, j) = (a.image_index, b.image_index);
    let matches: Matches = Matcher::new()
        .with_ratio_test(config.ratio_threshold)
        .with_cross_check(config.cross_check)
        .match_descriptors(&a.descriptors, &b.descriptors);

    let reject = |matches: usize, inliers: usize, outcome: PairOutcome| {
        debug!(i, j, matches, inliers, ?outcome, "pair rejected");
        PairResult {
            diagnostic: PairDiagnostic {
                i,
                j,
                matches,
                inliers,
                outcome,
            },
            geometry: None,
        }
    };

    let n_matches = matches.len();
    if n_matches < config.min_matches.max(config.kind.min_samples()) {
        return reject(n_matches, 0, PairOutcome::InsufficientMatches);
    }

    let correspondences: Vec<Correspondence> = matches
        .iter()
        .map(|m| {
            Correspondence::new(
                b.keypoints.keypoints[m.train_idx].pt(),
                a.keypoints.keypoints[m.query_idx].pt(),
            )
        })
        .collect();

    let ransac = config.ransac.clone().with_seed(pair_seed(config.ransac.seed, i, j));
    let result = estimate_transform(&correspondences, config.kind, &ransac);
    let num_inliers = result.num_inliers;

    let Some(model) = result.model else {
        return reject(n_matches, 0, PairOutcome::InsufficientInliers);
    };
    if num_inliers < config.min_inliers || !passes_confidence_test(num_inliers, n_matches) {
        return reject(n_matches, num_inliers, PairOutcome::InsufficientInliers);
    }

    let transform = Transform::new(model, config.kind).with_inliers(num_inliers);
    if !transform.valid || transform.is_degenerate(b.width, b.height) {
        return reject(n_matches, num_inliers, PairOutcome::Degenerate);
    }

    let inliers: Vec<Correspondence> = correspondences
        .iter()
        .zip(result.inliers.iter())
        .filter(|(_, &keep)| keep)
        .map(|(c, _)| *c)
        .collect();

    debug!(i, j, matches = n_matches, inliers = num_inliers, "pair accepted");
    PairResult {
        diagnostic: PairDiagnostic {
            i,
            j,
            matches: n_matches,
            inliers: num_inliers,
            outcome: PairOutcome::Accepted,
        },
        geometry: Some(PairGeometry {
            i,
            j,
            transform,
            inliers,
        }),
    }
}

/// Matches and verifies `pairs` (positions into `features`) in parallel.
/// Pairs skipped because `should_stop` returned true are left out; results
/// keep the order of `pairs`.
pub fn match_pairs<F>(
    features: &[ImageFeatures],
    pairs: &[(usize, usize)],
    config: &PairwiseConfig,
    should_stop: F,
) -> Vec<PairResult>
where
    F: Fn() -> bool + Sync,
{
    pairs
        .par_iter()
        .map(|&(a, b)| {
            if should_stop() {
                return None;
            }
            Some(match_pair(&features[a], &features[b], config))
        })
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustive_pairs() {
        assert_eq!(
            candidate_pairs(4, MatchingStrategy::Exhaustive),
            vec![(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)]
        );
        assert!(candidate_pairs(1, MatchingStrategy::Exhaustive).is_empty());
    }

    #[test]
    fn sequential_pairs() {
        assert_eq!(
            candidate_pairs(4, MatchingStrategy::Sequential { window: 1 }),
            vec![(0, 1), (1, 2), (2, 3)]
        );
        assert_eq!(
            candidate_pairs(4, MatchingStrategy::Sequential { window: 2 }),
            vec![(0, 1), (0, 2), (1, 2), (1, 3), (2, 3)]
        );
    }

    #[test]
    fn seeds_differ_per_pair() {
        assert_ne!(pair_seed(7, 0, 1), pair_seed(7, 1, 0));
        assert_ne!(pair_seed(7, 0, 1), pair_seed(7, 0, 2));
        assert_eq!(pair_seed(7, 2, 5), pair_seed(7, 2, 5));
    }

    #[test]
    fn confidence_test_threshold() {
        assert!(passes_confidence_test(39, 100));
        assert!(!passes_confidence_test(38, 100));
    }
}
