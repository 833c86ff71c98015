//! Robust Estimation Module
//!
//! Provides a generic, seeded RANSAC implementation that can be used for any
//! model estimation task. Identical inputs and seeds always produce identical
//! results, independent of the calling thread.

use std::marker::PhantomData;

use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;

/// Configuration for robust estimation
#[derive(Debug, Clone)]
pub struct RobustConfig {
    /// Maximum error for a datum to count as an inlier.
    pub threshold: f64,
    pub max_iterations: usize,
    /// Probability of drawing at least one all-inlier sample; bounds the iteration count.
    pub confidence: f64,
    pub seed: u64,
}

impl Default for RobustConfig {
    fn default() -> Self {
        Self {
            threshold: 3.0,
            max_iterations: 2000,
            confidence: 0.995,
            seed: 0,
        }
    }
}

impl RobustConfig {
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Result of robust estimation
#[derive(Debug, Clone)]
pub struct RobustResult<M> {
    pub model: Option<M>,
    pub inliers: Vec<bool>,
    pub num_inliers: usize,
    /// Mean error over the inliers.
    pub residual: f64,
    pub iterations: usize,
}

impl<M> RobustResult<M> {
    fn empty(n: usize) -> Self {
        Self {
            model: None,
            inliers: vec![false; n],
            num_inliers: 0,
            residual: f64::INFINITY,
            iterations: 0,
        }
    }
}

/// Trait for models that can be estimated robustly
pub trait RobustModel<D> {
    type Model: Clone;

    /// Minimum number of data points required to estimate the model
    fn min_sample_size(&self) -> usize;

    /// Estimate model from a minimal sample
    fn estimate(&self, data: &[&D]) -> Option<Self::Model>;

    /// Compute error for a single data point against the model
    fn compute_error(&self, model: &Self::Model, data: &D) -> f64;

    /// Least-squares fit over an inlier set of any size.
    fn refine(&self, data: &[&D]) -> Option<Self::Model> {
        self.estimate(data)
    }
}

/// Iterations needed to draw an all-inlier sample of size `k` with probability
/// `confidence` when a fraction `inlier_ratio` of the data are inliers.
pub fn required_iterations(confidence: f64, inlier_ratio: f64, k: usize, max: usize) -> usize {
    if inlier_ratio >= 1.0 {
        return 1;
    }
    if inlier_ratio <= 0.0 {
        return max;
    }
    let p_good = inlier_ratio.powi(k as i32);
    let denom = (1.0 - p_good).ln();
    if denom >= 0.0 || !denom.is_finite() {
        return max;
    }
    let n = ((1.0 - confidence).ln() / denom).ceil();
    if n.is_finite() && n >= 0.0 {
        (n as usize).clamp(1, max)
    } else {
        max
    }
}

/// Generic RANSAC engine
pub struct Ransac<D, M: RobustModel<D>> {
    config: RobustConfig,
    _phantom: PhantomData<(D, M)>,
}

impl<D, M: RobustModel<D>> Ransac<D, M> {
    pub fn new(config: RobustConfig) -> Self {
        Self {
            config,
            _phantom: PhantomData,
        }
    }

    pub fn config(&self) -> &RobustConfig {
        &self.config
    }

    pub fn run(&self, estimator: &M, data: &[D]) -> RobustResult<M::Model> {
        let n = data.len();
        let k = estimator.min_sample_size();

        if n < k || k == 0 {
            return RobustResult::empty(n);
        }

        let mut best = RobustResult::empty(n);
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut limit = self.config.max_iterations;
        let mut iteration = 0;

        while iteration < limit {
            iteration += 1;

            // 1. Sample
            let sample: Vec<&D> = index::sample(&mut rng, n, k)
                .iter()
                .map(|i| &data[i])
                .collect();

            // 2. Estimate
            let Some(model) = estimator.estimate(&sample) else {
                continue;
            };

            // 3. Score
            let (inliers, num_inliers, residual) = self.score(estimator, &model, data);

            if num_inliers > best.num_inliers
                || (num_inliers == best.num_inliers && num_inliers > 0 && residual < best.residual)
            {
                best.num_inliers = num_inliers;
                best.inliers = inliers;
                best.model = Some(model);
                best.residual = residual;

                // 4. Tighten the iteration bound
                let ratio = num_inliers as f64 / n as f64;
                limit = limit.min(required_iterations(
                    self.config.confidence,
                    ratio,
                    k,
                    self.config.max_iterations,
                ));
            }
        }
        best.iterations = iteration;

        // 5. Least-squares refit on the consensus set
        if best.num_inliers >= k {
            let consensus: Vec<&D> = data
                .iter()
                .zip(best.inliers.iter())
                .filter(|(_, &inlier)| inlier)
                .map(|(d, _)| d)
                .collect();
            if let Some(refined) = estimator.refine(&consensus) {
                let (inliers, num_inliers, residual) = self.score(estimator, &refined, data);
                if num_inliers > best.num_inliers
                    || (num_inliers == best.num_inliers && residual <= best.residual)
                {
                    best.model = Some(refined);
                    best.inliers = inliers;
                    best.num_inliers = num_inliers;
                    best.residual = residual;
                }
            }
        }

        best
    }

    fn score(&self, estimator: &M, model: &M::Model, data: &[D]) -> (Vec<bool>, usize, f64) {
        let mut inliers = vec![false; data.len()];
        let mut num_inliers = 0;
        let mut total_error = 0.0;

        for (j, d) in data.iter().enumerate() {
            let err = estimator.compute_error(model, d);
            if err < self.config.threshold {
                inliers[j] = true;
                num_inliers += 1;
                total_error += err;
            }
        }

        let residual = if num_inliers > 0 {
            total_error / num_inliers as f64
        } else {
            f64::INFINITY
        };
        (inliers, num_inliers, residual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fits y = a*x + b.
    struct LineEstimator;

    impl RobustModel<(f64, f64)> for LineEstimator {
        type Model = (f64, f64);

        fn min_sample_size(&self) -> usize {
            2
        }

        fn estimate(&self, data: &[&(f64, f64)]) -> Option<(f64, f64)> {
            let n = data.len() as f64;
            let sx: f64 = data.iter().map(|p| p.0).sum();
            let sy: f64 = data.iter().map(|p| p.1).sum();
            let sxx: f64 = data.iter().map(|p| p.0 * p.0).sum();
            let sxy: f64 = data.iter().map(|p| p.0 * p.1).sum();
            let det = n * sxx - sx * sx;
            if det.abs() < 1e-12 {
                return None;
            }
            let a = (n * sxy - sx * sy) / det;
            Some((a, (sy - a * sx) / n))
        }

        fn compute_error(&self, model: &(f64, f64), p: &(f64, f64)) -> f64 {
            (model.0 * p.0 + model.1 - p.1).abs()
        }
    }

    fn line_with_outliers() -> Vec<(f64, f64)> {
        let mut data: Vec<(f64, f64)> = (0..40).map(|i| (i as f64, 2.0 * i as f64 + 1.0)).collect();
        data.extend((0..10).map(|i| (i as f64 * 3.0, 500.0 - i as f64 * 7.0)));
        data
    }

    #[test]
    fn ransac_recovers_line() {
        let ransac = Ransac::new(RobustConfig::default().with_threshold(0.5).with_seed(7));
        let result = ransac.run(&LineEstimator, &line_with_outliers());
        let (a, b) = result.model.unwrap();
        assert!((a - 2.0).abs() < 1e-9);
        assert!((b - 1.0).abs() < 1e-9);
        assert_eq!(result.num_inliers, 40);
    }

    #[test]
    fn ransac_is_deterministic_for_a_seed() {
        let data = line_with_outliers();
        let ransac = Ransac::new(RobustConfig::default().with_seed(99));
        let a = ransac.run(&LineEstimator, &data);
        let b = ransac.run(&LineEstimator, &data);
        assert_eq!(a.inliers, b.inliers);
        assert_eq!(a.iterations, b.iterations);
        assert_eq!(a.model, b.model);
    }

    #[test]
    fn ransac_stops_early_on_clean_data() {
        let data: Vec<(f64, f64)> = (0..30).map(|i| (i as f64, -0.5 * i as f64)).collect();
        let ransac = Ransac::new(RobustConfig::default().with_max_iterations(500));
        let result = ransac.run(&LineEstimator, &data);
        assert_eq!(result.num_inliers, 30);
        assert!(result.iterations < 5);
    }

    #[test]
    fn too_few_points_yields_no_model() {
        let ransac = Ransac::new(RobustConfig::default());
        let result = ransac.run(&LineEstimator, &[(1.0, 1.0)]);
        assert!(result.model.is_none());
        assert_eq!(result.inliers, vec![false]);
    }

    #[test]
    fn required_iterations_bounds() {
        assert_eq!(required_iterations(0.99, 1.0, 4, 1000), 1);
        assert_eq!(required_iterations(0.99, 0.0, 4, 1000), 1000);
        let n = required_iterations(0.99, 0.5, 4, 1000);
        // ln(0.01) / ln(1 - 1/16) = 71.4
        assert_eq!(n, 72);
    }
}
