//! Joint refinement of a component's transforms with Levenberg–Marquardt.
//!
//! Every inlier correspondence `(src in j, dst in i)` of every edge
//! contributes the residual `T_i(dst) - T_j(src)` in the reference frame.
//! The reference transform stays fixed at identity. Coordinates are divided
//! by the component's largest image dimension before solving.

use nalgebra::{DMatrix, DVector, Matrix3, Point2};
use pano_core::{Transform, TransformKind};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::graph::Component;
use crate::AlignError;

const MIN_LAMBDA: f64 = 1e-12;
const MAX_LAMBDA: f64 = 1e12;
const HORIZON_EPS: f64 = 1e-8;

#[derive(Debug, Clone)]
pub struct BundleAdjustmentConfig {
    pub enabled: bool,
    pub max_iterations: usize,
    /// Convergence bound on the relative cost decrease and the step norm.
    pub tolerance: f64,
    pub initial_lambda: f64,
}

impl Default for BundleAdjustmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_iterations: 100,
            tolerance: 1e-6,
            initial_lambda: 1e-3,
        }
    }
}

impl BundleAdjustmentConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BundleOutcome {
    Converged { iterations: usize },
    /// Adjustment turned off; chained transforms are used as-is.
    Disabled,
    /// Chained transforms are used as-is.
    Unrefined { reason: String },
}

#[derive(Debug, Clone)]
pub struct BundleResult {
    /// Per component node, maps the image into the reference frame.
    pub transforms: Vec<Transform>,
    /// RMS reprojection distance in pixels before and after refinement.
    pub initial_rms: f64,
    pub final_rms: f64,
    pub iterations: usize,
    pub outcome: BundleOutcome,
}

impl BundleResult {
    pub fn is_refined(&self) -> bool {
        matches!(self.outcome, BundleOutcome::Converged { .. })
    }
}

/// Parameter layout of one transform kind.
fn params_per_image(kind: TransformKind) -> usize {
    kind.num_params()
}

fn to_params(m: &Matrix3<f64>, kind: TransformKind, out: &mut [f64]) {
    match kind {
        TransformKind::Homography => {
            out[0] = m[(0, 0)];
            out[1] = m[(0, 1)];
            out[2] = m[(0, 2)];
            out[3] = m[(1, 0)];
            out[4] = m[(1, 1)];
            out[5] = m[(1, 2)];
            out[6] = m[(2, 0)];
            out[7] = m[(2, 1)];
        }
        TransformKind::Similarity => {
            out[0] = (m[(0, 0)] + m[(1, 1)]) / 2.0;
            out[1] = (m[(1, 0)] - m[(0, 1)]) / 2.0;
            out[2] = m[(0, 2)];
            out[3] = m[(1, 2)];
        }
    }
}

fn from_params(p: &[f64], kind: TransformKind) -> Matrix3<f64> {
    match kind {
        TransformKind::Homography => Matrix3::new(p[0], p[1], p[2], p[3], p[4], p[5], p[6], p[7], 1.0),
        TransformKind::Similarity => Matrix3::new(p[0], -p[1], p[2], p[1], p[0], p[3], 0.0, 0.0, 1.0),
    }
}

/// Projection of `x` by the transform in `p` plus its 2xK Jacobian with
/// respect to `p`. `None` when `x` falls behind the horizon.
fn project_with_jacobian(p: &[f64], kind: TransformKind, x: &Point2<f64>, jac: &mut [[f64; 8]; 2]) -> Option<Point2<f64>> {
    match kind {
        TransformKind::Homography => {
            let u = p[0] * x.x + p[1] * x.y + p[2];
            let v = p[3] * x.x + p[4] * x.y + p[5];
            let w = p[6] * x.x + p[7] * x.y + 1.0;
            if w <= HORIZON_EPS || !w.is_finite() {
                return None;
            }
            let (fx, fy) = (u / w, v / w);
            let inv_w = 1.0 / w;
            jac[0] = [x.x * inv_w, x.y * inv_w, inv_w, 0.0, 0.0, 0.0, -x.x * fx * inv_w, -x.y * fx * inv_w];
            jac[1] = [0.0, 0.0, 0.0, x.x * inv_w, x.y * inv_w, inv_w, -x.x * fy * inv_w, -x.y * fy * inv_w];
            Some(Point2::new(fx, fy))
        }
        TransformKind::Similarity => {
            let fx = p[0] * x.x - p[1] * x.y + p[2];
            let fy = p[1] * x.x + p[0] * x.y + p[3];
            jac[0] = [x.x, -x.y, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0];
            jac[1] = [x.y, x.x, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0];
            Some(Point2::new(fx, fy))
        }
    }
}

/// Residual problem of one component in conditioned coordinates.
struct Problem<'a> {
    component: &'a Component,
    kind: TransformKind,
    /// Parameter offset per component node; `None` for the reference.
    offsets: Vec<Option<usize>>,
    num_params: usize,
    scale: f64,
    identity: [f64; 8],
}

impl<'a> Problem<'a> {
    fn new(component: &'a Component) -> Self {
        let kind = component.kind;
        let k = params_per_image(kind);
        let mut offsets = Vec::with_capacity(component.len());
        let mut next = 0;
        for node in &component.nodes {
            if node.index == component.reference {
                offsets.push(None);
            } else {
                offsets.push(Some(next));
                next += k;
            }
        }
        let mut identity = [0.0; 8];
        to_params(&Matrix3::identity(), kind, &mut identity);
        Self {
            component,
            kind,
            offsets,
            num_params: next,
            scale: component.max_dimension().max(1) as f64,
            identity,
        }
    }

    fn condition(&self) -> Matrix3<f64> {
        Matrix3::new(1.0 / self.scale, 0.0, 0.0, 0.0, 1.0 / self.scale, 0.0, 0.0, 0.0, 1.0)
    }

    fn initial_params(&self) -> DVector<f64> {
        let c = self.condition();
        let c_inv = Matrix3::new(self.scale, 0.0, 0.0, 0.0, self.scale, 0.0, 0.0, 0.0, 1.0);
        let mut params = DVector::zeros(self.num_params);
        for (t, offset) in self.component.initial.iter().zip(&self.offsets) {
            if let Some(o) = offset {
                let conditioned = c * t.matrix * c_inv;
                let k = params_per_image(self.kind);
                to_params(&conditioned, self.kind, &mut params.as_mut_slice()[*o..*o + k]);
            }
        }
        params
    }

    fn block<'p>(&'p self, params: &'p DVector<f64>, node_pos: usize) -> &'p [f64] {
        match self.offsets[node_pos] {
            Some(o) => &params.as_slice()[o..o + params_per_image(self.kind)],
            None => &self.identity[..params_per_image(self.kind)],
        }
    }

    /// Sum of squared residual distances, or `None` when any point leaves
    /// the valid projective domain.
    fn cost(&self, params: &DVector<f64>) -> Option<f64> {
        let mut scratch = [[0.0; 8]; 2];
        let mut total = 0.0;
        for edge in &self.component.edges {
            let pi = self.component.position(edge.i)?;
            let pj = self.component.position(edge.j)?;
            let (bi, bj) = (self.block(params, pi), self.block(params, pj));
            for c in &edge.correspondences {
                let a = project_with_jacobian(bi, self.kind, &(c.dst / self.scale), &mut scratch)?;
                let b = project_with_jacobian(bj, self.kind, &(c.src / self.scale), &mut scratch)?;
                total += (a - b).norm_squared();
            }
        }
        total.is_finite().then_some(total)
    }

    /// Accumulates `JᵀJ` and `Jᵀr` over all residuals in edge order.
    fn normal_equations(&self, params: &DVector<f64>) -> Option<(DMatrix<f64>, DVector<f64>)> {
        let k = params_per_image(self.kind);
        let n = self.num_params;
        let mut jtj = DMatrix::<f64>::zeros(n, n);
        let mut jtr = DVector::<f64>::zeros(n);
        let mut jac_i = [[0.0; 8]; 2];
        let mut jac_j = [[0.0; 8]; 2];
        let mut cols: Vec<(usize, f64)> = Vec::with_capacity(2 * k);

        for edge in &self.component.edges {
            let pi = self.component.position(edge.i)?;
            let pj = self.component.position(edge.j)?;
            let (bi, bj) = (self.block(params, pi), self.block(params, pj));
            let (oi, oj) = (self.offsets[pi], self.offsets[pj]);

            for c in &edge.correspondences {
                let a = project_with_jacobian(bi, self.kind, &(c.dst / self.scale), &mut jac_i)?;
                let b = project_with_jacobian(bj, self.kind, &(c.src / self.scale), &mut jac_j)?;
                let r = a - b;

                for (row, residual) in [r.x, r.y].into_iter().enumerate() {
                    cols.clear();
                    if let Some(o) = oi {
                        cols.extend((0..k).map(|q| (o + q, jac_i[row][q])));
                    }
                    if let Some(o) = oj {
                        cols.extend((0..k).map(|q| (o + q, -jac_j[row][q])));
                    }
                    for &(ca, va) in &cols {
                        jtr[ca] += va * residual;
                        for &(cb, vb) in &cols {
                            jtj[(ca, cb)] += va * vb;
                        }
                    }
                }
            }
        }
        Some((jtj, jtr))
    }

    fn transforms(&self, params: &DVector<f64>) -> Vec<Transform> {
        let c = self.condition();
        let c_inv = Matrix3::new(self.scale, 0.0, 0.0, 0.0, self.scale, 0.0, 0.0, 0.0, 1.0);
        self.component
            .initial
            .iter()
            .enumerate()
            .map(|(pos, initial)| {
                if self.offsets[pos].is_none() {
                    return *initial;
                }
                let conditioned = from_params(self.block(params, pos), self.kind);
                Transform::new(c_inv * conditioned * c, self.kind).with_inliers(initial.inliers)
            })
            .collect()
    }

    fn rms_pixels(&self, cost: f64) -> f64 {
        let n = self.component.num_correspondences().max(1) as f64;
        (cost / n).sqrt() * self.scale
    }
}

fn solve(lhs: DMatrix<f64>, rhs: &DVector<f64>) -> Option<DVector<f64>> {
    if let Some(ch) = lhs.clone().cholesky() {
        return Some(ch.solve(rhs));
    }
    lhs.lu().solve(rhs)
}

fn unrefined(component: &Component, rms: f64, iterations: usize, reason: String) -> BundleResult {
    warn!(
        reference = component.reference,
        images = component.len(),
        %reason,
        "bundle adjustment did not converge, keeping chained transforms"
    );
    BundleResult {
        transforms: component.initial.clone(),
        initial_rms: rms,
        final_rms: rms,
        iterations,
        outcome: BundleOutcome::Unrefined { reason },
    }
}

/// Damping reached `MAX_LAMBDA`. Counts as convergence once a step has been
/// accepted; otherwise the error never decreased and the chained transforms
/// are kept.
fn stalled(
    component: &Component,
    rms: f64,
    iterations: usize,
    accepted: usize,
    cause: &str,
) -> Option<BundleResult> {
    if accepted > 0 {
        return None;
    }
    let reason = AlignError::ConvergenceFailure(format!("{cause}, error never decreased"));
    Some(unrefined(component, rms, iterations, reason.to_string()))
}

/// Refines every non-reference transform of `component`. Failures fall back
/// to the chained transforms and are reported in the outcome.
pub fn bundle_adjust(component: &Component, config: &BundleAdjustmentConfig) -> BundleResult {
    let problem = Problem::new(component);
    let mut params = problem.initial_params();

    let Some(initial_cost) = problem.cost(&params) else {
        let reason = AlignError::ConvergenceFailure("initial transforms project behind the horizon".into());
        return unrefined(component, f64::INFINITY, 0, reason.to_string());
    };
    let initial_rms = problem.rms_pixels(initial_cost);

    if !config.enabled {
        return BundleResult {
            transforms: component.initial.clone(),
            initial_rms,
            final_rms: initial_rms,
            iterations: 0,
            outcome: BundleOutcome::Disabled,
        };
    }

    let mut cost = initial_cost;
    let mut lambda = config.initial_lambda.max(MIN_LAMBDA);
    let mut accepted = 0usize;
    let mut converged = false;
    let mut iterations = 0;

    while iterations < config.max_iterations {
        iterations += 1;

        let Some((jtj, jtr)) = problem.normal_equations(&params) else {
            let reason = AlignError::ConvergenceFailure("residual left the projective domain".into());
            return unrefined(component, initial_rms, iterations, reason.to_string());
        };
        if jtr.amax() <= f64::EPSILON {
            converged = true;
            break;
        }

        let mut lhs = jtj;
        for i in 0..lhs.nrows() {
            lhs[(i, i)] *= 1.0 + lambda;
        }

        let neg_jtr = -&jtr;
        let Some(delta) = solve(lhs, &neg_jtr) else {
            if lambda >= MAX_LAMBDA {
                if let Some(result) = stalled(component, initial_rms, iterations, accepted, "singular normal equations") {
                    return result;
                }
                converged = true;
                break;
            }
            lambda = (lambda * 10.0).min(MAX_LAMBDA);
            continue;
        };

        let candidate = &params + &delta;
        match problem.cost(&candidate) {
            Some(next) if next < cost => {
                let decrease = (cost - next) / cost.max(f64::MIN_POSITIVE);
                params = candidate;
                cost = next;
                accepted += 1;
                lambda = (lambda / 10.0).max(MIN_LAMBDA);
                if decrease < config.tolerance || delta.norm() < config.tolerance {
                    converged = true;
                    break;
                }
            }
            _ => {
                if lambda >= MAX_LAMBDA {
                    if let Some(result) = stalled(component, initial_rms, iterations, accepted, "no descent direction") {
                        return result;
                    }
                    converged = true;
                    break;
                }
                lambda = (lambda * 10.0).min(MAX_LAMBDA);
            }
        }
    }

    if !converged {
        let reason = AlignError::ConvergenceFailure(format!(
            "no convergence within {} iterations",
            config.max_iterations
        ));
        return unrefined(component, initial_rms, iterations, reason.to_string());
    }

    let final_rms = problem.rms_pixels(cost);
    debug!(
        reference = component.reference,
        images = component.len(),
        iterations,
        accepted,
        initial_rms,
        final_rms,
        "bundle adjustment converged"
    );

    BundleResult {
        transforms: problem.transforms(&params),
        initial_rms,
        final_rms,
        iterations,
        outcome: BundleOutcome::Converged { iterations },
    }
}

/// Adjusts independent components in parallel; results keep component order.
pub fn bundle_adjust_all(components: &[Component], config: &BundleAdjustmentConfig) -> Vec<BundleResult> {
    components
        .par_iter()
        .map(|component| bundle_adjust(component, config))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphNode, StitchGraph};
    use pano_core::geometry::translation;
    use pano_core::Correspondence;
    use pano_features::PairGeometry;

    fn exact_pair(i: usize, j: usize, to_i: &Matrix3<f64>, kind: TransformKind) -> PairGeometry {
        let mut inliers = Vec::new();
        for y in 0..5 {
            for x in 0..6 {
                let src = Point2::new(10.0 + 30.0 * x as f64, 8.0 + 25.0 * y as f64);
                let dst = pano_core::project_point(to_i, &src).unwrap();
                inliers.push(Correspondence::new(src, dst));
            }
        }
        PairGeometry {
            i,
            j,
            transform: Transform::new(*to_i, kind).with_inliers(inliers.len()),
            inliers,
        }
    }

    #[test]
    fn parameter_layout_round_trips() {
        let h = Matrix3::new(1.1, 0.02, 5.0, -0.01, 0.95, 3.0, 1e-4, 2e-4, 1.0);
        let mut p = [0.0; 8];
        to_params(&h, TransformKind::Homography, &mut p);
        assert_eq!(from_params(&p, TransformKind::Homography), h);

        let s = Matrix3::new(0.8, -0.3, 4.0, 0.3, 0.8, -2.0, 0.0, 0.0, 1.0);
        to_params(&s, TransformKind::Similarity, &mut p);
        assert_eq!(from_params(&p, TransformKind::Similarity), s);
    }

    #[test]
    fn homography_jacobian_matches_finite_differences() {
        let p = [1.05, 0.02, 0.1, -0.03, 0.97, -0.05, 0.01, -0.02];
        let x = Point2::new(0.4, 0.7);
        let mut jac = [[0.0; 8]; 2];
        let base = project_with_jacobian(&p, TransformKind::Homography, &x, &mut jac).unwrap();
        let mut scratch = [[0.0; 8]; 2];
        let eps = 1e-7;
        for q in 0..8 {
            let mut shifted = p;
            shifted[q] += eps;
            let moved = project_with_jacobian(&shifted, TransformKind::Homography, &x, &mut scratch).unwrap();
            assert!(((moved.x - base.x) / eps - jac[0][q]).abs() < 1e-5);
            assert!(((moved.y - base.y) / eps - jac[1][q]).abs() < 1e-5);
        }
    }

    #[test]
    fn exact_chain_converges_immediately() {
        let kind = TransformKind::Similarity;
        let nodes = [GraphNode::new(0, 200, 150), GraphNode::new(1, 200, 150)];
        let graph = StitchGraph::build(&nodes, &[exact_pair(0, 1, &translation(120.0, 4.0), kind)], 16, kind);
        let component = &graph.components().unwrap()[0];

        let result = bundle_adjust(component, &BundleAdjustmentConfig::default());
        assert!(result.is_refined());
        assert!(result.initial_rms < 1e-9);
        assert!(result.final_rms < 1e-9);
    }

    #[test]
    fn saturated_damping_without_progress_is_unrefined() {
        let kind = TransformKind::Similarity;
        let nodes = [GraphNode::new(0, 200, 150), GraphNode::new(1, 200, 150)];
        let graph = StitchGraph::build(&nodes, &[exact_pair(0, 1, &translation(80.0, 2.0), kind)], 16, kind);
        let component = &graph.components().unwrap()[0];

        let result = stalled(component, 2.5, 7, 0, "no descent direction").unwrap();
        assert!(!result.is_refined());
        assert_eq!(result.transforms, component.initial);
        assert_eq!(result.iterations, 7);
        assert_eq!(result.initial_rms, result.final_rms);
        match result.outcome {
            BundleOutcome::Unrefined { reason } => assert!(reason.contains("never decreased"), "{reason}"),
            other => panic!("unexpected outcome {other:?}"),
        }

        assert!(stalled(component, 2.5, 7, 3, "no descent direction").is_none());
    }

    #[test]
    fn disabled_keeps_chained_transforms() {
        let kind = TransformKind::Homography;
        let nodes = [GraphNode::new(0, 200, 150), GraphNode::new(1, 200, 150)];
        let graph = StitchGraph::build(&nodes, &[exact_pair(0, 1, &translation(50.0, 0.0), kind)], 16, kind);
        let component = &graph.components().unwrap()[0];

        let config = BundleAdjustmentConfig::default().with_enabled(false);
        let result = bundle_adjust(component, &config);
        assert_eq!(result.outcome, BundleOutcome::Disabled);
        assert_eq!(result.transforms, component.initial);
    }
}
