//! RANSAC (Random Sample Consensus) for geometric verification
//!
//! Estimates the planar transform between two images from putative
//! correspondences contaminated by outliers.

use nalgebra::{DMatrix, Matrix3, Point2};
use pano_core::geometry::{hartley_normalization, normalize_homography, project_point};
use pano_core::{Correspondence, Ransac, RobustConfig, RobustModel, RobustResult, TransformKind};

/// Relative area below which three points count as collinear.
const COLLINEAR_EPS: f64 = 1e-6;

pub struct HomographyEstimator;

impl RobustModel<Correspondence> for HomographyEstimator {
    type Model = Matrix3<f64>;

    fn min_sample_size(&self) -> usize {
        4
    }

    fn estimate(&self, data: &[&Correspondence]) -> Option<Self::Model> {
        let src: Vec<Point2<f64>> = data.iter().map(|c| c.src).collect();
        let dst: Vec<Point2<f64>> = data.iter().map(|c| c.dst).collect();
        if has_collinear_triple(&src) || has_collinear_triple(&dst) {
            return None;
        }
        fit_homography(data)
    }

    fn compute_error(&self, model: &Self::Model, data: &Correspondence) -> f64 {
        transfer_error(model, data)
    }

    fn refine(&self, data: &[&Correspondence]) -> Option<Self::Model> {
        fit_homography(data)
    }
}

pub struct SimilarityEstimator;

impl RobustModel<Correspondence> for SimilarityEstimator {
    type Model = Matrix3<f64>;

    fn min_sample_size(&self) -> usize {
        2
    }

    fn estimate(&self, data: &[&Correspondence]) -> Option<Self::Model> {
        fit_similarity(data)
    }

    fn compute_error(&self, model: &Self::Model, data: &Correspondence) -> f64 {
        transfer_error(model, data)
    }
}

fn transfer_error(model: &Matrix3<f64>, data: &Correspondence) -> f64 {
    match project_point(model, &data.src) {
        Some(p) => (p - data.dst).norm(),
        None => f64::INFINITY,
    }
}

fn has_collinear_triple(points: &[Point2<f64>]) -> bool {
    let n = points.len();
    let scale = points
        .iter()
        .flat_map(|p| [p.x.abs(), p.y.abs()])
        .fold(1.0f64, f64::max);
    for a in 0..n {
        for b in a + 1..n {
            for c in b + 1..n {
                let u = points[b] - points[a];
                let v = points[c] - points[a];
                let area = (u.x * v.y - u.y * v.x).abs();
                if area <= COLLINEAR_EPS * scale * scale {
                    return true;
                }
            }
        }
    }
    false
}

/// Normalized DLT over any number (>= 4) of correspondences.
pub fn fit_homography(data: &[&Correspondence]) -> Option<Matrix3<f64>> {
    let n = data.len();
    if n < 4 {
        return None;
    }

    let src: Vec<Point2<f64>> = data.iter().map(|c| c.src).collect();
    let dst: Vec<Point2<f64>> = data.iter().map(|c| c.dst).collect();
    let t_src = hartley_normalization(&src);
    let t_dst = hartley_normalization(&dst);

    let rows = (2 * n).max(9);
    let mut a = DMatrix::<f64>::zeros(rows, 9);
    for (i, (s, d)) in src.iter().zip(dst.iter()).enumerate() {
        let s = project_point(&t_src, s)?;
        let d = project_point(&t_dst, d)?;
        let (x1, y1, x2, y2) = (s.x, s.y, d.x, d.y);
        let r = 2 * i;
        a[(r, 0)] = -x1;
        a[(r, 1)] = -y1;
        a[(r, 2)] = -1.0;
        a[(r, 6)] = x2 * x1;
        a[(r, 7)] = x2 * y1;
        a[(r, 8)] = x2;
        a[(r + 1, 3)] = -x1;
        a[(r + 1, 4)] = -y1;
        a[(r + 1, 5)] = -1.0;
        a[(r + 1, 6)] = y2 * x1;
        a[(r + 1, 7)] = y2 * y1;
        a[(r + 1, 8)] = y2;
    }

    // Null vector: right singular vector of the smallest singular value.
    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|x, y| x.1.total_cmp(y.1))?;
    let h = v_t.row(min_idx);
    let hn = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let t_dst_inv = t_dst.try_inverse()?;
    normalize_homography(&(t_dst_inv * hn * t_src))
}

/// Closed-form least-squares similarity (rotation, uniform scale, translation).
pub fn fit_similarity(data: &[&Correspondence]) -> Option<Matrix3<f64>> {
    let n = data.len();
    if n < 2 {
        return None;
    }
    let inv_n = 1.0 / n as f64;
    let (mut sx, mut sy, mut dx, mut dy) = (0.0, 0.0, 0.0, 0.0);
    for c in data {
        sx += c.src.x;
        sy += c.src.y;
        dx += c.dst.x;
        dy += c.dst.y;
    }
    let (sx, sy, dx, dy) = (sx * inv_n, sy * inv_n, dx * inv_n, dy * inv_n);

    let mut num_a = 0.0;
    let mut num_b = 0.0;
    let mut den = 0.0;
    for c in data {
        let (px, py) = (c.src.x - sx, c.src.y - sy);
        let (qx, qy) = (c.dst.x - dx, c.dst.y - dy);
        num_a += px * qx + py * qy;
        num_b += px * qy - py * qx;
        den += px * px + py * py;
    }
    if den < 1e-12 {
        return None;
    }
    let a = num_a / den;
    let b = num_b / den;
    if a * a + b * b < 1e-12 {
        return None;
    }
    let tx = dx - (a * sx - b * sy);
    let ty = dy - (b * sx + a * sy);
    Some(Matrix3::new(a, -b, tx, b, a, ty, 0.0, 0.0, 1.0))
}

/// RANSAC estimate of the transform mapping `src` onto `dst`.
pub fn estimate_transform(
    correspondences: &[Correspondence],
    kind: TransformKind,
    config: &RobustConfig,
) -> RobustResult<Matrix3<f64>> {
    match kind {
        TransformKind::Homography => Ransac::new(config.clone()).run(&HomographyEstimator, correspondences),
        TransformKind::Similarity => Ransac::new(config.clone()).run(&SimilarityEstimator, correspondences),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_correspondences(m: &Matrix3<f64>) -> Vec<Correspondence> {
        let mut out = Vec::new();
        for y in 0..6 {
            for x in 0..8 {
                let src = Point2::new(20.0 + x as f64 * 31.0, 15.0 + y as f64 * 27.0);
                let dst = project_point(m, &src).unwrap();
                out.push(Correspondence::new(src, dst));
            }
        }
        out
    }

    fn max_abs_diff(a: &Matrix3<f64>, b: &Matrix3<f64>) -> f64 {
        (a - b).amax()
    }

    #[test]
    fn dlt_recovers_exact_homography() {
        let h = Matrix3::new(0.9, 0.05, 30.0, -0.03, 1.1, -12.0, 2e-4, -1e-4, 1.0);
        let data = grid_correspondences(&h);
        let refs: Vec<&Correspondence> = data.iter().collect();
        let fit = fit_homography(&refs).unwrap();
        assert!(max_abs_diff(&fit, &h) < 1e-8);
        let minimal = fit_homography(&refs[..4]);
        assert!(minimal.is_some());
    }

    #[test]
    fn collinear_sample_is_rejected() {
        let data: Vec<Correspondence> = (0..4)
            .map(|i| {
                let p = Point2::new(i as f64 * 10.0, i as f64 * 5.0);
                Correspondence::new(p, p)
            })
            .collect();
        let refs: Vec<&Correspondence> = data.iter().collect();
        assert!(HomographyEstimator.estimate(&refs).is_none());
    }

    #[test]
    fn similarity_fit_is_exact() {
        let (s, t) = (1.3f64, 0.4f64);
        let m = Matrix3::new(s * t.cos(), -s * t.sin(), 5.0, s * t.sin(), s * t.cos(), -7.0, 0.0, 0.0, 1.0);
        let data = grid_correspondences(&m);
        let refs: Vec<&Correspondence> = data.iter().collect();
        let fit = fit_similarity(&refs).unwrap();
        assert!(max_abs_diff(&fit, &m) < 1e-9);
    }

    #[test]
    fn ransac_ignores_outliers() {
        let h = Matrix3::new(1.0, 0.0, 100.0, 0.0, 1.0, -3.0, 0.0, 0.0, 1.0);
        let mut data = grid_correspondences(&h);
        for (k, c) in data.iter_mut().enumerate().filter(|(k, _)| k % 5 == 0) {
            c.dst.x += 40.0 + k as f64;
            c.dst.y -= 25.0;
        }
        let config = RobustConfig::default().with_threshold(2.0).with_seed(3);
        let result = estimate_transform(&data, TransformKind::Homography, &config);
        let fit = result.model.unwrap();
        assert_eq!(result.num_inliers, 48 - 10);
        assert!(max_abs_diff(&fit, &h) < 1e-6);

        let sim = estimate_transform(&data, TransformKind::Similarity, &config);
        assert_eq!(sim.num_inliers, 38);
    }
}
