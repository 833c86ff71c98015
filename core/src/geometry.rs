//! Planar transforms between image frames.
//!
//! Every matrix is stored normalized so that `m[(2, 2)] == 1`. For a pair
//! `(i, j)` the estimated transform maps points of image `j` into image `i`.

use nalgebra::{Matrix3, Point2, Vector3};

const EPS: f64 = 1e-12;

/// Largest accepted linear scale change between two images.
pub const MAX_SCALE_CHANGE: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransformKind {
    /// Full 8-DOF projective transform.
    #[default]
    Homography,
    /// Rotation, uniform scale and translation (4 DOF).
    Similarity,
}

impl TransformKind {
    /// Correspondences needed by the minimal solver.
    pub fn min_samples(&self) -> usize {
        match self {
            TransformKind::Homography => 4,
            TransformKind::Similarity => 2,
        }
    }

    pub fn num_params(&self) -> usize {
        match self {
            TransformKind::Homography => 8,
            TransformKind::Similarity => 4,
        }
    }
}

/// A point pair `src -> dst` that a transform should map onto each other.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub src: Point2<f64>,
    pub dst: Point2<f64>,
}

impl Correspondence {
    pub fn new(src: Point2<f64>, dst: Point2<f64>) -> Self {
        Self { src, dst }
    }

    pub fn swapped(&self) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub matrix: Matrix3<f64>,
    pub kind: TransformKind,
    pub valid: bool,
    pub inliers: usize,
}

impl Transform {
    pub fn identity(kind: TransformKind) -> Self {
        Self {
            matrix: Matrix3::identity(),
            kind,
            valid: true,
            inliers: 0,
        }
    }

    pub fn invalid(kind: TransformKind) -> Self {
        Self {
            valid: false,
            ..Self::identity(kind)
        }
    }

    /// Wraps `matrix`, normalizing it to `h33 = 1`. Unnormalizable matrices are marked invalid.
    pub fn new(matrix: Matrix3<f64>, kind: TransformKind) -> Self {
        match normalize_homography(&matrix) {
            Some(matrix) => Self {
                matrix,
                kind,
                valid: true,
                inliers: 0,
            },
            None => Self::invalid(kind),
        }
    }

    pub fn with_inliers(mut self, inliers: usize) -> Self {
        self.inliers = inliers;
        self
    }

    pub fn apply(&self, p: &Point2<f64>) -> Option<Point2<f64>> {
        project_point(&self.matrix, p)
    }

    pub fn inverse(&self) -> Option<Transform> {
        let inv = self.matrix.try_inverse()?;
        let matrix = normalize_homography(&inv)?;
        Some(Self {
            matrix,
            kind: self.kind,
            valid: self.valid,
            inliers: self.inliers,
        })
    }

    /// `self ∘ rhs`: applies `rhs` first.
    pub fn compose(&self, rhs: &Transform) -> Option<Transform> {
        let matrix = normalize_homography(&(self.matrix * rhs.matrix))?;
        Some(Self {
            matrix,
            kind: self.kind,
            valid: self.valid && rhs.valid,
            inliers: self.inliers.min(rhs.inliers),
        })
    }

    /// Rejects transforms that flip orientation, change scale beyond
    /// [`MAX_SCALE_CHANGE`], fold the image quad or push a corner of a
    /// `width x height` image behind the horizon.
    pub fn is_degenerate(&self, width: u32, height: u32) -> bool {
        let m = &self.matrix;
        let det = m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)];
        let max_area = MAX_SCALE_CHANGE * MAX_SCALE_CHANGE;
        if !det.is_finite() || det <= 1.0 / max_area || det >= max_area {
            return true;
        }

        let w = width as f64;
        let h = height as f64;
        let corners = [
            Point2::new(0.0, 0.0),
            Point2::new(w, 0.0),
            Point2::new(w, h),
            Point2::new(0.0, h),
        ];
        let mut projected = [Point2::origin(); 4];
        for (dst, c) in projected.iter_mut().zip(corners.iter()) {
            match project_in_front(m, c) {
                Some(p) => *dst = p,
                None => return true,
            }
        }

        // Projected quad must stay convex with the same winding as the source.
        (0..4).any(|k| {
            let a = projected[k];
            let b = projected[(k + 1) % 4];
            let c = projected[(k + 2) % 4];
            let cross = (b.x - a.x) * (c.y - b.y) - (b.y - a.y) * (c.x - b.x);
            cross <= 0.0
        })
    }
}

/// Applies `m` to `p`. `None` when the point maps to infinity.
pub fn project_point(m: &Matrix3<f64>, p: &Point2<f64>) -> Option<Point2<f64>> {
    let v = m * Vector3::new(p.x, p.y, 1.0);
    if v.z.abs() < EPS || !v.z.is_finite() {
        return None;
    }
    Some(Point2::new(v.x / v.z, v.y / v.z))
}

/// Like [`project_point`] but also rejects points behind the projective horizon.
pub fn project_in_front(m: &Matrix3<f64>, p: &Point2<f64>) -> Option<Point2<f64>> {
    let v = m * Vector3::new(p.x, p.y, 1.0);
    if v.z <= EPS || !v.z.is_finite() {
        return None;
    }
    Some(Point2::new(v.x / v.z, v.y / v.z))
}

pub fn normalize_homography(m: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let s = m[(2, 2)];
    if s.abs() < EPS || !s.is_finite() {
        return None;
    }
    let n = m / s;
    n.iter().all(|v| v.is_finite()).then_some(n)
}

/// Similarity that moves the centroid of `points` to the origin and scales
/// their mean distance to `sqrt(2)`.
pub fn hartley_normalization(points: &[Point2<f64>]) -> Matrix3<f64> {
    if points.is_empty() {
        return Matrix3::identity();
    }
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    let (cx, cy) = (sx / n, sy / n);
    let mean_dist = points
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    let scale = if mean_dist > EPS {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    Matrix3::new(
        scale,
        0.0,
        -scale * cx,
        0.0,
        scale,
        -scale * cy,
        0.0,
        0.0,
        1.0,
    )
}

pub fn translation(tx: f64, ty: f64) -> Matrix3<f64> {
    Matrix3::new(1.0, 0.0, tx, 0.0, 1.0, ty, 0.0, 0.0, 1.0)
}

pub fn scaling(s: f64) -> Matrix3<f64> {
    Matrix3::new(s, 0.0, 0.0, 0.0, s, 0.0, 0.0, 0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_translation() {
        let t = Transform::new(translation(5.0, -2.0), TransformKind::Similarity);
        let p = t.apply(&Point2::new(1.0, 1.0)).unwrap();
        assert!((p.x - 6.0).abs() < 1e-12 && (p.y + 1.0).abs() < 1e-12);
    }

    #[test]
    fn new_normalizes_scale() {
        let t = Transform::new(Matrix3::identity() * 4.0, TransformKind::Homography);
        assert!(t.valid);
        assert_eq!(t.matrix, Matrix3::identity());
    }

    #[test]
    fn zero_h33_is_invalid() {
        let mut m = Matrix3::identity();
        m[(2, 2)] = 0.0;
        assert!(!Transform::new(m, TransformKind::Homography).valid);
    }

    #[test]
    fn inverse_composes_to_identity() {
        let m = Matrix3::new(1.1, 0.05, 12.0, -0.02, 0.95, 3.0, 1e-4, -2e-4, 1.0);
        let t = Transform::new(m, TransformKind::Homography);
        let id = t.compose(&t.inverse().unwrap()).unwrap();
        assert!((id.matrix - Matrix3::identity()).amax() < 1e-9);
    }

    #[test]
    fn mirrored_transform_is_degenerate() {
        let m = Matrix3::new(-1.0, 0.0, 100.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0);
        let t = Transform::new(m, TransformKind::Homography);
        assert!(t.is_degenerate(100, 100));
        assert!(!Transform::identity(TransformKind::Homography).is_degenerate(100, 100));
    }

    #[test]
    fn horizon_crossing_is_degenerate() {
        let m = Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, -0.02, 0.0, 1.0);
        let t = Transform::new(m, TransformKind::Homography);
        assert!(t.is_degenerate(100, 100));
    }

    #[test]
    fn hartley_normalization_centers_points() {
        let pts = vec![
            Point2::new(10.0, 10.0),
            Point2::new(20.0, 10.0),
            Point2::new(20.0, 20.0),
            Point2::new(10.0, 20.0),
        ];
        let t = hartley_normalization(&pts);
        let mapped: Vec<_> = pts.iter().map(|p| project_point(&t, p).unwrap()).collect();
        let cx: f64 = mapped.iter().map(|p| p.x).sum::<f64>() / 4.0;
        let mean: f64 = mapped.iter().map(|p| p.coords.norm()).sum::<f64>() / 4.0;
        assert!(cx.abs() < 1e-12);
        assert!((mean - std::f64::consts::SQRT_2).abs() < 1e-12);
    }
}
