use nalgebra::{Matrix3, Point2};
use pano_core::geometry::{project_in_front, translation};
use pano_core::Transform;

use crate::{PhotoError, Result};

/// Axis-aligned bounds in reference-frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn of_points(points: &[Point2<f64>]) -> Option<Self> {
        let first = points.first()?;
        let mut b = Bounds {
            min_x: first.x,
            min_y: first.y,
            max_x: first.x,
            max_y: first.y,
        };
        for p in &points[1..] {
            b.min_x = b.min_x.min(p.x);
            b.min_y = b.min_y.min(p.y);
            b.max_x = b.max_x.max(p.x);
            b.max_y = b.max_y.max(p.y);
        }
        Some(b)
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }
}

/// Bounds of a `width x height` image after `transform`; `None` when a
/// corner lands behind the horizon.
pub fn warped_bounds(transform: &Transform, width: u32, height: u32) -> Option<Bounds> {
    let (w, h) = (width as f64, height as f64);
    let corners = [
        Point2::new(0.0, 0.0),
        Point2::new(w, 0.0),
        Point2::new(w, h),
        Point2::new(0.0, h),
    ];
    let mut projected = Vec::with_capacity(4);
    for c in &corners {
        let p = project_in_front(&transform.matrix, c)?;
        if !p.x.is_finite() || !p.y.is_finite() {
            return None;
        }
        projected.push(p);
    }
    Bounds::of_points(&projected)
}

/// Output frame: canvas pixel `(x, y)` sits at reference point
/// `(x + min_x, y + min_y)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canvas {
    pub min_x: i64,
    pub min_y: i64,
    pub width: u32,
    pub height: u32,
}

impl Canvas {
    /// Minimal integer box containing `bounds`, limited to `max_pixels`.
    pub fn fit(bounds: &Bounds, max_pixels: u64) -> Result<Self> {
        let min_x = bounds.min_x.floor();
        let min_y = bounds.min_y.floor();
        let width = bounds.max_x.ceil() - min_x;
        let height = bounds.max_y.ceil() - min_y;
        if !(width.is_finite() && height.is_finite()) || width < 1.0 || height < 1.0 {
            return Err(PhotoError::EmptyCanvas);
        }

        let too_large = |w: f64, h: f64| PhotoError::CanvasTooLarge {
            width: w as u64,
            height: h as u64,
            limit: max_pixels,
        };
        if width > u32::MAX as f64 || height > u32::MAX as f64 {
            return Err(too_large(width, height));
        }
        let (w, h) = (width as u64, height as u64);
        if w.saturating_mul(h) > max_pixels {
            return Err(too_large(width, height));
        }

        Ok(Self {
            min_x: min_x as i64,
            min_y: min_y as i64,
            width: w as u32,
            height: h as u32,
        })
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Reference frame to canvas pixels.
    pub fn to_canvas(&self) -> Matrix3<f64> {
        translation(-self.min_x as f64, -self.min_y as f64)
    }
}
