//! ORB (Oriented FAST and Rotated BRIEF) implementation
//!
//! FAST-9 corners ranked by the Harris measure and spread over a grid,
//! oriented by the intensity centroid and described by a steered BRIEF test
//! pattern. The pattern comes from a fixed-seed generator so descriptors are
//! comparable across images, processes and runs.

use std::sync::OnceLock;

use pano_core::{Descriptor, Descriptors, GrayImage, KeyPoint, KeyPoints, DESCRIPTOR_BITS};
use pano_imgproc::{build_pyramid, gaussian_blur, ScaleMap};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::descriptor::DescriptorExtractor;
use crate::fast::fast_detect;
use crate::harris::HarrisScorer;
use crate::{FeatureError, Result};

const PATTERN_SEED: u64 = 0x0B1F_5EED;
/// Radius of the orientation patch.
const PATCH_RADIUS: i32 = 15;
/// Test points lie within this radius so any rotation stays inside the patch.
const PATTERN_RADIUS: f32 = 13.0;
const HARRIS_BLOCK: u32 = 7;
const DESCRIPTOR_SIGMA: f32 = 2.0;

/// ORB feature detector and descriptor
#[derive(Debug, Clone)]
pub struct Orb {
    n_features: usize,
    scale_factor: f64,
    n_levels: u32,
    edge_threshold: u32,
    fast_threshold: u8,
    grid_cols: u32,
    grid_rows: u32,
    blur_sigma: f32,
    harris_k: f64,
}

impl Default for Orb {
    fn default() -> Self {
        Self {
            n_features: 500,
            scale_factor: 1.25,
            n_levels: 3,
            edge_threshold: 19,
            fast_threshold: 20,
            grid_cols: 8,
            grid_rows: 6,
            blur_sigma: 1.0,
            harris_k: 0.04,
        }
    }
}

impl Orb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_n_features(mut self, n: usize) -> Self {
        self.n_features = n;
        self
    }

    pub fn with_n_levels(mut self, n: u32) -> Self {
        self.n_levels = n.max(1);
        self
    }

    pub fn with_scale_factor(mut self, factor: f64) -> Self {
        self.scale_factor = factor;
        self
    }

    pub fn with_fast_threshold(mut self, threshold: u8) -> Self {
        self.fast_threshold = threshold;
        self
    }

    pub fn with_grid(mut self, cols: u32, rows: u32) -> Self {
        self.grid_cols = cols.max(1);
        self.grid_rows = rows.max(1);
        self
    }

    pub fn with_blur_sigma(mut self, sigma: f32) -> Self {
        self.blur_sigma = sigma;
        self
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Smallest image side that can hold one descriptor window.
    pub fn min_image_size(&self) -> u32 {
        2 * self.edge_threshold + 1
    }

    /// Keypoint budget per pyramid level, decaying geometrically with scale.
    fn level_quotas(&self, levels: usize) -> Vec<usize> {
        if levels <= 1 || self.scale_factor <= 1.0 {
            return vec![self.n_features];
        }
        let f = 1.0 / self.scale_factor;
        let mut desired = self.n_features as f64 * (1.0 - f) / (1.0 - f.powi(levels as i32));
        let mut quotas = Vec::with_capacity(levels);
        let mut assigned = 0usize;
        for _ in 0..levels - 1 {
            let q = (desired.round() as usize).min(self.n_features - assigned);
            quotas.push(q);
            assigned += q;
            desired *= f;
        }
        quotas.push(self.n_features - assigned);
        quotas
    }

    fn process_level(
        &self,
        level: usize,
        image: &GrayImage,
        base_size: (u32, u32),
        quota: usize,
    ) -> Vec<(KeyPoint, Descriptor)> {
        if quota == 0 || image.width() < self.min_image_size() || image.height() < self.min_image_size() {
            return Vec::new();
        }

        let smoothed = gaussian_blur(image, self.blur_sigma);
        let mut candidates = fast_detect(&smoothed, self.fast_threshold, self.edge_threshold);
        let harris = HarrisScorer::new(&smoothed, HARRIS_BLOCK, self.harris_k);
        for kp in &mut candidates.keypoints {
            kp.response = harris.response(kp.x as i32, kp.y as i32);
        }

        let selected = self.retain_best(candidates, image.width(), image.height(), quota);
        if selected.is_empty() {
            return Vec::new();
        }

        let textured = gaussian_blur(image, DESCRIPTOR_SIGMA);
        let pattern = brief_pattern();
        let map = ScaleMap::between(base_size.0, base_size.1, image.width(), image.height());
        let scale = (map.sx + map.sy) / 2.0;

        selected
            .iter()
            .map(|kp| {
                let x = kp.x as i32;
                let y = kp.y as i32;
                let angle = intensity_centroid_angle(&smoothed, x, y);
                let descriptor = steered_brief(&textured, x, y, angle, pattern);
                let base = map.to_source(&kp.pt());
                let mapped = KeyPoint::new(base.x, base.y)
                    .with_size((2 * PATCH_RADIUS + 1) as f64 * scale)
                    .with_angle(angle)
                    .with_response(kp.response)
                    .with_octave(level as i32);
                (mapped, descriptor)
            })
            .collect()
    }

    /// Strongest keypoints first, at most `ceil(quota / cells)` per grid cell,
    /// then topped up from the remainder in response order.
    fn retain_best(&self, mut keypoints: KeyPoints, width: u32, height: u32, quota: usize) -> Vec<KeyPoint> {
        keypoints.sort_by_response();
        let kps = keypoints.keypoints;
        if kps.len() <= quota {
            return kps;
        }

        let cells = (self.grid_cols * self.grid_rows) as usize;
        let cap = quota.div_ceil(cells).max(1);
        let mut counts = vec![0usize; cells];
        let mut taken = vec![false; kps.len()];
        let mut out = Vec::with_capacity(quota);

        for (i, kp) in kps.iter().enumerate() {
            let cx = ((kp.x as u32 * self.grid_cols) / width).min(self.grid_cols - 1);
            let cy = ((kp.y as u32 * self.grid_rows) / height).min(self.grid_rows - 1);
            let cell = (cy * self.grid_cols + cx) as usize;
            if counts[cell] < cap {
                counts[cell] += 1;
                taken[i] = true;
                out.push(*kp);
                if out.len() == quota {
                    return out;
                }
            }
        }

        for (i, kp) in kps.iter().enumerate() {
            if out.len() == quota {
                break;
            }
            if !taken[i] {
                out.push(*kp);
            }
        }
        out
    }
}

impl DescriptorExtractor for Orb {
    fn detect_and_compute(&self, image: &GrayImage) -> Result<(KeyPoints, Descriptors)> {
        let (width, height) = image.dimensions();
        let min_size = self.min_image_size();
        if width < min_size || height < min_size {
            return Err(FeatureError::ImageTooSmall {
                width,
                height,
                min_size,
            });
        }

        let pyramid = build_pyramid(image, self.n_levels, self.scale_factor);
        let quotas = self.level_quotas(pyramid.len());

        let levels: Vec<Vec<(KeyPoint, Descriptor)>> = pyramid
            .par_iter()
            .zip(quotas.par_iter())
            .enumerate()
            .map(|(level, (img, &quota))| self.process_level(level, img, (width, height), quota))
            .collect();

        let mut keypoints = KeyPoints::with_capacity(self.n_features);
        let mut descriptors = Descriptors::with_capacity(self.n_features);
        for (kp, desc) in levels.into_iter().flatten() {
            keypoints.push(kp);
            descriptors.push(desc);
        }

        if keypoints.is_empty() {
            return Err(FeatureError::NoKeypoints);
        }
        Ok((keypoints, descriptors))
    }
}

/// Orientation in degrees `[0, 360)` from the first moments of a circular patch.
fn intensity_centroid_angle(image: &GrayImage, x: i32, y: i32) -> f64 {
    let width = image.width() as i32;
    let raw = image.as_raw();
    let r2 = PATCH_RADIUS * PATCH_RADIUS;
    let mut m01 = 0i64;
    let mut m10 = 0i64;

    for dy in -PATCH_RADIUS..=PATCH_RADIUS {
        for dx in -PATCH_RADIUS..=PATCH_RADIUS {
            if dx * dx + dy * dy > r2 {
                continue;
            }
            let v = raw[((y + dy) * width + (x + dx)) as usize] as i64;
            m10 += v * dx as i64;
            m01 += v * dy as i64;
        }
    }

    let angle = (m01 as f64).atan2(m10 as f64).to_degrees();
    if angle < 0.0 {
        angle + 360.0
    } else {
        angle
    }
}

fn steered_brief(image: &GrayImage, x: i32, y: i32, angle_deg: f64, pattern: &[[f32; 4]]) -> Descriptor {
    let width = image.width() as i32;
    let raw = image.as_raw();
    let (sin_a, cos_a) = (angle_deg.to_radians() as f32).sin_cos();
    let at = |px: f32, py: f32| -> u8 {
        let rx = (cos_a * px - sin_a * py).round() as i32;
        let ry = (sin_a * px + cos_a * py).round() as i32;
        raw[((y + ry) * width + (x + rx)) as usize]
    };

    let mut descriptor = Descriptor::zeros();
    for (bit, p) in pattern.iter().enumerate() {
        if at(p[0], p[1]) < at(p[2], p[3]) {
            descriptor.set_bit(bit);
        }
    }
    descriptor
}

/// The 256 BRIEF point pairs `[x1, y1, x2, y2]`, identical in every process.
pub fn brief_pattern() -> &'static [[f32; 4]] {
    static PATTERN: OnceLock<Vec<[f32; 4]>> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
        let mut point = || loop {
            let px = rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS).round();
            let py = rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS).round();
            if px * px + py * py <= PATTERN_RADIUS * PATTERN_RADIUS {
                return (px, py);
            }
        };

        let mut pairs = Vec::with_capacity(DESCRIPTOR_BITS);
        while pairs.len() < DESCRIPTOR_BITS {
            let (x1, y1) = point();
            let (x2, y2) = point();
            if (x1, y1) != (x2, y2) {
                pairs.push([x1, y1, x2, y2]);
            }
        }
        pairs
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pano_imgproc::rgba_to_gray;
    use pano_imgproc::synthetic::textured_scene;

    fn scene_gray() -> GrayImage {
        rgba_to_gray(&textured_scene(160, 120, 21))
    }

    #[test]
    fn pattern_is_stable_and_bounded() {
        let a = brief_pattern();
        assert_eq!(a.len(), DESCRIPTOR_BITS);
        assert!(a
            .iter()
            .all(|p| p.iter().all(|v| v.abs() <= PATTERN_RADIUS)));
        assert!(std::ptr::eq(a, brief_pattern()));
    }

    #[test]
    fn level_quotas_sum_to_budget() {
        let orb = Orb::new().with_n_features(500).with_n_levels(4);
        let quotas = orb.level_quotas(4);
        assert_eq!(quotas.iter().sum::<usize>(), 500);
        assert!(quotas[0] > quotas[3]);
        assert_eq!(Orb::new().with_n_levels(1).level_quotas(1), vec![500]);
    }

    #[test]
    fn detects_textured_scene_within_budget() {
        let orb = Orb::new().with_n_features(300);
        let (kps, descs) = orb.detect_and_compute(&scene_gray()).unwrap();
        assert_eq!(kps.len(), descs.len());
        assert!(kps.len() > 50, "only {} keypoints", kps.len());
        assert!(kps.len() <= 300);
        assert!(kps.iter().all(|k| (0.0..=360.0).contains(&k.angle)));
    }

    #[test]
    fn extraction_is_deterministic() {
        let orb = Orb::new();
        let img = scene_gray();
        let (k1, d1) = orb.detect_and_compute(&img).unwrap();
        let (k2, d2) = orb.detect_and_compute(&img).unwrap();
        assert_eq!(k1.keypoints, k2.keypoints);
        assert_eq!(d1.descriptors, d2.descriptors);
    }

    #[test]
    fn tiny_image_is_rejected() {
        let img = GrayImage::new(30, 100);
        assert_eq!(
            Orb::new().detect_and_compute(&img).unwrap_err(),
            FeatureError::ImageTooSmall {
                width: 30,
                height: 100,
                min_size: 39
            }
        );
    }

    #[test]
    fn flat_image_has_no_keypoints() {
        let img = GrayImage::from_pixel(64, 64, image::Luma([90]));
        assert_eq!(
            Orb::new().detect_and_compute(&img).unwrap_err(),
            FeatureError::NoKeypoints
        );
    }

    #[test]
    fn grid_spreads_keypoints() {
        let orb = Orb::new().with_grid(2, 1);
        let mut kps = KeyPoints::new();
        // strong corners all on the left half, weak ones on the right
        for i in 0..10 {
            kps.push(KeyPoint::new(5.0 + i as f64, 10.0).with_response(100.0 - i as f64));
            kps.push(KeyPoint::new(60.0 + i as f64, 10.0).with_response(1.0 - i as f64 * 0.01));
        }
        let kept = orb.retain_best(kps, 100, 50, 4);
        assert_eq!(kept.len(), 4);
        assert_eq!(kept.iter().filter(|k| k.x >= 50.0).count(), 2);
    }
}
