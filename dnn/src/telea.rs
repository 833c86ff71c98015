//! Model-free border completion by fast marching (Telea, 2004).
//!
//! Pixels under [`fill_mask`] are filled in order of their distance from the
//! known region. Each new pixel is a weighted mean of the already-known pixels
//! within `radius`, favouring close pixels on the same level set and along the
//! marching direction.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use image::{GrayImage, Rgba, RgbaImage};
use tracing::debug;

use crate::mask::{fill_mask, mask_is_empty};
use crate::{Inference, Result};

pub const DEFAULT_INPAINT_RADIUS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flag {
    Known,
    Band,
    Inside,
}

#[derive(Debug, Clone, Copy)]
struct Front {
    t: f32,
    index: usize,
}

impl Ord for Front {
    // min-heap on arrival time, ties in raster order
    fn cmp(&self, other: &Self) -> Ordering {
        other.t.total_cmp(&self.t).then_with(|| other.index.cmp(&self.index))
    }
}

impl PartialOrd for Front {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Front {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Front {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeleaInpainter {
    radius: u32,
}

impl Default for TeleaInpainter {
    fn default() -> Self {
        Self::new(DEFAULT_INPAINT_RADIUS)
    }
}

impl TeleaInpainter {
    pub fn new(radius: u32) -> Self {
        Self { radius: radius.max(1) }
    }

    pub fn radius(&self) -> u32 {
        self.radius
    }
}

impl Inference for TeleaInpainter {
    fn name(&self) -> &str {
        "telea"
    }

    fn infer(&self, image: &RgbaImage) -> Result<RgbaImage> {
        let mask = fill_mask(image);
        if mask_is_empty(&mask) {
            debug!("nothing to inpaint");
            return Ok(image.clone());
        }
        Ok(fast_march_inpaint(image, &mask, self.radius))
    }
}

fn neighbours(p: usize, w: usize, h: usize) -> impl Iterator<Item = usize> {
    let (x, y) = (p % w, p / w);
    [
        (x > 0).then(|| p - 1),
        (x + 1 < w).then(|| p + 1),
        (y > 0).then(|| p - w),
        (y + 1 < h).then(|| p + w),
    ]
    .into_iter()
    .flatten()
}

struct March {
    w: usize,
    h: usize,
    flags: Vec<Flag>,
    t: Vec<f32>,
}

impl March {
    fn known_t(&self, q: Option<usize>) -> f32 {
        q.filter(|&q| self.flags[q] == Flag::Known)
            .map_or(f32::INFINITY, |q| self.t[q])
    }

    /// First-order upwind solution of `|∇T| = 1` at `p`.
    fn arrival(&self, p: usize) -> f32 {
        let (x, y) = (p % self.w, p / self.w);
        let a = self
            .known_t((x > 0).then(|| p - 1))
            .min(self.known_t((x + 1 < self.w).then(|| p + 1)));
        let b = self
            .known_t((y > 0).then(|| p - self.w))
            .min(self.known_t((y + 1 < self.h).then(|| p + self.w)));
        match (a.is_finite(), b.is_finite()) {
            (true, true) if (a - b).abs() < 1.0 => {
                let d = a - b;
                (a + b + (2.0 - d * d).sqrt()) * 0.5
            }
            (false, false) => f32::INFINITY,
            _ => a.min(b) + 1.0,
        }
    }

    fn gradient(&self, p: usize) -> (f32, f32) {
        let (x, y) = (p % self.w, p / self.w);
        let t = |q: Option<usize>| q.filter(|&q| self.flags[q] != Flag::Inside).map(|q| self.t[q]);
        let diff = |prev: Option<f32>, next: Option<f32>| match (prev, next) {
            (Some(a), Some(b)) => (b - a) * 0.5,
            (None, Some(b)) => b - self.t[p],
            (Some(a), None) => self.t[p] - a,
            (None, None) => 0.0,
        };
        (
            diff(t((x > 0).then(|| p - 1)), t((x + 1 < self.w).then(|| p + 1))),
            diff(t((y > 0).then(|| p - self.w)), t((y + 1 < self.h).then(|| p + self.w))),
        )
    }

    fn fill(&self, p: usize, radius: u32, out: &RgbaImage) -> Rgba<u8> {
        let (px, py) = ((p % self.w) as i64, (p / self.w) as i64);
        let (gx, gy) = self.gradient(p);
        let r = radius as i64;
        let mut acc = [0.0f32; 3];
        let mut total = 0.0f32;

        for qy in (py - r).max(0)..=(py + r).min(self.h as i64 - 1) {
            for qx in (px - r).max(0)..=(px + r).min(self.w as i64 - 1) {
                let q = qy as usize * self.w + qx as usize;
                if q == p || self.flags[q] == Flag::Inside {
                    continue;
                }
                let (dx, dy) = ((px - qx) as f32, (py - qy) as f32);
                let d2 = dx * dx + dy * dy;
                if d2 > (r * r) as f32 {
                    continue;
                }
                let dir = ((dx * gx + dy * gy) / d2.sqrt()).abs().max(1e-6);
                let lev = 1.0 / (1.0 + (self.t[q] - self.t[p]).abs());
                let weight = dir * lev / d2;

                let c = out.get_pixel(qx as u32, qy as u32);
                for (a, &v) in acc.iter_mut().zip(&c.0[..3]) {
                    *a += weight * v as f32;
                }
                total += weight;
            }
        }

        let current = out.get_pixel(px as u32, py as u32);
        if total <= 0.0 {
            return Rgba([current[0], current[1], current[2], 255]);
        }
        let channel = |a: f32| (a / total).round().clamp(0.0, 255.0) as u8;
        Rgba([channel(acc[0]), channel(acc[1]), channel(acc[2]), 255])
    }
}

/// Fills every pixel where `mask` is non-zero. Pixels outside the mask are
/// copied unchanged.
pub fn fast_march_inpaint(image: &RgbaImage, mask: &GrayImage, radius: u32) -> RgbaImage {
    let mut out = image.clone();
    let (w, h) = (image.width() as usize, image.height() as usize);
    let flags: Vec<Flag> = mask
        .pixels()
        .map(|m| if m[0] > 0 { Flag::Inside } else { Flag::Known })
        .collect();
    if !flags.contains(&Flag::Known) {
        debug!("no known pixels to sample from");
        return out;
    }
    let t = flags
        .iter()
        .map(|&f| if f == Flag::Known { 0.0 } else { f32::INFINITY })
        .collect();
    let mut march = March { w, h, flags, t };

    let mut heap = BinaryHeap::new();
    for p in 0..w * h {
        if march.flags[p] == Flag::Known && neighbours(p, w, h).any(|n| march.flags[n] == Flag::Inside) {
            march.flags[p] = Flag::Band;
            heap.push(Front { t: 0.0, index: p });
        }
    }

    let mut filled = 0usize;
    while let Some(Front { index, .. }) = heap.pop() {
        if march.flags[index] == Flag::Known {
            continue;
        }
        march.flags[index] = Flag::Known;

        for n in neighbours(index, w, h) {
            match march.flags[n] {
                Flag::Known => {}
                Flag::Inside => {
                    march.flags[n] = Flag::Band;
                    march.t[n] = march.arrival(n);
                    let value = march.fill(n, radius, &out);
                    out.put_pixel((n % w) as u32, (n / w) as u32, value);
                    heap.push(Front { t: march.t[n], index: n });
                    filled += 1;
                }
                Flag::Band => {
                    let arrival = march.arrival(n);
                    if arrival < march.t[n] {
                        march.t[n] = arrival;
                        heap.push(Front { t: arrival, index: n });
                    }
                }
            }
        }
    }

    debug!(filled, radius, "fast marching inpainting done");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn flat_image_hole_takes_surrounding_colour() {
        let mut img = RgbaImage::from_pixel(30, 30, Rgba([90, 120, 60, 255]));
        for y in 12..18 {
            for x in 12..18 {
                img.put_pixel(x, y, Rgba([0, 0, 0, 0]));
            }
        }
        let out = TeleaInpainter::default().infer(&img).unwrap();
        assert!(out.pixels().all(|p| *p == Rgba([90, 120, 60, 255])));
    }

    #[test]
    fn complete_image_is_unchanged() {
        let img = RgbaImage::from_fn(16, 12, |x, y| Rgba([(x * 10) as u8, (y * 15) as u8, 40, 255]));
        let out = TeleaInpainter::default().infer(&img).unwrap();
        assert_eq!(out, img);
    }

    #[test]
    fn fill_follows_the_nearest_side() {
        let (w, h) = (40, 20);
        let mut img = RgbaImage::from_fn(w, h, |x, _| {
            if x < 20 {
                Rgba([200, 0, 0, 255])
            } else {
                Rgba([0, 0, 200, 255])
            }
        });
        for y in 0..h {
            for x in 18..22 {
                img.put_pixel(x, y, Rgba([0, 0, 0, 0]));
            }
        }
        let mask = fill_mask(&img);
        let out = TeleaInpainter::default().infer(&img).unwrap();

        let masked: Vec<u32> = (0..w).filter(|&x| mask.get_pixel(x, 10)[0] > 0).collect();
        let (first, last) = (masked[0], masked[masked.len() - 1]);
        let near_left = out.get_pixel(first, 10);
        let near_right = out.get_pixel(last, 10);
        assert!(near_left[0] > near_left[2], "{near_left:?}");
        assert!(near_right[2] > near_right[0], "{near_right:?}");
        assert!(out.pixels().all(|p| p[3] == 255));
        // outside the mask nothing moves
        assert_eq!(out.get_pixel(2, 10), img.get_pixel(2, 10));
        assert_eq!(out.get_pixel(37, 10), img.get_pixel(37, 10));
    }

    #[test]
    fn fully_masked_image_is_returned_as_is() {
        let img = RgbaImage::from_pixel(8, 8, Rgba([5, 6, 7, 255]));
        let mask = GrayImage::from_pixel(8, 8, Luma([255]));
        assert_eq!(fast_march_inpaint(&img, &mask, 3), img);
    }

    #[test]
    fn radius_is_at_least_one() {
        assert_eq!(TeleaInpainter::new(0).radius(), 1);
        assert_eq!(TeleaInpainter::default().radius(), DEFAULT_INPAINT_RADIUS);
    }
}
