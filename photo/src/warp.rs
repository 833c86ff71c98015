use nalgebra::{Matrix3, Point2};
use pano_core::{project_point, BufferPool, Image, Transform};
use pano_imgproc::sample_rgba_bilinear;
use rayon::prelude::*;

use crate::canvas::{warped_bounds, Canvas};
use crate::{PhotoError, Result};

/// Lower bound of the edge feather so every covered pixel keeps some weight.
const MIN_FEATHER: f64 = 1e-3;

/// One image resampled into its bounding box on the canvas.
#[derive(Debug, Clone)]
pub struct WarpedLayer {
    pub image_index: usize,
    pub x0: u32,
    pub y0: u32,
    pub width: u32,
    pub height: u32,
    /// Interleaved RGB, `width * height * 3`.
    pub pixels: Vec<f32>,
    /// Feather weight per pixel; zero where the image does not cover it.
    pub weights: Vec<f32>,
}

impl WarpedLayer {
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x0 && y >= self.y0 && x < self.x0 + self.width && y < self.y0 + self.height
    }

    /// Offset of canvas pixel `(x, y)` within the layer, if inside its box.
    pub fn offset(&self, x: u32, y: u32) -> Option<usize> {
        self.contains(x, y)
            .then(|| ((y - self.y0) * self.width + (x - self.x0)) as usize)
    }

    pub fn weight_at(&self, x: u32, y: u32) -> f32 {
        self.offset(x, y).map_or(0.0, |o| self.weights[o])
    }

    pub fn rgb_at(&self, x: u32, y: u32) -> Option<[f32; 3]> {
        let o = self.offset(x, y)?;
        (self.weights[o] > 0.0).then(|| [self.pixels[3 * o], self.pixels[3 * o + 1], self.pixels[3 * o + 2]])
    }

    pub fn apply_gain(&mut self, gain: f32) {
        self.pixels
            .par_iter_mut()
            .for_each(|v| *v = (*v * gain).clamp(0.0, 255.0));
    }

    /// Hands the scratch buffers back to the global pool.
    pub fn recycle(self) {
        let pool = BufferPool::global();
        pool.return_buffer(self.pixels);
        pool.return_buffer(self.weights);
    }
}

/// Product of the normalised distances of `(x, y)` to the image edges: one at
/// the centre, falling towards the border.
pub fn feather_weight(x: f64, y: f64, width: u32, height: u32) -> f32 {
    let edge = |v: f64, size: u32| {
        let size = size as f64;
        let d = (v + 0.5).min(size - 0.5 - v);
        (d / (size / 2.0)).clamp(MIN_FEATHER, 1.0)
    };
    (edge(x, width) * edge(y, height)) as f32
}

/// Warps `image` onto `canvas` through `transform` (image to reference frame).
pub fn warp_image(image: &Image, transform: &Transform, canvas: &Canvas) -> Result<WarpedLayer> {
    let degenerate = || PhotoError::DegenerateWarp(image.index());
    let to_canvas: Matrix3<f64> = canvas.to_canvas() * transform.matrix;
    let bounds = warped_bounds(&Transform::new(to_canvas, transform.kind), image.width(), image.height())
        .ok_or_else(degenerate)?;
    let inverse = to_canvas.try_inverse().ok_or_else(degenerate)?;

    let x0 = bounds.min_x.floor().max(0.0) as u32;
    let y0 = bounds.min_y.floor().max(0.0) as u32;
    let x1 = (bounds.max_x.ceil().max(0.0) as u32).min(canvas.width);
    let y1 = (bounds.max_y.ceil().max(0.0) as u32).min(canvas.height);
    let width = x1.saturating_sub(x0);
    let height = y1.saturating_sub(y0);

    let pool = BufferPool::global();
    let mut pixels = pool.get(width as usize * height as usize * 3);
    let mut weights = pool.get(width as usize * height as usize);
    if width == 0 || height == 0 {
        return Ok(WarpedLayer {
            image_index: image.index(),
            x0,
            y0,
            width,
            height,
            pixels,
            weights,
        });
    }

    let src = image.pixels();
    let (sw, sh) = (image.width(), image.height());
    pixels
        .par_chunks_mut(width as usize * 3)
        .zip(weights.par_chunks_mut(width as usize))
        .enumerate()
        .for_each(|(row, (rgb_row, weight_row))| {
            let cy = (y0 + row as u32) as f64;
            for col in 0..width as usize {
                let cx = (x0 + col as u32) as f64;
                let Some(s) = project_point(&inverse, &Point2::new(cx, cy)) else {
                    continue;
                };
                let Some(sample) = sample_rgba_bilinear(src, s.x, s.y) else {
                    continue;
                };
                let alpha = sample[3] / 255.0;
                if alpha <= 0.0 {
                    continue;
                }
                rgb_row[3 * col..3 * col + 3].copy_from_slice(&sample[..3]);
                weight_row[col] = feather_weight(s.x, s.y, sw, sh) * alpha;
            }
        });

    Ok(WarpedLayer {
        image_index: image.index(),
        x0,
        y0,
        width,
        height,
        pixels,
        weights,
    })
}
