use image::imageops::{self, FilterType};
use image::{GrayImage, RgbaImage};
use nalgebra::Point2;
use rayon::prelude::*;

use crate::geometry::Interpolation;

/// Per-axis factor between a resized image and its source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleMap {
    pub sx: f64,
    pub sy: f64,
}

impl ScaleMap {
    pub fn identity() -> Self {
        Self { sx: 1.0, sy: 1.0 }
    }

    pub fn between(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> Self {
        Self {
            sx: src_w as f64 / dst_w.max(1) as f64,
            sy: src_h as f64 / dst_h.max(1) as f64,
        }
    }

    /// Maps a pixel-centre coordinate of the resized image back to the source.
    pub fn to_source(&self, p: &Point2<f64>) -> Point2<f64> {
        Point2::new((p.x + 0.5) * self.sx - 0.5, (p.y + 0.5) * self.sy - 0.5)
    }

    pub fn is_identity(&self) -> bool {
        self.sx == 1.0 && self.sy == 1.0
    }
}

pub fn resize(src: &GrayImage, width: u32, height: u32, interpolation: Interpolation) -> GrayImage {
    if width == 0 || height == 0 || src.width() == 0 || src.height() == 0 {
        return GrayImage::new(width, height);
    }
    match interpolation {
        Interpolation::Nearest => resize_nearest(src, width, height),
        Interpolation::Linear => resize_linear(src, width, height),
    }
}

fn resize_nearest(src: &GrayImage, width: u32, height: u32) -> GrayImage {
    let mut dst = GrayImage::new(width, height);
    let map = ScaleMap::between(src.width(), src.height(), width, height);

    dst.as_mut()
        .par_chunks_mut(width as usize)
        .enumerate()
        .for_each(|(y, row)| {
            let sy = (((y as f64 + 0.5) * map.sy).floor() as u32).min(src.height() - 1);
            for x in 0..width {
                let sx = (((x as f64 + 0.5) * map.sx).floor() as u32).min(src.width() - 1);
                row[x as usize] = src.get_pixel(sx, sy)[0];
            }
        });
    dst
}

/// Bilinear resize with pixel-centre alignment. A factor-2 reduction
/// averages each 2x2 block.
fn resize_linear(src: &GrayImage, width: u32, height: u32) -> GrayImage {
    let mut dst = GrayImage::new(width, height);
    let map = ScaleMap::between(src.width(), src.height(), width, height);
    let max_x = (src.width() - 1) as f64;
    let max_y = (src.height() - 1) as f64;

    dst.as_mut()
        .par_chunks_mut(width as usize)
        .enumerate()
        .for_each(|(y, row)| {
            let fy = ((y as f64 + 0.5) * map.sy - 0.5).clamp(0.0, max_y);
            let y0 = fy as u32;
            let y1 = (y0 + 1).min(src.height() - 1);
            let dy = (fy - y0 as f64) as f32;

            for x in 0..width {
                let fx = ((x as f64 + 0.5) * map.sx - 0.5).clamp(0.0, max_x);
                let x0 = fx as u32;
                let x1 = (x0 + 1).min(src.width() - 1);
                let dx = (fx - x0 as f64) as f32;

                let v00 = src.get_pixel(x0, y0)[0] as f32;
                let v10 = src.get_pixel(x1, y0)[0] as f32;
                let v01 = src.get_pixel(x0, y1)[0] as f32;
                let v11 = src.get_pixel(x1, y1)[0] as f32;

                let v0 = v00 * (1.0 - dx) + v10 * dx;
                let v1 = v01 * (1.0 - dx) + v11 * dx;
                let v = v0 * (1.0 - dy) + v1 * dy;

                row[x as usize] = v.round().clamp(0.0, 255.0) as u8;
            }
        });

    dst
}

/// Shrinks `src` so that it holds at most `max_pixels` pixels. Returns the
/// working image and the map back to `src` coordinates.
pub fn downscale_to_pixel_budget(src: &GrayImage, max_pixels: u64) -> (GrayImage, ScaleMap) {
    let (w, h) = src.dimensions();
    let area = w as u64 * h as u64;
    if max_pixels == 0 || area <= max_pixels {
        return (src.clone(), ScaleMap::identity());
    }

    let factor = (max_pixels as f64 / area as f64).sqrt();
    let nw = ((w as f64 * factor).floor() as u32).max(1);
    let nh = ((h as f64 * factor).floor() as u32).max(1);
    let small = resize(src, nw, nh, Interpolation::Linear);
    (small, ScaleMap::between(w, h, nw, nh))
}

/// Pyramid with a constant `scale_factor` (> 1) between consecutive levels.
pub fn build_pyramid(src: &GrayImage, levels: u32, scale_factor: f64) -> Vec<GrayImage> {
    let mut pyramid = vec![src.clone()];

    for level in 1..levels {
        let s = scale_factor.powi(level as i32);
        let w = (src.width() as f64 / s).round() as u32;
        let h = (src.height() as f64 / s).round() as u32;
        if w < 2 || h < 2 {
            break;
        }
        pyramid.push(resize(src, w, h, Interpolation::Linear));
    }

    pyramid
}

/// Anti-aliased RGBA resize.
pub fn resize_rgba(src: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    if width == src.width() && height == src.height() {
        return src.clone();
    }
    let filter = if width < src.width() || height < src.height() {
        FilterType::Triangle
    } else {
        FilterType::CatmullRom
    };
    imageops::resize(src, width, height, filter)
}
