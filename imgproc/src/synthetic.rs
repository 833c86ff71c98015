//! Seeded synthetic scenes for tests and benchmarks.
//!
//! A scene is a dense collage of randomly coloured rectangles and ellipses
//! over a smooth gradient, lightly blurred. Crops and perspective views of one
//! scene overlap exactly where their footprints do, which gives stitching
//! tests a known ground truth.

use image::{imageops, GrayImage, Luma, Rgba, RgbaImage};
use nalgebra::Matrix3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::convolve::gaussian_blur;
use crate::geometry::warp_perspective_rgba;

pub fn textured_scene(width: u32, height: u32, seed: u64) -> RgbaImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let base: [f32; 3] = [rng.gen_range(40.0..90.0), rng.gen_range(40.0..90.0), rng.gen_range(40.0..90.0)];
    let mut scene = RgbaImage::from_fn(width, height, |x, y| {
        let gx = x as f32 / width.max(1) as f32;
        let gy = y as f32 / height.max(1) as f32;
        Rgba([
            (base[0] + 60.0 * gx) as u8,
            (base[1] + 60.0 * gy) as u8,
            (base[2] + 30.0 * (gx + gy)) as u8,
            255,
        ])
    });

    let shapes = ((width as u64 * height as u64) / 150).max(8);
    for _ in 0..shapes {
        let cx = rng.gen_range(0..width) as i64;
        let cy = rng.gen_range(0..height) as i64;
        let rx = rng.gen_range(2..16) as i64;
        let ry = rng.gen_range(2..16) as i64;
        let color = Rgba([rng.gen(), rng.gen(), rng.gen(), 255]);
        let ellipse = rng.gen_bool(0.5);

        for y in (cy - ry).max(0)..(cy + ry).min(height as i64) {
            for x in (cx - rx).max(0)..(cx + rx).min(width as i64) {
                let inside = if ellipse {
                    let dx = (x - cx) as f64 / rx as f64;
                    let dy = (y - cy) as f64 / ry as f64;
                    dx * dx + dy * dy <= 1.0
                } else {
                    true
                };
                if inside {
                    scene.put_pixel(x as u32, y as u32, color);
                }
            }
        }
    }

    blur_rgb(&scene, 0.7)
}

fn blur_rgb(img: &RgbaImage, sigma: f32) -> RgbaImage {
    let (w, h) = img.dimensions();
    let planes: Vec<GrayImage> = (0..3)
        .map(|c| {
            let plane = GrayImage::from_fn(w, h, |x, y| Luma([img.get_pixel(x, y)[c]]));
            gaussian_blur(&plane, sigma)
        })
        .collect();
    RgbaImage::from_fn(w, h, |x, y| {
        Rgba([
            planes[0].get_pixel(x, y)[0],
            planes[1].get_pixel(x, y)[0],
            planes[2].get_pixel(x, y)[0],
            img.get_pixel(x, y)[3],
        ])
    })
}

pub fn crop(scene: &RgbaImage, x: u32, y: u32, width: u32, height: u32) -> RgbaImage {
    imageops::crop_imm(scene, x, y, width, height).to_image()
}

/// Renders the view whose pixel `p` shows scene point `view_to_scene * p`.
pub fn perspective_view(
    scene: &RgbaImage,
    view_to_scene: &Matrix3<f64>,
    width: u32,
    height: u32,
) -> RgbaImage {
    warp_perspective_rgba(scene, view_to_scene, width, height)
}

/// Multiplies RGB by `gain`, emulating an exposure difference.
pub fn adjust_exposure(img: &RgbaImage, gain: f32) -> RgbaImage {
    let mut out = img.clone();
    for p in out.pixels_mut() {
        for c in 0..3 {
            p[c] = (p[c] as f32 * gain).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenes_are_seeded() {
        let a = textured_scene(64, 48, 5);
        let b = textured_scene(64, 48, 5);
        let c = textured_scene(64, 48, 6);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.pixels().all(|p| p[3] == 255));
    }

    #[test]
    fn crop_matches_scene() {
        let scene = textured_scene(64, 48, 1);
        let part = crop(&scene, 10, 5, 20, 20);
        assert_eq!(part.get_pixel(0, 0), scene.get_pixel(10, 5));
        assert_eq!(part.get_pixel(19, 19), scene.get_pixel(29, 24));
    }

    #[test]
    fn exposure_scales_channels() {
        let img = RgbaImage::from_pixel(1, 1, Rgba([100, 50, 200, 255]));
        let out = adjust_exposure(&img, 1.2);
        assert_eq!(out.get_pixel(0, 0).0, [120, 60, 240, 255]);
    }
}
