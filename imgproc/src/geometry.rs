use image::{Rgba, RgbaImage};
use nalgebra::{Matrix3, Point2};
use pano_core::project_point;
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Nearest,
    Linear,
}

/// Bilinear RGBA sample at `(x, y)` with pixel centres on integer
/// coordinates. `None` outside the half-pixel-extended image rectangle.
pub fn sample_rgba_bilinear(img: &RgbaImage, x: f64, y: f64) -> Option<[f32; 4]> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return None;
    }
    if !(x >= -0.5 && y >= -0.5 && x < w as f64 - 0.5 && y < h as f64 - 0.5) {
        return None;
    }

    let xc = x.clamp(0.0, (w - 1) as f64);
    let yc = y.clamp(0.0, (h - 1) as f64);
    let x0 = xc.floor() as u32;
    let y0 = yc.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = (xc - x0 as f64) as f32;
    let fy = (yc - y0 as f64) as f32;

    let p00 = img.get_pixel(x0, y0).0;
    let p10 = img.get_pixel(x1, y0).0;
    let p01 = img.get_pixel(x0, y1).0;
    let p11 = img.get_pixel(x1, y1).0;

    let mut out = [0.0f32; 4];
    for (c, o) in out.iter_mut().enumerate() {
        let v0 = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let v1 = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        *o = v0 * (1.0 - fy) + v1 * fy;
    }
    Some(out)
}

/// Inverse-maps every output pixel through `inverse` (output -> source).
/// Pixels mapping outside the source, or through the horizon, are fully
/// transparent.
pub fn warp_perspective_rgba(
    src: &RgbaImage,
    inverse: &Matrix3<f64>,
    width: u32,
    height: u32,
) -> RgbaImage {
    let mut dst = RgbaImage::new(width, height);
    if width == 0 || height == 0 {
        return dst;
    }

    dst.as_mut()
        .par_chunks_mut(width as usize * 4)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let sample = project_point(inverse, &Point2::new(x as f64, y as f64))
                    .and_then(|p| sample_rgba_bilinear(src, p.x, p.y));
                let value = match sample {
                    Some(s) => Rgba(s.map(|v| v.round().clamp(0.0, 255.0) as u8)),
                    None => Rgba([0, 0, 0, 0]),
                };
                px.copy_from_slice(&value.0);
            }
        });

    dst
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgba_sample_bounds() {
        let img = RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 255]));
        assert!(sample_rgba_bilinear(&img, -0.6, 1.0).is_none());
        assert!(sample_rgba_bilinear(&img, 3.5, 1.0).is_none());
        assert_eq!(sample_rgba_bilinear(&img, -0.5, 3.4), Some([10.0, 20.0, 30.0, 255.0]));
    }

    #[test]
    fn rgba_sample_interpolates() {
        let img = RgbaImage::from_fn(2, 1, |x, _| Rgba([(x * 100) as u8, 0, 0, 255]));
        let s = sample_rgba_bilinear(&img, 0.25, 0.0).unwrap();
        assert!((s[0] - 25.0).abs() < 1e-4);
    }

    #[test]
    fn rgba_warp_marks_outside_transparent() {
        let img = RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255]));
        let inv = Matrix3::new(1.0, 0.0, -2.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0);
        let warped = warp_perspective_rgba(&img, &inv, 8, 4);
        assert_eq!(warped.get_pixel(0, 0)[3], 0);
        assert_eq!(warped.get_pixel(3, 0).0, [1, 2, 3, 255]);
    }
}
