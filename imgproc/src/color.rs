use image::{GrayImage, RgbaImage};
use pano_core::image::luma_u8;
use rayon::prelude::*;

/// Integer Rec.601 luma of an RGBA buffer; alpha is ignored.
pub fn rgba_to_gray(rgba: &RgbaImage) -> GrayImage {
    let (w, h) = rgba.dimensions();
    let mut gray = GrayImage::new(w, h);
    if w == 0 || h == 0 {
        return gray;
    }

    gray.as_mut()
        .par_chunks_mut(w as usize)
        .zip(rgba.as_raw().par_chunks(w as usize * 4))
        .for_each(|(g_row, rgba_row)| {
            for (g, p) in g_row.iter_mut().zip(rgba_row.chunks_exact(4)) {
                *g = luma_u8(p[0], p[1], p[2]);
            }
        });

    gray
}

/// Luma of a floating-point RGB triple in 0..255.
#[inline]
pub fn luminance(rgb: [f32; 3]) -> f32 {
    0.299 * rgb[0] + 0.587 * rgb[1] + 0.114 * rgb[2]
}

pub fn compute_mean_intensity(src: &GrayImage) -> f32 {
    if src.width() == 0 || src.height() == 0 {
        return 0.0;
    }
    let sum: u64 = src.as_raw().iter().map(|&v| v as u64).sum();
    sum as f32 / (src.width() * src.height()) as f32
}
