use image::{GrayImage, Rgba, RgbaImage};
use pano_imgproc::{resize, resize_rgba, Interpolation};

use crate::{DnnError, Result};

/// Square network input side.
pub const MODEL_INPUT_SIZE: u32 = 512;
/// Grey used for letterbox padding.
pub const PAD_VALUE: u8 = 127;

/// Placement of an image inside the square network input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub orig_w: u32,
    pub orig_h: u32,
    pub new_w: u32,
    pub new_h: u32,
    pub pad_left: u32,
    pub pad_top: u32,
    pub size: u32,
}

impl Letterbox {
    pub fn fit(width: u32, height: u32, size: u32) -> Self {
        let scale = (size as f32 / width.max(1) as f32).min(size as f32 / height.max(1) as f32);
        let new_w = ((width as f32 * scale) as u32).clamp(1, size);
        let new_h = ((height as f32 * scale) as u32).clamp(1, size);
        Self {
            orig_w: width,
            orig_h: height,
            new_w,
            new_h,
            pad_left: (size - new_w) / 2,
            pad_top: (size - new_h) / 2,
            size,
        }
    }

    pub fn plane_len(&self) -> usize {
        self.size as usize * self.size as usize
    }
}

/// Letterboxes `image` and `mask` into CHW tensors: RGB in `0..1` and a
/// binary mask where padding counts as masked.
pub fn image_to_blob(image: &RgbaImage, mask: &GrayImage, lb: &Letterbox) -> (Vec<f32>, Vec<f32>) {
    let resized = resize_rgba(image, lb.new_w, lb.new_h);
    let resized_mask = resize(mask, lb.new_w, lb.new_h, Interpolation::Nearest);

    let plane = lb.plane_len();
    let mut img_blob = vec![PAD_VALUE as f32 / 255.0; 3 * plane];
    let mut mask_blob = vec![1.0f32; plane];

    for y in 0..lb.new_h {
        for x in 0..lb.new_w {
            let o = ((y + lb.pad_top) * lb.size + x + lb.pad_left) as usize;
            let p = resized.get_pixel(x, y);
            for c in 0..3 {
                img_blob[c * plane + o] = p[c] as f32 / 255.0;
            }
            mask_blob[o] = if resized_mask.get_pixel(x, y)[0] > 127 { 1.0 } else { 0.0 };
        }
    }

    (img_blob, mask_blob)
}

/// Crops the letterboxed prediction (`[3, size, size]`, values `0..255`) and
/// resizes it back to the original size.
pub fn blob_to_image(output: &[f32], lb: &Letterbox) -> Result<RgbaImage> {
    let plane = lb.plane_len();
    if output.len() != 3 * plane {
        return Err(DnnError::InvalidOutput(format!(
            "expected {} values, got {}",
            3 * plane,
            output.len()
        )));
    }

    let valid = RgbaImage::from_fn(lb.new_w, lb.new_h, |x, y| {
        let o = ((y + lb.pad_top) * lb.size + x + lb.pad_left) as usize;
        let ch = |c: usize| {
            let v = output[c * plane + o];
            if v.is_finite() {
                v.round().clamp(0.0, 255.0) as u8
            } else {
                0
            }
        };
        Rgba([ch(0), ch(1), ch(2), 255])
    });
    Ok(resize_rgba(&valid, lb.orig_w, lb.orig_h))
}

/// `orig * (1 - m) + pred * m` with `m = mask / 255`. Filled pixels become
/// opaque.
pub fn blend_masked(orig: &RgbaImage, pred: &RgbaImage, mask: &GrayImage) -> RgbaImage {
    RgbaImage::from_fn(orig.width(), orig.height(), |x, y| {
        let m = mask.get_pixel(x, y)[0] as f32 / 255.0;
        if m <= 0.0 {
            return *orig.get_pixel(x, y);
        }
        let (o, p) = (orig.get_pixel(x, y), pred.get_pixel(x, y));
        let mix = |c: usize| (o[c] as f32 * (1.0 - m) + p[c] as f32 * m).round().clamp(0.0, 255.0) as u8;
        Rgba([mix(0), mix(1), mix(2), 255])
    })
}
