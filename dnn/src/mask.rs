use std::collections::VecDeque;

use image::{GrayImage, Luma, RgbaImage};
use pano_core::image::luma_u8;
use pano_imgproc::{close, dilate, RectKernel};

/// Grey level at or below which a border pixel counts as empty.
pub const BLACK_THRESHOLD: u8 = 2;
const KERNEL_SIZE: u32 = 5;
const DILATE_ITERATIONS: u32 = 2;

/// Pixels to fill: transparent pixels plus near-black regions connected to
/// an image corner, closed and dilated with a 5x5 rectangle. `255` marks a
/// pixel to fill.
pub fn fill_mask(image: &RgbaImage) -> GrayImage {
    let (w, h) = image.dimensions();
    let mut mask = GrayImage::new(w, h);
    if w == 0 || h == 0 {
        return mask;
    }

    let is_dark = |x: u32, y: u32| {
        let p = image.get_pixel(x, y);
        p[3] == 0 || luma_u8(p[0], p[1], p[2]) <= BLACK_THRESHOLD
    };

    for (x, y, p) in image.enumerate_pixels() {
        if p[3] == 0 {
            mask.put_pixel(x, y, Luma([255]));
        }
    }

    // 4-connected flood fill from the corners
    let mut queue = VecDeque::new();
    for (x, y) in [(0, 0), (w - 1, 0), (0, h - 1), (w - 1, h - 1)] {
        if is_dark(x, y) {
            queue.push_back((x, y));
        }
    }
    let mut visited = vec![false; w as usize * h as usize];
    while let Some((x, y)) = queue.pop_front() {
        let i = (y * w + x) as usize;
        if visited[i] {
            continue;
        }
        visited[i] = true;
        mask.put_pixel(x, y, Luma([255]));

        let neighbours = [
            (x.wrapping_sub(1), y),
            (x + 1, y),
            (x, y.wrapping_sub(1)),
            (x, y + 1),
        ];
        for (nx, ny) in neighbours {
            if nx < w && ny < h && !visited[(ny * w + nx) as usize] && is_dark(nx, ny) {
                queue.push_back((nx, ny));
            }
        }
    }

    if mask_is_empty(&mask) {
        return mask;
    }
    let kernel = RectKernel::square(KERNEL_SIZE);
    dilate(&close(&mask, kernel), kernel, DILATE_ITERATIONS)
}

pub fn mask_is_empty(mask: &GrayImage) -> bool {
    mask.pixels().all(|p| p[0] == 0)
}
