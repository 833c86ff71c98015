//! Binary-mask morphology with rectangular structuring elements.
//!
//! A rectangle is separable, so every pass runs a 1-D min/max along rows and
//! then along columns. Pixels outside the image do not take part.

use image::GrayImage;
use rayon::prelude::*;

/// Rectangular structuring element centred on `(width / 2, height / 2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RectKernel {
    pub width: u32,
    pub height: u32,
}

impl RectKernel {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    pub fn square(size: u32) -> Self {
        Self::new(size, size)
    }
}

#[derive(Clone, Copy)]
enum Op {
    Min,
    Max,
}

impl Op {
    #[inline]
    fn apply(self, a: u8, b: u8) -> u8 {
        match self {
            Op::Min => a.min(b),
            Op::Max => a.max(b),
        }
    }

    fn identity(self) -> u8 {
        match self {
            Op::Min => u8::MAX,
            Op::Max => 0,
        }
    }
}

/// Window `[i - before, i + after]` clipped to `0..len`.
#[inline]
fn window(i: usize, before: usize, after: usize, len: usize) -> std::ops::Range<usize> {
    i.saturating_sub(before)..(i + after + 1).min(len)
}

fn filter_rows(src: &GrayImage, size: u32, op: Op) -> GrayImage {
    let (w, h) = src.dimensions();
    let mut out = GrayImage::new(w, h);
    let (before, after) = ((size / 2) as usize, ((size - 1) / 2) as usize);
    let w = w as usize;
    out.as_mut()
        .par_chunks_mut(w)
        .zip(src.as_raw().par_chunks(w))
        .for_each(|(dst, row)| {
            for (x, d) in dst.iter_mut().enumerate() {
                *d = row[window(x, before, after, w)]
                    .iter()
                    .fold(op.identity(), |acc, &v| op.apply(acc, v));
            }
        });
    out
}

fn filter_cols(src: &GrayImage, size: u32, op: Op) -> GrayImage {
    let (w, h) = src.dimensions();
    let mut out = GrayImage::new(w, h);
    let (before, after) = ((size / 2) as usize, ((size - 1) / 2) as usize);
    let (w, h) = (w as usize, h as usize);
    let raw = src.as_raw();
    out.as_mut().par_chunks_mut(w).enumerate().for_each(|(y, dst)| {
        let rows = window(y, before, after, h);
        for (x, d) in dst.iter_mut().enumerate() {
            *d = rows
                .clone()
                .fold(op.identity(), |acc, yy| op.apply(acc, raw[yy * w + x]));
        }
    });
    out
}

fn morph(src: &GrayImage, kernel: RectKernel, iterations: u32, op: Op) -> GrayImage {
    let mut out = src.clone();
    if src.width() == 0 || src.height() == 0 {
        return out;
    }
    for _ in 0..iterations {
        out = filter_cols(&filter_rows(&out, kernel.width, op), kernel.height, op);
    }
    out
}

pub fn dilate(src: &GrayImage, kernel: RectKernel, iterations: u32) -> GrayImage {
    morph(src, kernel, iterations, Op::Max)
}

/// Borders are not eroded away.
pub fn erode(src: &GrayImage, kernel: RectKernel, iterations: u32) -> GrayImage {
    morph(src, kernel, iterations, Op::Min)
}

/// Dilation followed by erosion; fills gaps narrower than the kernel.
pub fn close(src: &GrayImage, kernel: RectKernel) -> GrayImage {
    erode(&dilate(src, kernel, 1), kernel, 1)
}
