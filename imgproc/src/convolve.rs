use image::GrayImage;
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderMode {
    Constant(u8),
    Replicate,
    Reflect101,
}

pub(crate) fn map_coord(coord: isize, len: usize, mode: BorderMode) -> Option<usize> {
    let n = len as isize;
    if n <= 0 {
        return None;
    }

    match mode {
        BorderMode::Constant(_) => {
            if coord < 0 || coord >= n {
                None
            } else {
                Some(coord as usize)
            }
        }
        BorderMode::Replicate => Some(coord.clamp(0, n - 1) as usize),
        BorderMode::Reflect101 => {
            if n == 1 {
                return Some(0);
            }
            let period = 2 * n - 2;
            let mut c = coord % period;
            if c < 0 {
                c += period;
            }
            if c >= n {
                c = period - c;
            }
            Some(c as usize)
        }
    }
}

#[inline]
fn border_value(border: BorderMode) -> f32 {
    match border {
        BorderMode::Constant(v) => v as f32,
        _ => 0.0,
    }
}

pub fn gaussian_kernel_1d(sigma: f32, size: usize) -> Vec<f32> {
    let size = if size % 2 == 0 { size + 1 } else { size };
    let mut kernel = Vec::with_capacity(size);
    let center = (size / 2) as isize;
    let sigma2 = sigma * sigma;
    let mut sum = 0.0f32;

    for i in 0..size {
        let x = (i as isize - center) as f32;
        let v = (-(x * x) / (2.0 * sigma2)).exp();
        kernel.push(v);
        sum += v;
    }

    if sum != 0.0 {
        for v in &mut kernel {
            *v /= sum;
        }
    }

    kernel
}

/// Odd kernel width covering +-3 sigma.
pub fn kernel_size_for_sigma(sigma: f32) -> usize {
    let radius = (3.0 * sigma).ceil().max(1.0) as usize;
    2 * radius + 1
}

/// Two-pass convolution with `kx` along rows and `ky` along columns.
pub fn separable_convolve(
    image: &GrayImage,
    kx: &[f32],
    ky: &[f32],
    border: BorderMode,
) -> GrayImage {
    let width = image.width() as usize;
    let height = image.height() as usize;
    let mut out = GrayImage::new(image.width(), image.height());
    if width == 0 || height == 0 {
        return out;
    }

    let rx = kx.len() / 2;
    let ry = ky.len() / 2;
    let src = image.as_raw();
    let mut tmp = vec![0.0f32; width * height];

    // Horizontal pass
    tmp.par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row_out)| {
            let row = &src[y * width..(y + 1) * width];
            for (x, out) in row_out.iter_mut().enumerate() {
                let mut sum = 0.0f32;
                for (k, &w) in kx.iter().enumerate() {
                    let sx = x as isize + k as isize - rx as isize;
                    let v = match map_coord(sx, width, border) {
                        Some(ix) => row[ix] as f32,
                        None => border_value(border),
                    };
                    sum += v * w;
                }
                *out = sum;
            }
        });

    // Vertical pass
    out.as_mut()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row_out)| {
            for (x, out) in row_out.iter_mut().enumerate() {
                let mut sum = 0.0f32;
                for (k, &w) in ky.iter().enumerate() {
                    let sy = y as isize + k as isize - ry as isize;
                    let v = match map_coord(sy, height, border) {
                        Some(iy) => tmp[iy * width + x],
                        None => border_value(border),
                    };
                    sum += v * w;
                }
                *out = sum.round().clamp(0.0, 255.0) as u8;
            }
        });

    out
}

pub fn gaussian_blur_with_border(image: &GrayImage, sigma: f32, border: BorderMode) -> GrayImage {
    if sigma <= 0.0 {
        return image.clone();
    }
    let kernel = gaussian_kernel_1d(sigma, kernel_size_for_sigma(sigma));
    separable_convolve(image, &kernel, &kernel, border)
}

pub fn gaussian_blur(image: &GrayImage, sigma: f32) -> GrayImage {
    gaussian_blur_with_border(image, sigma, BorderMode::Reflect101)
}

/// Horizontal and vertical 3x3 Sobel derivatives, row-major, replicated borders.
pub fn sobel_gradients(image: &GrayImage) -> (Vec<f32>, Vec<f32>) {
    let width = image.width() as usize;
    let height = image.height() as usize;
    let src = image.as_raw();
    let mut gx = vec![0.0f32; width * height];
    let mut gy = vec![0.0f32; width * height];
    if width == 0 || height == 0 {
        return (gx, gy);
    }

    let at = |x: isize, y: isize| -> f32 {
        let ix = x.clamp(0, width as isize - 1) as usize;
        let iy = y.clamp(0, height as isize - 1) as usize;
        src[iy * width + ix] as f32
    };

    gx.par_chunks_mut(width)
        .zip(gy.par_chunks_mut(width))
        .enumerate()
        .for_each(|(y, (rx, ry))| {
            let y = y as isize;
            for x in 0..width {
                let xi = x as isize;
                rx[x] = (at(xi + 1, y - 1) + 2.0 * at(xi + 1, y) + at(xi + 1, y + 1))
                    - (at(xi - 1, y - 1) + 2.0 * at(xi - 1, y) + at(xi - 1, y + 1));
                ry[x] = (at(xi - 1, y + 1) + 2.0 * at(xi, y + 1) + at(xi + 1, y + 1))
                    - (at(xi - 1, y - 1) + 2.0 * at(xi, y - 1) + at(xi + 1, y - 1));
            }
        });

    (gx, gy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn kernel_is_normalized_and_symmetric() {
        let k = gaussian_kernel_1d(1.5, kernel_size_for_sigma(1.5));
        assert_eq!(k.len(), 11);
        assert!((k.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!((k[0] - k[10]).abs() < 1e-7);
    }

    #[test]
    fn blur_preserves_constant_image() {
        let img = GrayImage::from_pixel(17, 9, Luma([120]));
        let out = gaussian_blur(&img, 2.0);
        assert!(out.pixels().all(|p| p[0] == 120));
    }

    #[test]
    fn blur_spreads_impulse() {
        let mut img = GrayImage::new(9, 9);
        img.put_pixel(4, 4, Luma([255]));
        let out = gaussian_blur(&img, 1.0);
        assert!(out.get_pixel(4, 4)[0] < 255);
        assert!(out.get_pixel(5, 4)[0] > 0);
        assert_eq!(out.get_pixel(5, 4), out.get_pixel(3, 4));
    }

    #[test]
    fn sobel_detects_vertical_edge() {
        let img = GrayImage::from_fn(6, 6, |x, _| Luma([if x < 3 { 0 } else { 100 }]));
        let (gx, gy) = sobel_gradients(&img);
        assert_eq!(gx[2 * 6 + 2], 400.0);
        assert_eq!(gy[2 * 6 + 2], 0.0);
        assert_eq!(gx[2 * 6 + 5], 0.0);
    }

    #[test]
    fn reflect101_mapping() {
        assert_eq!(map_coord(-1, 5, BorderMode::Reflect101), Some(1));
        assert_eq!(map_coord(5, 5, BorderMode::Reflect101), Some(3));
        assert_eq!(map_coord(-1, 5, BorderMode::Constant(0)), None);
        assert_eq!(map_coord(9, 5, BorderMode::Replicate), Some(4));
    }
}
