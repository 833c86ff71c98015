use pano_core::RgbaImage;
use rayon::prelude::*;

use crate::canvas::Canvas;
use crate::warp::WarpedLayer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendMode {
    /// Weighted average of all covering layers by edge feather.
    #[default]
    Feather,
    /// Each pixel taken wholly from the layer with the largest feather weight.
    Seam,
}

/// Normalised contributions `(layer position, weight)` at canvas pixel
/// `(x, y)`. Weights sum to one; the list is empty where nothing covers the
/// pixel. Layers are visited in order so ties go to the earlier layer.
pub fn pixel_weights(layers: &[WarpedLayer], x: u32, y: u32, mode: BlendMode, out: &mut Vec<(usize, f32)>) {
    out.clear();
    match mode {
        BlendMode::Feather => {
            let mut total = 0.0f32;
            for (k, layer) in layers.iter().enumerate() {
                let w = layer.weight_at(x, y);
                if w > 0.0 {
                    out.push((k, w));
                    total += w;
                }
            }
            if total > 0.0 {
                for (_, w) in out.iter_mut() {
                    *w /= total;
                }
            }
        }
        BlendMode::Seam => {
            let mut best: Option<(usize, f32)> = None;
            for (k, layer) in layers.iter().enumerate() {
                let w = layer.weight_at(x, y);
                if w > 0.0 && best.map_or(true, |(_, b)| w > b) {
                    best = Some((k, w));
                }
            }
            if let Some((k, _)) = best {
                out.push((k, 1.0));
            }
        }
    }
}

/// Blends `layers` onto `canvas`. Uncovered pixels are fully transparent.
pub fn blend(layers: &[WarpedLayer], canvas: &Canvas, mode: BlendMode) -> RgbaImage {
    let mut out = RgbaImage::new(canvas.width, canvas.height);
    if canvas.width == 0 || canvas.height == 0 {
        return out;
    }

    out.as_mut()
        .par_chunks_mut(canvas.width as usize * 4)
        .enumerate()
        .for_each(|(y, row)| {
            let mut weights = Vec::with_capacity(layers.len());
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                pixel_weights(layers, x as u32, y as u32, mode, &mut weights);
                if weights.is_empty() {
                    continue;
                }
                let mut rgb = [0.0f32; 3];
                for &(k, w) in &weights {
                    if let Some(p) = layers[k].rgb_at(x as u32, y as u32) {
                        for c in 0..3 {
                            rgb[c] += w * p[c];
                        }
                    }
                }
                for c in 0..3 {
                    px[c] = rgb[c].round().clamp(0.0, 255.0) as u8;
                }
                px[3] = 255;
            }
        });

    out
}

/// Sum of normalised weights per canvas pixel, row-major.
pub fn weight_sum_map(layers: &[WarpedLayer], canvas: &Canvas, mode: BlendMode) -> Vec<f32> {
    let mut sums = vec![0.0f32; canvas.pixel_count() as usize];
    if canvas.width == 0 {
        return sums;
    }
    sums.par_chunks_mut(canvas.width as usize)
        .enumerate()
        .for_each(|(y, row)| {
            let mut weights = Vec::with_capacity(layers.len());
            for (x, s) in row.iter_mut().enumerate() {
                pixel_weights(layers, x as u32, y as u32, mode, &mut weights);
                *s = weights.iter().map(|(_, w)| w).sum();
            }
        });
    sums
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(x0: u32, width: u32, value: f32, weight: impl Fn(u32) -> f32) -> WarpedLayer {
        let height = 4;
        let mut weights = Vec::new();
        for _ in 0..height {
            for x in 0..width {
                weights.push(weight(x));
            }
        }
        WarpedLayer {
            image_index: 0,
            x0,
            y0: 0,
            width,
            height,
            pixels: vec![value; (width * height * 3) as usize],
            weights,
        }
    }

    fn canvas(width: u32) -> Canvas {
        Canvas {
            min_x: 0,
            min_y: 0,
            width,
            height: 4,
        }
    }

    #[test]
    fn feather_averages_overlap() {
        let layers = [layer(0, 6, 100.0, |_| 1.0), layer(3, 6, 200.0, |_| 3.0)];
        let out = blend(&layers, &canvas(10), BlendMode::Feather);
        assert_eq!(out.get_pixel(1, 1).0, [100, 100, 100, 255]);
        assert_eq!(out.get_pixel(4, 1).0, [175, 175, 175, 255]);
        assert_eq!(out.get_pixel(7, 1).0, [200, 200, 200, 255]);
        assert_eq!(out.get_pixel(9, 1).0, [0, 0, 0, 0]);
    }

    #[test]
    fn seam_picks_strongest_layer() {
        let layers = [
            layer(0, 6, 100.0, |x| 6.0 - x as f32),
            layer(3, 6, 200.0, |x| 1.0 + x as f32),
        ];
        let out = blend(&layers, &canvas(9), BlendMode::Seam);
        // canvas x=4: weights 2 vs 2, earlier layer wins
        assert_eq!(out.get_pixel(4, 0).0[0], 100);
        assert_eq!(out.get_pixel(5, 0).0[0], 200);
    }

    #[test]
    fn weights_sum_to_one_where_covered() {
        let layers = [
            layer(0, 6, 10.0, |x| 0.1 + x as f32 * 0.3),
            layer(2, 5, 20.0, |x| if x == 1 { 0.0 } else { 0.7 }),
            layer(4, 4, 30.0, |x| 1.0 / (1.0 + x as f32)),
        ];
        for mode in [BlendMode::Feather, BlendMode::Seam] {
            let sums = weight_sum_map(&layers, &canvas(10), mode);
            for (i, s) in sums.iter().enumerate() {
                let x = (i % 10) as u32;
                if x < 8 {
                    assert!((s - 1.0).abs() < 1e-5, "{mode:?} x={x} sum={s}");
                } else {
                    assert_eq!(*s, 0.0);
                }
            }
        }
    }
}
