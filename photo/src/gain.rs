//! Brown–Lowe gain compensation.
//!
//! Minimises `Σ N_ij ((g_i I_ij - g_j I_ji)² / σN² + (1 - g_i)² / σg²)` over
//! one gain per layer, where `N_ij` counts overlapping canvas pixels and
//! `I_ij` is the mean intensity of layer `i` inside that overlap.

use nalgebra::{DMatrix, DVector};
use pano_imgproc::luminance;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::warp::WarpedLayer;

/// Standard deviation of the normalised intensity error.
pub const SIGMA_N: f64 = 10.0;
/// Standard deviation of the gain prior.
pub const SIGMA_G: f64 = 0.1;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Overlap {
    count: f64,
    mean_a: f64,
    mean_b: f64,
}

fn overlap(a: &WarpedLayer, b: &WarpedLayer) -> Overlap {
    let x0 = a.x0.max(b.x0);
    let y0 = a.y0.max(b.y0);
    let x1 = (a.x0 + a.width).min(b.x0 + b.width);
    let y1 = (a.y0 + a.height).min(b.y0 + b.height);

    let (mut count, mut sum_a, mut sum_b) = (0.0, 0.0, 0.0);
    for y in y0..y1 {
        for x in x0..x1 {
            if let (Some(pa), Some(pb)) = (a.rgb_at(x, y), b.rgb_at(x, y)) {
                count += 1.0;
                sum_a += luminance(pa) as f64;
                sum_b += luminance(pb) as f64;
            }
        }
    }
    if count == 0.0 {
        return Overlap::default();
    }
    Overlap {
        count,
        mean_a: sum_a / count,
        mean_b: sum_b / count,
    }
}

/// One gain per layer, in layer order. Falls back to unit gains when the
/// system cannot be solved.
pub fn compute_gains(layers: &[WarpedLayer]) -> Vec<f32> {
    let n = layers.len();
    if n < 2 {
        return vec![1.0; n];
    }

    let pairs: Vec<(usize, usize)> = (0..n).flat_map(|i| (i + 1..n).map(move |j| (i, j))).collect();
    let overlaps: Vec<Overlap> = pairs
        .par_iter()
        .map(|&(i, j)| overlap(&layers[i], &layers[j]))
        .collect();

    let alpha = 1.0 / (SIGMA_N * SIGMA_N);
    let beta = 1.0 / (SIGMA_G * SIGMA_G);
    let mut a = DMatrix::<f64>::zeros(n, n);
    let mut b = DVector::<f64>::zeros(n);

    for (&(i, j), o) in pairs.iter().zip(&overlaps) {
        if o.count == 0.0 {
            continue;
        }
        let (n_ij, i_ij, i_ji) = (o.count, o.mean_a, o.mean_b);
        for (p, q, ip, iq) in [(i, j, i_ij, i_ji), (j, i, i_ji, i_ij)] {
            a[(p, p)] += n_ij * (2.0 * alpha * ip * ip + beta);
            a[(p, q)] -= 2.0 * alpha * ip * iq * n_ij;
            b[p] += beta * n_ij;
        }
    }
    // layers that overlap nothing are pinned at unit gain
    for i in 0..n {
        if a[(i, i)] == 0.0 {
            a[(i, i)] = 1.0;
            b[i] = 1.0;
        }
    }

    let solved = a.clone().cholesky().map(|ch| ch.solve(&b)).or_else(|| a.lu().solve(&b));
    match solved {
        Some(g) if g.iter().all(|v| v.is_finite() && *v > 0.0) => {
            let gains: Vec<f32> = g.iter().map(|&v| v as f32).collect();
            debug!(?gains, "gain compensation solved");
            gains
        }
        _ => {
            warn!(layers = n, "gain compensation failed, using unit gains");
            vec![1.0; n]
        }
    }
}
