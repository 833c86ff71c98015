use pano_core::{GrayImage, KeyPoint, KeyPoints};
use rayon::prelude::*;

/// Bresenham circle of radius 3, clockwise from the top.
pub const CIRCLE_OFFSETS: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// Contiguous arc length required by FAST-9.
pub const ARC_LENGTH: u32 = 9;

const RADIUS: u32 = 3;

#[inline]
fn has_arc(mask: u32) -> bool {
    // Duplicate the 16-bit ring so wrapping arcs become linear runs.
    let ring = mask | (mask << 16);
    let mut acc = ring;
    for k in 1..ARC_LENGTH {
        acc &= ring >> k;
    }
    acc != 0
}

/// FAST-9 corner test at `(x, y)`. Returns the corner score (sum of absolute
/// differences beyond `threshold` over the qualifying polarity) or `None`.
///
/// The caller guarantees a border of at least 3 pixels.
pub fn fast_score(image: &GrayImage, x: u32, y: u32, threshold: u8) -> Option<f32> {
    let width = image.width() as usize;
    let raw = image.as_raw();
    let center = raw[y as usize * width + x as usize] as i32;
    let t = threshold as i32;
    let at = |k: usize| -> i32 {
        let (dx, dy) = CIRCLE_OFFSETS[k];
        let px = (x as i32 + dx) as usize;
        let py = (y as i32 + dy) as usize;
        raw[py * width + px] as i32
    };

    // Any 9-arc covers at least two of the four compass points.
    let compass = [at(0), at(4), at(8), at(12)];
    let bright_hits = compass.iter().filter(|&&v| v > center + t).count();
    let dark_hits = compass.iter().filter(|&&v| v < center - t).count();
    if bright_hits < 2 && dark_hits < 2 {
        return None;
    }

    let mut bright_mask = 0u32;
    let mut dark_mask = 0u32;
    let mut bright_sum = 0i32;
    let mut dark_sum = 0i32;
    for k in 0..16 {
        let v = at(k);
        if v > center + t {
            bright_mask |= 1 << k;
            bright_sum += v - center - t;
        } else if v < center - t {
            dark_mask |= 1 << k;
            dark_sum += center - t - v;
        }
    }

    let bright = has_arc(bright_mask);
    let dark = has_arc(dark_mask);
    match (bright, dark) {
        (true, true) => Some(bright_sum.max(dark_sum) as f32),
        (true, false) => Some(bright_sum as f32),
        (false, true) => Some(dark_sum as f32),
        (false, false) => None,
    }
}

/// FAST-9 detection with 3x3 non-maximum suppression on the corner score.
///
/// Corners closer than `border` (at least 3) to the image edge are skipped.
/// Keypoints come out in row-major scan order with `response` set to the
/// FAST score.
pub fn fast_detect(image: &GrayImage, threshold: u8, border: u32) -> KeyPoints {
    let (w, h) = image.dimensions();
    let border = border.max(RADIUS);
    if w <= 2 * border || h <= 2 * border {
        return KeyPoints::new();
    }

    let width = w as usize;
    let mut scores = vec![0.0f32; width * h as usize];
    scores
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            let y = y as u32;
            if y < border || y >= h - border {
                return;
            }
            for x in border..w - border {
                if let Some(s) = fast_score(image, x, y, threshold) {
                    row[x as usize] = s;
                }
            }
        });

    let rows: Vec<Vec<KeyPoint>> = (border..h - border)
        .into_par_iter()
        .map(|y| {
            let mut found = Vec::new();
            for x in border..w - border {
                let s = scores[y as usize * width + x as usize];
                if s <= 0.0 {
                    continue;
                }
                if is_local_max(&scores, width, x as usize, y as usize, s) {
                    found.push(KeyPoint::new(x as f64, y as f64).with_response(s as f64));
                }
            }
            found
        })
        .collect();

    rows.into_iter().flatten().collect()
}

/// Strict maximum against earlier neighbours, non-strict against later ones,
/// so a plateau keeps exactly its first pixel in scan order.
fn is_local_max(scores: &[f32], width: usize, x: usize, y: usize, s: f32) -> bool {
    for dy in -1i32..=1 {
        for dx in -1i32..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let n = scores[(y as i32 + dy) as usize * width + (x as i32 + dx) as usize];
            let earlier = dy < 0 || (dy == 0 && dx < 0);
            if (earlier && n >= s) || (!earlier && n > s) {
                return false;
            }
        }
    }
    true
}
