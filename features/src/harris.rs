use pano_core::GrayImage;
use pano_imgproc::sobel_gradients;

/// Harris corner measure evaluated on demand at candidate locations.
pub struct HarrisScorer {
    gx: Vec<f32>,
    gy: Vec<f32>,
    width: i32,
    height: i32,
    half_block: i32,
    k: f64,
}

impl HarrisScorer {
    pub fn new(image: &GrayImage, block_size: u32, k: f64) -> Self {
        let (gx, gy) = sobel_gradients(image);
        Self {
            gx,
            gy,
            width: image.width() as i32,
            height: image.height() as i32,
            half_block: (block_size / 2) as i32,
            k,
        }
    }

    /// `det(M) - k * trace(M)^2` of the structure tensor summed over the
    /// block around `(x, y)`, with gradients scaled to unit range.
    pub fn response(&self, x: i32, y: i32) -> f64 {
        const SCALE: f64 = 1.0 / (4.0 * 255.0);
        let mut i_xx = 0.0f64;
        let mut i_yy = 0.0f64;
        let mut i_xy = 0.0f64;

        for by in -self.half_block..=self.half_block {
            let py = y + by;
            if py < 0 || py >= self.height {
                continue;
            }
            for bx in -self.half_block..=self.half_block {
                let px = x + bx;
                if px < 0 || px >= self.width {
                    continue;
                }
                let idx = (py * self.width + px) as usize;
                let gx = self.gx[idx] as f64 * SCALE;
                let gy = self.gy[idx] as f64 * SCALE;
                i_xx += gx * gx;
                i_yy += gy * gy;
                i_xy += gx * gy;
            }
        }

        let det = i_xx * i_yy - i_xy * i_xy;
        let trace = i_xx + i_yy;
        det - self.k * trace * trace
    }
}
