use pano_core::{Image, RgbaImage, Transform};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::blend::{blend, BlendMode};
use crate::canvas::{warped_bounds, Bounds, Canvas};
use crate::gain::compute_gains;
use crate::warp::{warp_image, WarpedLayer};
use crate::{PhotoError, Result};

/// 5000 x 5000 output pixels.
pub const DEFAULT_MAX_CANVAS_PIXELS: u64 = 25_000_000;

#[derive(Debug, Clone)]
pub struct CompositorConfig {
    pub blend_mode: BlendMode,
    pub gain_compensation: bool,
    pub max_canvas_pixels: u64,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            blend_mode: BlendMode::Feather,
            gain_compensation: true,
            max_canvas_pixels: DEFAULT_MAX_CANVAS_PIXELS,
        }
    }
}

impl CompositorConfig {
    pub fn with_blend_mode(mut self, mode: BlendMode) -> Self {
        self.blend_mode = mode;
        self
    }

    pub fn with_gain_compensation(mut self, enabled: bool) -> Self {
        self.gain_compensation = enabled;
        self
    }

    pub fn with_max_canvas_pixels(mut self, max_pixels: u64) -> Self {
        self.max_canvas_pixels = max_pixels;
        self
    }
}

/// An image and its transform into the panorama reference frame.
#[derive(Debug, Clone, Copy)]
pub struct Placement<'a> {
    pub image: &'a Image,
    pub transform: Transform,
}

/// Final RGBA8 panorama; alpha marks coverage.
#[derive(Debug, Clone)]
pub struct Composite {
    pub image: RgbaImage,
    /// Source images contributing to the panorama, ascending.
    pub indices: Vec<usize>,
    pub canvas: Canvas,
}

#[derive(Debug, Clone)]
pub struct Composition {
    pub composite: Composite,
    /// Gain applied to each image of `composite.indices`.
    pub gains: Vec<f32>,
    pub excluded: Vec<(usize, PhotoError)>,
}

pub struct Compositor {
    config: CompositorConfig,
}

impl Compositor {
    pub fn new(config: CompositorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    /// Fits the canvas, warps every placement, equalises exposure and blends.
    /// Images that cannot be warped are excluded; the call fails only when
    /// nothing remains or the canvas is too large.
    pub fn compose(&self, placements: &[Placement<'_>]) -> Result<Composition> {
        let mut excluded = Vec::new();
        let mut kept: Vec<(&Placement<'_>, Bounds)> = Vec::with_capacity(placements.len());
        for p in placements {
            match warped_bounds(&p.transform, p.image.width(), p.image.height()) {
                Some(b) if p.transform.valid => kept.push((p, b)),
                _ => {
                    warn!(image = p.image.index(), "image warps behind the horizon, excluded");
                    excluded.push((p.image.index(), PhotoError::DegenerateWarp(p.image.index())));
                }
            }
        }
        kept.sort_by_key(|(p, _)| p.image.index());

        let Some(bounds) = kept.iter().map(|(_, b)| *b).reduce(|a, b| a.union(&b)) else {
            return Err(PhotoError::EmptyCanvas);
        };
        let canvas = Canvas::fit(&bounds, self.config.max_canvas_pixels)?;
        debug!(width = canvas.width, height = canvas.height, images = kept.len(), "canvas fitted");

        let warped: Vec<Result<WarpedLayer>> = kept
            .par_iter()
            .map(|(p, _)| warp_image(p.image, &p.transform, &canvas))
            .collect();
        let mut layers = Vec::with_capacity(warped.len());
        for (layer, (p, _)) in warped.into_iter().zip(&kept) {
            match layer {
                Ok(layer) => layers.push(layer),
                Err(e) => {
                    warn!(image = p.image.index(), error = %e, "warp failed, excluded");
                    excluded.push((p.image.index(), e));
                }
            }
        }
        if layers.is_empty() {
            return Err(PhotoError::EmptyCanvas);
        }

        let gains = if self.config.gain_compensation {
            compute_gains(&layers)
        } else {
            vec![1.0; layers.len()]
        };
        for (layer, &g) in layers.iter_mut().zip(&gains) {
            if g != 1.0 {
                layer.apply_gain(g);
            }
        }

        let image = blend(&layers, &canvas, self.config.blend_mode);
        let indices: Vec<usize> = layers.iter().map(|l| l.image_index).collect();
        layers.into_iter().for_each(WarpedLayer::recycle);

        info!(
            width = canvas.width,
            height = canvas.height,
            images = indices.len(),
            excluded = excluded.len(),
            "composite ready"
        );
        Ok(Composition {
            composite: Composite { image, indices, canvas },
            gains,
            excluded,
        })
    }
}
