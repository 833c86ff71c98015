use std::path::{Path, PathBuf};

use image::RgbaImage;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::blob::{blend_masked, blob_to_image, image_to_blob, Letterbox, MODEL_INPUT_SIZE};
use crate::mask::{fill_mask, mask_is_empty};
use crate::{DnnError, Inference, Result};

const INPUT_IMAGE: &str = "image";
const INPUT_MASK: &str = "mask";
const OUTPUT: &str = "output";

fn ort_error(e: impl std::fmt::Display) -> DnnError {
    DnnError::OrtError(e.to_string())
}

/// Shared pre/post-processing around one model call. `predict` receives the
/// letterboxed image `[1, 3, S, S]` and mask `[1, 1, S, S]` and returns
/// `[1, 3, S, S]` in `0..255`. Images with nothing to fill are returned
/// unchanged without calling `predict`.
pub fn inpaint_with<F>(image: &RgbaImage, input_size: u32, predict: F) -> Result<RgbaImage>
where
    F: FnOnce(Vec<f32>, Vec<f32>) -> Result<Vec<f32>>,
{
    let mask = fill_mask(image);
    if mask_is_empty(&mask) {
        debug!("nothing to inpaint");
        return Ok(image.clone());
    }

    let lb = Letterbox::fit(image.width(), image.height(), input_size);
    let (img_blob, mask_blob) = image_to_blob(image, &mask, &lb);
    let output = predict(img_blob, mask_blob)?;
    let pred = blob_to_image(&output, &lb)?;
    Ok(blend_masked(image, &pred, &mask))
}

/// LaMa-style inpainting network loaded into an ONNX Runtime session.
pub struct OnnxInpainter {
    name: String,
    session: Mutex<Session>,
}

impl OnnxInpainter {
    pub fn from_file(path: impl AsRef<Path>, intra_threads: usize) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(DnnError::ModelUnavailable(format!("{} not found", path.display())));
        }

        let session = Session::builder()
            .map_err(ort_error)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(ort_error)?
            .with_intra_threads(intra_threads.max(1))
            .map_err(ort_error)?
            .commit_from_file(path)
            .map_err(|e| DnnError::ModelUnavailable(format!("{}: {e}", path.display())))?;

        info!(model = %path.display(), "inpainting model loaded");
        Ok(Self {
            name: model_name(path),
            session: Mutex::new(session),
        })
    }

    fn run(&self, img_blob: Vec<f32>, mask_blob: Vec<f32>) -> Result<Vec<f32>> {
        let s = MODEL_INPUT_SIZE as usize;
        let image = Tensor::from_array(([1usize, 3, s, s], img_blob)).map_err(ort_error)?;
        let mask = Tensor::from_array(([1usize, 1, s, s], mask_blob)).map_err(ort_error)?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![INPUT_IMAGE => image, INPUT_MASK => mask])
            .map_err(ort_error)?;
        let value = outputs
            .get(OUTPUT)
            .ok_or_else(|| DnnError::InvalidOutput(format!("missing `{OUTPUT}` tensor")))?;
        let (shape, data) = value.try_extract_tensor::<f32>().map_err(ort_error)?;
        if shape.iter().product::<i64>() != (3 * s * s) as i64 {
            return Err(DnnError::InvalidOutput(format!("unexpected output shape {shape:?}")));
        }
        Ok(data.to_vec())
    }
}

impl Inference for OnnxInpainter {
    fn name(&self) -> &str {
        &self.name
    }

    fn infer(&self, image: &RgbaImage) -> Result<RgbaImage> {
        inpaint_with(image, MODEL_INPUT_SIZE, |img, mask| self.run(img, mask))
    }
}

fn model_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| PathBuf::from(path).display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use std::io::Write;

    #[test]
    fn missing_model_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let result = OnnxInpainter::from_file(dir.path().join("lama.onnx"), 1);
        assert!(matches!(result, Err(DnnError::ModelUnavailable(_))));
    }

    #[test]
    fn corrupt_model_is_unavailable() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not an onnx graph").unwrap();
        let result = OnnxInpainter::from_file(file.path(), 1);
        assert!(result.is_err());
    }

    #[test]
    fn fake_prediction_fills_only_the_hole() {
        let mut img = RgbaImage::from_pixel(64, 48, Rgba([80, 90, 100, 255]));
        for y in 0..48 {
            for x in 0..6 {
                img.put_pixel(x, y, Rgba([0, 0, 0, 0]));
            }
        }

        let out = inpaint_with(&img, 32, |image, mask| {
            assert_eq!(image.len(), 3 * 32 * 32);
            assert_eq!(mask.len(), 32 * 32);
            Ok(vec![250.0; image.len()])
        })
        .unwrap();

        assert_eq!(out.dimensions(), (64, 48));
        assert_eq!(out.get_pixel(1, 20).0, [250, 250, 250, 255]);
        assert_eq!(out.get_pixel(40, 20).0, [80, 90, 100, 255]);
    }

    #[test]
    fn covered_image_skips_the_model() {
        let img = RgbaImage::from_pixel(16, 16, Rgba([50, 60, 70, 255]));
        let out = inpaint_with(&img, 32, |_, _| Err(DnnError::InvalidOutput("unused".into()))).unwrap();
        assert_eq!(out, img);
    }
}
