use pano_core::{Descriptors, GrayImage, Image, KeyPoints};
use pano_imgproc::{downscale_to_pixel_budget, rgba_to_gray};
use tracing::debug;

use crate::{ImageFeatures, Result};

/// Detects keypoints and computes one descriptor per returned keypoint.
pub trait DescriptorExtractor: Send + Sync {
    fn detect_and_compute(&self, image: &GrayImage) -> Result<(KeyPoints, Descriptors)>;
}

/// Runs `extractor` on a grayscale working copy of `image` holding at most
/// `work_pixels` pixels and maps keypoints back to full resolution.
pub fn extract_image_features(
    image: &Image,
    extractor: &dyn DescriptorExtractor,
    work_pixels: u64,
) -> Result<ImageFeatures> {
    let gray = rgba_to_gray(image.pixels());
    let (work, map) = downscale_to_pixel_budget(&gray, work_pixels);
    let (mut keypoints, descriptors) = extractor.detect_and_compute(&work)?;

    if !map.is_identity() {
        let size_scale = (map.sx + map.sy) / 2.0;
        for kp in &mut keypoints.keypoints {
            let p = map.to_source(&kp.pt());
            kp.x = p.x;
            kp.y = p.y;
            kp.size *= size_scale;
        }
    }

    debug!(
        image = image.index(),
        keypoints = keypoints.len(),
        work_width = work.width(),
        work_height = work.height(),
        "extracted features"
    );

    Ok(ImageFeatures {
        image_index: image.index(),
        width: image.width(),
        height: image.height(),
        keypoints,
        descriptors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Orb;
    use pano_core::RawImage;
    use pano_imgproc::synthetic::textured_scene;

    #[test]
    fn keypoints_are_mapped_to_full_resolution() {
        let scene = textured_scene(400, 300, 8);
        let image = Image::new(2, RawImage::from_rgba(scene)).unwrap();
        let orb = Orb::new().with_n_features(200);

        let features = extract_image_features(&image, &orb, 30_000).unwrap();
        assert_eq!(features.image_index, 2);
        assert_eq!((features.width, features.height), (400, 300));
        assert_eq!(features.keypoints.len(), features.descriptors.len());
        // working copy is 200x150; mapped points must reach past it
        assert!(features.keypoints.iter().any(|k| k.x > 210.0));
        assert!(features
            .keypoints
            .iter()
            .all(|k| k.x >= 0.0 && k.x < 400.0 && k.y >= 0.0 && k.y < 300.0));
    }
}
