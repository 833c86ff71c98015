//! Feature Matching Example
//!
//! Runs the pairwise stage on two overlapping crops of a synthetic scene:
//! 1. Detect ORB keypoints and descriptors
//! 2. Match with the ratio test
//! 3. Verify the matches with RANSAC and print the recovered transform

use nalgebra::Point2;
use pano_core::{Image, RawImage, TransformKind};
use pano_features::{extract_image_features, match_pair, Orb, PairOutcome, PairwiseConfig};
use pano_imgproc::synthetic::{crop, textured_scene};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Feature Matching Pipeline Example\n");

    let scene = textured_scene(480, 320, 42);
    let left = Image::new(0, RawImage::from_rgba(crop(&scene, 0, 0, 300, 320)))?;
    let right = Image::new(1, RawImage::from_rgba(crop(&scene, 180, 0, 300, 320)))?;

    println!("Step 1: Detect keypoints and compute descriptors");
    let orb = Orb::new().with_n_features(800);
    let a = extract_image_features(&left, &orb, 490_000)?;
    let b = extract_image_features(&right, &orb, 490_000)?;
    println!("  - left: {} keypoints, right: {} keypoints\n", a.len(), b.len());

    for kind in [TransformKind::Homography, TransformKind::Similarity] {
        println!("Step 2-3: Match and verify as {kind:?}");
        let config = PairwiseConfig {
            kind,
            ..PairwiseConfig::default()
        };
        let result = match_pair(&a, &b, &config);
        let d = &result.diagnostic;
        println!("  - {} ratio-test matches, {} inliers, {:?}", d.matches, d.inliers, d.outcome);

        if let (PairOutcome::Accepted, Some(geometry)) = (d.outcome, &result.geometry) {
            println!("  - transform (right -> left):\n{}", geometry.transform.matrix);
            if let Some(p) = geometry.transform.apply(&Point2::new(0.0, 0.0)) {
                println!("  - right origin lands at ({:.2}, {:.2}), expected (180, 0)\n", p.x, p.y);
            }
        }
    }

    Ok(())
}
