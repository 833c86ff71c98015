use nalgebra::Matrix3;
use pano_core::geometry::translation;
use pano_core::{Image, RawImage, Transform, TransformKind};
use pano_imgproc::synthetic::{adjust_exposure, crop, textured_scene};
use pano_photo::*;

fn image(index: usize, rgba: image::RgbaImage) -> Image {
    Image::new(index, RawImage::from_rgba(rgba)).unwrap()
}

fn shift(tx: f64, ty: f64) -> Transform {
    Transform::new(translation(tx, ty), TransformKind::Homography)
}

fn mean_abs_diff(a: &image::RgbaImage, b: &image::RgbaImage) -> f64 {
    let total: u64 = a
        .pixels()
        .zip(b.pixels())
        .map(|(p, q)| (0..3).map(|c| (p[c] as i32 - q[c] as i32).unsigned_abs() as u64).sum::<u64>())
        .sum();
    total as f64 / (a.width() * a.height() * 3) as f64
}

#[test]
fn test_two_crops_reassemble_the_scene() {
    let scene = textured_scene(300, 200, 5);
    let left = image(0, crop(&scene, 0, 0, 180, 200));
    let right = image(1, crop(&scene, 100, 0, 180, 200));
    let placements = [
        Placement {
            image: &left,
            transform: shift(0.0, 0.0),
        },
        Placement {
            image: &right,
            transform: shift(100.0, 0.0),
        },
    ];

    for mode in [BlendMode::Feather, BlendMode::Seam] {
        let config = CompositorConfig::default().with_blend_mode(mode);
        let composition = Compositor::new(config).compose(&placements).unwrap();
        let composite = &composition.composite;
        assert_eq!(composite.indices, vec![0, 1]);
        assert_eq!(composite.image.dimensions(), (280, 200));
        assert!(composite.image.pixels().all(|p| p[3] == 255));
        assert!(composition.excluded.is_empty());

        let expected = crop(&scene, 0, 0, 280, 200);
        let diff = mean_abs_diff(&composite.image, &expected);
        assert!(diff < 1.0, "{mode:?}: mean difference {diff}");
    }
}

#[test]
fn test_gain_compensation_equalises_exposure() {
    let scene = textured_scene(300, 200, 11);
    let left = image(0, crop(&scene, 0, 0, 180, 200));
    let right = image(1, adjust_exposure(&crop(&scene, 100, 0, 180, 200), 0.7));
    let placements = [
        Placement {
            image: &left,
            transform: shift(0.0, 0.0),
        },
        Placement {
            image: &right,
            transform: shift(100.0, 0.0),
        },
    ];
    let expected = crop(&scene, 0, 0, 280, 200);

    let plain = Compositor::new(CompositorConfig::default().with_gain_compensation(false))
        .compose(&placements)
        .unwrap();
    let compensated = Compositor::new(CompositorConfig::default()).compose(&placements).unwrap();

    assert_eq!(plain.gains, vec![1.0, 1.0]);
    assert!(compensated.gains[1] > compensated.gains[0]);
    let left_half = |img: &image::RgbaImage| image::imageops::crop_imm(img, 0, 0, 100, 200).to_image();
    let right_half = |img: &image::RgbaImage| image::imageops::crop_imm(img, 180, 0, 100, 200).to_image();
    let seam_gap = |img: &image::RgbaImage| {
        (mean_abs_diff(&left_half(img), &left_half(&expected))
            - mean_abs_diff(&right_half(img), &right_half(&expected)))
        .abs()
    };
    assert!(seam_gap(&compensated.composite.image) < seam_gap(&plain.composite.image));
}

#[test]
fn test_degenerate_placement_is_excluded() {
    let scene = textured_scene(120, 80, 3);
    let a = image(0, scene.clone());
    let b = image(4, scene);
    let behind = Transform::new(
        Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, -0.05, 0.0, 1.0),
        TransformKind::Homography,
    );
    let placements = [
        Placement {
            image: &a,
            transform: shift(0.0, 0.0),
        },
        Placement {
            image: &b,
            transform: behind,
        },
    ];
    let composition = Compositor::new(CompositorConfig::default()).compose(&placements).unwrap();
    assert_eq!(composition.composite.indices, vec![0]);
    assert_eq!(composition.excluded, vec![(4, PhotoError::DegenerateWarp(4))]);
}

#[test]
fn test_canvas_limit_fails_the_panorama() {
    let scene = textured_scene(100, 100, 1);
    let a = image(0, scene.clone());
    let b = image(1, scene);
    let placements = [
        Placement {
            image: &a,
            transform: shift(0.0, 0.0),
        },
        Placement {
            image: &b,
            transform: shift(5000.0, 0.0),
        },
    ];
    let config = CompositorConfig::default().with_max_canvas_pixels(100_000);
    assert!(matches!(
        Compositor::new(config).compose(&placements),
        Err(PhotoError::CanvasTooLarge { .. })
    ));
}

#[test]
fn test_repeated_composition_is_byte_identical() {
    let scene = textured_scene(260, 180, 21);
    let images: Vec<Image> = [0u32, 70, 140]
        .iter()
        .enumerate()
        .map(|(k, &x)| image(k, crop(&scene, x, 0, 120, 180)))
        .collect();
    let placements: Vec<Placement<'_>> = images
        .iter()
        .zip([0.0, 70.0, 140.0])
        .map(|(image, tx)| Placement {
            image,
            transform: shift(tx, 0.0),
        })
        .collect();
    let compositor = Compositor::new(CompositorConfig::default());
    let first = compositor.compose(&placements).unwrap();
    let second = compositor.compose(&placements).unwrap();
    assert_eq!(first.composite.image.as_raw(), second.composite.image.as_raw());
}
