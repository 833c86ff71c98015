use image::{GrayImage, Luma};
use nalgebra::Matrix3;
use pano_imgproc::synthetic::{crop, perspective_view, textured_scene};
use pano_imgproc::*;

#[test]
fn test_resize_functional() {
    let mut img = GrayImage::new(100, 100);
    img.put_pixel(50, 50, Luma([255]));

    let up = resize(&img, 200, 200, Interpolation::Linear);
    assert_eq!(up.dimensions(), (200, 200));

    let down = resize(&img, 50, 50, Interpolation::Nearest);
    assert_eq!(down.dimensions(), (50, 50));
}

#[test]
fn test_gray_of_synthetic_scene_has_texture() {
    let scene = textured_scene(120, 80, 3);
    let gray = rgba_to_gray(&scene);
    let mean = compute_mean_intensity(&gray);
    let var = gray
        .pixels()
        .map(|p| (p[0] as f32 - mean).powi(2))
        .sum::<f32>()
        / (120.0 * 80.0);
    assert!(var > 100.0, "scene should be strongly textured, variance {var}");
}

#[test]
fn test_translated_view_equals_crop() {
    let scene = textured_scene(100, 60, 11);
    let shift = Matrix3::new(1.0, 0.0, 30.0, 0.0, 1.0, 10.0, 0.0, 0.0, 1.0);
    let view = perspective_view(&scene, &shift, 40, 40);
    assert_eq!(view, crop(&scene, 30, 10, 40, 40));
}

#[test]
fn test_morphology_close_of_mask() {
    let mut mask = GrayImage::new(20, 20);
    for y in 5..15 {
        for x in 5..15 {
            if x != 10 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
    }
    let closed = close(&mask, RectKernel::square(3));
    assert_eq!(closed.get_pixel(10, 10)[0], 255);
    assert_eq!(closed.get_pixel(2, 2)[0], 0);
}
