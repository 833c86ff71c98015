//! Benchmarks for the stitching stages
//!
//! Feature extraction, pairwise matching and the full pipeline on synthetic crops

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use panostitch::core::{Image, RawImage};
use panostitch::features::{extract_image_features, match_pair, Orb, PairwiseConfig};
use panostitch::imgproc::synthetic::{crop, textured_scene};
use panostitch::StitchConfig;
use std::time::Duration;

/// `count` crops of one scene, each shifted `step` pixels right of the last.
fn strip(count: u32, width: u32, height: u32, step: u32) -> Vec<RawImage> {
    let scene = textured_scene(width + step * (count - 1), height, 17);
    (0..count)
        .map(|k| RawImage::from_rgba(crop(&scene, k * step, 0, width, height)))
        .collect()
}

fn benchmark_feature_extraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("orb_extraction");
    group.measurement_time(Duration::from_secs(5));
    group.sample_size(20);

    for size in [128u32, 256, 512] {
        let image = Image::new(0, RawImage::from_rgba(textured_scene(size, size, 3))).unwrap();
        let orb = Orb::new().with_n_features(500);
        group.bench_with_input(BenchmarkId::new("cpu", format!("{}x{}", size, size)), &image, |b, img| {
            b.iter(|| extract_image_features(black_box(img), &orb, 490_000));
        });
    }

    group.finish();
}

fn benchmark_pair_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("pair_matching");
    group.sample_size(20);

    let images = strip(2, 320, 240, 160);
    let orb = Orb::new().with_n_features(800);
    let features: Vec<_> = images
        .into_iter()
        .enumerate()
        .map(|(i, raw)| {
            let image = Image::new(i, raw).unwrap();
            extract_image_features(&image, &orb, 490_000).unwrap()
        })
        .collect();
    let config = PairwiseConfig::default();

    group.bench_function("homography", |b| {
        b.iter(|| match_pair(black_box(&features[0]), black_box(&features[1]), &config));
    });

    group.finish();
}

fn benchmark_full_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("stitch_pipeline");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(10);

    for count in [2u32, 4] {
        let images = strip(count, 320, 240, 160);
        group.bench_with_input(BenchmarkId::new("images", count), &images, |b, imgs| {
            b.iter(|| panostitch::stitch(black_box(imgs.clone()), StitchConfig::default().with_seed(1)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_feature_extraction,
    benchmark_pair_matching,
    benchmark_full_pipeline
);
criterion_main!(benches);
