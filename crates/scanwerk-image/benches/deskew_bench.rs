// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for Hough line skew estimation and transform replay.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use image::{DynamicImage, GrayImage, Luma};
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};

use scanwerk_image::render::render;
use scanwerk_image::{Deskewer, HoughLineDeskewer, TransformState, TransformStep};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A 600x800 page of short dark strokes in text-like rows, skewed by 3°.
fn skewed_text_page() -> DynamicImage {
    let mut page = GrayImage::from_pixel(600, 800, Luma([255u8]));
    for row in 0..30 {
        let top = 60 + row * 22;
        for word in 0..12 {
            let left = 50 + word * 42;
            for y in top..top + 8 {
                for x in left..left + 34 {
                    page.put_pixel(x, y, Luma([20u8]));
                }
            }
        }
    }
    DynamicImage::ImageLuma8(rotate_about_center(
        &page,
        3.0f32.to_radians(),
        Interpolation::Nearest,
        Luma([255u8]),
    ))
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_skew_angle(c: &mut Criterion) {
    let page = skewed_text_page();
    let deskewer = HoughLineDeskewer::default();
    c.bench_function("skew_angle (600x800)", |b| {
        b.iter(|| black_box(deskewer.skew_angle(black_box(&page))));
    });
}

fn bench_render(c: &mut Criterion) {
    let page = skewed_text_page();
    let state: TransformState = [
        TransformStep::BrightnessContrast {
            brightness: 100,
            contrast: 200,
        },
        TransformStep::Rotate { degrees: 180.0 },
        TransformStep::Deskew { degrees: -3.0 },
    ]
    .into_iter()
    .collect();

    c.bench_function("render 3 steps (600x800)", |b| {
        b.iter(|| black_box(render(black_box(&page), &state)));
    });
}

criterion_group!(benches, bench_skew_angle, bench_render);
criterion_main!(benches);
