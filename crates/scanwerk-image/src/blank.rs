// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Blank page detection by foreground coverage.

use image::DynamicImage;
use tracing::debug;

/// Thin band at each edge that is ignored, where scan-area shadows live.
const IGNORE_EDGE_FRACTION: f64 = 0.01;
/// A 100% coverage threshold means 1% of the page may be non-white.
const COVERAGE_THRESHOLD_MAX: f64 = 0.01;

/// Decides whether a rendered page is blank.
pub trait BlankDetector: Send + Sync {
    /// `white_threshold` and `coverage_threshold` are percentages (0..=100).
    fn is_blank(&self, image: &DynamicImage, white_threshold: u8, coverage_threshold: u8)
    -> bool;
}

/// Counts pixels darker than an adjusted white level and compares the
/// fraction against an adjusted coverage level.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoverageBlankDetector;

impl CoverageBlankDetector {
    /// Luma (0..=255) below which a pixel is not white.
    pub fn adjusted_white(white_threshold: u8) -> u32 {
        (1.0 + white_threshold.min(100) as f64 / 100.0 * 254.0).round() as u32
    }

    /// Largest non-white fraction a blank page may have.
    pub fn adjusted_coverage(coverage_threshold: u8) -> f64 {
        coverage_threshold.min(100) as f64 / 100.0 * COVERAGE_THRESHOLD_MAX
    }

    /// Fraction of the page that is not white. The edge band is skipped when
    /// counting but still included in the total.
    pub fn coverage(image: &DynamicImage, white_threshold: u8) -> f64 {
        let white = Self::adjusted_white(white_threshold);
        let (w, h) = (image.width() as usize, image.height() as usize);
        let total = w * h;
        if total == 0 {
            return 0.0;
        }
        let start_x = (w as f64 * IGNORE_EDGE_FRACTION) as usize;
        let start_y = (h as f64 * IGNORE_EDGE_FRACTION) as usize;
        let end_x = (w as f64 * (1.0 - IGNORE_EDGE_FRACTION)) as usize;
        let end_y = (h as f64 * (1.0 - IGNORE_EDGE_FRACTION)) as usize;

        let mut matches = 0usize;
        match image {
            DynamicImage::ImageLuma8(gray) => {
                for (x, y, p) in gray.enumerate_pixels() {
                    let (x, y) = (x as usize, y as usize);
                    if x < start_x || x > end_x || y < start_y || y > end_y {
                        continue;
                    }
                    if (p.0[0] as u32) < white {
                        matches += 1;
                    }
                }
            }
            other => {
                let rgb = other.to_rgb8();
                for (x, y, p) in rgb.enumerate_pixels() {
                    let (x, y) = (x as usize, y as usize);
                    if x < start_x || x > end_x || y < start_y || y > end_y {
                        continue;
                    }
                    let [r, g, b] = p.0;
                    let luma = r as u32 * 299 + g as u32 * 587 + b as u32 * 114;
                    if luma < white * 1000 {
                        matches += 1;
                    }
                }
            }
        }
        matches as f64 / total as f64
    }
}

impl BlankDetector for CoverageBlankDetector {
    fn is_blank(
        &self,
        image: &DynamicImage,
        white_threshold: u8,
        coverage_threshold: u8,
    ) -> bool {
        let coverage = Self::coverage(image, white_threshold);
        let limit = Self::adjusted_coverage(coverage_threshold);
        let blank = coverage < limit;
        debug!(coverage, limit, blank, "Blank page check");
        blank
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    #[test]
    fn white_page_is_blank() {
        let page = DynamicImage::ImageLuma8(GrayImage::from_pixel(100, 100, Luma([250u8])));
        assert!(CoverageBlankDetector.is_blank(&page, 70, 25));
    }

    #[test]
    fn text_page_is_not_blank() {
        let mut page = GrayImage::from_pixel(100, 100, Luma([255u8]));
        for y in 20..24 {
            for x in 10..90 {
                page.put_pixel(x, y, Luma([0u8]));
            }
        }
        assert!(!CoverageBlankDetector.is_blank(&DynamicImage::ImageLuma8(page), 70, 25));
    }

    #[test]
    fn edge_shadow_is_ignored() {
        let mut page = RgbImage::from_pixel(200, 200, Rgb([255u8, 255, 255]));
        for y in 0..200 {
            page.put_pixel(0, y, Rgb([0, 0, 0]));
        }
        assert!(CoverageBlankDetector.is_blank(&DynamicImage::ImageRgb8(page), 70, 25));
    }

    #[test]
    fn thresholds_are_rescaled() {
        assert_eq!(CoverageBlankDetector::adjusted_white(0), 1);
        assert_eq!(CoverageBlankDetector::adjusted_white(100), 255);
        assert_eq!(CoverageBlankDetector::adjusted_white(70), 179);
        assert!((CoverageBlankDetector::adjusted_coverage(25) - 0.0025).abs() < 1e-12);
    }
}
