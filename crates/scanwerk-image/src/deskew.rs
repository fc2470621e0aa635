// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Skew estimation by Hough-style line voting.
//
// 1. Threshold the page to a foreground mask.
// 2. Collect bottom-edge pixels: foreground with background directly below.
// 3. For every candidate angle, each edge pixel votes for the line through
//    it at that angle, keyed by its distance `y·cos θ − x·sin θ + width`.
// 4. Take the highest-voted (distance, angle) cells and drop the weak ones.
// 5. Find the densest cluster of surviving angles. A big enough cluster
//    gives the skew; otherwise the page has no consistent orientation.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use image::DynamicImage;
use rayon::prelude::*;
use tracing::{debug, instrument};

/// Rows this close to the top or bottom edge never vote, so a scanner
/// border or lid shadow cannot outweigh the text.
const IGNORE_EDGE_FRACTION: f64 = 0.01;

/// Estimates how far a page is rotated from horizontal.
pub trait Deskewer: Send + Sync {
    /// Measured clockwise skew in degrees. 0 means no consistent skew was
    /// found, not a measured zero.
    fn skew_angle(&self, image: &DynamicImage) -> f64;

    /// Clockwise rotation that straightens the page, or `None` when no
    /// correction is needed.
    fn correction(&self, image: &DynamicImage) -> Option<f64> {
        let angle = self.skew_angle(image);
        (angle != 0.0).then_some(-angle)
    }
}

/// Hough line deskewer. The defaults scan ±20° in 0.2° steps.
#[derive(Debug, Clone)]
pub struct HoughLineDeskewer {
    pub angle_min: f64,
    pub angle_max: f64,
    /// More steps give finer angles at a linear cost in run time.
    pub angle_steps: usize,
    /// How many top-scoring cells take part in clustering.
    pub best_max_count: usize,
    /// Cells scoring under `factor` × the score at this rank are dropped.
    pub best_threshold_index: usize,
    pub best_threshold_factor: f64,
    /// Width of the clustering window in degrees.
    pub cluster_spread: f64,
    /// Luma below this is foreground.
    pub luma_threshold: u8,
}

impl Default for HoughLineDeskewer {
    fn default() -> Self {
        Self {
            angle_min: -20.0,
            angle_max: 20.0,
            angle_steps: 201,
            best_max_count: 100,
            best_threshold_index: 9,
            best_threshold_factor: 0.5,
            cluster_spread: 2.0,
            luma_threshold: 128,
        }
    }
}

impl HoughLineDeskewer {
    pub fn new() -> Self {
        Self::default()
    }

    fn angle_step(&self) -> f64 {
        (self.angle_max - self.angle_min) / (self.angle_steps.max(2) - 1) as f64
    }

    fn edge_pixels(&self, image: &DynamicImage) -> Vec<(f64, f64)> {
        let gray = image.to_luma8();
        let (w, h) = (gray.width() as usize, gray.height() as usize);
        let raw = gray.as_raw();
        let fg = |x: usize, y: usize| raw[y * w + x] < self.luma_threshold;

        let y_offset = (h as f64 * IGNORE_EDGE_FRACTION).round() as usize;
        let mut edges = Vec::new();
        if w < 3 || h < 3 + 2 * y_offset {
            return edges;
        }
        for y in 1 + y_offset..=h - 2 - y_offset {
            for x in 1..=w - 2 {
                if fg(x, y) && !fg(x, y + 1) {
                    edges.push((x as f64, y as f64));
                }
            }
        }
        edges
    }

    /// Vote table laid out as `[angle][distance]`. Each angle row is filled
    /// independently.
    fn vote(&self, edges: &[(f64, f64)], width: u32, d_count: usize) -> Vec<u32> {
        let step = self.angle_step();
        let offset = width as f64;
        let mut scores = vec![0u32; self.angle_steps * d_count];
        scores
            .par_chunks_mut(d_count)
            .enumerate()
            .for_each(|(i, row)| {
                let (sin, cos) = (self.angle_min + step * i as f64).to_radians().sin_cos();
                for &(x, y) in edges {
                    let d = (y * cos - x * sin + offset) as i64;
                    if let Ok(d) = usize::try_from(d) {
                        if let Some(cell) = row.get_mut(d) {
                            *cell += 1;
                        }
                    }
                }
            });
        scores
    }

    /// Angles of the strongest lines, strongest first.
    fn best_line_angles(&self, scores: &[u32], d_count: usize) -> Vec<f64> {
        let mut heap: BinaryHeap<Reverse<(u32, usize)>> =
            BinaryHeap::with_capacity(self.best_max_count + 1);
        for (index, &count) in scores.iter().enumerate() {
            if count == 0 {
                continue;
            }
            if heap.len() < self.best_max_count {
                heap.push(Reverse((count, index)));
            } else if heap.peek().is_some_and(|Reverse((min, _))| count > *min) {
                heap.pop();
                heap.push(Reverse((count, index)));
            }
        }
        let best: Vec<(u32, usize)> = heap.into_sorted_vec().into_iter().map(|r| r.0).collect();
        let Some(&(reference, _)) = best.get(self.best_threshold_index.min(best.len().saturating_sub(1)))
        else {
            return Vec::new();
        };
        let threshold = (reference as f64 * self.best_threshold_factor) as u32;
        let step = self.angle_step();
        best.into_iter()
            .filter(|(count, _)| *count >= threshold)
            .map(|(_, index)| self.angle_min + step * (index / d_count) as f64)
            .collect()
    }

    /// The densest window of `cluster_spread` degrees among sorted angles.
    fn densest_cluster<'a>(&self, sorted: &'a [f64]) -> &'a [f64] {
        let mut best = (0, 0);
        let mut end = 0;
        for start in 0..sorted.len() {
            end = end.max(start);
            while end < sorted.len() && sorted[end] < sorted[start] + self.cluster_spread {
                end += 1;
            }
            if end - start > best.1 - best.0 {
                best = (start, end);
            }
        }
        &sorted[best.0..best.1]
    }
}

impl Deskewer for HoughLineDeskewer {
    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    fn skew_angle(&self, image: &DynamicImage) -> f64 {
        let edges = self.edge_pixels(image);
        if edges.is_empty() {
            debug!("No edge pixels; skipping deskew");
            return 0.0;
        }

        let d_count = 2 * (image.width() as usize + image.height() as usize);
        let scores = self.vote(&edges, image.width(), d_count);

        let mut angles = self.best_line_angles(&scores, d_count);
        angles.sort_by(f64::total_cmp);
        let cluster = self.densest_cluster(&angles);

        if cluster.is_empty() || cluster.len() < angles.len() / 2 {
            debug!(
                candidates = angles.len(),
                cluster = cluster.len(),
                "No consistent skew angle"
            );
            return 0.0;
        }
        let angle = cluster.iter().sum::<f64>() / cluster.len() as f64;
        debug!(
            edge_pixels = edges.len(),
            candidates = angles.len(),
            cluster = cluster.len(),
            angle,
            "Skew angle estimated"
        );
        angle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use imageproc::geometric_transformations::{Interpolation, rotate_about_center};

    /// White page with evenly spaced dark bars standing in for text lines.
    fn lined_page() -> GrayImage {
        let mut page = GrayImage::from_pixel(400, 300, Luma([255u8]));
        for line in 0..8 {
            let top = 40 + line * 30;
            for y in top..top + 4 {
                for x in 40..360 {
                    page.put_pixel(x, y, Luma([0u8]));
                }
            }
        }
        page
    }

    fn skewed(page: &GrayImage, degrees: f32) -> DynamicImage {
        DynamicImage::ImageLuma8(rotate_about_center(
            page,
            degrees.to_radians(),
            Interpolation::Nearest,
            Luma([255u8]),
        ))
    }

    #[test]
    fn straight_page_measures_near_zero() {
        let angle = HoughLineDeskewer::new().skew_angle(&DynamicImage::ImageLuma8(lined_page()));
        assert!(angle.abs() < 0.21, "angle {angle}");
    }

    #[test]
    fn recovers_clockwise_skew() {
        let deskewer = HoughLineDeskewer::new();
        for degrees in [5.0f32, -3.0, 12.0] {
            let angle = deskewer.skew_angle(&skewed(&lined_page(), degrees));
            assert!(
                (angle - degrees as f64).abs() < 0.3,
                "skewed {degrees}, measured {angle}"
            );
        }
    }

    #[test]
    fn dark_rows_at_the_page_edge_do_not_vote() {
        let mut page = skewed(&lined_page(), 5.0).to_luma8();
        let (w, h) = page.dimensions();
        // Striped border inside the top and bottom 1%: four full-width
        // horizontal edges.
        for y in [1, 3, h - 4, h - 2] {
            for x in 0..w {
                page.put_pixel(x, y, Luma([0u8]));
            }
        }
        let angle = HoughLineDeskewer::new().skew_angle(&DynamicImage::ImageLuma8(page));
        assert!((angle - 5.0).abs() < 0.3, "measured {angle}");
    }

    #[test]
    fn correction_is_the_negated_skew() {
        let correction = HoughLineDeskewer::new()
            .correction(&skewed(&lined_page(), 4.0))
            .expect("skew found");
        assert!((correction + 4.0).abs() < 0.3, "correction {correction}");
    }

    #[test]
    fn noise_has_no_consistent_skew() {
        // xorshift so the test needs no RNG crate
        let mut state = 0x2545_f491_4f6c_dd1du64;
        let noise = GrayImage::from_fn(200, 200, |_, _| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            Luma([if state & 1 == 0 { 0u8 } else { 255 }])
        });
        let angle = HoughLineDeskewer::new().skew_angle(&DynamicImage::ImageLuma8(noise));
        assert_eq!(angle, 0.0);
    }

    #[test]
    fn blank_page_is_not_corrected() {
        let blank = DynamicImage::ImageLuma8(GrayImage::from_pixel(50, 50, Luma([255u8])));
        assert_eq!(HoughLineDeskewer::new().correction(&blank), None);
    }

    #[test]
    fn cluster_window_is_half_open() {
        let deskewer = HoughLineDeskewer::new();
        let sorted = [-10.0, 1.0, 1.2, 1.9, 3.0, 9.0];
        assert_eq!(deskewer.densest_cluster(&sorted), &[1.0, 1.2, 1.9]);
    }
}
