// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Patch code detection. Patch codes are four vertical bars whose
// wide/narrow pattern marks a document separator.

use std::collections::HashMap;

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Separator sheets recognised by document feeders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatchCode {
    Patch1,
    Patch2,
    Patch3,
    Patch4,
    Patch6,
    PatchT,
}

impl PatchCode {
    /// Bar widths left to right, `true` for wide.
    const PATTERNS: [(PatchCode, [bool; 4]); 6] = [
        (PatchCode::Patch1, [true, false, false, true]),
        (PatchCode::Patch2, [true, false, true, false]),
        (PatchCode::Patch3, [true, true, false, false]),
        (PatchCode::Patch4, [false, true, true, false]),
        (PatchCode::Patch6, [false, false, true, true]),
        (PatchCode::PatchT, [true, false, false, false]),
    ];

    fn from_pattern(pattern: [bool; 4]) -> Option<Self> {
        Self::PATTERNS
            .iter()
            .find(|(_, p)| *p == pattern)
            .map(|(code, _)| *code)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Patch1 => "PATCH1",
            Self::Patch2 => "PATCH2",
            Self::Patch3 => "PATCH3",
            Self::Patch4 => "PATCH4",
            Self::Patch6 => "PATCH6",
            Self::PatchT => "PATCHT",
        }
    }
}

/// Outcome of a detection attempt. Its presence on an image means detection
/// has already run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarcodeResult {
    pub patch_code: Option<PatchCode>,
}

impl BarcodeResult {
    pub fn is_patch_t(&self) -> bool {
        self.patch_code == Some(PatchCode::PatchT)
    }
}

pub trait BarcodeDetector: Send + Sync {
    fn detect(&self, image: &DynamicImage) -> BarcodeResult;
}

/// Reads bar widths along sampled rows and votes on the pattern.
#[derive(Debug, Clone)]
pub struct PatchCodeDetector {
    /// Rows sampled across the page.
    pub sample_rows: u32,
    /// A bar is wide when at least this many times the narrowest bar.
    pub wide_ratio: f64,
    /// Rows that must agree before a code is reported.
    pub min_votes: usize,
    pub luma_threshold: u8,
}

impl Default for PatchCodeDetector {
    fn default() -> Self {
        Self {
            sample_rows: 60,
            wide_ratio: 1.8,
            min_votes: 3,
            luma_threshold: 128,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Run {
    start: u32,
    len: u32,
}

impl PatchCodeDetector {
    fn dark_runs(&self, row: impl Iterator<Item = u8>) -> Vec<Run> {
        let mut runs = Vec::new();
        let mut current: Option<Run> = None;
        for (x, luma) in (0u32..).zip(row) {
            if luma < self.luma_threshold {
                if let Some(run) = current.as_mut() {
                    run.len += 1;
                } else {
                    current = Some(Run { start: x, len: 1 });
                }
            } else if let Some(run) = current.take() {
                runs.push(run);
            }
        }
        runs.extend(current);
        runs
    }

    /// Look for an isolated group of four bars and classify it.
    fn classify_row(&self, runs: &[Run]) -> Option<PatchCode> {
        for i in 0..runs.len().saturating_sub(3) {
            let group = &runs[i..i + 4];
            let narrow = group.iter().map(|r| r.len).min()? as f64;
            let widest = group.iter().map(|r| r.len).max()? as f64;
            if narrow < 2.0 || widest < narrow * self.wide_ratio {
                continue;
            }
            let gaps_ok = group
                .windows(2)
                .all(|w| (w[1].start - (w[0].start + w[0].len)) as f64 <= widest * 3.0);
            let clear_before = i == 0
                || (group[0].start - (runs[i - 1].start + runs[i - 1].len)) as f64 >= widest * 2.0;
            let clear_after = runs.get(i + 4).is_none_or(|next| {
                (next.start - (group[3].start + group[3].len)) as f64 >= widest * 2.0
            });
            if !(gaps_ok && clear_before && clear_after) {
                continue;
            }
            let pattern = [0, 1, 2, 3].map(|k| group[k].len as f64 >= narrow * self.wide_ratio);
            if let Some(code) = PatchCode::from_pattern(pattern) {
                return Some(code);
            }
        }
        None
    }
}

impl BarcodeDetector for PatchCodeDetector {
    fn detect(&self, image: &DynamicImage) -> BarcodeResult {
        let gray = image.to_luma8();
        let (w, h) = gray.dimensions();
        if w == 0 || h == 0 {
            return BarcodeResult { patch_code: None };
        }
        let step = (h / self.sample_rows.max(1)).max(1);
        let mut votes: HashMap<PatchCode, usize> = HashMap::new();
        for y in (0..h).step_by(step as usize) {
            let row = (0..w).map(|x| gray.get_pixel(x, y).0[0]);
            if let Some(code) = self.classify_row(&self.dark_runs(row)) {
                *votes.entry(code).or_default() += 1;
            }
        }
        let patch_code = votes
            .into_iter()
            .filter(|(_, n)| *n >= self.min_votes)
            .max_by_key(|(code, n)| (*n, std::cmp::Reverse(code.name())))
            .map(|(code, _)| code);
        debug!(patch_code = ?patch_code, "Patch code detection");
        BarcodeResult { patch_code }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn page_with_bars(widths: [u32; 4]) -> DynamicImage {
        let mut page = GrayImage::from_pixel(400, 300, Luma([255u8]));
        let mut x = 100;
        for width in widths {
            for bx in x..x + width {
                for y in 50..250 {
                    page.put_pixel(bx, y, Luma([0u8]));
                }
            }
            x += width + 8;
        }
        DynamicImage::ImageLuma8(page)
    }

    #[test]
    fn reads_patch_1() {
        let result = PatchCodeDetector::default().detect(&page_with_bars([14, 6, 6, 14]));
        assert_eq!(result.patch_code, Some(PatchCode::Patch1));
    }

    #[test]
    fn reads_patch_t() {
        let result = PatchCodeDetector::default().detect(&page_with_bars([14, 6, 6, 6]));
        assert!(result.is_patch_t());
    }

    #[test]
    fn text_lines_are_not_patch_codes() {
        let mut page = GrayImage::from_pixel(400, 300, Luma([255u8]));
        for line in 0..6 {
            for y in 40 + line * 30..44 + line * 30 {
                for x in 40..360 {
                    page.put_pixel(x, y, Luma([0u8]));
                }
            }
        }
        let result = PatchCodeDetector::default().detect(&DynamicImage::ImageLuma8(page));
        assert_eq!(result.patch_code, None);
    }

    #[test]
    fn equal_bars_are_rejected() {
        let result = PatchCodeDetector::default().detect(&page_with_bars([8, 8, 8, 8]));
        assert_eq!(result.patch_code, None);
    }
}
