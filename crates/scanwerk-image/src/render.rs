// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page renderer: replays transform steps (rotate, crop, scale,
// brightness/contrast) against captured pixels using the `image` and
// `imageproc` crates.

use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb};
use imageproc::geometric_transformations::{self, Interpolation};
use scanwerk_core::error::{Result, ScanError};
use tracing::{debug, instrument, trace};

use crate::transform::{TransformState, TransformStep};

/// Replay `state` against `source`. The source is never modified, so the
/// same inputs always give pixel-identical output.
#[instrument(skip_all, fields(steps = state.steps().len()))]
pub fn render(source: &DynamicImage, state: &TransformState) -> Result<DynamicImage> {
    let mut renderer = PageRenderer::from_dynamic(source.clone());
    for step in state.steps() {
        renderer = renderer.apply(step)?;
    }
    debug!(
        width = renderer.width(),
        height = renderer.height(),
        "Rendered transform state"
    );
    Ok(renderer.into_dynamic())
}

/// Chainable renderer for a single in-memory page.
///
/// Each method consumes `self` and returns the transformed page:
///
/// ```ignore
/// let thumb = PageRenderer::from_dynamic(page)
///     .rotate(180.0)
///     .scale(0.5)?
///     .thumbnail(256)
///     .into_dynamic();
/// ```
pub struct PageRenderer {
    image: DynamicImage,
}

impl PageRenderer {
    // -- Construction ---------------------------------------------------------

    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self { image }
    }

    /// Decode an encoded image (PNG, JPEG, TIFF).
    #[instrument(skip(data), fields(data_len = data.len()))]
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(data)
            .map_err(|err| ScanError::Image(format!("failed to decode image: {err}")))?;
        debug!(
            width = image.width(),
            height = image.height(),
            "Image decoded from bytes"
        );
        Ok(Self { image })
    }

    // -- Accessors ------------------------------------------------------------

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn into_dynamic(self) -> DynamicImage {
        self.image
    }

    // -- Transformations ------------------------------------------------------

    /// Apply one transform step.
    pub fn apply(self, step: &TransformStep) -> Result<Self> {
        match *step {
            TransformStep::Crop {
                left,
                top,
                right,
                bottom,
            } => self.crop_margins(left, top, right, bottom),
            TransformStep::Rotate { degrees } | TransformStep::Deskew { degrees } => {
                Ok(self.rotate(degrees))
            }
            TransformStep::BrightnessContrast {
                brightness,
                contrast,
            } => Ok(self.adjust_brightness_contrast(brightness, contrast)),
            TransformStep::Scale { factor } => self.scale(factor),
            TransformStep::PatchCodeTag { .. } => Ok(self),
        }
    }

    /// Rotate clockwise by `degrees`. Right angles are lossless; anything else
    /// rotates about the centre on a canvas of the same size, filling
    /// uncovered corners with white.
    pub fn rotate(self, degrees: f64) -> Self {
        let normalised = degrees.rem_euclid(360.0);
        if (normalised - 90.0).abs() < 0.01 {
            return Self {
                image: self.image.rotate90(),
            };
        }
        if (normalised - 180.0).abs() < 0.01 {
            return Self {
                image: self.image.rotate180(),
            };
        }
        if (normalised - 270.0).abs() < 0.01 {
            return Self {
                image: self.image.rotate270(),
            };
        }
        if normalised < 0.01 || (360.0 - normalised) < 0.01 {
            return self;
        }

        trace!(degrees, "General rotation");
        let radians = (degrees as f32).to_radians();
        let image = match self.image {
            DynamicImage::ImageLuma8(gray) => {
                DynamicImage::ImageLuma8(geometric_transformations::rotate_about_center(
                    &gray,
                    radians,
                    Interpolation::Bilinear,
                    Luma([255u8]),
                ))
            }
            other => DynamicImage::ImageRgb8(geometric_transformations::rotate_about_center(
                &other.to_rgb8(),
                radians,
                Interpolation::Bilinear,
                Rgb([255u8, 255, 255]),
            )),
        };
        Self { image }
    }

    /// Resize by `factor` with Lanczos3 filtering.
    pub fn scale(self, factor: f64) -> Result<Self> {
        if !(factor.is_finite() && factor > 0.0) {
            return Err(ScanError::Image(format!("invalid scale factor {factor}")));
        }
        let width = ((self.image.width() as f64 * factor).round() as u32).max(1);
        let height = ((self.image.height() as f64 * factor).round() as u32).max(1);
        let image = self
            .image
            .resize_exact(width, height, image::imageops::FilterType::Lanczos3);
        Ok(Self { image })
    }

    /// Remove the given number of pixels from each edge.
    pub fn crop_margins(self, left: u32, top: u32, right: u32, bottom: u32) -> Result<Self> {
        let (w, h) = (self.image.width(), self.image.height());
        let width = w.checked_sub(left.saturating_add(right)).filter(|v| *v > 0);
        let height = h.checked_sub(top.saturating_add(bottom)).filter(|v| *v > 0);
        match (width, height) {
            (Some(width), Some(height)) => Ok(Self {
                image: self.image.crop_imm(left, top, width, height),
            }),
            _ => Err(ScanError::Image(format!(
                "crop margins ({left}, {top}, {right}, {bottom}) exceed {w}x{h} image"
            ))),
        }
    }

    /// Brightness and contrast in -1000..=1000. Brightness shifts every
    /// channel by up to a full channel range; contrast scales distance from
    /// mid-grey by `1 + contrast / 1000`.
    pub fn adjust_brightness_contrast(self, brightness: i32, contrast: i32) -> Self {
        let offset = brightness.clamp(-1000, 1000) as f32 * 255.0 / 1000.0;
        let factor = 1.0 + contrast.clamp(-1000, 1000) as f32 / 1000.0;

        let mut lut = [0u8; 256];
        for (value, slot) in lut.iter_mut().enumerate() {
            let v = factor * (value as f32 + offset - 128.0) + 128.0;
            *slot = v.round().clamp(0.0, 255.0) as u8;
        }

        let image = match self.image {
            DynamicImage::ImageLuma8(mut gray) => {
                for p in gray.pixels_mut() {
                    p.0[0] = lut[p.0[0] as usize];
                }
                DynamicImage::ImageLuma8(gray)
            }
            other => {
                let mut rgb = other.to_rgb8();
                for p in rgb.pixels_mut() {
                    for c in p.0.iter_mut() {
                        *c = lut[*c as usize];
                    }
                }
                DynamicImage::ImageRgb8(rgb)
            }
        };
        Self { image }
    }

    /// Global threshold to pure black and white. Pixels with luma below
    /// `threshold` become black.
    pub fn binarize(self, threshold: u8) -> Self {
        let gray = self.image.to_luma8();
        let (width, height) = gray.dimensions();
        let output = GrayImage::from_fn(width, height, |x, y| {
            if gray.get_pixel(x, y).0[0] < threshold {
                Luma([0u8])
            } else {
                Luma([255u8])
            }
        });
        Self {
            image: DynamicImage::ImageLuma8(output),
        }
    }

    /// Shrink to fit within `size` x `size`, preserving aspect ratio.
    pub fn thumbnail(self, size: u32) -> Self {
        Self {
            image: self.image.thumbnail(size.max(1), size.max(1)),
        }
    }

    // -- Output ---------------------------------------------------------------

    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut buffer);
        self.image
            .write_to(&mut cursor, ImageFormat::Png)
            .map_err(|err| ScanError::Image(format!("PNG encoding failed: {err}")))?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |x, y| {
            Luma([((x * 7 + y * 3) % 256) as u8])
        }))
    }

    #[test]
    fn replay_is_deterministic() {
        let source = gradient(120, 80);
        let state: TransformState = [
            TransformStep::Rotate { degrees: 3.7 },
            TransformStep::BrightnessContrast {
                brightness: 150,
                contrast: -200,
            },
            TransformStep::Scale { factor: 0.5 },
            TransformStep::Crop {
                left: 2,
                top: 1,
                right: 3,
                bottom: 4,
            },
        ]
        .into_iter()
        .collect();

        let first = render(&source, &state).expect("render");
        let second = render(&source, &state).expect("render");
        assert_eq!(first.as_bytes(), second.as_bytes());
        assert_eq!((first.width(), first.height()), (55, 35));
    }

    #[test]
    fn right_angle_rotation_swaps_dimensions() {
        let out = PageRenderer::from_dynamic(gradient(30, 20)).rotate(90.0);
        assert_eq!((out.width(), out.height()), (20, 30));
    }

    #[test]
    fn half_turn_is_lossless() {
        let source = gradient(31, 17);
        let twice = PageRenderer::from_dynamic(source.clone())
            .rotate(180.0)
            .rotate(180.0)
            .into_dynamic();
        assert_eq!(twice.as_bytes(), source.as_bytes());
    }

    #[test]
    fn oversized_crop_is_an_error() {
        let err = PageRenderer::from_dynamic(gradient(10, 10))
            .crop_margins(5, 0, 5, 0)
            .err();
        assert!(matches!(err, Some(ScanError::Image(_))));
    }

    #[test]
    fn brightness_lifts_and_clips() {
        let dark = DynamicImage::ImageLuma8(GrayImage::from_pixel(2, 2, Luma([200u8])));
        let out = PageRenderer::from_dynamic(dark)
            .adjust_brightness_contrast(500, 0)
            .into_dynamic()
            .to_luma8();
        assert_eq!(out.get_pixel(0, 0).0[0], 255);
    }

    #[test]
    fn patch_code_tag_leaves_pixels_alone() {
        let source = gradient(12, 9);
        let out = PageRenderer::from_dynamic(source.clone())
            .apply(&TransformStep::PatchCodeTag {
                code: crate::patch_code::PatchCode::PatchT,
            })
            .expect("apply")
            .into_dynamic();
        assert_eq!(out.as_bytes(), source.as_bytes());
    }
}
