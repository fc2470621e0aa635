// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Post-processing pipeline. Turns one captured frame into a finished page.
//
// Stages run in a fixed order:
//
//   1. scale by the inverse scale ratio, then crop or stretch to page size
//   2. convert to the storage representation for the resolved bit depth
//   3. thumbnail, refreshed after every later transform
//   4. brightness / contrast when the device did not apply them
//   5. 180° flip for even pages of a duplex scan
//   6. auto-deskew
//   7. blank page exclusion
//   8. patch code detection
//   9. staging a decoded copy for background OCR
//
// Stages 1 and 2 change the stored pixels; 4 to 6 only append to the
// transform log, so the original capture can always be recovered.

use std::path::PathBuf;
use std::sync::Arc;

use image::{DynamicImage, GrayImage, RgbImage};
use tracing::{debug, instrument};
use uuid::Uuid;

use scanwerk_core::error::{Result, ScanError};
use scanwerk_core::{
    BitDepth, CancelToken, FrameFormat, HorizontalAlign, PageContext, PaperSource, RawFrame,
    ScanRequest,
};
use scanwerk_image::{
    BarcodeDetector, BlankDetector, CoverageBlankDetector, Deskewer, HoughLineDeskewer,
    ImageContext, ImageMetadata, PageRenderer, PatchCodeDetector, PostProcessingData,
    ProcessedImage, TransformStep,
};

/// What became of one page.
#[derive(Debug)]
pub enum PageOutcome {
    Delivered(ProcessedImage, PageContext),
    /// Judged blank and dropped.
    Blank,
    /// Cancellation was observed between stages.
    Cancelled,
}

/// Runs the page stages with explicitly supplied analysers.
pub struct PostProcessor {
    images: ImageContext,
    deskewer: Arc<dyn Deskewer>,
    blank_detector: Arc<dyn BlankDetector>,
    barcode_detector: Arc<dyn BarcodeDetector>,
    temp_dir: PathBuf,
}

impl PostProcessor {
    pub fn new(
        images: ImageContext,
        deskewer: Arc<dyn Deskewer>,
        blank_detector: Arc<dyn BlankDetector>,
        barcode_detector: Arc<dyn BarcodeDetector>,
        temp_dir: PathBuf,
    ) -> Self {
        Self {
            images,
            deskewer,
            blank_detector,
            barcode_detector,
            temp_dir,
        }
    }

    /// The built-in Hough deskewer, coverage blank detector and patch code
    /// reader, over a fresh `ImageContext`.
    pub fn with_default_analysers(temp_dir: PathBuf) -> Self {
        Self::new(
            ImageContext::new(),
            Arc::new(HoughLineDeskewer::default()),
            Arc::new(CoverageBlankDetector),
            Arc::new(PatchCodeDetector::default()),
            temp_dir,
        )
    }

    pub fn images(&self) -> &ImageContext {
        &self.images
    }

    /// Process page `page_number` (1-based, counting every captured page)
    /// of a validated request.
    #[instrument(skip(self, frame, request, cancel), fields(width = frame.width, height = frame.height))]
    pub fn process(
        &self,
        frame: RawFrame,
        request: &ScanRequest,
        page_number: u32,
        cancel: &CancelToken,
    ) -> Result<PageOutcome> {
        let (decoded, resolution) = decode(frame)?;
        let (normalized, resolution) = if request.use_native_ui {
            (decoded, resolution)
        } else {
            normalize(decoded, resolution, request)?
        };
        if cancel.is_cancelled() {
            return Ok(PageOutcome::Cancelled);
        }

        let bit_depth = if request.use_native_ui {
            BitDepth::Color
        } else {
            request.bit_depth
        };
        let stored = to_storage(normalized, bit_depth, request.brightness);
        let mut page = WorkingPage::new(
            self.images.create(
                stored,
                resolution,
                ImageMetadata::new(bit_depth, request.page_size),
            ),
            request.thumbnail_size,
        );
        page.refresh_thumbnail()?;

        let adjust = request.brightness != 0 || request.contrast != 0;
        let device_adjusted = request.driver.applies_brightness_natively()
            && !(request.brightness_contrast_after_scan && !request.use_native_ui);
        if adjust && !device_adjusted && bit_depth != BitDepth::BlackAndWhite {
            page.push(TransformStep::BrightnessContrast {
                brightness: request.brightness,
                contrast: request.contrast,
            })?;
        }

        if request.flip_duplexed_pages
            && request.paper_source == PaperSource::Duplex
            && page_number % 2 == 0
        {
            debug!(page_number, "Flipping duplex back side");
            page.push(TransformStep::Rotate { degrees: 180.0 })?;
        }
        if cancel.is_cancelled() {
            return Ok(PageOutcome::Cancelled);
        }

        if request.auto_deskew {
            if let Some(degrees) = self.deskewer.correction(page.rendering()?) {
                debug!(page_number, degrees, "Deskewing page");
                page.push(TransformStep::Deskew { degrees })?;
            }
        }
        if cancel.is_cancelled() {
            return Ok(PageOutcome::Cancelled);
        }

        if request.exclude_blank_pages
            && self.blank_detector.is_blank(
                page.rendering()?,
                request.blank_white_threshold,
                request.blank_coverage_threshold,
            )
        {
            debug!(page_number, "Excluding blank page");
            return Ok(PageOutcome::Blank);
        }

        let already_tagged = page.image()?.post_processing().barcode.is_some()
            || page.image()?.transform_state().has_patch_code_tag();
        if request.detect_patch_codes && !already_tagged {
            let result = self.barcode_detector.detect(page.rendering()?);
            let mut data = page.image()?.post_processing().clone();
            data.barcode = Some(result);
            page.set_data(data)?;
            if let Some(code) = result.patch_code {
                debug!(page_number, patch_code = code.name(), "Patch code found");
                page.push(TransformStep::PatchCodeTag { code })?;
            }
        }
        if cancel.is_cancelled() {
            return Ok(PageOutcome::Cancelled);
        }

        let ocr_temp_path = match &request.ocr_language {
            Some(_) => Some(self.stage_for_ocr(&mut page)?),
            None => None,
        };

        Ok(PageOutcome::Delivered(
            page.finish()?,
            PageContext {
                page_number,
                ocr_temp_path,
            },
        ))
    }

    fn stage_for_ocr(&self, page: &mut WorkingPage) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.temp_dir)?;
        let path = self.temp_dir.join(format!("ocr-{}.png", Uuid::new_v4()));
        let png = PageRenderer::from_dynamic(page.rendering()?.clone()).to_png_bytes()?;
        std::fs::write(&path, png)?;

        let mut data = page.image()?.post_processing().clone();
        data.ocr_cancel = Some(CancelToken::new());
        data.ocr_temp_path = Some(path.clone());
        page.set_data(data)?;
        debug!(path = %path.display(), "Staged page for background OCR");
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// Working page
// ---------------------------------------------------------------------------

/// A page under construction plus a cached rendering of its current state.
struct WorkingPage {
    image: Option<ProcessedImage>,
    rendered: Option<DynamicImage>,
    thumbnail_size: Option<u32>,
}

impl WorkingPage {
    fn new(image: ProcessedImage, thumbnail_size: Option<u32>) -> Self {
        Self {
            image: Some(image),
            rendered: None,
            thumbnail_size,
        }
    }

    fn image(&self) -> Result<&ProcessedImage> {
        self.image.as_ref().ok_or(ScanError::AlreadyDisposed)
    }

    fn take(&mut self) -> Result<ProcessedImage> {
        self.image.take().ok_or(ScanError::AlreadyDisposed)
    }

    fn rendering(&mut self) -> Result<&DynamicImage> {
        let rendered = match self.rendered.take() {
            Some(rendered) => rendered,
            None => self.image()?.render()?,
        };
        Ok(self.rendered.insert(rendered))
    }

    /// Append a step, then bring the thumbnail up to date.
    fn push(&mut self, step: TransformStep) -> Result<()> {
        let affects_pixels = step.affects_pixels();
        let image = self.take()?.into_transform(step)?;
        self.image = Some(image);
        if affects_pixels {
            self.rendered = None;
            self.refresh_thumbnail()
        } else {
            self.image()?.retag_thumbnail()
        }
    }

    fn set_data(&mut self, data: PostProcessingData) -> Result<()> {
        let image = self.take()?.into_post_processing_data(data)?;
        self.image = Some(image);
        Ok(())
    }

    fn refresh_thumbnail(&mut self) -> Result<()> {
        let Some(size) = self.thumbnail_size else {
            return Ok(());
        };
        let thumbnail = PageRenderer::from_dynamic(self.rendering()?.clone())
            .thumbnail(size)
            .into_dynamic();
        self.image()?.set_thumbnail(thumbnail)
    }

    fn finish(mut self) -> Result<ProcessedImage> {
        self.take()
    }
}

// ---------------------------------------------------------------------------
// Capture-time stages
// ---------------------------------------------------------------------------

fn decode(frame: RawFrame) -> Result<(DynamicImage, (f64, f64))> {
    let resolution = (frame.x_dpi as f64, frame.y_dpi as f64);
    let RawFrame {
        width,
        height,
        format,
        data,
        ..
    } = frame;
    let malformed = || ScanError::Transfer(format!("{width}x{height} {format:?} frame is malformed"));
    let image = match format {
        FrameFormat::Gray8 => {
            DynamicImage::ImageLuma8(GrayImage::from_raw(width, height, data).ok_or_else(malformed)?)
        }
        FrameFormat::Rgb8 => {
            DynamicImage::ImageRgb8(RgbImage::from_raw(width, height, data).ok_or_else(malformed)?)
        }
        FrameFormat::Encoded => PageRenderer::from_bytes(&data)
            .map_err(|e| ScanError::Transfer(format!("undecodable frame: {e}")))?
            .into_dynamic(),
    };
    Ok((image, resolution))
}

/// Scale by the inverse scale ratio, then crop or stretch to the page size.
fn normalize(
    image: DynamicImage,
    resolution: (f64, f64),
    request: &ScanRequest,
) -> Result<(DynamicImage, (f64, f64))> {
    let mut renderer = PageRenderer::from_dynamic(image);
    let (mut x_dpi, mut y_dpi) = resolution;
    if request.scale_ratio > 1 {
        let ratio = request.scale_ratio as f64;
        renderer = renderer.scale(1.0 / ratio)?;
        x_dpi /= ratio;
        y_dpi /= ratio;
    }

    let (Some(page_size), true) = (
        request.page_size,
        request.crop_to_page_size || request.stretch_to_page_size,
    ) else {
        return Ok((renderer.into_dynamic(), (x_dpi, y_dpi)));
    };
    if x_dpi <= 0.0 || y_dpi <= 0.0 {
        debug!("Frame has no resolution; skipping crop/stretch to page size");
        return Ok((renderer.into_dynamic(), (x_dpi, y_dpi)));
    }

    let (w, h) = (renderer.width() as f64, renderer.height() as f64);
    let (width_in, height_in) = (w / x_dpi, h / y_dpi);
    let mut target = page_size.dimensions();
    if target.is_landscape() != (width_in > height_in) {
        target = target.swapped();
    }

    if request.crop_to_page_size {
        let excess_x = ((width_in - target.width_in) * x_dpi).max(0.0) as u32;
        let excess_y = ((height_in - target.height_in) * y_dpi).max(0.0) as u32;
        if excess_x > 0 || excess_y > 0 {
            let (left, right) = match request.page_align {
                HorizontalAlign::Left => (0, excess_x),
                HorizontalAlign::Center => (excess_x / 2, excess_x - excess_x / 2),
                HorizontalAlign::Right => (excess_x, 0),
            };
            debug!(left, right, bottom = excess_y, "Cropping to page size");
            renderer = renderer.crop_margins(left, 0, right, excess_y)?;
        }
    } else {
        x_dpi = w / target.width_in;
        y_dpi = h / target.height_in;
        debug!(x_dpi, y_dpi, "Stretching to page size");
    }
    Ok((renderer.into_dynamic(), (x_dpi, y_dpi)))
}

/// Canonical pixels for the bit depth. Black and white uses a global
/// threshold moved by brightness.
fn to_storage(image: DynamicImage, bit_depth: BitDepth, brightness: i32) -> DynamicImage {
    match bit_depth {
        BitDepth::Color => match image {
            DynamicImage::ImageRgb8(_) => image,
            other => DynamicImage::ImageRgb8(other.to_rgb8()),
        },
        BitDepth::Grayscale => match image {
            DynamicImage::ImageLuma8(_) => image,
            other => DynamicImage::ImageLuma8(other.to_luma8()),
        },
        BitDepth::BlackAndWhite => {
            let threshold = (128 - brightness.clamp(-1000, 1000) * 127 / 1000).clamp(1, 255) as u8;
            PageRenderer::from_dynamic(image)
                .binarize(threshold)
                .into_dynamic()
        }
    }
}
