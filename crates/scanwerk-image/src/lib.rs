// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// scanwerk-image: Page images for the Scanwerk scanning engine.
//
// Provides the replayable transform log and its renderer, ref-counted
// processed image handles, and the page analysers used by post-processing
// (Hough line deskew, blank page detection, patch code detection).

pub mod blank;
pub mod deskew;
pub mod patch_code;
pub mod processed;
pub mod refcount;
pub mod render;
pub mod transform;

pub use blank::{BlankDetector, CoverageBlankDetector};
pub use deskew::{Deskewer, HoughLineDeskewer};
pub use patch_code::{BarcodeDetector, BarcodeResult, PatchCode, PatchCodeDetector};
pub use processed::{
    ImageContext, ImageMetadata, ImageStorage, PostProcessingData, ProcessedImage, WeakImage,
};
pub use render::PageRenderer;
pub use transform::{TransformState, TransformStep};
