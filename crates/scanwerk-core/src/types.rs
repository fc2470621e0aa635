// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Scanwerk scanning engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Result, ScanError};

/// Scanning backend standard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Driver {
    /// Resolved to the platform's native driver during validation.
    #[default]
    Default,
    Wia,
    Twain,
    Sane,
    Apple,
    Escl,
    /// Deterministic test-pattern scanner, available everywhere.
    Virtual,
}

impl Driver {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Wia => "wia",
            Self::Twain => "twain",
            Self::Sane => "sane",
            Self::Apple => "apple",
            Self::Escl => "escl",
            Self::Virtual => "virtual",
        }
    }

    /// Only WIA and TWAIN expose a vendor dialog.
    pub fn supports_native_ui(&self) -> bool {
        matches!(self, Self::Wia | Self::Twain)
    }

    /// Drivers that apply brightness/contrast on the device itself.
    pub fn applies_brightness_natively(&self) -> bool {
        matches!(self, Self::Wia | Self::Twain)
    }
}

impl std::fmt::Display for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Colour depth requested from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BitDepth {
    #[default]
    Color,
    Grayscale,
    BlackAndWhite,
}

/// Where the paper comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PaperSource {
    #[default]
    Flatbed,
    Feeder,
    Duplex,
}

/// Horizontal placement of the page on the scanner glass or feeder guide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HorizontalAlign {
    Left,
    Center,
    #[default]
    Right,
}

/// Physical page size in inches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageDimensions {
    pub width_in: f64,
    pub height_in: f64,
}

impl PageDimensions {
    pub fn is_landscape(&self) -> bool {
        self.width_in > self.height_in
    }

    pub fn swapped(&self) -> Self {
        Self {
            width_in: self.height_in,
            height_in: self.width_in,
        }
    }
}

/// Standard page sizes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum PageSize {
    #[default]
    Letter,
    Legal,
    A5,
    A4,
    A3,
    B5,
    Custom {
        width_in: f64,
        height_in: f64,
    },
}

impl PageSize {
    pub fn dimensions(&self) -> PageDimensions {
        let (width_in, height_in) = match self {
            Self::Letter => (8.5, 11.0),
            Self::Legal => (8.5, 14.0),
            Self::A5 => (148.0 / 25.4, 210.0 / 25.4),
            Self::A4 => (210.0 / 25.4, 297.0 / 25.4),
            Self::A3 => (297.0 / 25.4, 420.0 / 25.4),
            Self::B5 => (176.0 / 25.4, 250.0 / 25.4),
            Self::Custom {
                width_in,
                height_in,
            } => (*width_in, *height_in),
        };
        PageDimensions {
            width_in,
            height_in,
        }
    }
}

/// Host and port of a remote scan listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkTarget {
    pub host: String,
    pub port: u16,
}

impl NetworkTarget {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A scanning device as reported by a driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanDevice {
    /// Driver-specific identifier; may change between sessions (e.g. SANE
    /// USB bus addresses).
    pub id: String,
    /// Human-readable name, stable across reconnects.
    pub name: String,
}

impl ScanDevice {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Paper handling the device supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCaps {
    pub flatbed: bool,
    pub feeder: bool,
    pub duplex: bool,
}

impl Default for DeviceCaps {
    fn default() -> Self {
        Self {
            flatbed: true,
            feeder: false,
            duplex: false,
        }
    }
}

/// Everything needed to perform one scan. Validated once by
/// `ScanOptionsValidator` before any device I/O; afterwards treated as
/// immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub device: Option<ScanDevice>,
    pub driver: Driver,
    pub bit_depth: BitDepth,
    /// Resolution in dots per inch; `None` means the configured default.
    pub dpi: Option<u32>,
    pub paper_source: PaperSource,
    pub page_size: Option<PageSize>,
    pub page_align: HorizontalAlign,
    /// -1000..=1000, 0 leaves the page untouched.
    pub brightness: i32,
    /// -1000..=1000, 0 leaves the page untouched.
    pub contrast: i32,
    /// Apply brightness/contrast in software even when the driver could do it.
    pub brightness_contrast_after_scan: bool,
    /// Optical down-scale: 1, 2, 4 or 8.
    pub scale_ratio: u32,
    pub stretch_to_page_size: bool,
    pub crop_to_page_size: bool,
    pub flip_duplexed_pages: bool,
    pub auto_deskew: bool,
    pub exclude_blank_pages: bool,
    /// 0..=100
    pub blank_white_threshold: u8,
    /// 0..=100
    pub blank_coverage_threshold: u8,
    pub detect_patch_codes: bool,
    /// Language code for background OCR; `None` disables OCR staging.
    pub ocr_language: Option<String>,
    /// Longest edge of the thumbnail in pixels; `None` skips thumbnails.
    pub thumbnail_size: Option<u32>,
    pub use_native_ui: bool,
    /// Scan on a remote host instead of locally.
    pub network: Option<NetworkTarget>,
}

impl Default for ScanRequest {
    fn default() -> Self {
        Self {
            device: None,
            driver: Driver::Default,
            bit_depth: BitDepth::Color,
            dpi: None,
            paper_source: PaperSource::Flatbed,
            page_size: None,
            page_align: HorizontalAlign::Right,
            brightness: 0,
            contrast: 0,
            brightness_contrast_after_scan: false,
            scale_ratio: 1,
            stretch_to_page_size: false,
            crop_to_page_size: false,
            flip_duplexed_pages: true,
            auto_deskew: false,
            exclude_blank_pages: false,
            blank_white_threshold: 70,
            blank_coverage_threshold: 25,
            detect_patch_codes: false,
            ocr_language: None,
            thumbnail_size: None,
            use_native_ui: false,
            network: None,
        }
    }
}

impl ScanRequest {
    /// Resolved DPI. Only meaningful after validation.
    pub fn dpi_or_default(&self) -> u32 {
        self.dpi.unwrap_or(crate::config::DEFAULT_DPI)
    }
}

/// Pixel layout of a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    Gray8,
    Rgb8,
    /// A complete encoded image file (PNG, JPEG, TIFF) as delivered by
    /// network scanners.
    Encoded,
}

/// A single captured page, straight from a driver.
#[derive(Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
    pub x_dpi: u32,
    pub y_dpi: u32,
    pub data: Vec<u8>,
}

impl RawFrame {
    pub fn gray(width: u32, height: u32, dpi: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format: FrameFormat::Gray8,
            x_dpi: dpi,
            y_dpi: dpi,
            data,
        }
    }

    /// Check that the buffer matches the declared geometry.
    pub fn validate(&self) -> Result<()> {
        let channels = match self.format {
            FrameFormat::Gray8 => 1,
            FrameFormat::Rgb8 => 3,
            FrameFormat::Encoded => {
                if self.data.is_empty() {
                    return Err(ScanError::Transfer("empty encoded frame".into()));
                }
                return Ok(());
            }
        };
        let expected = self.width as usize * self.height as usize * channels;
        if self.width == 0 || self.height == 0 || self.data.len() != expected {
            return Err(ScanError::Transfer(format!(
                "frame {}x{} {:?} has {} bytes, expected {expected}",
                self.width,
                self.height,
                self.format,
                self.data.len()
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("x_dpi", &self.x_dpi)
            .field("y_dpi", &self.y_dpi)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Per-page information handed to the caller alongside each finished image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContext {
    /// 1-based capture index. Counts blank pages too; it exists to tell
    /// duplex front sides from back sides.
    pub page_number: u32,
    /// Decoded copy staged for background OCR, if OCR was requested.
    pub ocr_temp_path: Option<PathBuf>,
}

/// What the running platform can offer. Injectable so dispatch rules can be
/// tested for other architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformCaps {
    /// Pointer width of the current process in bits.
    pub pointer_width: u32,
    pub is_windows: bool,
    pub is_macos: bool,
}

impl PlatformCaps {
    pub fn current() -> Self {
        Self {
            pointer_width: usize::BITS,
            is_windows: cfg!(target_os = "windows"),
            is_macos: cfg!(target_os = "macos"),
        }
    }

    /// The driver `Driver::Default` resolves to.
    pub fn default_driver(&self) -> Driver {
        if self.is_windows {
            Driver::Wia
        } else if self.is_macos {
            Driver::Apple
        } else {
            Driver::Sane
        }
    }

    /// Process bit width a driver must run in, if it has a requirement.
    /// The TWAIN data source manager on Windows is 32-bit only.
    pub fn required_pointer_width(&self, driver: Driver) -> Option<u32> {
        match driver {
            Driver::Twain if self.is_windows => Some(32),
            _ => None,
        }
    }
}

impl Default for PlatformCaps {
    fn default() -> Self {
        Self::current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_frame_rejects_short_buffers() {
        let frame = RawFrame::gray(4, 4, 100, vec![0; 15]);
        assert!(matches!(frame.validate(), Err(ScanError::Transfer(_))));
        let frame = RawFrame::gray(4, 4, 100, vec![0; 16]);
        assert!(frame.validate().is_ok());
    }

    #[test]
    fn default_driver_follows_platform() {
        let linux = PlatformCaps {
            pointer_width: 64,
            is_windows: false,
            is_macos: false,
        };
        assert_eq!(linux.default_driver(), Driver::Sane);
        let windows = PlatformCaps {
            is_windows: true,
            ..linux
        };
        assert_eq!(windows.default_driver(), Driver::Wia);
        assert_eq!(windows.required_pointer_width(Driver::Twain), Some(32));
        assert_eq!(linux.required_pointer_width(Driver::Twain), None);
    }

    #[test]
    fn letter_is_portrait() {
        let dims = PageSize::Letter.dimensions();
        assert!(!dims.is_landscape());
        assert!(dims.swapped().is_landscape());
    }
}
