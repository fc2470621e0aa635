// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan request validation. Runs once, before any device I/O, and returns the
// fully resolved request every later stage relies on.

use scanwerk_core::error::{Result, ScanError};
use scanwerk_core::{Driver, PageSize, PlatformCaps, ScanConfig, ScanRequest};
use tracing::debug;

pub const MIN_DPI: u32 = 25;
pub const MAX_DPI: u32 = 4800;
const ADJUSTMENT_RANGE: std::ops::RangeInclusive<i32> = -1000..=1000;
const SCALE_RATIOS: [u32; 4] = [1, 2, 4, 8];

/// Resolves defaults and rejects out-of-range options.
#[derive(Debug, Clone)]
pub struct ScanOptionsValidator {
    platform: PlatformCaps,
    default_dpi: u32,
    default_page_size: PageSize,
    ocr_available: bool,
}

impl ScanOptionsValidator {
    pub fn new(platform: PlatformCaps, config: &ScanConfig) -> Self {
        Self {
            platform,
            default_dpi: config.default_dpi,
            default_page_size: config.default_page_size,
            ocr_available: config.ocr_available,
        }
    }

    /// Validate `request`. With `require_device`, a request without a device
    /// is rejected; device listing passes `false`.
    pub fn validate(&self, mut request: ScanRequest, require_device: bool) -> Result<ScanRequest> {
        if request.driver == Driver::Default {
            request.driver = self.platform.default_driver();
            debug!(driver = %request.driver, "Resolved default driver");
        }
        if request.use_native_ui && !request.driver.supports_native_ui() {
            debug!(driver = %request.driver, "Native UI not supported; disabling");
            request.use_native_ui = false;
        }
        if require_device && request.device.is_none() {
            return Err(ScanError::InvalidOptions("no scanning device selected".into()));
        }

        let dpi = request.dpi.unwrap_or(self.default_dpi);
        if !(MIN_DPI..=MAX_DPI).contains(&dpi) {
            return Err(ScanError::InvalidOptions(format!(
                "resolution {dpi} dpi is outside {MIN_DPI}..={MAX_DPI}"
            )));
        }
        request.dpi = Some(dpi);

        let page_size = request.page_size.unwrap_or(self.default_page_size);
        let dims = page_size.dimensions();
        if !(dims.width_in > 0.0 && dims.height_in > 0.0) {
            return Err(ScanError::InvalidOptions(format!(
                "page size {:.2}x{:.2} in is not positive",
                dims.width_in, dims.height_in
            )));
        }
        request.page_size = Some(page_size);

        if !ADJUSTMENT_RANGE.contains(&request.brightness) {
            return Err(ScanError::InvalidOptions(format!(
                "brightness {} is outside -1000..=1000",
                request.brightness
            )));
        }
        if !ADJUSTMENT_RANGE.contains(&request.contrast) {
            return Err(ScanError::InvalidOptions(format!(
                "contrast {} is outside -1000..=1000",
                request.contrast
            )));
        }
        if !SCALE_RATIOS.contains(&request.scale_ratio) {
            return Err(ScanError::InvalidOptions(format!(
                "scale ratio {} must be one of 1, 2, 4, 8",
                request.scale_ratio
            )));
        }
        if request.blank_white_threshold > 100 || request.blank_coverage_threshold > 100 {
            return Err(ScanError::InvalidOptions(
                "blank page thresholds are percentages (0..=100)".into(),
            ));
        }
        if request.thumbnail_size == Some(0) {
            return Err(ScanError::InvalidOptions("thumbnail size must be positive".into()));
        }
        if let Some(language) = &request.ocr_language {
            if !self.ocr_available {
                return Err(ScanError::InvalidOptions(format!(
                    "OCR language {language:?} requested but no OCR engine is configured"
                )));
            }
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanwerk_core::ScanDevice;

    fn linux() -> PlatformCaps {
        PlatformCaps {
            pointer_width: 64,
            is_windows: false,
            is_macos: false,
        }
    }

    fn validator() -> ScanOptionsValidator {
        ScanOptionsValidator::new(linux(), &ScanConfig::default())
    }

    #[test]
    fn resolves_defaults() {
        let request = ScanRequest {
            use_native_ui: true,
            ..ScanRequest::default()
        };
        let resolved = validator().validate(request, false).expect("valid");
        assert_eq!(resolved.driver, Driver::Sane);
        assert!(!resolved.use_native_ui);
        assert_eq!(resolved.dpi, Some(200));
        assert_eq!(resolved.page_size, Some(PageSize::Letter));
    }

    #[test]
    fn native_ui_survives_for_twain() {
        let request = ScanRequest {
            driver: Driver::Twain,
            use_native_ui: true,
            ..ScanRequest::default()
        };
        assert!(validator().validate(request, false).expect("valid").use_native_ui);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let v = validator();
        let bad = [
            ScanRequest {
                brightness: 1001,
                ..ScanRequest::default()
            },
            ScanRequest {
                contrast: -1500,
                ..ScanRequest::default()
            },
            ScanRequest {
                scale_ratio: 3,
                ..ScanRequest::default()
            },
            ScanRequest {
                dpi: Some(10),
                ..ScanRequest::default()
            },
            ScanRequest {
                blank_coverage_threshold: 101,
                ..ScanRequest::default()
            },
        ];
        for request in bad {
            assert!(matches!(
                v.validate(request, false),
                Err(ScanError::InvalidOptions(_))
            ));
        }
    }

    #[test]
    fn ocr_requires_an_engine() {
        let request = ScanRequest {
            ocr_language: Some("eng".into()),
            ..ScanRequest::default()
        };
        assert!(validator().validate(request.clone(), false).is_err());

        let config = ScanConfig {
            ocr_available: true,
            ..ScanConfig::default()
        };
        let v = ScanOptionsValidator::new(linux(), &config);
        assert!(v.validate(request, false).is_ok());
    }

    #[test]
    fn scanning_requires_a_device() {
        let v = validator();
        assert!(v.validate(ScanRequest::default(), true).is_err());
        let request = ScanRequest {
            device: Some(ScanDevice::new("virtual", "Virtual Scanner")),
            ..ScanRequest::default()
        };
        assert!(v.validate(request, true).is_ok());
    }
}
