// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Placeholder for scanning standards this build has no backend for.
//
// Every operation returns `PlatformUnavailable`; a native backend registered
// in the `DriverRegistry` replaces it.

use scanwerk_core::error::{Result, ScanError};
use scanwerk_core::{CancelToken, DeviceCaps, Driver, ScanDevice, ScanRequest};

use crate::driver::{FrameStream, ScanDriver};

/// Driver entry for a standard with no backend in this process.
#[derive(Debug, Clone, Copy)]
pub struct UnavailableDriver(Driver);

impl UnavailableDriver {
    pub fn new(driver: Driver) -> Self {
        Self(driver)
    }
}

impl ScanDriver for UnavailableDriver {
    fn driver(&self) -> Driver {
        self.0
    }

    fn list_devices(&self, _request: &ScanRequest) -> Result<Vec<ScanDevice>> {
        tracing::warn!(driver = %self.0, "list_devices called on unavailable driver");
        Err(ScanError::PlatformUnavailable)
    }

    fn caps(&self, _device: &ScanDevice) -> Result<DeviceCaps> {
        Err(ScanError::PlatformUnavailable)
    }

    fn scan(&self, _request: &ScanRequest, _cancel: &CancelToken) -> Result<FrameStream> {
        tracing::warn!(driver = %self.0, "scan called on unavailable driver");
        Err(ScanError::PlatformUnavailable)
    }
}
