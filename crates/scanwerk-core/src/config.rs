// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, ScanError};

/// Resolution used when a request leaves it unset.
pub const DEFAULT_DPI: u32 = 200;

/// Name of the worker executable looked up next to the current binary.
pub const WORKER_EXE_NAME: &str = "scanwerk-worker";

/// Settings the host application wires into the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Directory for pages staged for background OCR.
    pub temp_dir: PathBuf,
    /// Explicit path to the worker executable. When unset the worker is
    /// expected beside the current executable.
    pub worker_path: Option<PathBuf>,
    /// Longest wait for the next message from a worker or remote host.
    pub message_timeout_ms: u64,
    /// Timeout for establishing a remote connection.
    pub connect_timeout_ms: u64,
    /// How long a cancelled worker/remote scan may take to wind down before
    /// it is torn down forcibly.
    pub cancel_grace_ms: u64,
    /// Pages captured but not yet post-processed.
    pub max_in_flight_pages: usize,
    /// Whether an OCR engine is installed. Requests naming an OCR language
    /// are rejected when false.
    pub ocr_available: bool,
    pub default_dpi: u32,
    pub default_page_size: crate::PageSize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir().join("scanwerk"),
            worker_path: None,
            message_timeout_ms: 60_000,
            connect_timeout_ms: 5_000,
            cancel_grace_ms: 2_000,
            max_in_flight_pages: 2,
            ocr_available: false,
            default_dpi: DEFAULT_DPI,
            default_page_size: crate::PageSize::Letter,
        }
    }
}

impl ScanConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        if config.max_in_flight_pages == 0 {
            return Err(ScanError::InvalidOptions(
                "max_in_flight_pages must be at least 1".into(),
            ));
        }
        Ok(config)
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    /// The worker executable to launch.
    pub fn resolve_worker_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.worker_path {
            return Ok(path.clone());
        }
        let exe = std::env::current_exe()?;
        let dir = exe
            .parent()
            .ok_or_else(|| ScanError::InvalidOptions("current executable has no parent".into()))?;
        Ok(dir.join(format!("{WORKER_EXE_NAME}{}", std::env::consts::EXE_SUFFIX)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("scanwerk.json");
        std::fs::write(&path, r#"{ "ocr_available": true, "default_dpi": 300 }"#).expect("write");

        let config = ScanConfig::from_json_file(&path).expect("load");
        assert!(config.ocr_available);
        assert_eq!(config.default_dpi, 300);
        assert_eq!(config.max_in_flight_pages, 2);
        assert_eq!(config.default_page_size, crate::PageSize::Letter);
    }

    #[test]
    fn zero_in_flight_pages_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("scanwerk.json");
        std::fs::write(&path, r#"{ "max_in_flight_pages": 0 }"#).expect("write");
        assert!(matches!(
            ScanConfig::from_json_file(&path),
            Err(ScanError::InvalidOptions(_))
        ));
    }
}
