// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Scanwerk.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Named device failure conditions. Each is recoverable by retry or by
/// re-prompting the user, unlike capability mismatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceErrorKind {
    Busy,
    Offline,
    NotFound,
    /// The feeder ran out of paper. Drivers raise this; `PageFeed` turns it
    /// into clean end-of-stream once at least one page has been captured.
    FeederEmpty,
    /// A worker process exited before signalling completion.
    WorkerExited,
    /// A bridge waited too long for the next message.
    Timeout,
}

impl std::fmt::Display for DeviceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Busy => "device busy",
            Self::Offline => "device offline",
            Self::NotFound => "device not found",
            Self::FeederEmpty => "feeder empty",
            Self::WorkerExited => "worker process exited",
            Self::Timeout => "device timed out",
        };
        f.write_str(s)
    }
}

/// Top-level error type for all Scanwerk operations.
#[derive(Debug, Error)]
pub enum ScanError {
    // -- Device errors --
    #[error("{kind}: {detail}")]
    Device {
        kind: DeviceErrorKind,
        detail: String,
    },

    #[error("the selected device has no document feeder")]
    NoFeederSupport,

    #[error("the selected device does not support duplex scanning")]
    NoDuplexSupport,

    #[error("page transfer failed: {0}")]
    Transfer(String),

    #[error("unrecognised driver failure: {0}")]
    UnknownDriver(String),

    // -- Request errors --
    #[error("invalid scan options: {0}")]
    InvalidOptions(String),

    // -- Image errors --
    #[error("image processing failed: {0}")]
    Image(String),

    #[error("image already disposed")]
    AlreadyDisposed,

    // -- Bridge / transport --
    #[error("bridge protocol error: {0}")]
    Protocol(String),

    #[error("feature not available on this platform")]
    PlatformUnavailable,

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScanError {
    pub fn device(kind: DeviceErrorKind, detail: impl Into<String>) -> Self {
        Self::Device {
            kind,
            detail: detail.into(),
        }
    }

    /// The device error kind, if this is a device error.
    pub fn device_kind(&self) -> Option<DeviceErrorKind> {
        match self {
            Self::Device { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_device(&self, kind: DeviceErrorKind) -> bool {
        self.device_kind() == Some(kind)
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ScanError>;

// ---------------------------------------------------------------------------
// Wire form
// ---------------------------------------------------------------------------

/// Category of a `ScanError` that survives a process or network hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireErrorKind {
    Device(DeviceErrorKind),
    NoFeederSupport,
    NoDuplexSupport,
    Transfer,
    UnknownDriver,
    InvalidOptions,
    Image,
    AlreadyDisposed,
    Protocol,
    PlatformUnavailable,
    Io,
}

/// Serialisable mirror of `ScanError` used by the worker and remote bridges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: WireErrorKind,
    pub message: String,
}

impl From<&ScanError> for WireError {
    fn from(err: &ScanError) -> Self {
        let (kind, message) = match err {
            ScanError::Device { kind, detail } => (WireErrorKind::Device(*kind), detail.clone()),
            ScanError::NoFeederSupport => (WireErrorKind::NoFeederSupport, String::new()),
            ScanError::NoDuplexSupport => (WireErrorKind::NoDuplexSupport, String::new()),
            ScanError::Transfer(m) => (WireErrorKind::Transfer, m.clone()),
            ScanError::UnknownDriver(m) => (WireErrorKind::UnknownDriver, m.clone()),
            ScanError::InvalidOptions(m) => (WireErrorKind::InvalidOptions, m.clone()),
            ScanError::Image(m) => (WireErrorKind::Image, m.clone()),
            ScanError::AlreadyDisposed => (WireErrorKind::AlreadyDisposed, String::new()),
            ScanError::Protocol(m) => (WireErrorKind::Protocol, m.clone()),
            ScanError::PlatformUnavailable => (WireErrorKind::PlatformUnavailable, String::new()),
            ScanError::Io(e) => (WireErrorKind::Io, e.to_string()),
            ScanError::Serialization(e) => (WireErrorKind::Protocol, e.to_string()),
        };
        Self { kind, message }
    }
}

impl From<WireError> for ScanError {
    fn from(err: WireError) -> Self {
        match err.kind {
            WireErrorKind::Device(kind) => ScanError::Device {
                kind,
                detail: err.message,
            },
            WireErrorKind::NoFeederSupport => ScanError::NoFeederSupport,
            WireErrorKind::NoDuplexSupport => ScanError::NoDuplexSupport,
            WireErrorKind::Transfer => ScanError::Transfer(err.message),
            WireErrorKind::UnknownDriver => ScanError::UnknownDriver(err.message),
            WireErrorKind::InvalidOptions => ScanError::InvalidOptions(err.message),
            WireErrorKind::Image => ScanError::Image(err.message),
            WireErrorKind::AlreadyDisposed => ScanError::AlreadyDisposed,
            WireErrorKind::Protocol => ScanError::Protocol(err.message),
            WireErrorKind::PlatformUnavailable => ScanError::PlatformUnavailable,
            WireErrorKind::Io => ScanError::Io(std::io::Error::other(err.message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_kind_survives_the_wire() {
        let err = ScanError::device(DeviceErrorKind::Busy, "lamp warming up");
        let wire = WireError::from(&err);
        let json = serde_json::to_string(&wire).expect("serialize");
        let back: WireError = serde_json::from_str(&json).expect("deserialize");
        let restored = ScanError::from(back);
        assert!(restored.is_device(DeviceErrorKind::Busy));
        assert_eq!(restored.to_string(), "device busy: lamp warming up");
    }

    #[test]
    fn capability_errors_are_not_device_errors() {
        assert_eq!(ScanError::NoFeederSupport.device_kind(), None);
        assert!(!ScanError::NoDuplexSupport.is_device(DeviceErrorKind::NotFound));
    }
}
