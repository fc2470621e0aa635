// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk: Scanner driver contract and scan bridges.
//
// A bridge decides where a driver runs: in this process, in a worker
// process of a different architecture, or on another machine. All three
// report the same page events and outcomes for the same driver output.

pub mod driver;
pub mod events;
pub mod host;
pub mod in_process;
pub mod protocol;
pub mod remote;
pub mod server;
pub mod unavailable;
pub mod virtual_driver;
pub mod worker;

mod client;

use tokio::sync::mpsc;

use scanwerk_core::error::Result;
use scanwerk_core::{CancelToken, ScanDevice, ScanRequest};

pub use driver::{DriverEvent, DriverRegistry, FrameStream, PageFeed, PageSource, ScanDriver, Transfer};
pub use events::{BridgeEvent, EventSequencer, ScanOutcome};
pub use in_process::InProcessBridge;
pub use remote::RemoteBridge;
pub use server::{ScanServer, ServerStatus};
pub use virtual_driver::VirtualDriver;
pub use worker::WorkerBridge;

/// Where scanning happens for one operation.
#[derive(Clone)]
pub enum ScanBridge {
    InProcess(InProcessBridge),
    Worker(WorkerBridge),
    Remote(RemoteBridge),
}

impl ScanBridge {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InProcess(_) => "in-process",
            Self::Worker(_) => "worker",
            Self::Remote(_) => "remote",
        }
    }

    pub async fn device_list(&self, request: &ScanRequest) -> Result<Vec<ScanDevice>> {
        match self {
            Self::InProcess(bridge) => bridge.device_list(request).await,
            Self::Worker(bridge) => bridge.device_list(request).await,
            Self::Remote(bridge) => bridge.device_list(request).await,
        }
    }

    /// Scan with a validated request, sending page events to `events`.
    pub async fn scan(
        &self,
        request: &ScanRequest,
        cancel: &CancelToken,
        events: mpsc::Sender<BridgeEvent>,
    ) -> Result<ScanOutcome> {
        match self {
            Self::InProcess(bridge) => bridge.scan(request, cancel, events).await,
            Self::Worker(bridge) => bridge.scan(request, cancel, events).await,
            Self::Remote(bridge) => bridge.scan(request, cancel, events).await,
        }
    }
}

impl std::fmt::Debug for ScanBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProcess(_) => f.write_str("ScanBridge::InProcess"),
            Self::Worker(w) => f.debug_tuple("ScanBridge::Worker").field(w).finish(),
            Self::Remote(r) => f.debug_tuple("ScanBridge::Remote").field(r).finish(),
        }
    }
}
