// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Remote bridge: scans on another machine running a `ScanServer`.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, instrument};

use scanwerk_core::error::{DeviceErrorKind, Result, ScanError};
use scanwerk_core::{CancelToken, NetworkTarget, ScanConfig, ScanDevice, ScanRequest};

use crate::client::{self, SessionPolicy};
use crate::events::{BridgeEvent, ScanOutcome};

/// One TCP connection per operation.
#[derive(Debug, Clone)]
pub struct RemoteBridge {
    target: NetworkTarget,
    connect_timeout: Duration,
    message_timeout: Duration,
    cancel_grace: Duration,
}

impl RemoteBridge {
    pub fn new(target: NetworkTarget) -> Self {
        Self {
            target,
            connect_timeout: Duration::from_secs(5),
            message_timeout: Duration::from_secs(60),
            cancel_grace: Duration::from_secs(2),
        }
    }

    pub fn from_config(target: NetworkTarget, config: &ScanConfig) -> Self {
        Self {
            target,
            connect_timeout: config.connect_timeout(),
            message_timeout: config.message_timeout(),
            cancel_grace: config.cancel_grace(),
        }
    }

    pub fn target(&self) -> &NetworkTarget {
        &self.target
    }

    #[instrument(skip(self, request), fields(addr = %self.target.addr()))]
    pub async fn device_list(&self, request: &ScanRequest) -> Result<Vec<ScanDevice>> {
        let (reader, writer) = self.connect().await?.into_split();
        client::request_devices(reader, writer, request, self.policy()).await
    }

    #[instrument(skip_all, fields(addr = %self.target.addr()))]
    pub async fn scan(
        &self,
        request: &ScanRequest,
        cancel: &CancelToken,
        events: mpsc::Sender<BridgeEvent>,
    ) -> Result<ScanOutcome> {
        let (reader, writer) = self.connect().await?.into_split();
        client::run_scan(reader, writer, request, cancel, events, self.policy()).await
    }

    fn policy(&self) -> SessionPolicy {
        SessionPolicy {
            message_timeout: self.message_timeout,
            cancel_grace: self.cancel_grace,
            lost_host: DeviceErrorKind::Offline,
        }
    }

    async fn connect(&self) -> Result<TcpStream> {
        let addr = self.target.addr();
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                ScanError::device(
                    DeviceErrorKind::Offline,
                    format!("timed out connecting to {addr}"),
                )
            })?
            .map_err(|e| {
                ScanError::device(DeviceErrorKind::Offline, format!("connect {addr}: {e}"))
            })?;
        stream.set_nodelay(true)?;
        debug!(%addr, "Connected to scan server");
        Ok(stream)
    }
}
