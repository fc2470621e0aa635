// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-process bridge: drives a registered driver on a blocking thread.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use scanwerk_core::error::{Result, ScanError};
use scanwerk_core::{CancelToken, ScanDevice, ScanRequest};

use crate::driver::{DriverEvent, DriverRegistry};
use crate::events::{BridgeEvent, EventSequencer, ScanOutcome};

/// Calls drivers directly in this process.
#[derive(Clone)]
pub struct InProcessBridge {
    registry: Arc<DriverRegistry>,
}

impl InProcessBridge {
    pub fn new(registry: Arc<DriverRegistry>) -> Self {
        Self { registry }
    }

    #[instrument(skip(self, request), fields(driver = %request.driver))]
    pub async fn device_list(&self, request: &ScanRequest) -> Result<Vec<ScanDevice>> {
        let driver = self.registry.get(request.driver)?;
        let request = request.clone();
        let devices = tokio::task::spawn_blocking(move || driver.list_devices(&request))
            .await
            .map_err(|e| ScanError::Transfer(format!("device list task: {e}")))??;
        debug!(count = devices.len(), "Devices listed");
        Ok(devices)
    }

    /// Run a scan, forwarding page events to `events`.
    ///
    /// Transfer failures skip the affected page. Once `cancel` fires no
    /// further page events are sent and the scan ends as `Cancelled`.
    #[instrument(skip_all, fields(driver = %request.driver))]
    pub async fn scan(
        &self,
        request: &ScanRequest,
        cancel: &CancelToken,
        events: mpsc::Sender<BridgeEvent>,
    ) -> Result<ScanOutcome> {
        let driver = self.registry.get(request.driver)?;
        let (tx, mut rx) = mpsc::channel::<Result<DriverEvent>>(1);
        let producer = {
            let request = request.clone();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || -> Result<()> {
                for item in driver.scan(&request, &cancel)? {
                    if tx.blocking_send(item).is_err() {
                        break;
                    }
                }
                Ok(())
            })
        };

        let mut sequencer = EventSequencer::new();
        let mut delivered = 0u32;
        let mut cancelled = false;
        let mut failure = None;

        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                item = rx.recv() => item,
            };
            let event = match item {
                None => break,
                Some(Ok(event)) => event,
                Some(Err(err @ ScanError::Transfer(_))) => {
                    warn!(error = %err, "Skipping page after transfer failure");
                    sequencer.abandon_page();
                    continue;
                }
                Some(Err(err)) => {
                    failure = Some(err);
                    break;
                }
            };
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            match sequencer.from_driver(event) {
                Ok(Some(event)) => {
                    let is_page = matches!(event, BridgeEvent::Page { .. });
                    let sent = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            cancelled = true;
                            break;
                        }
                        sent = events.send(event) => sent,
                    };
                    if sent.is_err() {
                        debug!("Event receiver dropped; stopping scan");
                        cancel.cancel();
                        cancelled = true;
                        break;
                    }
                    if is_page {
                        delivered += 1;
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        drop(rx);
        let produced = producer
            .await
            .map_err(|e| ScanError::Transfer(format!("driver task: {e}")))?;
        if let Some(err) = failure {
            return Err(err);
        }
        if cancelled {
            info!(pages = delivered, "Scan cancelled");
            return Ok(ScanOutcome::Cancelled {
                pages: delivered,
            });
        }
        produced?;
        info!(pages = delivered, "Scan complete");
        Ok(ScanOutcome::Completed {
            pages: delivered,
        })
    }
}
