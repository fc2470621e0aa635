// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Client side of a scan session, shared by the worker and remote bridges.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use scanwerk_core::error::{DeviceErrorKind, Result, ScanError};
use scanwerk_core::{CancelToken, ScanDevice, ScanRequest};

use crate::events::{BridgeEvent, EventSequencer, ScanOutcome};
use crate::protocol::{HostRequest, WireMessage, read_message, write_message};

/// Timing and failure classification for one session.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SessionPolicy {
    /// Longest silence tolerated from the host.
    pub message_timeout: Duration,
    /// How long the host gets to wind down after a cancel.
    pub cancel_grace: Duration,
    /// Error reported when the host disappears mid-session.
    pub lost_host: DeviceErrorKind,
}

impl SessionPolicy {
    fn lost(&self) -> ScanError {
        ScanError::device(
            self.lost_host,
            "scan host closed the session before finishing",
        )
    }

    fn timed_out(&self) -> ScanError {
        ScanError::device(
            DeviceErrorKind::Timeout,
            format!(
                "no message from scan host within {} ms",
                self.message_timeout.as_millis()
            ),
        )
    }
}

pub(crate) async fn request_devices<R, W>(
    reader: R,
    mut writer: W,
    request: &ScanRequest,
    policy: SessionPolicy,
) -> Result<Vec<ScanDevice>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);
    write_message(
        &mut writer,
        &HostRequest::DeviceList {
            request: request.clone(),
        },
    )
    .await?;
    let reply = tokio::time::timeout(policy.message_timeout, read_message(&mut reader))
        .await
        .map_err(|_| policy.timed_out())??;
    match reply {
        Some(WireMessage::Devices { devices }) => Ok(devices),
        Some(WireMessage::Error { error }) => Err(error.into()),
        Some(other) => Err(ScanError::Protocol(format!(
            "unexpected reply to device list: {other:?}"
        ))),
        None => Err(policy.lost()),
    }
}

/// Run a scan over an established session.
pub(crate) async fn run_scan<R, W>(
    reader: R,
    mut writer: W,
    request: &ScanRequest,
    cancel: &CancelToken,
    events: mpsc::Sender<BridgeEvent>,
    policy: SessionPolicy,
) -> Result<ScanOutcome>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    write_message(
        &mut writer,
        &HostRequest::Scan {
            request: request.clone(),
        },
    )
    .await?;

    let (msg_tx, msg_rx) = mpsc::channel(4);
    let pump = tokio::spawn(pump_messages(BufReader::new(reader), msg_tx));
    let result = drive_session(msg_rx, &mut writer, cancel, events, policy).await;
    pump.abort();
    result
}

async fn pump_messages<R>(mut reader: BufReader<R>, tx: mpsc::Sender<Result<WireMessage>>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match read_message(&mut reader).await {
            Ok(Some(message)) => {
                if tx.send(Ok(message)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                let _ = tx.send(Err(err)).await;
                break;
            }
        }
    }
}

async fn drive_session<W>(
    mut messages: mpsc::Receiver<Result<WireMessage>>,
    writer: &mut W,
    cancel: &CancelToken,
    events: mpsc::Sender<BridgeEvent>,
    policy: SessionPolicy,
) -> Result<ScanOutcome>
where
    W: AsyncWrite + Unpin,
{
    let mut sequencer = EventSequencer::new();
    let mut grace_deadline: Option<Instant> = None;
    let mut delivered = 0u32;

    loop {
        let deadline = grace_deadline.unwrap_or_else(|| Instant::now() + policy.message_timeout);
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled(), if grace_deadline.is_none() => {
                debug!("Sending cancel to scan host");
                if let Err(err) = write_message(writer, &HostRequest::Cancel).await {
                    debug!(error = %err, "Scan host unreachable while cancelling");
                }
                grace_deadline = Some(Instant::now() + policy.cancel_grace);
                continue;
            }
            next = tokio::time::timeout_at(deadline, messages.recv()) => next,
        };
        let cancelling = grace_deadline.is_some();
        let cancelled = || ScanOutcome::Cancelled { pages: delivered };

        let message = match next {
            Err(_) if cancelling => {
                warn!("Scan host did not finish within the cancel grace period");
                return Ok(cancelled());
            }
            Err(_) => return Err(policy.timed_out()),
            Ok(None) if cancelling => return Ok(cancelled()),
            Ok(None) => return Err(policy.lost()),
            Ok(Some(Err(_))) if cancelling => return Ok(cancelled()),
            Ok(Some(Err(err))) => return Err(err),
            Ok(Some(Ok(message))) => message,
        };

        let event = match message {
            WireMessage::PageStart { page } => BridgeEvent::PageStart { page },
            WireMessage::Progress { page, progress } => BridgeEvent::Progress { page, progress },
            WireMessage::Frame { page, frame } => match frame.into_frame() {
                Ok(frame) => BridgeEvent::Page { page, frame },
                Err(err) => {
                    warn!(page, error = %err, "Dropping page that failed verification");
                    sequencer.abandon_page();
                    continue;
                }
            },
            WireMessage::Done { pages, cancelled } => {
                debug!(pages, cancelled, "Scan host finished");
                return Ok(if cancelled || cancelling {
                    ScanOutcome::Cancelled { pages: delivered }
                } else {
                    ScanOutcome::Completed { pages: delivered }
                });
            }
            WireMessage::Error { error } => return Err(error.into()),
            WireMessage::Devices { .. } => {
                return Err(ScanError::Protocol(
                    "device list received during a scan".into(),
                ));
            }
        };

        if cancelling || cancel.is_cancelled() {
            continue;
        }
        if let Some(event) = sequencer.accept(event)? {
            let is_page = matches!(event, BridgeEvent::Page { .. });
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => continue,
                sent = events.send(event) => sent,
            };
            if sent.is_err() {
                debug!("Event receiver dropped; cancelling scan");
                cancel.cancel();
            } else if is_page {
                delivered += 1;
            }
        }
    }
}
