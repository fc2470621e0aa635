// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Host side of a scan session. Serves one request from a byte stream using
// the in-process bridge; used by the worker binary and the TCP scan server.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use scanwerk_core::error::Result;
use scanwerk_core::{CancelToken, WireError};

use crate::driver::DriverRegistry;
use crate::events::ScanOutcome;
use crate::in_process::InProcessBridge;
use crate::protocol::{HostRequest, WireMessage, read_message, write_message};

/// Serve a single session. Returns once the final message is written or the
/// client went away.
pub async fn serve_session<R, W>(reader: R, mut writer: W, registry: Arc<DriverRegistry>) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);
    let Some(request) = read_message::<_, HostRequest>(&mut reader).await? else {
        debug!("Client closed before sending a request");
        return Ok(());
    };
    let bridge = InProcessBridge::new(registry);

    match request {
        HostRequest::DeviceList { request } => {
            let reply = match bridge.device_list(&request).await {
                Ok(devices) => WireMessage::Devices { devices },
                Err(err) => WireMessage::Error {
                    error: WireError::from(&err),
                },
            };
            write_message(&mut writer, &reply).await
        }
        HostRequest::Scan { request } => {
            info!(driver = %request.driver, device = ?request.device, "Serving scan");
            let cancel = CancelToken::new();
            let watcher = tokio::spawn(watch_for_cancel(reader, cancel.clone()));
            let result = forward_scan(&bridge, &request, &cancel, &mut writer).await;
            watcher.abort();
            result
        }
        HostRequest::Cancel => {
            debug!("Cancel received with no scan running");
            Ok(())
        }
    }
}

async fn forward_scan<W>(
    bridge: &InProcessBridge,
    request: &scanwerk_core::ScanRequest,
    cancel: &CancelToken,
    writer: &mut W,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let (tx, mut rx) = mpsc::channel(4);
    let scan = bridge.scan(request, cancel, tx);
    tokio::pin!(scan);

    let result = loop {
        tokio::select! {
            result = &mut scan => break result,
            Some(event) = rx.recv() => {
                if let Err(err) = write_message(writer, &WireMessage::from(event)).await {
                    cancel.cancel();
                    return Err(err);
                }
            }
        }
    };
    while let Some(event) = rx.recv().await {
        write_message(writer, &WireMessage::from(event)).await?;
    }

    let last = match result {
        Ok(ScanOutcome::Completed { pages }) => WireMessage::Done {
            pages,
            cancelled: false,
        },
        Ok(ScanOutcome::Cancelled { pages }) => WireMessage::Done {
            pages,
            cancelled: true,
        },
        Err(err) => {
            warn!(error = %err, "Scan failed");
            WireMessage::Error {
                error: WireError::from(&err),
            }
        }
    };
    write_message(writer, &last).await
}

/// Cancel the scan on an explicit request or when the client disappears.
async fn watch_for_cancel<R>(mut reader: BufReader<R>, cancel: CancelToken)
where
    R: AsyncRead + Unpin,
{
    loop {
        match read_message::<_, HostRequest>(&mut reader).await {
            Ok(Some(HostRequest::Cancel)) => {
                debug!("Cancel requested by client");
                break;
            }
            Ok(Some(other)) => warn!(request = ?other, "Ignoring request during scan"),
            Ok(None) => {
                debug!("Client input closed during scan");
                break;
            }
            Err(err) => {
                warn!(error = %err, "Unreadable client input during scan");
                break;
            }
        }
    }
    cancel.cancel();
}
