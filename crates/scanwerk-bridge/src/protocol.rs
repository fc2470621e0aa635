// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan host protocol: newline-delimited JSON over a byte stream.
//
// The same framing runs over a worker's stdin/stdout and over TCP. A client
// opens a session with exactly one `HostRequest`; during a scan it may
// follow up with `Cancel`. The host answers with a stream of `WireMessage`s
// that ends in `Devices`, `Done` or `Error`.
//
// Frames travel hex-encoded with a SHA-256 digest so a truncated or corrupted
// page is rejected instead of decoded.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use scanwerk_core::error::{Result, ScanError, WireError};
use scanwerk_core::{FrameFormat, RawFrame, ScanDevice, ScanRequest};

use crate::events::BridgeEvent;

/// Longest accepted message line. A hex-encoded A3 colour page at 600 dpi
/// fits with room to spare.
pub const MAX_MESSAGE_BYTES: u64 = 512 * 1024 * 1024; // 512 MiB

/// Client to host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostRequest {
    DeviceList { request: ScanRequest },
    Scan { request: ScanRequest },
    Cancel,
}

/// Host to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    Devices { devices: Vec<ScanDevice> },
    PageStart { page: u32 },
    Progress { page: u32, progress: f64 },
    Frame { page: u32, frame: WireFrame },
    Done { pages: u32, cancelled: bool },
    Error { error: WireError },
}

impl From<BridgeEvent> for WireMessage {
    fn from(event: BridgeEvent) -> Self {
        match event {
            BridgeEvent::PageStart { page } => Self::PageStart { page },
            BridgeEvent::Progress { page, progress } => Self::Progress { page, progress },
            BridgeEvent::Page { page, frame } => Self::Frame {
                page,
                frame: WireFrame::from_frame(&frame),
            },
        }
    }
}

/// A `RawFrame` in transit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireFrame {
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
    pub x_dpi: u32,
    pub y_dpi: u32,
    pub data_hex: String,
    pub sha256: String,
}

impl WireFrame {
    pub fn from_frame(frame: &RawFrame) -> Self {
        Self {
            width: frame.width,
            height: frame.height,
            format: frame.format,
            x_dpi: frame.x_dpi,
            y_dpi: frame.y_dpi,
            data_hex: hex::encode(&frame.data),
            sha256: hash_bytes(&frame.data),
        }
    }

    /// Decode and verify. Fails with `Transfer` on any mismatch.
    pub fn into_frame(self) -> Result<RawFrame> {
        let data = hex::decode(&self.data_hex)
            .map_err(|e| ScanError::Transfer(format!("frame payload is not hex: {e}")))?;
        let actual = hash_bytes(&data);
        if actual != self.sha256 {
            return Err(ScanError::Transfer(format!(
                "frame digest mismatch: expected {}, got {actual}",
                self.sha256
            )));
        }
        let frame = RawFrame {
            width: self.width,
            height: self.height,
            format: self.format,
            x_dpi: self.x_dpi,
            y_dpi: self.y_dpi,
            data,
        };
        frame.validate()?;
        Ok(frame)
    }
}

/// Lowercase hex SHA-256 of `data`.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Write one message as a JSON line and flush it.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one message. `Ok(None)` on a clean end of stream.
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    let mut limited = (&mut *reader).take(MAX_MESSAGE_BYTES);
    let read = limited.read_line(&mut line).await?;
    if read == 0 {
        return Ok(None);
    }
    if !line.ends_with('\n') {
        if read as u64 >= MAX_MESSAGE_BYTES {
            return Err(ScanError::Protocol(format!(
                "message exceeds {MAX_MESSAGE_BYTES} bytes"
            )));
        }
        return Err(ScanError::Protocol("stream ended mid-message".into()));
    }
    serde_json::from_str(line.trim_end())
        .map(Some)
        .map_err(|e| ScanError::Protocol(format!("malformed message: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanwerk_core::error::DeviceErrorKind;
    use tokio::io::BufReader;

    #[test]
    fn hash_known_value() {
        assert_eq!(
            hash_bytes(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn corrupted_frame_is_rejected() {
        let mut wire = WireFrame::from_frame(&RawFrame::gray(2, 1, 300, vec![10, 20]));
        wire.data_hex = "0a15".into();
        assert!(matches!(wire.into_frame(), Err(ScanError::Transfer(_))));
    }

    #[test]
    fn messages_are_tagged() {
        let json = serde_json::to_string(&HostRequest::Cancel).expect("serialize");
        assert_eq!(json, r#"{"type":"cancel"}"#);
        let json = serde_json::to_string(&WireMessage::PageStart { page: 3 }).expect("serialize");
        assert_eq!(json, r#"{"type":"page_start","page":3}"#);
    }

    #[tokio::test]
    async fn lines_round_trip_through_a_pipe() {
        let (client, host) = tokio::io::duplex(64 * 1024);
        let (_, mut client_w) = tokio::io::split(client);
        let (host_r, _host_w) = tokio::io::split(host);
        let mut host_r = BufReader::new(host_r);

        let error = WireError::from(&ScanError::device(DeviceErrorKind::Offline, "unplugged"));
        write_message(&mut client_w, &WireMessage::Error { error: error.clone() })
            .await
            .expect("write");
        write_message(
            &mut client_w,
            &WireMessage::Done {
                pages: 2,
                cancelled: false,
            },
        )
        .await
        .expect("write");
        drop(client_w);

        let first: Option<WireMessage> = read_message(&mut host_r).await.expect("read");
        assert_eq!(first, Some(WireMessage::Error { error }));
        let second: Option<WireMessage> = read_message(&mut host_r).await.expect("read");
        assert!(matches!(second, Some(WireMessage::Done { pages: 2, .. })));
    }

    #[tokio::test]
    async fn truncated_line_is_a_protocol_error() {
        let mut reader = BufReader::new(&b"{\"type\":\"can"[..]);
        let result: Result<Option<HostRequest>> = read_message(&mut reader).await;
        assert!(matches!(result, Err(ScanError::Protocol(_))));
    }
}
