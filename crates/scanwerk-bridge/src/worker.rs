// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Worker bridge: runs each operation in a fresh `scanwerk-worker` process.
//
// Used when a driver needs a different process architecture than the host
// (32-bit TWAIN on 64-bit Windows). A crash inside the driver takes down the
// worker only and surfaces as `Device { WorkerExited }`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use scanwerk_core::error::{DeviceErrorKind, Result, ScanError};
use scanwerk_core::{CancelToken, ScanConfig, ScanDevice, ScanRequest};

use crate::client::{self, SessionPolicy};
use crate::events::{BridgeEvent, ScanOutcome};

/// Spawns worker processes and talks to them over stdin/stdout.
#[derive(Debug, Clone)]
pub struct WorkerBridge {
    exe: PathBuf,
    message_timeout: Duration,
    cancel_grace: Duration,
}

impl WorkerBridge {
    // -- Construction -------------------------------------------------------

    pub fn new(exe: impl Into<PathBuf>) -> Self {
        Self {
            exe: exe.into(),
            message_timeout: Duration::from_secs(60),
            cancel_grace: Duration::from_secs(2),
        }
    }

    pub fn from_config(config: &ScanConfig) -> Result<Self> {
        Ok(Self::new(config.resolve_worker_path()?)
            .with_timeouts(config.message_timeout(), config.cancel_grace()))
    }

    pub fn with_timeouts(mut self, message_timeout: Duration, cancel_grace: Duration) -> Self {
        self.message_timeout = message_timeout;
        self.cancel_grace = cancel_grace;
        self
    }

    pub fn exe(&self) -> &Path {
        &self.exe
    }

    // -- Operations ---------------------------------------------------------

    #[instrument(skip(self, request), fields(exe = %self.exe.display()))]
    pub async fn device_list(&self, request: &ScanRequest) -> Result<Vec<ScanDevice>> {
        let mut child = self.spawn()?;
        let (stdout, stdin) = Self::pipes(&mut child)?;
        let result = client::request_devices(stdout, stdin, request, self.policy()).await;
        self.reap(child, result.is_err()).await;
        result
    }

    #[instrument(skip_all, fields(exe = %self.exe.display(), driver = %request.driver))]
    pub async fn scan(
        &self,
        request: &ScanRequest,
        cancel: &CancelToken,
        events: mpsc::Sender<BridgeEvent>,
    ) -> Result<ScanOutcome> {
        let mut child = self.spawn()?;
        let (stdout, stdin) = Self::pipes(&mut child)?;
        let result =
            client::run_scan(stdout, stdin, request, cancel, events, self.policy()).await;
        let kill = !matches!(result, Ok(ScanOutcome::Completed { .. }));
        self.reap(child, kill).await;
        result
    }

    // -- Process handling ---------------------------------------------------

    fn policy(&self) -> SessionPolicy {
        SessionPolicy {
            message_timeout: self.message_timeout,
            cancel_grace: self.cancel_grace,
            lost_host: DeviceErrorKind::WorkerExited,
        }
    }

    fn spawn(&self) -> Result<Child> {
        let child = Command::new(&self.exe)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ScanError::device(
                    DeviceErrorKind::WorkerExited,
                    format!("failed to start {}: {e}", self.exe.display()),
                )
            })?;
        debug!(pid = ?child.id(), "Worker started");
        Ok(child)
    }

    fn pipes(child: &mut Child) -> Result<(tokio::process::ChildStdout, tokio::process::ChildStdin)> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ScanError::Protocol("worker stdout not captured".into()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ScanError::Protocol("worker stdin not captured".into()))?;
        Ok((stdout, stdin))
    }

    /// Let the worker exit on its own, or kill it.
    async fn reap(&self, mut child: Child, kill: bool) {
        if kill {
            if let Err(e) = child.start_kill() {
                debug!(error = %e, "Worker already gone");
            }
        }
        match tokio::time::timeout(self.cancel_grace, child.wait()).await {
            Ok(Ok(status)) if status.success() => debug!("Worker exited"),
            Ok(Ok(status)) => info!(%status, "Worker exited with failure"),
            Ok(Err(e)) => warn!(error = %e, "Failed to wait for worker"),
            Err(_) => {
                warn!("Worker did not exit in time; killing");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill worker");
                }
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Instant;

    use scanwerk_core::{BitDepth, Driver, PaperSource};

    /// Stand-in worker: a shell script that reads the request line and then
    /// does whatever `body` says.
    fn fake_worker(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("fake-worker");
        std::fs::write(&path, format!("#!/bin/sh\nread request\n{body}\n")).expect("write");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        path
    }

    fn request() -> ScanRequest {
        ScanRequest {
            device: Some(ScanDevice::new("virtual:3", "Virtual Scanner")),
            driver: Driver::Virtual,
            bit_depth: BitDepth::Grayscale,
            paper_source: PaperSource::Feeder,
            ..ScanRequest::default()
        }
    }

    const PAGE_START: &str = r#"echo '{"type":"page_start","page":1}'"#;

    #[tokio::test]
    async fn spawn_failure_is_worker_exited() {
        let bridge = WorkerBridge::new("/nonexistent/scanwerk-worker");
        let (tx, _rx) = mpsc::channel(8);
        let err = bridge
            .scan(&request(), &CancelToken::new(), tx)
            .await
            .expect_err("spawn failure");
        assert!(err.is_device(DeviceErrorKind::WorkerExited), "got {err}");
    }

    #[tokio::test]
    async fn worker_dying_mid_scan_is_worker_exited() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bridge = WorkerBridge::new(fake_worker(&dir, &format!("{PAGE_START}\nexit 3")));
        let (tx, mut rx) = mpsc::channel(8);
        let err = bridge
            .scan(&request(), &CancelToken::new(), tx)
            .await
            .expect_err("worker exited");
        assert!(err.is_device(DeviceErrorKind::WorkerExited), "got {err}");
        assert!(matches!(rx.recv().await, Some(BridgeEvent::PageStart { page: 1 })));
    }

    #[tokio::test]
    async fn unresponsive_worker_is_killed_after_the_cancel_grace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bridge = WorkerBridge::new(fake_worker(&dir, &format!("{PAGE_START}\nexec sleep 30")))
            .with_timeouts(Duration::from_secs(30), Duration::from_millis(200));
        let cancel = CancelToken::new();
        let (tx, mut rx) = mpsc::channel(8);
        let started = Instant::now();
        let scan = {
            let cancel = cancel.clone();
            tokio::spawn(async move { bridge.scan(&request(), &cancel, tx).await })
        };

        assert!(matches!(rx.recv().await, Some(BridgeEvent::PageStart { page: 1 })));
        cancel.cancel();
        let outcome = scan.await.expect("join").expect("cancelled scan");
        assert_eq!(outcome, ScanOutcome::Cancelled { pages: 0 });
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
