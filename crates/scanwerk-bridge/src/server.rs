// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan server -- exposes this machine's scanners to `RemoteBridge` clients.
//
// Each TCP connection carries one session in the newline-delimited JSON
// protocol from `protocol.rs`. Sessions run independently; two clients
// scanning on the same device will see whatever the driver reports for a
// busy device.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use scanwerk_core::error::{Result, ScanError};

use crate::driver::DriverRegistry;
use crate::host::serve_session;

/// Port a scan server listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 33277;

/// Lifecycle of a `ScanServer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Stopped,
    Starting,
    Running,
    Error,
}

/// Embedded scan server.
pub struct ScanServer {
    /// Address to bind. Port 0 picks a free port.
    bind_addr: SocketAddr,
    /// Address actually bound while running.
    local_addr: Option<SocketAddr>,
    status: ServerStatus,
    registry: Arc<DriverRegistry>,
    /// Notification handle used to signal a graceful shutdown.
    shutdown_signal: Arc<Notify>,
    /// Handle to the Tokio task running the accept loop.
    task_handle: Option<JoinHandle<()>>,
    active_connections: Arc<AtomicU32>,
}

impl ScanServer {
    /// Create a server in `Stopped` state. Call [`start`](Self::start) to
    /// begin accepting connections.
    pub fn new(bind_addr: SocketAddr, registry: Arc<DriverRegistry>) -> Self {
        Self {
            bind_addr,
            local_addr: None,
            status: ServerStatus::Stopped,
            registry,
            shutdown_signal: Arc::new(Notify::new()),
            task_handle: None,
            active_connections: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Listen on all interfaces at [`DEFAULT_PORT`].
    pub fn with_default_port(registry: Arc<DriverRegistry>) -> Self {
        Self::new(([0, 0, 0, 0], DEFAULT_PORT).into(), registry)
    }

    pub fn status(&self) -> ServerStatus {
        self.status
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn active_connections(&self) -> u32 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Bind and spawn the accept loop. Returns the bound address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is in use or cannot be bound.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if let (ServerStatus::Running, Some(addr)) = (self.status, self.local_addr) {
            debug!(%addr, "Scan server already running");
            return Ok(addr);
        }

        self.status = ServerStatus::Starting;
        let listener = match TcpListener::bind(self.bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.status = ServerStatus::Error;
                return Err(ScanError::Io(std::io::Error::new(
                    e.kind(),
                    format!("bind {}: {e}", self.bind_addr),
                )));
            }
        };
        let addr = listener.local_addr()?;
        info!(%addr, "Scan server listening");

        let shutdown = Arc::clone(&self.shutdown_signal);
        let connections = Arc::clone(&self.active_connections);
        let registry = Arc::clone(&self.registry);
        let handle = tokio::spawn(async move {
            Self::accept_loop(listener, shutdown, connections, registry).await;
        });

        self.task_handle = Some(handle);
        self.local_addr = Some(addr);
        self.status = ServerStatus::Running;
        Ok(addr)
    }

    /// Stop accepting connections. Sessions already running finish on their
    /// own.
    pub async fn stop(&mut self) -> Result<()> {
        if self.status != ServerStatus::Running {
            return Ok(());
        }
        info!(addr = ?self.local_addr, "Stopping scan server");
        self.shutdown_signal.notify_one();

        if let Some(handle) = self.task_handle.take() {
            handle
                .await
                .map_err(|e| ScanError::Protocol(format!("accept loop join: {e}")))?;
        }

        self.status = ServerStatus::Stopped;
        self.local_addr = None;
        info!("Scan server stopped");
        Ok(())
    }

    async fn accept_loop(
        listener: TcpListener,
        shutdown: Arc<Notify>,
        connections: Arc<AtomicU32>,
        registry: Arc<DriverRegistry>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    debug!("Accept loop received shutdown signal");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            info!(%peer, "Incoming scan connection");
                            let connections = Arc::clone(&connections);
                            let registry = Arc::clone(&registry);
                            tokio::spawn(async move {
                                connections.fetch_add(1, Ordering::Relaxed);
                                if let Err(e) = Self::handle_connection(stream, registry).await {
                                    warn!(%peer, error = %e, "Scan session error");
                                }
                                connections.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => error!(error = %e, "Failed to accept connection"),
                    }
                }
            }
        }
    }

    async fn handle_connection(stream: TcpStream, registry: Arc<DriverRegistry>) -> Result<()> {
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        serve_session(reader, writer, registry).await
    }
}
