// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// scanwerk-worker -- serves one scan session over stdin/stdout.
//
// Spawned by `WorkerBridge`. Stdout carries protocol messages only; all
// logging goes to stderr.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use scanwerk_bridge::driver::DriverRegistry;
use scanwerk_bridge::host::serve_session;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::debug!(pid = std::process::id(), "Scan worker starting");

    let registry = Arc::new(DriverRegistry::with_defaults());
    if let Err(e) = serve_session(tokio::io::stdin(), tokio::io::stdout(), registry).await {
        tracing::error!(error = %e, "Worker session failed");
        std::process::exit(1);
    }
}
