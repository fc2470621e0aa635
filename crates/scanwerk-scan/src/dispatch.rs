// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bridge dispatch: picks where a validated request runs.

use std::sync::Arc;

use scanwerk_bridge::{DriverRegistry, InProcessBridge, RemoteBridge, ScanBridge, WorkerBridge};
use scanwerk_core::error::Result;
use scanwerk_core::{PlatformCaps, ScanConfig, ScanRequest};
use tracing::debug;

/// Execution strategy for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeStrategy {
    InProcess,
    Worker,
    Remote,
}

/// Builds the bridge for a request.
#[derive(Clone)]
pub struct BridgeFactory {
    platform: PlatformCaps,
    registry: Arc<DriverRegistry>,
    config: ScanConfig,
}

impl BridgeFactory {
    pub fn new(platform: PlatformCaps, registry: Arc<DriverRegistry>, config: ScanConfig) -> Self {
        Self {
            platform,
            registry,
            config,
        }
    }

    /// Rules, first match wins: a network target means remote; a driver
    /// that needs another process bit width means worker; otherwise the
    /// driver runs in this process.
    pub fn strategy(&self, request: &ScanRequest) -> BridgeStrategy {
        if request.network.is_some() {
            return BridgeStrategy::Remote;
        }
        match self.platform.required_pointer_width(request.driver) {
            Some(width) if width != self.platform.pointer_width => BridgeStrategy::Worker,
            _ => BridgeStrategy::InProcess,
        }
    }

    pub fn create(&self, request: &ScanRequest) -> Result<ScanBridge> {
        let strategy = self.strategy(request);
        debug!(?strategy, driver = %request.driver, "Selected scan bridge");
        Ok(match (strategy, &request.network) {
            (BridgeStrategy::Remote, Some(target)) => {
                ScanBridge::Remote(RemoteBridge::from_config(target.clone(), &self.config))
            }
            (BridgeStrategy::Worker, _) => {
                ScanBridge::Worker(WorkerBridge::from_config(&self.config)?)
            }
            _ => ScanBridge::InProcess(InProcessBridge::new(Arc::clone(&self.registry))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanwerk_core::{Driver, NetworkTarget};

    fn factory(pointer_width: u32, is_windows: bool) -> BridgeFactory {
        BridgeFactory::new(
            PlatformCaps {
                pointer_width,
                is_windows,
                is_macos: false,
            },
            Arc::new(DriverRegistry::with_defaults()),
            ScanConfig::default(),
        )
    }

    fn request(driver: Driver) -> ScanRequest {
        ScanRequest {
            driver,
            ..ScanRequest::default()
        }
    }

    #[test]
    fn network_target_always_wins() {
        let mut req = request(Driver::Twain);
        req.network = Some(NetworkTarget {
            host: "scanner-host".into(),
            port: 33277,
        });
        assert_eq!(factory(64, true).strategy(&req), BridgeStrategy::Remote);
        assert_eq!(
            factory(64, true).create(&req).expect("bridge").kind(),
            "remote"
        );
    }

    #[test]
    fn twain_on_64_bit_windows_needs_a_worker() {
        assert_eq!(
            factory(64, true).strategy(&request(Driver::Twain)),
            BridgeStrategy::Worker
        );
        assert_eq!(
            factory(32, true).strategy(&request(Driver::Twain)),
            BridgeStrategy::InProcess
        );
    }

    #[test]
    fn other_drivers_run_in_process() {
        for driver in [Driver::Wia, Driver::Sane, Driver::Escl, Driver::Virtual] {
            assert_eq!(
                factory(64, true).strategy(&request(driver)),
                BridgeStrategy::InProcess
            );
        }
        assert_eq!(
            factory(64, false).strategy(&request(Driver::Twain)),
            BridgeStrategy::InProcess
        );
    }
}
