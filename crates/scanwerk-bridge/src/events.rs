// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bridge-level scan events and the sequencing rules all bridges share.

use scanwerk_core::error::{Result, ScanError};
use scanwerk_core::RawFrame;

use crate::driver::DriverEvent;

/// What a bridge reports while a scan runs. Page numbers are 1-based and
/// count every page the device started, including ones later abandoned.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    PageStart { page: u32 },
    Progress { page: u32, progress: f64 },
    Page { page: u32, frame: RawFrame },
}

/// How a scan ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Completed { pages: u32 },
    Cancelled { pages: u32 },
}

impl ScanOutcome {
    /// Pages delivered before the scan ended.
    pub fn pages(&self) -> u32 {
        match self {
            Self::Completed { pages } | Self::Cancelled { pages } => *pages,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Enforces page ordering on an event stream:
///
/// - page starts are numbered 1, 2, 3, ... with no gaps;
/// - progress and frames belong to the open page;
/// - progress is clamped to 0..=1 and regressions are dropped.
#[derive(Debug, Default)]
pub struct EventSequencer {
    started: u32,
    open: bool,
    last_progress: f64,
}

impl EventSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check an event. `Ok(None)` means it is valid but redundant.
    pub fn accept(&mut self, event: BridgeEvent) -> Result<Option<BridgeEvent>> {
        match event {
            BridgeEvent::PageStart { page } => {
                if page != self.started + 1 {
                    return Err(ScanError::Protocol(format!(
                        "page {page} started after page {}",
                        self.started
                    )));
                }
                self.started = page;
                self.open = true;
                self.last_progress = 0.0;
                Ok(Some(event))
            }
            BridgeEvent::Progress { page, progress } => {
                self.check_open(page)?;
                let progress = progress.clamp(0.0, 1.0);
                if progress < self.last_progress {
                    return Ok(None);
                }
                self.last_progress = progress;
                Ok(Some(BridgeEvent::Progress { page, progress }))
            }
            BridgeEvent::Page { page, .. } => {
                self.check_open(page)?;
                self.open = false;
                Ok(Some(event))
            }
        }
    }

    /// Number a driver event against the current page.
    pub fn from_driver(&mut self, event: DriverEvent) -> Result<Option<BridgeEvent>> {
        let page = self.started;
        self.accept(match event {
            DriverEvent::PageStart => BridgeEvent::PageStart { page: page + 1 },
            DriverEvent::Progress(progress) => BridgeEvent::Progress { page, progress },
            DriverEvent::Frame(frame) => BridgeEvent::Page { page, frame },
        })
    }

    /// Close the open page without a frame.
    pub fn abandon_page(&mut self) {
        self.open = false;
    }

    fn check_open(&self, page: u32) -> Result<()> {
        if !self.open || page != self.started {
            return Err(ScanError::Protocol(format!(
                "event for page {page} while page {} is {}",
                self.started,
                if self.open { "open" } else { "closed" }
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> RawFrame {
        RawFrame::gray(1, 1, 100, vec![0])
    }

    #[test]
    fn numbers_driver_events() {
        let mut seq = EventSequencer::new();
        let events = [
            DriverEvent::PageStart,
            DriverEvent::Progress(0.5),
            DriverEvent::Frame(frame()),
            DriverEvent::PageStart,
        ];
        let out: Vec<_> = events
            .into_iter()
            .filter_map(|e| seq.from_driver(e).expect("in order"))
            .collect();
        assert_eq!(
            out,
            vec![
                BridgeEvent::PageStart { page: 1 },
                BridgeEvent::Progress {
                    page: 1,
                    progress: 0.5
                },
                BridgeEvent::Page {
                    page: 1,
                    frame: frame()
                },
                BridgeEvent::PageStart { page: 2 },
            ]
        );
    }

    #[test]
    fn progress_is_clamped_and_monotonic() {
        let mut seq = EventSequencer::new();
        seq.accept(BridgeEvent::PageStart { page: 1 }).expect("start");
        let p = |seq: &mut EventSequencer, v: f64| {
            seq.accept(BridgeEvent::Progress {
                page: 1,
                progress: v,
            })
            .expect("progress")
        };
        assert!(p(&mut seq, 0.7).is_some());
        assert!(p(&mut seq, 0.2).is_none());
        assert_eq!(
            p(&mut seq, 3.0),
            Some(BridgeEvent::Progress {
                page: 1,
                progress: 1.0
            })
        );
    }

    #[test]
    fn out_of_order_pages_are_rejected() {
        let mut seq = EventSequencer::new();
        assert!(seq.accept(BridgeEvent::PageStart { page: 2 }).is_err());
        seq.accept(BridgeEvent::PageStart { page: 1 }).expect("start");
        assert!(
            seq.accept(BridgeEvent::Page {
                page: 2,
                frame: frame()
            })
            .is_err()
        );
    }

    #[test]
    fn abandoned_page_accepts_no_frame() {
        let mut seq = EventSequencer::new();
        seq.accept(BridgeEvent::PageStart { page: 1 }).expect("start");
        seq.abandon_page();
        assert!(
            seq.accept(BridgeEvent::Page {
                page: 1,
                frame: frame()
            })
            .is_err()
        );
        assert!(seq.accept(BridgeEvent::PageStart { page: 2 }).is_ok());
    }
}
