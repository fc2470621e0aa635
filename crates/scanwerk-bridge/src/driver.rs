// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Driver capability contract.
//
// Every backend enumerates devices and turns a scan into a lazily pulled
// stream of events: a page start, zero or more progress values, then the
// decoded frame, repeated per page. `PageFeed` implements the paper-handling
// rules once so that each backend only has to move bytes.

use std::collections::HashMap;
use std::sync::Arc;

use scanwerk_core::error::{DeviceErrorKind, Result, ScanError};
use scanwerk_core::{
    CancelToken, DeviceCaps, Driver, PaperSource, RawFrame, ScanDevice, ScanRequest,
};
use tracing::{debug, warn};

/// One item of a driver's scan stream.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    PageStart,
    /// Transfer progress of the current page, 0.0..=1.0.
    Progress(f64),
    Frame(RawFrame),
}

/// Lazily pulled driver output. Ends when the scan is over; an `Err` item
/// for anything other than a transfer failure ends it too.
pub type FrameStream = Box<dyn Iterator<Item = Result<DriverEvent>> + Send>;

/// A scanning backend.
///
/// Implementations are blocking; bridges run them off the async runtime.
pub trait ScanDriver: Send + Sync {
    fn driver(&self) -> Driver;

    fn list_devices(&self, request: &ScanRequest) -> Result<Vec<ScanDevice>>;

    fn caps(&self, device: &ScanDevice) -> Result<DeviceCaps>;

    /// Start scanning with a fully validated request.
    fn scan(&self, request: &ScanRequest, cancel: &CancelToken) -> Result<FrameStream>;
}

// ---------------------------------------------------------------------------
// Page feed
// ---------------------------------------------------------------------------

/// Result of polling a page transfer.
#[derive(Debug)]
pub enum Transfer {
    Progress(f64),
    Complete(RawFrame),
}

/// Device-side page transfer, implemented by each backend.
pub trait PageSource: Send {
    /// Prepare page `page` (1-based). Returns `Device { FeederEmpty }` when
    /// there is no more paper.
    fn begin_page(&mut self, page: u32) -> Result<()>;

    /// Move the next chunk of the current page.
    fn poll_transfer(&mut self) -> Result<Transfer>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedState {
    BetweenPages,
    InPage,
    Finished,
}

/// Drives a `PageSource` through the paper-handling rules:
///
/// - a flatbed yields exactly one page;
/// - a feeder keeps going until it reports empty, which ends the stream
///   cleanly once at least one page was captured;
/// - cancellation is checked before and after every transfer call, and a
///   page completed after cancellation is discarded;
/// - a transfer failure aborts only the current page.
pub struct PageFeed<S> {
    source: S,
    paper_source: PaperSource,
    cancel: CancelToken,
    pages: u32,
    last_progress: f64,
    state: FeedState,
}

impl<S: PageSource> PageFeed<S> {
    /// Check the request against the device before any I/O.
    pub fn new(
        source: S,
        caps: DeviceCaps,
        request: &ScanRequest,
        cancel: CancelToken,
    ) -> Result<Self> {
        match request.paper_source {
            PaperSource::Feeder if !caps.feeder => return Err(ScanError::NoFeederSupport),
            PaperSource::Duplex if !caps.duplex => return Err(ScanError::NoDuplexSupport),
            PaperSource::Flatbed if !caps.flatbed => {
                return Err(ScanError::InvalidOptions(
                    "device has no flatbed; choose a feeder source".into(),
                ));
            }
            _ => {}
        }
        Ok(Self {
            source,
            paper_source: request.paper_source,
            cancel,
            pages: 0,
            last_progress: 0.0,
            state: FeedState::BetweenPages,
        })
    }

    fn finish(&mut self) -> Option<Result<DriverEvent>> {
        self.state = FeedState::Finished;
        None
    }

    fn fail(&mut self, err: ScanError) -> Option<Result<DriverEvent>> {
        self.state = FeedState::Finished;
        Some(Err(err))
    }

    fn next_page(&mut self) -> Option<Result<DriverEvent>> {
        if self.cancel.is_cancelled() {
            debug!(pages = self.pages, "Feed cancelled between pages");
            return self.finish();
        }
        if self.paper_source == PaperSource::Flatbed && self.pages > 0 {
            return self.finish();
        }
        match self.source.begin_page(self.pages + 1) {
            Ok(()) => {
                self.pages += 1;
                self.last_progress = 0.0;
                self.state = FeedState::InPage;
                Some(Ok(DriverEvent::PageStart))
            }
            Err(err) if err.is_device(DeviceErrorKind::FeederEmpty) && self.pages > 0 => {
                debug!(pages = self.pages, "Feeder empty; ending scan");
                self.finish()
            }
            Err(err) => self.fail(err),
        }
    }

    fn continue_page(&mut self) -> Option<Result<DriverEvent>> {
        if self.cancel.is_cancelled() {
            return self.finish();
        }
        let polled = self.source.poll_transfer();
        if self.cancel.is_cancelled() {
            debug!(page = self.pages, "Discarding page transferred after cancel");
            return self.finish();
        }
        match polled {
            Ok(Transfer::Progress(p)) => {
                let p = p.clamp(self.last_progress, 1.0);
                self.last_progress = p;
                Some(Ok(DriverEvent::Progress(p)))
            }
            Ok(Transfer::Complete(frame)) => {
                self.state = FeedState::BetweenPages;
                match frame.validate() {
                    Ok(()) => Some(Ok(DriverEvent::Frame(frame))),
                    Err(err) => Some(Err(err)),
                }
            }
            Err(err @ ScanError::Transfer(_)) => {
                warn!(page = self.pages, error = %err, "Page transfer failed");
                self.state = FeedState::BetweenPages;
                Some(Err(err))
            }
            Err(err) => self.fail(err),
        }
    }
}

impl<S: PageSource> Iterator for PageFeed<S> {
    type Item = Result<DriverEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.state {
            FeedState::BetweenPages => self.next_page(),
            FeedState::InPage => self.continue_page(),
            FeedState::Finished => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// The drivers a process can use, keyed by standard.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<Driver, Arc<dyn ScanDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The virtual scanner plus an unavailable entry for every native
    /// standard, which native backends can later replace.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::virtual_driver::VirtualDriver::new()));
        for driver in [
            Driver::Wia,
            Driver::Twain,
            Driver::Sane,
            Driver::Apple,
            Driver::Escl,
        ] {
            registry.register(Arc::new(crate::unavailable::UnavailableDriver::new(driver)));
        }
        registry
    }

    /// Add or replace the backend for its standard.
    pub fn register(&mut self, driver: Arc<dyn ScanDriver>) {
        self.drivers.insert(driver.driver(), driver);
    }

    pub fn get(&self, driver: Driver) -> Result<Arc<dyn ScanDriver>> {
        if driver == Driver::Default {
            return Err(ScanError::InvalidOptions(
                "the default driver must be resolved before dispatch".into(),
            ));
        }
        self.drivers
            .get(&driver)
            .cloned()
            .ok_or(ScanError::PlatformUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feeder holding `remaining` sheets; each transfers in two chunks.
    struct Sheets {
        remaining: u32,
        chunk: u8,
        fail_page: Option<u32>,
        page: u32,
    }

    impl Sheets {
        fn new(remaining: u32) -> Self {
            Self {
                remaining,
                chunk: 0,
                fail_page: None,
                page: 0,
            }
        }
    }

    impl PageSource for Sheets {
        fn begin_page(&mut self, page: u32) -> Result<()> {
            if self.remaining == 0 {
                return Err(ScanError::device(DeviceErrorKind::FeederEmpty, "no paper"));
            }
            self.remaining -= 1;
            self.chunk = 0;
            self.page = page;
            Ok(())
        }

        fn poll_transfer(&mut self) -> Result<Transfer> {
            if self.fail_page == Some(self.page) {
                self.fail_page = None;
                return Err(ScanError::Transfer("usb stall".into()));
            }
            self.chunk += 1;
            match self.chunk {
                1 => Ok(Transfer::Progress(0.6)),
                2 => Ok(Transfer::Progress(0.4)),
                _ => Ok(Transfer::Complete(RawFrame::gray(2, 2, 100, vec![self.page as u8; 4]))),
            }
        }
    }

    fn feeder_caps() -> DeviceCaps {
        DeviceCaps {
            flatbed: true,
            feeder: true,
            duplex: false,
        }
    }

    fn request(paper_source: PaperSource) -> ScanRequest {
        ScanRequest {
            paper_source,
            ..ScanRequest::default()
        }
    }

    fn frames(events: &[Result<DriverEvent>]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, Ok(DriverEvent::Frame(_))))
            .count()
    }

    #[test]
    fn feeder_runs_until_empty() {
        let feed = PageFeed::new(
            Sheets::new(3),
            feeder_caps(),
            &request(PaperSource::Feeder),
            CancelToken::new(),
        )
        .expect("feed");
        let events: Vec<_> = feed.collect();
        assert_eq!(frames(&events), 3);
        assert!(events.iter().all(|e| e.is_ok()));
    }

    #[test]
    fn progress_never_goes_backwards() {
        let feed = PageFeed::new(
            Sheets::new(1),
            feeder_caps(),
            &request(PaperSource::Feeder),
            CancelToken::new(),
        )
        .expect("feed");
        let progress: Vec<f64> = feed
            .filter_map(|e| match e {
                Ok(DriverEvent::Progress(p)) => Some(p),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![0.6, 0.6]);
    }

    #[test]
    fn empty_feeder_on_first_page_is_an_error() {
        let mut feed = PageFeed::new(
            Sheets::new(0),
            feeder_caps(),
            &request(PaperSource::Feeder),
            CancelToken::new(),
        )
        .expect("feed");
        let first = feed.next().expect("item");
        assert!(matches!(first, Err(e) if e.is_device(DeviceErrorKind::FeederEmpty)));
        assert!(feed.next().is_none());
    }

    #[test]
    fn flatbed_yields_one_page() {
        let feed = PageFeed::new(
            Sheets::new(5),
            feeder_caps(),
            &request(PaperSource::Flatbed),
            CancelToken::new(),
        )
        .expect("feed");
        assert_eq!(frames(&feed.collect::<Vec<_>>()), 1);
    }

    #[test]
    fn capability_mismatch_fails_before_io() {
        let caps = DeviceCaps::default();
        assert!(matches!(
            PageFeed::new(Sheets::new(1), caps, &request(PaperSource::Feeder), CancelToken::new()),
            Err(ScanError::NoFeederSupport)
        ));
        assert!(matches!(
            PageFeed::new(Sheets::new(1), feeder_caps(), &request(PaperSource::Duplex), CancelToken::new()),
            Err(ScanError::NoDuplexSupport)
        ));
    }

    #[test]
    fn transfer_failure_skips_only_that_page() {
        let mut sheets = Sheets::new(3);
        sheets.fail_page = Some(2);
        let feed = PageFeed::new(sheets, feeder_caps(), &request(PaperSource::Feeder), CancelToken::new())
            .expect("feed");
        let events: Vec<_> = feed.collect();
        assert_eq!(frames(&events), 2);
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, Err(ScanError::Transfer(_))))
                .count(),
            1
        );
    }

    #[test]
    fn cancel_stops_between_pages() {
        let cancel = CancelToken::new();
        let mut feed = PageFeed::new(
            Sheets::new(3),
            feeder_caps(),
            &request(PaperSource::Feeder),
            cancel.clone(),
        )
        .expect("feed");
        assert!(matches!(feed.next(), Some(Ok(DriverEvent::PageStart))));
        cancel.cancel();
        assert!(feed.next().is_none());
        assert!(feed.next().is_none());
    }

    #[test]
    fn unresolved_default_driver_is_rejected() {
        let registry = DriverRegistry::with_defaults();
        assert!(matches!(
            registry.get(Driver::Default),
            Err(ScanError::InvalidOptions(_))
        ));
        assert!(registry.get(Driver::Virtual).is_ok());
    }
}
