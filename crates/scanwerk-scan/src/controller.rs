// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan orchestration: validate, pick a bridge, capture on a background task,
// and post-process pages while the next one is being captured.
//
// Pages are handed to the post-processor in capture order and delivered to
// the caller in that same order. At most `max_in_flight_pages` pages are
// being processed or waiting for delivery at any time.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use scanwerk_bridge::{BridgeEvent, DriverRegistry, ScanOutcome};
use scanwerk_core::error::{DeviceErrorKind, Result, ScanError};
use scanwerk_core::{
    CancelToken, Driver, PageContext, PlatformCaps, RawFrame, ScanConfig, ScanDevice, ScanRequest,
};
use scanwerk_image::{ImageContext, ProcessedImage};

use crate::dispatch::BridgeFactory;
use crate::postprocess::{PageOutcome, PostProcessor};
use crate::validate::ScanOptionsValidator;

/// Events sent to the caller while a scan runs.
#[derive(Debug)]
pub enum ScanEvent {
    ScanStart,
    PageStart {
        page: u32,
    },
    PageProgress {
        page: u32,
        progress: f64,
    },
    /// A finished page. The receiver owns `image` and must dispose it.
    PageEnd {
        page: u32,
        image: ProcessedImage,
        context: PageContext,
    },
    /// Always the last event. `pages` counts `PageEnd` events sent.
    ScanEnd {
        pages: u32,
        cancelled: bool,
        error: Option<ScanError>,
    },
}

const EVENT_BUFFER: usize = 16;
const BRIDGE_EVENT_BUFFER: usize = 4;

/// Entry point for scanning.
#[derive(Clone)]
pub struct ScanController {
    validator: ScanOptionsValidator,
    factory: BridgeFactory,
    processor: Arc<PostProcessor>,
    max_in_flight: usize,
}

impl ScanController {
    // -- Construction ---------------------------------------------------------

    /// Controller for this platform with the built-in drivers and analysers.
    pub fn new(config: ScanConfig) -> Self {
        let platform = PlatformCaps::current();
        let processor = PostProcessor::with_default_analysers(config.temp_dir.clone());
        Self::with_parts(
            platform,
            Arc::new(DriverRegistry::with_defaults()),
            processor,
            config,
        )
    }

    /// Controller with an explicit platform, driver registry and processor.
    pub fn with_parts(
        platform: PlatformCaps,
        registry: Arc<DriverRegistry>,
        processor: PostProcessor,
        config: ScanConfig,
    ) -> Self {
        Self {
            validator: ScanOptionsValidator::new(platform, &config),
            max_in_flight: config.max_in_flight_pages.max(1),
            factory: BridgeFactory::new(platform, registry, config),
            processor: Arc::new(processor),
        }
    }

    /// Context that owns every image this controller produces.
    pub fn images(&self) -> &ImageContext {
        self.processor.images()
    }

    // -- Operations -----------------------------------------------------------

    #[instrument(skip(self, request), fields(driver = %request.driver))]
    pub async fn device_list(&self, request: ScanRequest) -> Result<Vec<ScanDevice>> {
        let request = self.validator.validate(request, false)?;
        let bridge = self.factory.create(&request)?;
        bridge.device_list(&request).await.inspect_err(log_unknown)
    }

    /// Start a scan on a background task.
    ///
    /// Invalid options are rejected here, before any device I/O. Everything
    /// after that, including device errors, arrives as `ScanEnd { error }`.
    /// Dropping the receiver cancels the scan.
    pub fn scan(
        &self,
        request: ScanRequest,
        cancel: CancelToken,
    ) -> Result<mpsc::Receiver<ScanEvent>> {
        let request = self.validator.validate(request, true)?;
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let controller = self.clone();
        tokio::spawn(async move { controller.run(request, cancel, tx).await });
        Ok(rx)
    }

    /// Scan and collect every delivered page. A cancelled scan returns the
    /// pages delivered before the cancel.
    pub async fn scan_all(
        &self,
        request: ScanRequest,
        cancel: CancelToken,
    ) -> Result<Vec<(ProcessedImage, PageContext)>> {
        let mut events = self.scan(request, cancel)?;
        let mut pages = Vec::new();
        while let Some(event) = events.recv().await {
            match event {
                ScanEvent::PageEnd { image, context, .. } => pages.push((image, context)),
                ScanEvent::ScanEnd {
                    error: Some(err), ..
                } => return Err(err),
                ScanEvent::ScanEnd { .. } => break,
                _ => {}
            }
        }
        Ok(pages)
    }

    // -- Background task ------------------------------------------------------

    #[instrument(skip_all, fields(driver = %request.driver))]
    async fn run(self, request: ScanRequest, cancel: CancelToken, tx: mpsc::Sender<ScanEvent>) {
        if tx.send(ScanEvent::ScanStart).await.is_err() {
            cancel.cancel();
            return;
        }
        let mut pipeline = PagePipeline::new(
            Arc::clone(&self.processor),
            self.max_in_flight,
            cancel.clone(),
            tx.clone(),
        );

        let result = self.capture(request, &cancel, &mut pipeline).await;
        pipeline.deliver_all().await;

        let cancelled = cancel.is_cancelled();
        let error = match result {
            Ok(outcome) => {
                debug!(?outcome, "Bridge finished");
                None
            }
            Err(err) => {
                log_unknown(&err);
                Some(err)
            }
        };
        info!(
            pages = pipeline.delivered,
            captured = pipeline.captured,
            cancelled,
            failed = error.is_some(),
            "Scan finished"
        );
        let _ = tx
            .send(ScanEvent::ScanEnd {
                pages: pipeline.delivered,
                cancelled,
                error,
            })
            .await;
    }

    /// Capture with one retry for SANE devices that went offline because
    /// their id changed between listing and scanning.
    async fn capture(
        &self,
        mut request: ScanRequest,
        cancel: &CancelToken,
        pipeline: &mut PagePipeline,
    ) -> Result<ScanOutcome> {
        let err = match self.capture_once(&request, cancel, pipeline).await {
            Err(err)
                if request.driver == Driver::Sane
                    && err.is_device(DeviceErrorKind::Offline)
                    && pipeline.captured == 0
                    && !cancel.is_cancelled() =>
            {
                err
            }
            other => return other,
        };
        let Some(device) = self.find_renamed_device(&request).await else {
            return Err(err);
        };
        info!(device = %device.id, "Retrying scan with re-enumerated SANE device");
        request.device = Some(device);
        self.capture_once(&request, cancel, pipeline).await
    }

    async fn find_renamed_device(&self, request: &ScanRequest) -> Option<ScanDevice> {
        let previous = request.device.as_ref()?;
        let bridge = self.factory.create(request).ok()?;
        match bridge.device_list(request).await {
            Ok(devices) => devices
                .into_iter()
                .find(|d| d.name == previous.name && d.id != previous.id),
            Err(err) => {
                debug!(error = %err, "Device re-query failed");
                None
            }
        }
    }

    async fn capture_once(
        &self,
        request: &ScanRequest,
        cancel: &CancelToken,
        pipeline: &mut PagePipeline,
    ) -> Result<ScanOutcome> {
        let bridge = self.factory.create(request)?;
        let request_for_pages = Arc::new(request.clone());
        let (events_tx, mut events_rx) = mpsc::channel(BRIDGE_EVENT_BUFFER);
        let scan = bridge.scan(request, cancel, events_tx);
        tokio::pin!(scan);

        let mut outcome = None;
        loop {
            tokio::select! {
                result = &mut scan, if outcome.is_none() => outcome = Some(result),
                event = events_rx.recv() => match event {
                    Some(event) => pipeline.on_bridge_event(event, &request_for_pages).await,
                    None => break,
                },
            }
        }
        // The bridge drops its sender when the scan future finishes.
        match outcome {
            Some(result) => result,
            None => scan.await,
        }
    }
}

fn log_unknown(err: &ScanError) {
    if let ScanError::UnknownDriver(detail) = err {
        error!(detail = %detail, "Unrecognised driver failure");
    }
}

// ---------------------------------------------------------------------------
// Page pipeline
// ---------------------------------------------------------------------------

struct InFlight {
    page: u32,
    task: JoinHandle<Result<PageOutcome>>,
    _slot: OwnedSemaphorePermit,
}

/// Runs post-processing alongside capture and delivers results in order.
struct PagePipeline {
    processor: Arc<PostProcessor>,
    slots: Arc<Semaphore>,
    pending: VecDeque<InFlight>,
    cancel: CancelToken,
    tx: mpsc::Sender<ScanEvent>,
    /// Pages started by the device, blank ones included. Survives a retry.
    captured: u32,
    delivered: u32,
}

impl PagePipeline {
    fn new(
        processor: Arc<PostProcessor>,
        max_in_flight: usize,
        cancel: CancelToken,
        tx: mpsc::Sender<ScanEvent>,
    ) -> Self {
        Self {
            processor,
            slots: Arc::new(Semaphore::new(max_in_flight)),
            pending: VecDeque::new(),
            cancel,
            tx,
            captured: 0,
            delivered: 0,
        }
    }

    async fn on_bridge_event(&mut self, event: BridgeEvent, request: &Arc<ScanRequest>) {
        self.deliver_ready().await;
        if self.cancel.is_cancelled() {
            return;
        }
        match event {
            BridgeEvent::PageStart { .. } => {
                self.captured += 1;
                self.emit(ScanEvent::PageStart {
                    page: self.captured,
                })
                .await;
            }
            BridgeEvent::Progress { progress, .. } => {
                self.emit(ScanEvent::PageProgress {
                    page: self.captured,
                    progress,
                })
                .await;
            }
            BridgeEvent::Page { frame, .. } => {
                self.submit(self.captured, frame, Arc::clone(request)).await;
            }
        }
    }

    async fn submit(&mut self, page: u32, frame: RawFrame, request: Arc<ScanRequest>) {
        let slot = loop {
            if let Ok(slot) = Arc::clone(&self.slots).try_acquire_owned() {
                break slot;
            }
            // Every slot belongs to a pending page; free the oldest.
            if !self.deliver_front().await {
                return;
            }
        };
        let processor = Arc::clone(&self.processor);
        let cancel = self.cancel.clone();
        let task = tokio::task::spawn_blocking(move || {
            processor.process(frame, &request, page, &cancel)
        });
        self.pending.push_back(InFlight {
            page,
            task,
            _slot: slot,
        });
    }

    /// Deliver finished pages from the front of the queue.
    async fn deliver_ready(&mut self) {
        while self
            .pending
            .front()
            .is_some_and(|entry| entry.task.is_finished())
        {
            self.deliver_front().await;
        }
    }

    async fn deliver_all(&mut self) {
        while self.deliver_front().await {}
    }

    /// Wait for the oldest page and deliver it. False when nothing is pending.
    async fn deliver_front(&mut self) -> bool {
        let Some(entry) = self.pending.pop_front() else {
            return false;
        };
        let page = entry.page;
        match entry.task.await {
            Ok(Ok(PageOutcome::Delivered(image, context))) => {
                if self.cancel.is_cancelled() {
                    debug!(page, "Dropping processed page after cancel");
                } else if self
                    .emit(ScanEvent::PageEnd {
                        page,
                        image,
                        context,
                    })
                    .await
                {
                    self.delivered += 1;
                }
            }
            Ok(Ok(PageOutcome::Blank)) => debug!(page, "Blank page dropped"),
            Ok(Ok(PageOutcome::Cancelled)) => debug!(page, "Page processing cancelled"),
            Ok(Err(err)) => warn!(page, error = %err, "Dropping page after processing failure"),
            Err(err) => warn!(page, error = %err, "Page processing task failed"),
        }
        true
    }

    /// Send an event unless the scan is cancelled. A dropped receiver
    /// cancels the scan.
    async fn emit(&self, event: ScanEvent) -> bool {
        let sent = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return false,
            sent = self.tx.send(event) => sent,
        };
        if sent.is_err() {
            debug!("Scan event receiver dropped; cancelling scan");
            self.cancel.cancel();
            return false;
        }
        true
    }
}
