// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Processed image handles.
//
// A `ProcessedImage` pairs a ref-counted pixel storage with its own
// transform log. Handles made by `try_clone` or the `with_*` methods share
// storage but each owns one token. When the last token goes, exactly once:
// the pixels and thumbnail are dropped, pending OCR is cancelled and its
// staged file removed, and the owning `ImageContext` is told.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use image::DynamicImage;
use scanwerk_core::error::{Result, ScanError};
use scanwerk_core::{BitDepth, CancelToken, PageSize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::patch_code::BarcodeResult;
use crate::refcount::{RefToken, Release, WeakToken};
use crate::render::{self, PageRenderer};
use crate::transform::{TransformState, TransformStep};

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Captured pixels in their canonical form. Never mutated after creation.
#[derive(Debug)]
pub struct ImageStorage {
    id: Uuid,
    image: DynamicImage,
    x_dpi: f64,
    y_dpi: f64,
}

impl ImageStorage {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn resolution(&self) -> (f64, f64) {
        (self.x_dpi, self.y_dpi)
    }
}

/// Descriptive data fixed at capture time.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageMetadata {
    pub bit_depth: BitDepth,
    pub lossless: bool,
    pub page_size: Option<PageSize>,
    pub captured_at: DateTime<Utc>,
}

impl ImageMetadata {
    pub fn new(bit_depth: BitDepth, page_size: Option<PageSize>) -> Self {
        Self {
            bit_depth,
            lossless: true,
            page_size,
            captured_at: Utc::now(),
        }
    }
}

/// Results the pipeline attaches to an image. The thumbnail is kept with
/// the storage instead; see `ProcessedImage::set_thumbnail`.
#[derive(Debug, Clone, Default)]
pub struct PostProcessingData {
    /// Present once barcode detection has run, whatever it found.
    pub barcode: Option<BarcodeResult>,
    /// Cancelled when the image storage is released.
    pub ocr_cancel: Option<CancelToken>,
    /// Decoded copy handed to background OCR. Deleted when the image
    /// storage is released.
    pub ocr_temp_path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Creates images and counts how many storages are still alive.
#[derive(Debug, Clone, Default)]
pub struct ImageContext {
    counters: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    created: AtomicUsize,
    released: AtomicUsize,
}

impl ImageContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap captured pixels in a fresh handle with an empty transform log.
    pub fn create(
        &self,
        image: DynamicImage,
        resolution: (f64, f64),
        metadata: ImageMetadata,
    ) -> ProcessedImage {
        let storage = ImageStorage {
            id: Uuid::new_v4(),
            image,
            x_dpi: resolution.0,
            y_dpi: resolution.1,
        };
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        debug!(storage = %storage.id, "Image storage created");
        let shared = SharedImage {
            storage,
            context: self.clone(),
            attached: Mutex::new(Attached::default()),
        };
        ProcessedImage {
            token: RefToken::new(shared),
            view: Arc::new(ImageView {
                metadata,
                post_processing: PostProcessingData::default(),
                transform_state: TransformState::empty(),
            }),
        }
    }

    pub fn live_storages(&self) -> usize {
        self.counters.created.load(Ordering::SeqCst)
            - self.counters.released.load(Ordering::SeqCst)
    }

    pub fn released_storages(&self) -> usize {
        self.counters.released.load(Ordering::SeqCst)
    }
}

struct SharedImage {
    storage: ImageStorage,
    context: ImageContext,
    attached: Mutex<Attached>,
}

/// Everything freed together with the storage.
#[derive(Default)]
struct Attached {
    /// The thumbnail and the transform state it was rendered at.
    thumbnail: Option<(DynamicImage, TransformState)>,
    ocr_tokens: Vec<CancelToken>,
    ocr_files: Vec<PathBuf>,
}

impl SharedImage {
    fn attached(&self) -> MutexGuard<'_, Attached> {
        self.attached.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, data: &PostProcessingData) {
        let mut attached = self.attached();
        if let Some(token) = &data.ocr_cancel {
            attached.ocr_tokens.push(token.clone());
        }
        if let Some(path) = &data.ocr_temp_path {
            if !attached.ocr_files.contains(path) {
                attached.ocr_files.push(path.clone());
            }
        }
    }
}

impl Release for SharedImage {
    fn release(self) {
        let attached = self
            .attached
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        for token in &attached.ocr_tokens {
            token.cancel();
        }
        for path in &attached.ocr_files {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "Could not remove OCR temp file");
            }
        }
        self.context
            .counters
            .released
            .fetch_add(1, Ordering::SeqCst);
        debug!(
            storage = %self.storage.id,
            ocr_cancelled = attached.ocr_tokens.len(),
            ocr_files = attached.ocr_files.len(),
            "Image storage released"
        );
    }
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ImageView {
    metadata: ImageMetadata,
    post_processing: PostProcessingData,
    transform_state: TransformState,
}

/// An owned handle to a finished page.
///
/// There is no `Clone` impl: every extra handle goes through `try_clone` or
/// a `with_*` method so that it carries its own token.
pub struct ProcessedImage {
    token: RefToken<SharedImage>,
    view: Arc<ImageView>,
}

impl ProcessedImage {
    // -- Derivation -----------------------------------------------------------

    /// Another handle to the same storage and transform state.
    pub fn try_clone(&self) -> Result<Self> {
        let token = self.token.acquire().ok_or(ScanError::AlreadyDisposed)?;
        Ok(Self {
            token,
            view: Arc::clone(&self.view),
        })
    }

    fn derive(&self, view: ImageView) -> Result<Self> {
        let token = self.token.acquire().ok_or(ScanError::AlreadyDisposed)?;
        Self::register(&token, &view);
        Ok(Self {
            token,
            view: Arc::new(view),
        })
    }

    /// Replace the view, reusing this handle's token instead of taking a
    /// new one.
    fn into_view(self, view: ImageView) -> Result<Self> {
        if self.is_disposed() {
            return Err(ScanError::AlreadyDisposed);
        }
        Self::register(&self.token, &view);
        Ok(Self {
            token: self.token,
            view: Arc::new(view),
        })
    }

    fn register(token: &RefToken<SharedImage>, view: &ImageView) {
        token.with(|shared| shared.register(&view.post_processing));
    }

    fn view_with_state(&self, transform_state: TransformState) -> ImageView {
        ImageView {
            metadata: self.view.metadata.clone(),
            post_processing: self.view.post_processing.clone(),
            transform_state,
        }
    }

    fn view_with_data(&self, post_processing: PostProcessingData) -> ImageView {
        ImageView {
            metadata: self.view.metadata.clone(),
            post_processing,
            transform_state: self.view.transform_state.clone(),
        }
    }

    /// New handle with `step` appended (merged where possible).
    pub fn with_transform(&self, step: TransformStep) -> Result<Self> {
        self.derive(self.view_with_state(self.view.transform_state.add_or_simplify(step)))
    }

    /// Like `with_transform`, but gives up this handle in the process.
    pub fn into_transform(self, step: TransformStep) -> Result<Self> {
        let view = self.view_with_state(self.view.transform_state.add_or_simplify(step));
        self.into_view(view)
    }

    pub fn with_transform_state(&self, state: TransformState) -> Result<Self> {
        self.derive(self.view_with_state(state))
    }

    pub fn into_transform_state(self, state: TransformState) -> Result<Self> {
        let view = self.view_with_state(state);
        self.into_view(view)
    }

    pub fn with_no_transforms(&self) -> Result<Self> {
        self.with_transform_state(TransformState::empty())
    }

    pub fn with_post_processing_data(&self, data: PostProcessingData) -> Result<Self> {
        self.derive(self.view_with_data(data))
    }

    pub fn into_post_processing_data(self, data: PostProcessingData) -> Result<Self> {
        let view = self.view_with_data(data);
        self.into_view(view)
    }

    // -- Accessors ------------------------------------------------------------

    pub fn transform_state(&self) -> &TransformState {
        &self.view.transform_state
    }

    pub fn metadata(&self) -> &ImageMetadata {
        &self.view.metadata
    }

    pub fn post_processing(&self) -> &PostProcessingData {
        &self.view.post_processing
    }

    pub fn is_disposed(&self) -> bool {
        !self.token.is_live()
    }

    /// Handles currently sharing this storage.
    pub fn ref_count(&self) -> usize {
        self.token.count()
    }

    /// Run `f` against the stored pixels. The borrow cannot outlive the
    /// call, so nothing keeps the pixels alive past the last dispose.
    pub fn with_storage<R>(&self, f: impl FnOnce(&ImageStorage) -> R) -> Result<R> {
        self.token
            .with(|shared| f(&shared.storage))
            .ok_or(ScanError::AlreadyDisposed)
    }

    /// Replay the transform log against the stored pixels.
    pub fn render(&self) -> Result<DynamicImage> {
        self.with_storage(|storage| render::render(storage.image(), self.transform_state()))?
    }

    pub fn render_thumbnail(&self, size: u32) -> Result<DynamicImage> {
        Ok(PageRenderer::from_dynamic(self.render()?)
            .thumbnail(size)
            .into_dynamic())
    }

    // -- Thumbnail ------------------------------------------------------------

    /// Attach a thumbnail rendered at this handle's transform state. It is
    /// shared by every handle on the same storage.
    pub fn set_thumbnail(&self, thumbnail: DynamicImage) -> Result<()> {
        let state = self.transform_state().clone();
        self.token
            .with(|shared| shared.attached().thumbnail = Some((thumbnail, state)))
            .ok_or(ScanError::AlreadyDisposed)
    }

    /// Record that the thumbnail matches this handle's state without
    /// re-rendering it, after a step that leaves pixels alone.
    pub fn retag_thumbnail(&self) -> Result<()> {
        self.token
            .with(|shared| {
                if let Some((_, state)) = &mut shared.attached().thumbnail {
                    *state = self.transform_state().clone();
                }
            })
            .ok_or(ScanError::AlreadyDisposed)
    }

    /// A copy of the attached thumbnail.
    pub fn thumbnail(&self) -> Option<DynamicImage> {
        self.token
            .with(|shared| shared.attached().thumbnail.as_ref().map(|(t, _)| t.clone()))
            .flatten()
    }

    /// True when the attached thumbnail was rendered at a different state.
    pub fn is_thumbnail_stale(&self) -> bool {
        self.token
            .with(|shared| match &shared.attached().thumbnail {
                Some((_, state)) => state != self.transform_state(),
                None => false,
            })
            .unwrap_or(false)
    }

    pub fn downgrade(&self) -> WeakImage {
        WeakImage {
            token: self.token.downgrade(),
            view: Arc::downgrade(&self.view),
        }
    }

    // -- Disposal -------------------------------------------------------------

    /// Give up this handle. Safe to call more than once. Dropping the handle
    /// does the same.
    pub fn dispose(&mut self) {
        if self.token.release() {
            debug!("Last image handle disposed");
        }
    }
}

/// Same storage and same transform state.
impl PartialEq for ProcessedImage {
    fn eq(&self, other: &Self) -> bool {
        self.token.same_cell(&other.token) && self.transform_state() == other.transform_state()
    }
}

impl std::fmt::Debug for ProcessedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessedImage")
            .field("disposed", &self.is_disposed())
            .field("transform_state", self.transform_state())
            .field("metadata", self.metadata())
            .finish()
    }
}

/// A reference to a particular image version that does not keep it alive.
/// Holders must `upgrade` before every use.
#[derive(Clone)]
pub struct WeakImage {
    token: WeakToken<SharedImage>,
    view: Weak<ImageView>,
}

impl WeakImage {
    /// A new handle, or `AlreadyDisposed` once the storage has been released
    /// or no handle with this version is left.
    pub fn upgrade(&self) -> Result<ProcessedImage> {
        let view = self.view.upgrade().ok_or(ScanError::AlreadyDisposed)?;
        let token = self.token.upgrade().ok_or(ScanError::AlreadyDisposed)?;
        Ok(ProcessedImage { token, view })
    }
}
