//! Signing session state
//!
//! `SigningSession` is the single writer for everything the signing flow
//! holds: the loaded document, the active signature, the placement tracker
//! and the in-flight flag for generation. UI layers read from it and observe
//! placement changes; they never mutate the records directly.
//!
//! Loading and generation are split into prepare/finish halves so a caller
//! can run the expensive middle part elsewhere. Results are applied through a
//! `Generation` check, so a result that finishes after a newer document was
//! loaded is dropped instead of overwriting fresh state.

use crate::composite::composite_signature;
use crate::config::SignConfig;
use crate::coords::{map_placement, LetterboxFit, PdfRect};
use crate::error::{Result, SignError};
use crate::geometry::{PageGeometry, PreviewSource};
use crate::placement::{Placement, PlacementObserver, PlacementTracker};
use crate::rasterize::{PageBitmap, PreviewRasterizer, Rasterizer};
use crate::signature::{render_strokes, SignatureBitmap, Stroke, DEFAULT_PEN_WIDTH};
use crate::task::{Generation, TaskOutcome, Ticket};
use crate::validation::{check_upload, validate_pdf, PdfInfo};
use image::RgbaImage;
use lopdf::Document;

/// A validated, decoded document ready for placement
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub name: String,
    pub bytes: Vec<u8>,
    pub info: PdfInfo,
    pub pages: Vec<PageGeometry>,
    /// Parsed form of `bytes`; previews are rendered from it on demand
    pub parsed: Document,
}

impl LoadedDocument {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// Signed document produced by `generate`
#[derive(Debug, Clone, PartialEq)]
pub struct SignedOutput {
    /// `signed_<original name>`
    pub name: String,
    pub bytes: Vec<u8>,
    pub page_index: usize,
    pub rect: PdfRect,
}

/// Everything needed to composite, detached from the session
#[derive(Debug, Clone)]
pub struct GenerateJob {
    pub ticket: Ticket,
    pub output_name: String,
    pub page_index: usize,
    pub rect: PdfRect,
    bytes: Vec<u8>,
    signature: RgbaImage,
}

impl GenerateJob {
    pub fn run(&self) -> Result<Vec<u8>> {
        composite_signature(&self.bytes, &self.signature, self.page_index, &self.rect)
    }
}

pub struct SigningSession {
    config: SignConfig,
    rasterizer: Box<dyn Rasterizer>,
    document: Option<LoadedDocument>,
    signature: Option<SignatureBitmap>,
    tracker: PlacementTracker,
    tasks: Generation,
    generating: bool,
}

impl std::fmt::Debug for SigningSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningSession")
            .field("document", &self.document.as_ref().map(|d| &d.name))
            .field("signature", &self.signature.as_ref().map(|s| s.source()))
            .field("tracker", &self.tracker)
            .field("generating", &self.generating)
            .finish()
    }
}

impl Default for SigningSession {
    fn default() -> Self {
        Self::new(SignConfig::default())
    }
}

impl SigningSession {
    pub fn new(config: SignConfig) -> Self {
        let rasterizer = Box::new(PreviewRasterizer::from_config(&config));
        Self::with_rasterizer(config, rasterizer)
    }

    pub fn with_rasterizer(config: SignConfig, rasterizer: Box<dyn Rasterizer>) -> Self {
        Self {
            tracker: PlacementTracker::new(config.clone()),
            config,
            rasterizer,
            document: None,
            signature: None,
            tasks: Generation::new(),
            generating: false,
        }
    }

    pub fn config(&self) -> &SignConfig {
        &self.config
    }

    // ---- document ----

    /// Validate, decode and install a document in one step
    ///
    /// Wrong type or oversize input is rejected before anything is decoded and
    /// leaves the current document in place. A document that fails to decode
    /// clears the current one.
    pub fn load_document(&mut self, name: &str, mime: &str, bytes: &[u8]) -> Result<usize> {
        check_upload(mime, bytes.len(), &self.config)?;
        let ticket = self.begin_load();
        let prepared = self.prepare_document(name, bytes);
        self.finish_load(ticket, prepared)
            .applied()
            .unwrap_or_else(|| Err(SignError::Validation("Document load was superseded".into())))
    }

    /// Start a load; any earlier in-flight load or generation becomes stale
    pub fn begin_load(&mut self) -> Ticket {
        self.tasks.next()
    }

    /// Decode without touching session state
    ///
    /// No page is rendered here; `page_preview` renders the requested page
    /// only, so memory does not grow with the page count.
    pub fn prepare_document(&self, name: &str, bytes: &[u8]) -> Result<LoadedDocument> {
        let (parsed, info) = validate_pdf(bytes)?;
        let pages = PageGeometry::all_from_document(&parsed)?;
        Ok(LoadedDocument {
            name: name.to_string(),
            bytes: bytes.to_vec(),
            info,
            pages,
            parsed,
        })
    }

    pub fn finish_load(
        &mut self,
        ticket: Ticket,
        prepared: Result<LoadedDocument>,
    ) -> TaskOutcome<Result<usize>> {
        self.tasks.apply(ticket, prepared, |prepared| {
            self.tracker.reset();
            match prepared {
                Ok(document) => {
                    let page_count = document.page_count();
                    tracing::info!(
                        name = %document.name,
                        page_count,
                        size_bytes = document.info.size_bytes,
                        "document loaded"
                    );
                    self.document = Some(document);
                    Ok(page_count)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "document failed to load");
                    self.document = None;
                    Err(e)
                }
            }
        })
    }

    /// Drop the current document ("Change PDF")
    pub fn clear_document(&mut self) {
        self.tasks.next();
        self.document = None;
        self.tracker.reset();
    }

    pub fn document(&self) -> Option<&LoadedDocument> {
        self.document.as_ref()
    }

    pub fn page_count(&self) -> usize {
        self.document.as_ref().map_or(0, |d| d.page_count())
    }

    fn loaded(&self) -> Result<&LoadedDocument> {
        self.document
            .as_ref()
            .ok_or_else(|| SignError::Validation("No document loaded".into()))
    }

    pub fn page_geometry(&self, page_index: usize) -> Result<PageGeometry> {
        let document = self.loaded()?;
        document
            .pages
            .get(page_index)
            .copied()
            .ok_or(SignError::PageIndex {
                index: page_index,
                page_count: document.page_count(),
            })
    }

    /// Render one page with the session's rasterizer
    pub fn page_preview(&self, page_index: usize) -> Result<PageBitmap> {
        let document = self.loaded()?;
        if page_index >= document.page_count() {
            return Err(SignError::PageIndex {
                index: page_index,
                page_count: document.page_count(),
            });
        }
        self.rasterizer.rasterize_page(&document.parsed, page_index)
    }

    /// Letterbox fit of the current page inside `preview`, for overlay drawing
    pub fn current_fit(&self, preview: &dyn PreviewSource) -> Result<LetterboxFit> {
        let page = self.page_geometry(self.current_page())?;
        let rect = preview
            .preview_rect()
            .ok_or_else(|| SignError::Validation("Preview is not available".into()))?;
        LetterboxFit::compute(&rect, &page)
    }

    // ---- navigation ----

    pub fn current_page(&self) -> usize {
        self.tracker.current_page()
    }

    /// Display another page; any placement is discarded
    pub fn go_to_page(&mut self, page_index: usize) -> Result<()> {
        let page_count = self.loaded()?.page_count();
        if page_index >= page_count {
            return Err(SignError::PageIndex {
                index: page_index,
                page_count,
            });
        }
        self.tracker.navigate_to(page_index);
        Ok(())
    }

    /// Step forward or back; steps past either end are ignored
    pub fn change_page(&mut self, delta: i64) -> bool {
        let target = self.current_page() as i64 + delta;
        if delta == 0 || target < 0 || target >= self.page_count() as i64 {
            return false;
        }
        self.tracker.navigate_to(target as usize);
        true
    }

    // ---- signature ----

    pub fn set_drawn_signature(&mut self, bytes: &[u8]) -> Result<()> {
        self.signature = Some(SignatureBitmap::drawn_from_bytes(bytes)?);
        Ok(())
    }

    pub fn set_drawn_strokes(&mut self, strokes: &[Stroke], width: u32, height: u32) -> Result<()> {
        let image = render_strokes(strokes, width, height, DEFAULT_PEN_WIDTH)?;
        self.signature = Some(SignatureBitmap::drawn(image)?);
        Ok(())
    }

    pub fn set_uploaded_signature(&mut self, mime: &str, bytes: &[u8], threshold: u8) -> Result<()> {
        self.signature = Some(SignatureBitmap::uploaded(mime, bytes, threshold)?);
        Ok(())
    }

    /// Re-matte the uploaded signature; ignored when none is active
    pub fn set_threshold(&mut self, threshold: u8) {
        if let Some(signature) = self.signature.as_mut() {
            signature.set_threshold(threshold);
        }
    }

    pub fn clear_signature(&mut self) {
        self.signature = None;
    }

    pub fn signature(&self) -> Option<&SignatureBitmap> {
        self.signature.as_ref()
    }

    // ---- placement ----

    pub fn subscribe(&mut self, observer: impl PlacementObserver + 'static) {
        self.tracker.subscribe(observer);
    }

    pub fn placement(&self) -> Option<Placement> {
        self.tracker.placement()
    }

    pub fn tracker(&self) -> &PlacementTracker {
        &self.tracker
    }

    /// Place the signature at a click; needs both a document and a signature
    pub fn click(&mut self, x: f64, y: f64, preview: &dyn PreviewSource) -> Option<Placement> {
        if self.document.is_none() || self.signature.is_none() {
            return None;
        }
        let rect = preview.preview_rect()?;
        self.tracker.click(x, y, &rect)
    }

    pub fn begin_drag(&mut self, pointer_x: f64, pointer_y: f64) -> bool {
        self.tracker.begin_drag(pointer_x, pointer_y)
    }

    pub fn begin_resize(&mut self, pointer_x: f64) -> bool {
        self.tracker.begin_resize(pointer_x)
    }

    /// Feed the active gesture; the preview is read fresh for clamping
    pub fn pointer_move(&mut self, pointer_x: f64, pointer_y: f64, preview: &dyn PreviewSource) {
        match preview.preview_rect() {
            Some(rect) => self.tracker.pointer_move(pointer_x, pointer_y, &rect),
            // Preview went away mid-gesture
            None => self.tracker.end_gesture(),
        }
    }

    pub fn end_gesture(&mut self) {
        self.tracker.end_gesture();
    }

    // ---- generation ----

    pub fn is_generating(&self) -> bool {
        self.generating
    }

    pub fn can_generate(&self) -> bool {
        !self.generating
            && self.document.is_some()
            && self.signature.is_some()
            && self.tracker.is_placed()
    }

    /// `signed_<name>` for the loaded document
    pub fn output_name(&self) -> Option<String> {
        self.document
            .as_ref()
            .map(|d| format!("signed_{}", d.name))
    }

    /// Snapshot everything generation needs and mark the session busy
    ///
    /// The preview geometry is read from `preview` now, not earlier. On error
    /// the session is left exactly as it was.
    pub fn begin_generate(&mut self, preview: &dyn PreviewSource) -> Result<GenerateJob> {
        if self.generating {
            return Err(SignError::Validation(
                "A signed PDF is already being generated".into(),
            ));
        }
        let (Some(document), Some(signature), Some(placement)) =
            (self.document.as_ref(), self.signature.as_ref(), self.tracker.placement())
        else {
            return Err(SignError::Validation(
                "Make sure you've uploaded a PDF and placed your signature on it".into(),
            ));
        };

        let page = document
            .pages
            .get(placement.page_index)
            .ok_or(SignError::PageIndex {
                index: placement.page_index,
                page_count: document.page_count(),
            })?;
        let rect = preview
            .preview_rect()
            .ok_or_else(|| SignError::Validation("Preview is not available".into()))?;
        let pdf_rect = map_placement(&rect, page, &placement, &self.config)?;

        let job = GenerateJob {
            ticket: self.tasks.latest(),
            output_name: format!("signed_{}", document.name),
            page_index: placement.page_index,
            rect: pdf_rect,
            bytes: document.bytes.clone(),
            signature: signature.image().clone(),
        };
        self.generating = true;
        Ok(job)
    }

    /// Clear the busy flag and hand back the output if it is still current
    pub fn finish_generate(
        &mut self,
        job: &GenerateJob,
        result: Result<Vec<u8>>,
    ) -> TaskOutcome<Result<SignedOutput>> {
        self.generating = false;
        self.tasks.apply(job.ticket, result, |result| {
            result.map(|bytes| {
                tracing::info!(
                    name = %job.output_name,
                    page_index = job.page_index,
                    size_bytes = bytes.len(),
                    "signed document generated"
                );
                SignedOutput {
                    name: job.output_name.clone(),
                    bytes,
                    page_index: job.page_index,
                    rect: job.rect,
                }
            })
        })
    }

    /// Produce the signed document from the current state
    pub fn generate(&mut self, preview: &dyn PreviewSource) -> Result<SignedOutput> {
        let job = self.begin_generate(preview)?;
        let result = job.run();
        self.finish_generate(&job, result)
            .applied()
            .unwrap_or_else(|| Err(SignError::Validation("Document changed during generation".into())))
    }
}
