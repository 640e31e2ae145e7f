//! The editing session: one document, its view, tools and annotations.

use crate::compress::{self, CompressionReport, CompressionSettings};
use crate::error::{EditorError, Result};
use crate::flatten::{self, SaveOptions};
use crate::loader::{PdfDocument, UploadFile, PDF_MEDIA_TYPE};
use crate::navigation::{RenderTicket, ViewState};
use crate::render::Bitmap;
use crate::surface::{AnnotationId, AnnotationSurface, ImageEncoding, PlacedObject, Position};
use crate::tools::{ToolKind, ToolSession};
use crate::EditorConfig;
use lopdf::Document;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A finished download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadArtifact {
    pub file_name: String,
    pub media_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Flatten work detached from the session.
///
/// Owns a copy of the editable model and the serialized overlay, so it can
/// run on any thread while the session stays locked for saving.
#[derive(Debug)]
pub struct SaveJob {
    editable: Document,
    overlay: Vec<u8>,
    page: u32,
    options: SaveOptions,
}

impl SaveJob {
    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn run(self) -> Result<Vec<u8>> {
        flatten::flatten_overlay(&self.editable, &self.overlay, self.page, &self.options)
    }
}

#[derive(Debug)]
pub struct EditorSession {
    document: PdfDocument,
    config: EditorConfig,
    view: ViewState,
    tools: ToolSession,
    surface: AnnotationSurface,
    /// Objects of pages other than the current one.
    stash: BTreeMap<u32, Vec<PlacedObject>>,
    unsaved: Arc<AtomicBool>,
    saving: bool,
}

impl EditorSession {
    /// Start editing `document` and render its first page.
    pub fn open(document: PdfDocument, config: EditorConfig) -> Result<Self> {
        config.validate()?;

        let unsaved = Arc::new(AtomicBool::new(false));
        let mut surface = AnnotationSurface::new();
        let flag = Arc::clone(&unsaved);
        surface.subscribe(move |event| {
            if event.is_edit() {
                flag.store(true, Ordering::SeqCst);
            }
        });

        let mut session = EditorSession {
            view: ViewState::new(document.page_count(), config.initial_zoom),
            tools: ToolSession::new(config.signature_width),
            document,
            config,
            surface,
            stash: BTreeMap::new(),
            unsaved,
            saving: false,
        };
        session.refresh();
        Ok(session)
    }

    pub fn from_upload(files: Vec<UploadFile>, config: EditorConfig) -> Result<Self> {
        let document = PdfDocument::from_upload(files)?;
        EditorSession::open(document, config)
    }

    pub fn document(&self) -> &PdfDocument {
        &self.document
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn page(&self) -> u32 {
        self.view.page()
    }

    pub fn zoom(&self) -> f32 {
        self.view.zoom()
    }

    pub fn surface(&self) -> &AnnotationSurface {
        &self.surface
    }

    pub fn tools(&self) -> &ToolSession {
        &self.tools
    }

    pub fn tools_mut(&mut self) -> &mut ToolSession {
        &mut self.tools
    }

    pub fn next_page(&mut self) -> bool {
        self.navigate(ViewState::next)
    }

    pub fn prev_page(&mut self) -> bool {
        self.navigate(ViewState::prev)
    }

    pub fn go_to_page(&mut self, page: u32) -> bool {
        self.navigate(|view| view.go_to(page))
    }

    pub fn zoom_in(&mut self) -> bool {
        self.navigate(ViewState::zoom_in)
    }

    pub fn zoom_out(&mut self) -> bool {
        self.navigate(ViewState::zoom_out)
    }

    pub fn set_zoom(&mut self, zoom: f32) -> bool {
        self.navigate(|view| view.set_zoom(zoom))
    }

    fn navigate<F: FnOnce(&mut ViewState) -> bool>(&mut self, change: F) -> bool {
        let from = self.view.page();
        if !change(&mut self.view) {
            return false;
        }
        let to = self.view.page();
        if from != to {
            let leaving = self.surface.take_objects();
            if !leaving.is_empty() {
                self.stash.insert(from, leaving);
            }
            if let Some(objects) = self.stash.remove(&to) {
                self.surface.restore_objects(objects);
            }
        }
        self.refresh();
        true
    }

    /// Re-render the current page synchronously.
    pub fn refresh(&mut self) -> bool {
        let ticket = self.request_render();
        let result = self.render_ticket(&ticket);
        self.complete_render(ticket, result)
    }

    /// Ticket for rendering the current page and zoom.
    pub fn request_render(&self) -> RenderTicket {
        self.view.ticket()
    }

    pub fn render_ticket(&self, ticket: &RenderTicket) -> Result<Bitmap> {
        self.document
            .rasterize(ticket.page, ticket.zoom, self.config.dpi_multiplier)
    }

    /// Apply a finished render; stale tickets and failures keep the current background.
    pub fn complete_render(&mut self, ticket: RenderTicket, result: Result<Bitmap>) -> bool {
        if !self.view.is_current(&ticket) {
            warn!(
                page = ticket.page,
                zoom = ticket.zoom,
                "discarding stale render"
            );
            return false;
        }
        match result {
            Ok(bitmap) => {
                debug!(page = ticket.page, zoom = ticket.zoom, "background updated");
                self.surface.set_background(bitmap);
                true
            }
            Err(e) => {
                warn!("keeping previous page image: {}", e);
                false
            }
        }
    }

    /// Toggle a tool; activating the form tool loads the document's fields.
    pub fn toggle_tool(&mut self, kind: ToolKind) -> Option<ToolKind> {
        let active = self.tools.toggle(kind);
        if active == Some(ToolKind::Form) {
            let fields = self.document.form_fields();
            debug!(fields = fields.len(), "form fields loaded");
            if let Some(form) = self.tools.form_mut() {
                form.fields = fields;
            }
        }
        active
    }

    /// Commit the active tool at the configured default placement.
    pub fn commit_tool(&mut self) -> Result<Option<AnnotationId>> {
        let placement = self.config.placement;
        self.commit_tool_at(placement)
    }

    pub fn commit_tool_at(&mut self, position: Position) -> Result<Option<AnnotationId>> {
        self.tools.commit(&mut self.surface, position)
    }

    pub fn move_object(&mut self, id: AnnotationId, position: Position) -> bool {
        self.surface.move_to(id, position)
    }

    pub fn remove_object(&mut self, id: AnnotationId) -> Option<PlacedObject> {
        self.surface.remove(id)
    }

    /// Pages that currently carry annotations, ascending.
    pub fn annotated_pages(&self) -> Vec<u32> {
        let mut pages: Vec<u32> = self.stash.keys().copied().collect();
        if !self.surface.is_empty() {
            pages.push(self.view.page());
            pages.sort_unstable();
        }
        pages
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.unsaved.load(Ordering::SeqCst)
    }

    pub fn is_saving(&self) -> bool {
        self.saving
    }

    pub fn can_save(&self) -> bool {
        !self.saving && self.has_unsaved_changes()
    }

    pub fn can_download(&self) -> bool {
        !self.saving
    }

    /// Capture everything a save needs and take the save lock.
    pub fn begin_save(&mut self) -> Result<SaveJob> {
        if self.saving {
            return Err(EditorError::SaveInProgress);
        }
        let page = self.view.page();
        let editable = self.document.editable();
        flatten::page_id(editable, page)?;

        // Rendered afresh: the display background may be stale or another page
        let multiplier = self.config.save_multiplier;
        let bitmap = flatten::page_bitmap(editable, page, multiplier)?;
        let overlay = self
            .surface
            .serialize_over(&bitmap, multiplier, ImageEncoding::Png)
            .map_err(|e| EditorError::Save(e.to_string()))?;

        self.saving = true;
        debug!(page, overlay_size = overlay.len(), "save started");
        Ok(SaveJob {
            editable: self.document.editable().clone(),
            overlay,
            page,
            options: SaveOptions::for_save().with_overlay(self.config.overlay_encoding),
        })
    }

    /// Release the save lock and record the outcome.
    pub fn finish_save(&mut self, result: Result<Vec<u8>>) -> Result<Vec<u8>> {
        self.saving = false;
        match result {
            Ok(bytes) => {
                self.unsaved.store(false, Ordering::SeqCst);
                info!(name = self.document.name(), size = bytes.len(), "document saved");
                Ok(bytes)
            }
            Err(e) => {
                warn!("save failed: {}", e);
                Err(e)
            }
        }
    }

    /// Flatten the current page and serialize the document.
    pub fn save(&mut self) -> Result<Vec<u8>> {
        let job = self.begin_save()?;
        let result = job.run();
        self.finish_save(result)
    }

    pub fn download(&mut self) -> Result<DownloadArtifact> {
        let bytes = self.save().map_err(|e| match e {
            EditorError::Save(reason) => EditorError::Download(reason),
            other => other,
        })?;
        Ok(DownloadArtifact {
            file_name: self.document.download_file_name(),
            media_type: PDF_MEDIA_TYPE,
            bytes,
        })
    }

    pub fn compress(&self, settings: &CompressionSettings) -> Result<(Vec<u8>, CompressionReport)> {
        compress::compress_document(&self.document, settings)
    }

    /// End the session and hand back the document.
    pub fn close(self) -> PdfDocument {
        self.document
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::AnnotationObject;
    use image::{Rgba, RgbaImage};
    use lopdf::{Dictionary, Object, Stream};

    fn blank_pdf(pages: usize) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let kids: Vec<Object> = (0..pages)
            .map(|_| {
                let content_id = doc.add_object(Stream::new(Dictionary::new(), Vec::new()));
                Object::Reference(doc.add_object(Dictionary::from_iter(vec![
                    ("Type", Object::Name(b"Page".to_vec())),
                    ("Parent", Object::Reference(pages_id)),
                    ("Contents", Object::Reference(content_id)),
                ])))
            })
            .collect();
        doc.objects.insert(
            pages_id,
            Object::Dictionary(Dictionary::from_iter(vec![
                ("Type", Object::Name(b"Pages".to_vec())),
                ("Count", Object::Integer(kids.len() as i64)),
                ("Kids", Object::Array(kids)),
                (
                    "MediaBox",
                    Object::Array(vec![0.into(), 0.into(), 120.into(), 90.into()]),
                ),
            ])),
        );
        let catalog_id = doc.add_object(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Catalog".to_vec())),
            ("Pages", Object::Reference(pages_id)),
        ]));
        doc.trailer.set("Root", Object::Reference(catalog_id));
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    fn session(pages: usize) -> EditorSession {
        let document = PdfDocument::load("doc.pdf", blank_pdf(pages)).unwrap();
        EditorSession::open(document, EditorConfig::default()).unwrap()
    }

    fn stamp() -> AnnotationObject {
        AnnotationObject::Signature {
            image: RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255])),
            width: 10.0,
            height: 10.0,
        }
    }

    #[test]
    fn opening_renders_first_page_at_initial_zoom() {
        let session = session(2);
        let background = session.surface().background().unwrap();
        assert_eq!(background.page, 1);
        assert_eq!(background.pixel_size(), (120, 90));
        assert_eq!(session.surface().dimensions(), (120.0, 90.0));
        assert!(!session.has_unsaved_changes());
        assert!(!session.can_save());
        assert!(session.can_download());
    }

    #[test]
    fn stale_render_is_discarded() {
        let mut session = session(2);
        let ticket = session.request_render();
        let late = session.render_ticket(&ticket);
        assert!(session.next_page());
        assert!(!session.complete_render(ticket, late));
        assert_eq!(session.surface().background().unwrap().page, 2);
    }

    #[test]
    fn failed_render_keeps_previous_page_image() {
        let mut session = session(2);
        let ticket = session.request_render();
        let failed = Err(EditorError::render(1, "broken content stream"));
        assert!(!session.complete_render(ticket, failed));

        let background = session.surface().background().unwrap();
        assert_eq!(background.page, 1);
        assert_eq!(background.pixel_size(), (120, 90));
    }

    #[test]
    fn save_that_cannot_rasterize_does_not_take_the_lock() {
        let document = PdfDocument::load("doc.pdf", blank_pdf(1)).unwrap();
        let config = EditorConfig {
            save_multiplier: 1000.0,
            ..EditorConfig::default()
        };
        let mut session = EditorSession::open(document, config).unwrap();
        session.surface.add(Position::default(), stamp());

        let err = session.begin_save().unwrap_err();
        assert!(matches!(err, EditorError::Save(_)), "{}", err);
        assert!(!session.is_saving());
        assert!(session.can_save());
    }

    #[test]
    fn annotations_follow_their_page() {
        let mut session = session(3);
        session.tools_mut().toggle(ToolKind::Signature);
        let stroke = RgbaImage::from_pixel(4, 2, Rgba([0, 0, 0, 255]));
        session.tools_mut().signature_mut().unwrap().image = Some(stroke);
        session.commit_tool().unwrap().unwrap();
        assert!(session.has_unsaved_changes());

        session.go_to_page(3);
        assert!(session.surface().is_empty());
        assert_eq!(session.annotated_pages(), vec![1]);

        session.go_to_page(1);
        assert_eq!(session.surface().objects().len(), 1);
        assert_eq!(session.annotated_pages(), vec![1]);
    }

    #[test]
    fn save_lock_blocks_second_save() {
        let mut session = session(1);
        session.tools_mut().toggle(ToolKind::Text);
        session.tools_mut().text_mut().unwrap().text = "x".into();
        session.commit_tool().unwrap();
        assert!(session.can_save());

        let job = session.begin_save().unwrap();
        assert!(session.is_saving());
        assert!(!session.can_download());
        assert!(matches!(session.begin_save(), Err(EditorError::SaveInProgress)));

        let handle = std::thread::spawn(move || job.run());
        let result = handle.join().unwrap();
        let bytes = session.finish_save(result).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
        assert!(!session.is_saving());
        assert!(!session.has_unsaved_changes());
    }

    #[test]
    fn removing_marks_unsaved_and_unknown_removal_does_not() {
        let mut session = session(1);
        assert!(session.remove_object(AnnotationId(7)).is_none());
        assert!(!session.has_unsaved_changes());

        let id = session.surface.add(Position::default(), stamp());
        session.finish_save(Ok(Vec::new())).unwrap();
        assert!(!session.has_unsaved_changes());

        assert!(session.remove_object(id).is_some());
        assert!(session.has_unsaved_changes());
    }

    #[test]
    fn download_names_file_after_upload() {
        let mut session = session(1);
        let artifact = session.download().unwrap();
        assert_eq!(artifact.file_name, "edited_doc.pdf");
        assert_eq!(artifact.media_type, "application/pdf");
        assert!(Document::load_mem(&artifact.bytes).is_ok());
    }
}
