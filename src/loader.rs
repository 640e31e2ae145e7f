//! Upload validation and document loading.

use crate::error::{EditorError, Result};
use crate::forms::{self, FormFieldDescriptor};
use crate::render::{self, Bitmap, PdfRenderDocument};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use lopdf::Document;
use std::fmt;
use tracing::{info, warn};

pub const PDF_MEDIA_TYPE: &str = "application/pdf";

/// A file handed over by the upload control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    pub media_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, media_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        UploadFile {
            name: name.into(),
            media_type: media_type.into(),
            bytes,
        }
    }

    pub fn pdf(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        UploadFile::new(name, PDF_MEDIA_TYPE, bytes)
    }
}

/// Pick the file to load from an upload; only the first file counts.
pub fn accept_upload(files: Vec<UploadFile>) -> Result<UploadFile> {
    let mut files = files.into_iter();
    let file = files.next().ok_or(EditorError::EmptyUpload)?;
    let ignored = files.count();
    if ignored > 0 {
        warn!(ignored, "only the first uploaded file is used");
    }

    if !file.media_type.trim().eq_ignore_ascii_case(PDF_MEDIA_TYPE) {
        return Err(EditorError::NotAPdf {
            media_type: file.media_type,
        });
    }
    Ok(file)
}

/// One uploaded PDF, parsed twice.
///
/// The render-only parse serves rasterization and widget inspection; the
/// editable model is what saves start from. Each is built from its own
/// copy of the upload, so neither can observe changes to the other.
pub struct PdfDocument {
    name: String,
    original: Vec<u8>,
    render: PdfRenderDocument,
    editable: Document,
    preview: String,
}

impl fmt::Debug for PdfDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PdfDocument")
            .field("name", &self.name)
            .field("size", &self.original.len())
            .field("pages", &self.render.page_count())
            .finish()
    }
}

impl PdfDocument {
    pub fn load(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self> {
        let name = name.into();

        let render = PdfRenderDocument::from_bytes(bytes.clone())?;
        if render.page_count() == 0 {
            return Err(EditorError::Load("document has no pages".to_string()));
        }

        let editable_copy = bytes.clone();
        let editable =
            Document::load_mem(&editable_copy).map_err(|e| EditorError::Load(e.to_string()))?;

        let preview = format!("data:{};base64,{}", PDF_MEDIA_TYPE, STANDARD.encode(&bytes));
        info!(name = %name, size = bytes.len(), pages = render.page_count(), "loaded document");

        Ok(PdfDocument {
            name,
            original: bytes,
            render,
            editable,
            preview,
        })
    }

    /// Validate an upload and load its first file.
    pub fn from_upload(files: Vec<UploadFile>) -> Result<Self> {
        let file = accept_upload(files)?;
        PdfDocument::load(file.name, file.bytes)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size of the uploaded file in bytes.
    pub fn byte_size(&self) -> usize {
        self.original.len()
    }

    pub fn size_kb(&self) -> u64 {
        (self.original.len() as f64 / 1024.0).round() as u64
    }

    pub fn page_count(&self) -> u32 {
        self.render.page_count()
    }

    pub fn original_bytes(&self) -> &[u8] {
        &self.original
    }

    pub fn render_backend(&self) -> &PdfRenderDocument {
        &self.render
    }

    pub fn editable(&self) -> &Document {
        &self.editable
    }

    pub fn editable_mut(&mut self) -> &mut Document {
        &mut self.editable
    }

    /// `data:application/pdf;base64,...` of the original upload.
    pub fn preview_data_uri(&self) -> &str {
        &self.preview
    }

    pub fn download_file_name(&self) -> String {
        format!("edited_{}", self.name)
    }

    pub fn rasterize(&self, page: u32, scale: f32, dpi_multiplier: f32) -> Result<Bitmap> {
        render::rasterize(&self.render, page, scale, dpi_multiplier)
    }

    pub fn has_forms(&self) -> bool {
        forms::has_forms(&self.render)
    }

    pub fn form_fields(&self) -> Vec<FormFieldDescriptor> {
        forms::form_fields(&self.render)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_upload_is_rejected() {
        assert!(matches!(accept_upload(vec![]), Err(EditorError::EmptyUpload)));
    }

    #[test]
    fn non_pdf_is_rejected_with_user_message() {
        let upload = UploadFile::new("notes.txt", "text/plain", b"hi".to_vec());
        let err = accept_upload(vec![upload]).unwrap_err();
        assert_eq!(err.to_string(), "Please upload a PDF file");
    }

    #[test]
    fn only_first_file_counts() {
        let files = vec![
            UploadFile::pdf("a.pdf", b"%PDF-a".to_vec()),
            UploadFile::new("b.txt", "text/plain", Vec::new()),
        ];
        assert_eq!(accept_upload(files).unwrap().name, "a.pdf");
    }

    #[test]
    fn garbage_bytes_are_a_load_error() {
        let err = PdfDocument::load("broken.pdf", b"definitely not a pdf".to_vec()).unwrap_err();
        assert!(matches!(err, EditorError::Load(_)));
    }
}
