//! PDF Annotation Library
//!
//! Core logic for annotating PDF pages. Shared between CLI and WASM targets.
//!
//! An upload is parsed twice: a render-only parse rasterizes pages for the
//! editing surface, and an editable model receives the flattened surface as
//! a full-page image overlay when the document is saved.

#[cfg(target_arch = "wasm32")]
pub mod wasm;

pub mod compress;
pub mod editor;
pub mod error;
pub mod flatten;
pub mod fonts;
pub mod forms;
pub mod loader;
pub mod navigation;
pub mod render;
pub mod surface;
pub mod tools;

mod raster;
mod streams;

pub use compress::{compress_document, CompressionReport, CompressionSettings};
pub use editor::{DownloadArtifact, EditorSession, SaveJob};
pub use error::{EditorError, Result};
pub use flatten::{flatten_overlay, save_page, OverlayEncoding, SaveOptions};
pub use fonts::FontFamily;
pub use forms::{FieldType, FormFieldDescriptor, PageAnnotation};
pub use loader::{accept_upload, PdfDocument, UploadFile, PDF_MEDIA_TYPE};
pub use navigation::{RenderTicket, ViewState};
pub use render::{
    rasterize, Bitmap, PageSize, PdfRenderDocument, RenderBackend, RenderPage, Viewport,
};
pub use surface::{
    parse_hex_color, AnnotationId, AnnotationObject, AnnotationSurface, ImageEncoding,
    PlacedObject, Position, SurfaceEvent,
};
pub use tools::{ToolKind, ToolSession, ToolState};

use serde::{Deserialize, Serialize};

/// Options for an editing session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Extra rasterization density; the page is displayed at `zoom` but
    /// rendered at `zoom × dpi_multiplier` pixels per point
    pub dpi_multiplier: f32,
    /// Zoom the first page opens at
    pub initial_zoom: f32,
    /// Pixels per point of the overlay image embedded on save
    pub save_multiplier: f32,
    pub overlay_encoding: OverlayEncoding,
    /// Where committed signatures, text and form fields are placed
    pub placement: Position,
    /// Width signatures are scaled to, in points
    pub signature_width: f32,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            dpi_multiplier: 2.0,
            initial_zoom: 0.5,
            save_multiplier: 2.0,
            overlay_encoding: OverlayEncoding::Flate,
            placement: Position::new(100.0, 100.0),
            signature_width: 200.0,
        }
    }
}

impl EditorConfig {
    /// Parse a JSON config; missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EditorConfig =
            serde_json::from_str(json).map_err(|e| EditorError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("dpi_multiplier", self.dpi_multiplier),
            ("initial_zoom", self.initial_zoom),
            ("save_multiplier", self.save_multiplier),
            ("signature_width", self.signature_width),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(EditorError::Config(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if let OverlayEncoding::Jpeg { quality } = self.overlay_encoding {
            if quality == 0 || quality > 100 {
                return Err(EditorError::Config("Quality must be between 1 and 100".to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub mod file_ops {
    use super::*;
    use std::path::Path;

    /// Load a PDF from disk, named after its file name
    pub fn load_pdf_file(path: &Path) -> Result<PdfDocument> {
        let bytes =
            std::fs::read(path).map_err(|e| EditorError::Load(format!("{:?}: {}", path, e)))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());
        PdfDocument::load(name, bytes)
    }

    pub fn load_config(path: &Path) -> Result<EditorConfig> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| EditorError::Config(format!("{:?}: {}", path, e)))?;
        EditorConfig::from_json(&json)
    }

    pub fn write_pdf_file(path: &Path, bytes: &[u8]) -> Result<()> {
        std::fs::write(path, bytes).map_err(|e| EditorError::Save(format!("{:?}: {}", path, e)))
    }
}
