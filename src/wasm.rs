//! WebAssembly bindings for the PDF annotation editor

use crate::surface::{to_hex_color, AnnotationId, Position};
use crate::tools::ToolState;
use crate::{
    parse_hex_color, CompressionSettings, EditorConfig, EditorSession, FontFamily, ToolKind,
    UploadFile,
};
use js_sys::Uint8Array;
use wasm_bindgen::prelude::*;
use web_sys::console;

/// Initialize panic hook for better error messages in browser console
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
}

fn js_error(e: impl std::fmt::Display) -> JsError {
    JsError::new(&e.to_string())
}

fn tool_kind(name: &str) -> Result<ToolKind, JsError> {
    ToolKind::ALL
        .into_iter()
        .find(|kind| kind.label().eq_ignore_ascii_case(name))
        .ok_or_else(|| JsError::new(&format!("Unknown tool: {}", name)))
}

/// An editing session for one uploaded PDF
#[wasm_bindgen]
pub struct WasmEditor {
    session: EditorSession,
}

#[wasm_bindgen]
impl WasmEditor {
    /// Open an uploaded file
    ///
    /// # Arguments
    /// * `name` - File name, used for the download name
    /// * `media_type` - Declared MIME type; anything but `application/pdf` is rejected
    /// * `bytes` - File contents
    /// * `config_json` - Optional JSON editor configuration
    #[wasm_bindgen(constructor)]
    pub fn new(
        name: String,
        media_type: String,
        bytes: Vec<u8>,
        config_json: Option<String>,
    ) -> Result<WasmEditor, JsError> {
        let config = match config_json {
            Some(json) => EditorConfig::from_json(&json).map_err(js_error)?,
            None => EditorConfig::default(),
        };
        let upload = UploadFile::new(name, media_type, bytes);
        let session = EditorSession::from_upload(vec![upload], config).map_err(js_error)?;
        Ok(WasmEditor { session })
    }

    #[wasm_bindgen(getter)]
    pub fn page(&self) -> u32 {
        self.session.page()
    }

    #[wasm_bindgen(getter)]
    pub fn total_pages(&self) -> u32 {
        self.session.view().total_pages()
    }

    #[wasm_bindgen(getter)]
    pub fn zoom(&self) -> f32 {
        self.session.zoom()
    }

    #[wasm_bindgen(getter)]
    pub fn file_name(&self) -> String {
        self.session.document().name().to_string()
    }

    #[wasm_bindgen(getter)]
    pub fn size_kb(&self) -> u64 {
        self.session.document().size_kb()
    }

    #[wasm_bindgen(getter)]
    pub fn preview_data_uri(&self) -> String {
        self.session.document().preview_data_uri().to_string()
    }

    #[wasm_bindgen(getter)]
    pub fn zoom_percent(&self) -> u32 {
        self.session.view().zoom_percent()
    }

    #[wasm_bindgen(getter)]
    pub fn can_go_prev(&self) -> bool {
        self.session.view().can_go_prev()
    }

    #[wasm_bindgen(getter)]
    pub fn can_go_next(&self) -> bool {
        self.session.view().can_go_next()
    }

    #[wasm_bindgen(getter)]
    pub fn can_zoom_in(&self) -> bool {
        self.session.view().can_zoom_in()
    }

    #[wasm_bindgen(getter)]
    pub fn can_zoom_out(&self) -> bool {
        self.session.view().can_zoom_out()
    }

    pub fn next_page(&mut self) -> bool {
        self.session.next_page()
    }

    pub fn prev_page(&mut self) -> bool {
        self.session.prev_page()
    }

    pub fn go_to_page(&mut self, page: u32) -> bool {
        self.session.go_to_page(page)
    }

    pub fn zoom_in(&mut self) -> bool {
        self.session.zoom_in()
    }

    pub fn zoom_out(&mut self) -> bool {
        self.session.zoom_out()
    }

    /// The current page with all annotations, as PNG at display resolution
    /// times the DPI multiplier
    pub fn render_png(&self) -> Result<Vec<u8>, JsError> {
        let zoom = self.session.zoom() * self.session.config().dpi_multiplier;
        self.session
            .surface()
            .serialize_to_image(zoom, crate::ImageEncoding::Png)
            .map_err(js_error)
    }

    /// Toggle a tool by name; returns the active tool name or undefined
    pub fn toggle_tool(&mut self, name: &str) -> Result<Option<String>, JsError> {
        let kind = tool_kind(name)?;
        Ok(self
            .session
            .toggle_tool(kind)
            .map(|active| active.label().to_lowercase()))
    }

    pub fn close_tool(&mut self) {
        self.session.tools_mut().deactivate();
    }

    pub fn set_text(
        &mut self,
        text: String,
        font: Option<String>,
        size: Option<f32>,
        color: Option<String>,
    ) -> Result<(), JsError> {
        let input = self
            .session
            .tools_mut()
            .text_mut()
            .ok_or_else(|| JsError::new("Text tool is not active"))?;
        input.text = text;
        if let Some(label) = font {
            input.font = FontFamily::from_label(&label)
                .ok_or_else(|| JsError::new(&format!("Unknown font: {}", label)))?;
        }
        if let Some(size) = size {
            input.size = size;
        }
        if let Some(color) = color {
            input.color = parse_hex_color(&color)
                .ok_or_else(|| JsError::new(&format!("Invalid color: {}", color)))?;
        }
        Ok(())
    }

    pub fn load_signature(&mut self, bytes: &[u8]) -> Result<(), JsError> {
        if bytes.is_empty() {
            console::warn_1(&JsValue::from_str("Empty signature image"));
        }
        let input = self
            .session
            .tools_mut()
            .signature_mut()
            .ok_or_else(|| JsError::new("Signature tool is not active"))?;
        input.load_image(bytes).map_err(js_error)
    }

    pub fn signature_stroke_begin(&mut self, x: f32, y: f32) {
        if let Some(input) = self.session.tools_mut().signature_mut() {
            input.pad.begin_stroke(Position::new(x, y));
        }
    }

    pub fn signature_stroke_to(&mut self, x: f32, y: f32) {
        if let Some(input) = self.session.tools_mut().signature_mut() {
            input.pad.extend_stroke(Position::new(x, y));
        }
    }

    /// Finish a pad stroke and use the drawing as the signature
    pub fn signature_stroke_end(&mut self) -> bool {
        match self.session.tools_mut().signature_mut() {
            Some(input) => {
                input.pad.end_stroke();
                input.use_drawing()
            }
            None => false,
        }
    }

    pub fn clear_signature(&mut self) {
        if let Some(input) = self.session.tools_mut().signature_mut() {
            input.clear();
        }
    }

    pub fn set_highlight_color(&mut self, color: &str) -> Result<(), JsError> {
        let parsed = parse_hex_color(color)
            .ok_or_else(|| JsError::new(&format!("Invalid color: {}", color)))?;
        if let Some(input) = self.session.tools_mut().highlight_mut() {
            input.color = parsed;
        }
        Ok(())
    }

    pub fn highlight_point(&mut self, x: f32, y: f32) {
        if let Some(input) = self.session.tools_mut().highlight_mut() {
            input.add_point(Position::new(x, y));
        }
    }

    /// Form fields of the document as JSON, once the form tool is active
    pub fn form_fields_json(&self) -> String {
        match self.session.tools().active() {
            Some(ToolState::Form(form)) => {
                serde_json::to_string(&form.fields).unwrap_or_else(|_| "[]".to_string())
            }
            _ => "[]".to_string(),
        }
    }

    pub fn select_form_field(&mut self, index: usize, value: Option<String>) -> bool {
        match self.session.tools_mut().form_mut() {
            Some(form) => {
                if let Some(value) = value {
                    form.set_value(index, value);
                }
                form.select(index)
            }
            None => false,
        }
    }

    /// Commit the active tool; returns the new object id
    pub fn commit(&mut self, x: Option<f32>, y: Option<f32>) -> Result<Option<u64>, JsError> {
        let id = match (x, y) {
            (Some(x), Some(y)) => self.session.commit_tool_at(Position::new(x, y)),
            _ => self.session.commit_tool(),
        }
        .map_err(js_error)?;
        Ok(id.map(|id| id.0))
    }

    pub fn move_object(&mut self, id: u64, x: f32, y: f32) -> bool {
        self.session.move_object(AnnotationId(id), Position::new(x, y))
    }

    pub fn remove_object(&mut self, id: u64) -> bool {
        self.session.remove_object(AnnotationId(id)).is_some()
    }

    /// Topmost object under a point, for selection
    pub fn object_at(&self, x: f32, y: f32) -> Option<u64> {
        self.session.surface().object_at(Position::new(x, y)).map(|id| id.0)
    }

    /// Placed objects as JSON: id, kind and bounds
    pub fn objects_json(&self) -> String {
        let objects: Vec<serde_json::Value> = self
            .session
            .surface()
            .objects()
            .iter()
            .map(|placed| {
                let (x, y, w, h) = placed.bounds();
                let color = match &placed.object {
                    crate::AnnotationObject::Text { color, .. }
                    | crate::AnnotationObject::Highlight { color, .. } => {
                        Some(to_hex_color(*color))
                    }
                    _ => None,
                };
                serde_json::json!({
                    "id": placed.id.0,
                    "kind": placed.object.kind(),
                    "x": x,
                    "y": y,
                    "width": w,
                    "height": h,
                    "color": color,
                })
            })
            .collect();
        serde_json::to_string(&objects).unwrap_or_else(|_| "[]".to_string())
    }

    #[wasm_bindgen(getter)]
    pub fn can_save(&self) -> bool {
        self.session.can_save()
    }

    #[wasm_bindgen(getter)]
    pub fn can_download(&self) -> bool {
        self.session.can_download()
    }

    #[wasm_bindgen(getter)]
    pub fn has_unsaved_changes(&self) -> bool {
        self.session.has_unsaved_changes()
    }

    /// Flatten the current page and return the PDF bytes
    pub fn save(&mut self) -> Result<Uint8Array, JsError> {
        let bytes = self.session.save().map_err(|e| {
            console::error_1(&JsValue::from_str(&format!("Error saving PDF: {}", e)));
            js_error(e)
        })?;
        let message = format!("Saved page {} ({} bytes)", self.session.page(), bytes.len());
        console::log_1(&JsValue::from_str(&message));
        Ok(Uint8Array::from(bytes.as_slice()))
    }

    /// Save and return a download with its file name
    pub fn download(&mut self) -> Result<DownloadJs, JsError> {
        let artifact = self.session.download().map_err(|e| {
            console::error_1(&JsValue::from_str(&format!("Error downloading PDF: {}", e)));
            js_error(e)
        })?;
        Ok(DownloadJs {
            file_name: artifact.file_name,
            bytes: artifact.bytes,
        })
    }

    /// Compress the document
    ///
    /// # Arguments
    /// * `target_size_kb` - Target size in KB
    /// * `quality` - Quality 0-1
    ///
    /// Omitted arguments fall back to the compress tool's current settings.
    pub fn compress(
        &mut self,
        target_size_kb: Option<u32>,
        quality: Option<f32>,
    ) -> Result<CompressResultJs, JsError> {
        let current = self
            .session
            .tools_mut()
            .compress_mut()
            .map(|input| input.settings)
            .unwrap_or_default();
        let settings = CompressionSettings {
            target_size_kb: target_size_kb.unwrap_or(current.target_size_kb),
            quality: quality.unwrap_or(current.quality),
        };
        if let Some(input) = self.session.tools_mut().compress_mut() {
            input.settings = settings;
        }
        let (pdf_bytes, report) = self.session.compress(&settings).map_err(js_error)?;
        Ok(CompressResultJs {
            pdf_bytes,
            original_kb: report.original_kb,
            compressed_kb: report.compressed_kb,
            reduction_percent: report.reduction_percent as i32,
        })
    }
}

/// A saved PDF ready for download
#[wasm_bindgen]
pub struct DownloadJs {
    file_name: String,
    bytes: Vec<u8>,
}

#[wasm_bindgen]
impl DownloadJs {
    #[wasm_bindgen(getter)]
    pub fn file_name(&self) -> String {
        self.file_name.clone()
    }

    #[wasm_bindgen(getter)]
    pub fn media_type(&self) -> String {
        crate::PDF_MEDIA_TYPE.to_string()
    }

    #[wasm_bindgen(getter)]
    pub fn bytes(&self) -> Uint8Array {
        Uint8Array::from(self.bytes.as_slice())
    }
}

/// Result of a compress operation with its size report
#[wasm_bindgen]
pub struct CompressResultJs {
    pdf_bytes: Vec<u8>,
    original_kb: u64,
    compressed_kb: u64,
    reduction_percent: i32,
}

#[wasm_bindgen]
impl CompressResultJs {
    /// Get the compressed PDF bytes
    #[wasm_bindgen(getter)]
    pub fn pdf_bytes(&self) -> Vec<u8> {
        self.pdf_bytes.clone()
    }

    #[wasm_bindgen(getter)]
    pub fn original_kb(&self) -> u64 {
        self.original_kb
    }

    #[wasm_bindgen(getter)]
    pub fn compressed_kb(&self) -> u64 {
        self.compressed_kb
    }

    #[wasm_bindgen(getter)]
    pub fn reduction_percent(&self) -> i32 {
        self.reduction_percent
    }
}
