//! The active editing tool and its transient input.
//!
//! Exactly one tool is active at a time. Its input lives here until
//! [`ToolSession::commit`] turns it into an object on the surface;
//! switching tools drops the input of the previous one.

use crate::compress::CompressionSettings;
use crate::error::{EditorError, Result};
use crate::fonts::FontFamily;
use crate::forms::{FieldType, FormFieldDescriptor};
use crate::raster::{self, TRANSPARENT};
use crate::surface::{AnnotationId, AnnotationObject, AnnotationSurface, Position};
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_TEXT_SIZE: f32 = 16.0;
pub const DEFAULT_HIGHLIGHT_WIDTH: f32 = 20.0;
pub const DEFAULT_HIGHLIGHT_OPACITY: f32 = 0.5;

const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
const SIGNATURE_STROKE_WIDTH: f32 = 2.0;

/// Preset highlight colors.
pub const HIGHLIGHT_PALETTE: [(&str, Rgba<u8>); 5] = [
    ("Yellow", Rgba([255, 255, 0, 255])),
    ("Green", Rgba([0, 255, 0, 255])),
    ("Pink", Rgba([255, 153, 153, 255])),
    ("Blue", Rgba([153, 204, 255, 255])),
    ("Orange", Rgba([255, 153, 51, 255])),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Signature,
    Text,
    Highlight,
    Form,
    Compress,
}

impl ToolKind {
    pub const ALL: [ToolKind; 5] = [
        ToolKind::Signature,
        ToolKind::Text,
        ToolKind::Highlight,
        ToolKind::Form,
        ToolKind::Compress,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ToolKind::Signature => "Signature",
            ToolKind::Text => "Text",
            ToolKind::Highlight => "Highlight",
            ToolKind::Form => "Form",
            ToolKind::Compress => "Compress",
        }
    }
}

/// Drawing area for hand-drawn signatures.
#[derive(Debug, Clone, PartialEq)]
pub struct SignaturePad {
    width: u32,
    height: u32,
    strokes: Vec<Vec<Position>>,
    drawing: bool,
}

impl SignaturePad {
    pub fn new(width: u32, height: u32) -> Self {
        SignaturePad {
            width: width.max(1),
            height: height.max(1),
            strokes: Vec::new(),
            drawing: false,
        }
    }

    pub fn begin_stroke(&mut self, at: Position) {
        self.strokes.push(vec![at]);
        self.drawing = true;
    }

    /// Extend the current stroke; ignored between strokes.
    pub fn extend_stroke(&mut self, to: Position) {
        if !self.drawing {
            return;
        }
        if let Some(stroke) = self.strokes.last_mut() {
            stroke.push(to);
        }
    }

    pub fn end_stroke(&mut self) {
        self.drawing = false;
    }

    pub fn clear(&mut self) {
        self.strokes.clear();
        self.drawing = false;
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty()
    }

    /// Strokes in black on a transparent pad-sized image.
    pub fn to_image(&self) -> RgbaImage {
        let mut image = RgbaImage::from_pixel(self.width, self.height, TRANSPARENT);
        for stroke in &self.strokes {
            let points: Vec<(f32, f32)> = stroke.iter().map(|p| (p.x, p.y)).collect();
            raster::stroke_polyline(&mut image, &points, SIGNATURE_STROKE_WIDTH, BLACK, 1.0);
        }
        image
    }
}

impl Default for SignaturePad {
    fn default() -> Self {
        SignaturePad::new(400, 150)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignatureInput {
    pub image: Option<RgbaImage>,
    pub pad: SignaturePad,
}

impl SignatureInput {
    /// Use an uploaded PNG or JPEG as the signature.
    pub fn load_image(&mut self, bytes: &[u8]) -> Result<()> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| EditorError::InvalidImage(e.to_string()))?
            .to_rgba8();
        self.image = Some(image);
        Ok(())
    }

    /// Take the pad drawing as the signature.
    pub fn use_drawing(&mut self) -> bool {
        if self.pad.is_empty() {
            return false;
        }
        self.image = Some(self.pad.to_image());
        true
    }

    pub fn clear(&mut self) {
        self.pad.clear();
        self.image = None;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextInput {
    pub text: String,
    pub font: FontFamily,
    pub size: f32,
    pub color: Rgba<u8>,
}

impl Default for TextInput {
    fn default() -> Self {
        TextInput {
            text: String::new(),
            font: FontFamily::Arial,
            size: DEFAULT_TEXT_SIZE,
            color: BLACK,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HighlightInput {
    pub color: Rgba<u8>,
    pub width: f32,
    pub opacity: f32,
    /// Points of the stroke being drawn, in surface units.
    pub points: Vec<Position>,
}

impl Default for HighlightInput {
    fn default() -> Self {
        HighlightInput {
            color: HIGHLIGHT_PALETTE[0].1,
            width: DEFAULT_HIGHLIGHT_WIDTH,
            opacity: DEFAULT_HIGHLIGHT_OPACITY,
            points: Vec::new(),
        }
    }
}

impl HighlightInput {
    pub fn add_point(&mut self, point: Position) {
        self.points.push(point);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormInput {
    pub fields: Vec<FormFieldDescriptor>,
    pub selected: Option<usize>,
}

impl FormInput {
    pub fn select(&mut self, index: usize) -> bool {
        if index < self.fields.len() {
            self.selected = Some(index);
            true
        } else {
            false
        }
    }

    pub fn set_value(&mut self, index: usize, value: impl Into<String>) -> bool {
        match self.fields.get_mut(index) {
            Some(field) => {
                field.value = value.into();
                true
            }
            None => false,
        }
    }

    /// Size a field shape is placed with, in surface units.
    pub fn shape_size(field_type: FieldType) -> (f32, f32) {
        match field_type {
            FieldType::Text | FieldType::Dropdown => (200.0, 24.0),
            FieldType::Checkbox | FieldType::Radio => (120.0, 16.0),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompressInput {
    pub settings: CompressionSettings,
}

/// The active tool together with its input.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolState {
    Signature(SignatureInput),
    Text(TextInput),
    Highlight(HighlightInput),
    Form(FormInput),
    Compress(CompressInput),
}

impl ToolState {
    fn fresh(kind: ToolKind) -> Self {
        match kind {
            ToolKind::Signature => ToolState::Signature(SignatureInput::default()),
            ToolKind::Text => ToolState::Text(TextInput::default()),
            ToolKind::Highlight => ToolState::Highlight(HighlightInput::default()),
            ToolKind::Form => ToolState::Form(FormInput::default()),
            ToolKind::Compress => ToolState::Compress(CompressInput::default()),
        }
    }

    pub fn kind(&self) -> ToolKind {
        match self {
            ToolState::Signature(_) => ToolKind::Signature,
            ToolState::Text(_) => ToolKind::Text,
            ToolState::Highlight(_) => ToolKind::Highlight,
            ToolState::Form(_) => ToolKind::Form,
            ToolState::Compress(_) => ToolKind::Compress,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolSession {
    active: Option<ToolState>,
    signature_width: f32,
}

impl Default for ToolSession {
    fn default() -> Self {
        ToolSession::new(200.0)
    }
}

impl ToolSession {
    /// `signature_width` is the width committed signatures are scaled to.
    pub fn new(signature_width: f32) -> Self {
        ToolSession {
            active: None,
            signature_width,
        }
    }

    pub fn active_kind(&self) -> Option<ToolKind> {
        self.active.as_ref().map(ToolState::kind)
    }

    pub fn active(&self) -> Option<&ToolState> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut ToolState> {
        self.active.as_mut()
    }

    /// Activate `kind` with fresh input, or deactivate it if already active.
    /// Returns the tool active afterwards.
    pub fn toggle(&mut self, kind: ToolKind) -> Option<ToolKind> {
        if self.active_kind() == Some(kind) {
            self.active = None;
        } else {
            self.active = Some(ToolState::fresh(kind));
        }
        debug!(active = ?self.active_kind(), "tool toggled");
        self.active_kind()
    }

    pub fn deactivate(&mut self) {
        self.active = None;
    }

    pub fn signature_mut(&mut self) -> Option<&mut SignatureInput> {
        match self.active.as_mut() {
            Some(ToolState::Signature(input)) => Some(input),
            _ => None,
        }
    }

    pub fn text_mut(&mut self) -> Option<&mut TextInput> {
        match self.active.as_mut() {
            Some(ToolState::Text(input)) => Some(input),
            _ => None,
        }
    }

    pub fn highlight_mut(&mut self) -> Option<&mut HighlightInput> {
        match self.active.as_mut() {
            Some(ToolState::Highlight(input)) => Some(input),
            _ => None,
        }
    }

    pub fn form_mut(&mut self) -> Option<&mut FormInput> {
        match self.active.as_mut() {
            Some(ToolState::Form(input)) => Some(input),
            _ => None,
        }
    }

    pub fn compress_mut(&mut self) -> Option<&mut CompressInput> {
        match self.active.as_mut() {
            Some(ToolState::Compress(input)) => Some(input),
            _ => None,
        }
    }

    /// Place the active tool's input on `surface` at `position`.
    ///
    /// Returns `None` when there is nothing to place. Highlights keep the
    /// position they were drawn at and ignore `position`.
    pub fn commit(
        &mut self,
        surface: &mut AnnotationSurface,
        position: Position,
    ) -> Result<Option<AnnotationId>> {
        let signature_width = self.signature_width;
        let Some(state) = self.active.as_mut() else {
            return Ok(None);
        };

        let placed = match state {
            ToolState::Signature(input) => {
                let Some(image) = input.image.clone() else {
                    return Ok(None);
                };
                let (w, h) = image.dimensions();
                let width = signature_width;
                let height = width * h as f32 / w.max(1) as f32;
                Some(surface.add(position, AnnotationObject::Signature { image, width, height }))
            }
            ToolState::Text(input) => {
                if input.text.trim().is_empty() {
                    return Ok(None);
                }
                let object = AnnotationObject::Text {
                    text: std::mem::take(&mut input.text),
                    font: input.font,
                    size: input.size,
                    color: input.color,
                };
                Some(surface.add(position, object))
            }
            ToolState::Highlight(input) => {
                if input.points.is_empty() {
                    return Ok(None);
                }
                let points = std::mem::take(&mut input.points);
                let origin = Position::new(
                    points.iter().map(|p| p.x).fold(f32::INFINITY, f32::min),
                    points.iter().map(|p| p.y).fold(f32::INFINITY, f32::min),
                );
                let relative = points
                    .iter()
                    .map(|p| Position::new(p.x - origin.x, p.y - origin.y))
                    .collect();
                let object = AnnotationObject::Highlight {
                    points: relative,
                    color: input.color,
                    width: input.width,
                    opacity: input.opacity,
                };
                Some(surface.add(origin, object))
            }
            ToolState::Form(input) => {
                let Some(field) = input.selected.and_then(|i| input.fields.get(i)).cloned() else {
                    return Ok(None);
                };
                let (width, height) = FormInput::shape_size(field.field_type);
                Some(surface.add(position, AnnotationObject::FormField { field, width, height }))
            }
            ToolState::Compress(_) => None,
        };
        Ok(placed)
    }
}
