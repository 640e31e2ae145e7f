//! The annotation surface: placed objects layered over a page bitmap.
//!
//! Coordinates are PDF points with the origin at the top-left of the page,
//! so a surface is `page width × page height` units regardless of zoom or
//! DPI. [`AnnotationSurface::compose`] renders the scene at any multiplier.

use crate::error::{EditorError, Result};
use crate::fonts::FontFamily;
use crate::forms::{FieldType, FormFieldDescriptor};
use crate::raster::{self, MAX_PIXELS, TRANSPARENT, WHITE};
use crate::render::{Bitmap, PageSize};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use tracing::debug;

/// Line height of text objects, relative to the font size.
pub const TEXT_LINE_HEIGHT: f32 = 1.16;

const FIELD_BORDER: Rgba<u8> = Rgba([156, 163, 175, 255]);
const FIELD_PLACEHOLDER: Rgba<u8> = Rgba([107, 114, 128, 255]);
const FIELD_PADDING: f32 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AnnotationId(pub u64);

impl fmt::Display for AnnotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Position { x, y }
    }
}

/// Something a tool can place on the surface.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationObject {
    Signature {
        image: RgbaImage,
        width: f32,
        height: f32,
    },
    Text {
        text: String,
        font: FontFamily,
        size: f32,
        color: Rgba<u8>,
    },
    /// Free-hand stroke; points are relative to the object's position.
    Highlight {
        points: Vec<Position>,
        color: Rgba<u8>,
        width: f32,
        opacity: f32,
    },
    FormField {
        field: FormFieldDescriptor,
        width: f32,
        height: f32,
    },
}

impl AnnotationObject {
    pub fn kind(&self) -> &'static str {
        match self {
            AnnotationObject::Signature { .. } => "signature",
            AnnotationObject::Text { .. } => "text",
            AnnotationObject::Highlight { .. } => "highlight",
            AnnotationObject::FormField { .. } => "form-field",
        }
    }

    /// Extent `(width, height)` in surface units, measured from the position.
    pub fn extent(&self) -> (f32, f32) {
        match self {
            AnnotationObject::Signature { width, height, .. }
            | AnnotationObject::FormField { width, height, .. } => (*width, *height),
            AnnotationObject::Text { text, font, size, .. } => {
                let lines: Vec<&str> = text.split('\n').collect();
                let widest = match font.font() {
                    Ok(face) => lines
                        .iter()
                        .map(|line| raster::text_width(&face, *size, line))
                        .fold(0.0, f32::max),
                    Err(_) => 0.0,
                };
                (widest, lines.len() as f32 * size * TEXT_LINE_HEIGHT)
            }
            AnnotationObject::Highlight { points, width, .. } => {
                let max_x = points.iter().map(|p| p.x).fold(0.0, f32::max);
                let max_y = points.iter().map(|p| p.y).fold(0.0, f32::max);
                (max_x + width / 2.0, max_y + width / 2.0)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedObject {
    pub id: AnnotationId,
    pub position: Position,
    pub object: AnnotationObject,
}

impl PlacedObject {
    /// `(x, y, width, height)` in surface units.
    pub fn bounds(&self) -> (f32, f32, f32, f32) {
        let (w, h) = self.object.extent();
        (self.position.x, self.position.y, w, h)
    }
}

/// Change notifications published on every surface mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    Added(AnnotationId),
    Removed(AnnotationId),
    Modified(AnnotationId),
    Cleared,
    Restored,
    BackgroundChanged,
}

impl SurfaceEvent {
    /// True for user edits; background swaps and per-page stashing are not edits.
    pub fn is_edit(&self) -> bool {
        matches!(
            self,
            SurfaceEvent::Added(_) | SurfaceEvent::Removed(_) | SurfaceEvent::Modified(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn Fn(&SurfaceEvent) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageEncoding {
    Png,
    Jpeg { quality: u8 },
}

/// Ordered drawable objects over at most one background bitmap.
#[derive(Default)]
pub struct AnnotationSurface {
    background: Option<Bitmap>,
    size: Option<PageSize>,
    objects: Vec<PlacedObject>,
    next_id: u64,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: u64,
}

impl fmt::Debug for AnnotationSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnotationSurface")
            .field("size", &self.size)
            .field("objects", &self.objects.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl AnnotationSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: Fn(&SurfaceEvent) + Send + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(sub, _)| *sub != id);
        self.listeners.len() != before
    }

    fn emit(&self, event: SurfaceEvent) {
        for (_, listener) in &self.listeners {
            listener(&event);
        }
    }

    /// Replace the background; the surface takes the bitmap's page size.
    pub fn set_background(&mut self, bitmap: Bitmap) {
        self.size = Some(bitmap.page_size);
        self.background = Some(bitmap);
        self.emit(SurfaceEvent::BackgroundChanged);
    }

    pub fn background(&self) -> Option<&Bitmap> {
        self.background.as_ref()
    }

    /// Surface size in points; zero before any background is set.
    pub fn dimensions(&self) -> (f32, f32) {
        self.size.map(|s| (s.width, s.height)).unwrap_or((0.0, 0.0))
    }

    pub fn add(&mut self, position: Position, object: AnnotationObject) -> AnnotationId {
        let id = AnnotationId(self.next_id);
        self.next_id += 1;
        debug!(%id, kind = object.kind(), x = position.x, y = position.y, "object added");
        self.objects.push(PlacedObject {
            id,
            position,
            object,
        });
        self.emit(SurfaceEvent::Added(id));
        id
    }

    /// Remove an object; unknown ids are a no-op.
    pub fn remove(&mut self, id: AnnotationId) -> Option<PlacedObject> {
        let index = self.objects.iter().position(|o| o.id == id)?;
        let removed = self.objects.remove(index);
        self.emit(SurfaceEvent::Removed(id));
        Some(removed)
    }

    pub fn move_to(&mut self, id: AnnotationId, position: Position) -> bool {
        match self.objects.iter_mut().find(|o| o.id == id) {
            Some(placed) => {
                placed.position = position;
                self.emit(SurfaceEvent::Modified(id));
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: AnnotationId) -> Option<&PlacedObject> {
        self.objects.iter().find(|o| o.id == id)
    }

    /// Objects in paint order, bottom first.
    pub fn objects(&self) -> &[PlacedObject] {
        &self.objects
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Topmost object whose bounds contain `point`.
    pub fn object_at(&self, point: Position) -> Option<AnnotationId> {
        self.objects.iter().rev().find_map(|placed| {
            let (x, y, w, h) = placed.bounds();
            let hit = point.x >= x && point.x <= x + w && point.y >= y && point.y <= y + h;
            hit.then_some(placed.id)
        })
    }

    /// Move every object out, leaving the surface empty.
    pub fn take_objects(&mut self) -> Vec<PlacedObject> {
        let taken = std::mem::take(&mut self.objects);
        self.emit(SurfaceEvent::Cleared);
        taken
    }

    /// Put back objects previously taken; ids are preserved.
    pub fn restore_objects(&mut self, objects: Vec<PlacedObject>) {
        if let Some(max) = objects.iter().map(|o| o.id.0).max() {
            self.next_id = self.next_id.max(max + 1);
        }
        self.objects = objects;
        self.emit(SurfaceEvent::Restored);
    }

    /// Render background and objects at `multiplier` pixels per point.
    pub fn compose(&self, multiplier: f32) -> Result<RgbaImage> {
        self.compose_layers(self.background.as_ref(), self.dimensions(), multiplier)
    }

    /// Render the objects over `page` instead of the display background.
    ///
    /// The result is sized to `page.page_size × multiplier`.
    pub fn compose_over(&self, page: &Bitmap, multiplier: f32) -> Result<RgbaImage> {
        let size = (page.page_size.width, page.page_size.height);
        self.compose_layers(Some(page), size, multiplier)
    }

    fn compose_layers(
        &self,
        background: Option<&Bitmap>,
        (w, h): (f32, f32),
        multiplier: f32,
    ) -> Result<RgbaImage> {
        let m = if multiplier.is_finite() && multiplier > 0.0 {
            multiplier
        } else {
            1.0
        };
        let pw = (w * m).round();
        let ph = (h * m).round();
        if !(pw >= 1.0 && ph >= 1.0) {
            return Ok(RgbaImage::from_pixel(1, 1, TRANSPARENT));
        }
        if pw as f64 * ph as f64 > MAX_PIXELS as f64 {
            return Err(EditorError::InvalidImage(format!(
                "{}x{} pixels exceeds the composition limit",
                pw, ph
            )));
        }
        let (pw, ph) = (pw as u32, ph as u32);

        let mut canvas = match background {
            Some(bg) if bg.pixels.dimensions() == (pw, ph) => bg.pixels.clone(),
            Some(bg) => imageops::resize(&bg.pixels, pw, ph, FilterType::Triangle),
            None => RgbaImage::from_pixel(pw, ph, TRANSPARENT),
        };

        for placed in &self.objects {
            paint_object(&mut canvas, placed, m);
        }
        Ok(canvas)
    }

    /// Compose at `multiplier` and encode.
    pub fn serialize_to_image(&self, multiplier: f32, encoding: ImageEncoding) -> Result<Vec<u8>> {
        encode(&self.compose(multiplier)?, encoding)
    }

    /// Compose over `page` at `multiplier` and encode.
    pub fn serialize_over(
        &self,
        page: &Bitmap,
        multiplier: f32,
        encoding: ImageEncoding,
    ) -> Result<Vec<u8>> {
        encode(&self.compose_over(page, multiplier)?, encoding)
    }
}

fn encode(composed: &RgbaImage, encoding: ImageEncoding) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    match encoding {
        ImageEncoding::Png => composed
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| EditorError::InvalidImage(format!("PNG encoding failed: {}", e)))?,
        ImageEncoding::Jpeg { quality } => {
            let mut flat = RgbaImage::from_pixel(composed.width(), composed.height(), WHITE);
            imageops::overlay(&mut flat, composed, 0, 0);
            let encoder = JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100));
            DynamicImage::ImageRgba8(flat)
                .to_rgb8()
                .write_with_encoder(encoder)
                .map_err(|e| EditorError::InvalidImage(format!("JPEG encoding failed: {}", e)))?;
        }
    }
    Ok(bytes)
}

fn paint_object(canvas: &mut RgbaImage, placed: &PlacedObject, m: f32) {
    let (x, y) = (placed.position.x * m, placed.position.y * m);
    match &placed.object {
        AnnotationObject::Signature { image, width, height } => {
            raster::draw_image(canvas, image, x, y, width * m, height * m, 1.0);
        }
        AnnotationObject::Text {
            text,
            font,
            size,
            color,
        } => {
            let Ok(face) = font.font() else {
                return;
            };
            let px = size * m;
            let ascent = raster::ascent(&face, px);
            for (i, line) in text.split('\n').enumerate() {
                let baseline = y + ascent + i as f32 * px * TEXT_LINE_HEIGHT;
                raster::draw_text(canvas, &face, px, x, baseline, *color, line);
            }
        }
        AnnotationObject::Highlight {
            points,
            color,
            width,
            opacity,
        } => {
            let device: Vec<(f32, f32)> =
                points.iter().map(|p| (x + p.x * m, y + p.y * m)).collect();
            raster::stroke_polyline(canvas, &device, width * m, *color, *opacity);
        }
        AnnotationObject::FormField { field, width, height } => {
            paint_field(canvas, field, x, y, width * m, height * m, m);
        }
    }
}

fn paint_field(
    canvas: &mut RgbaImage,
    field: &FormFieldDescriptor,
    x: f32,
    y: f32,
    w: f32,
    h: f32,
    m: f32,
) {
    let outline = |canvas: &mut RgbaImage, x: f32, y: f32, w: f32, h: f32| {
        let corners = [(x, y), (x + w, y), (x + w, y + h), (x, y + h), (x, y)];
        raster::stroke_polyline(canvas, &corners, m, FIELD_BORDER, 1.0);
    };
    let Ok(face) = FontFamily::Arial.font() else {
        return;
    };
    let px = (h - 2.0 * FIELD_PADDING * m).clamp(1.0, 14.0 * m);
    let baseline = y + (h + raster::ascent(&face, px)) / 2.0 - px * 0.1;

    match field.field_type {
        FieldType::Text | FieldType::Dropdown => {
            let rect = [(x, y), (x + w, y), (x + w, y + h), (x, y + h)];
            raster::fill_polygon(canvas, &rect, WHITE, 1.0);
            outline(canvas, x, y, w, h);
            let (label, color) = if field.value.is_empty() {
                (field.placeholder.as_str(), FIELD_PLACEHOLDER)
            } else {
                (field.value.as_str(), Rgba([0, 0, 0, 255]))
            };
            raster::draw_text(canvas, &face, px, x + FIELD_PADDING * m, baseline, color, label);
            if field.field_type == FieldType::Dropdown {
                let cx = x + w - h / 2.0;
                let cy = y + h / 2.0;
                let s = h / 6.0;
                let arrow = [(cx - s, cy - s / 2.0), (cx + s, cy - s / 2.0), (cx, cy + s / 2.0)];
                raster::fill_polygon(canvas, &arrow, FIELD_PLACEHOLDER, 1.0);
            }
        }
        FieldType::Checkbox | FieldType::Radio => {
            let side = h;
            outline(canvas, x, y, side, side);
            let checked = !field.value.is_empty() && field.value != "Off";
            if checked {
                let inset = side / 4.0;
                let mark = [
                    (x + inset, y + inset),
                    (x + side - inset, y + inset),
                    (x + side - inset, y + side - inset),
                    (x + inset, y + side - inset),
                ];
                raster::fill_polygon(canvas, &mark, Rgba([0, 0, 0, 255]), 1.0);
            }
            raster::draw_text(
                canvas,
                &face,
                px,
                x + side + FIELD_PADDING * m,
                baseline,
                Rgba([0, 0, 0, 255]),
                &field.name,
            );
        }
    }
}

/// Parse `#RGB` or `#RRGGBB` (the `#` is optional) into an opaque color.
pub fn parse_hex_color(value: &str) -> Option<Rgba<u8>> {
    let hex = value.trim().trim_start_matches('#');
    let channel = |s: &str| u8::from_str_radix(s, 16).ok();
    match hex.len() {
        3 => {
            let mut rgb = [0u8; 3];
            for (i, c) in hex.chars().enumerate() {
                let v = c.to_digit(16)? as u8;
                rgb[i] = v * 17;
            }
            Some(Rgba([rgb[0], rgb[1], rgb[2], 255]))
        }
        6 => Some(Rgba([
            channel(hex.get(0..2)?)?,
            channel(hex.get(2..4)?)?,
            channel(hex.get(4..6)?)?,
            255,
        ])),
        _ => None,
    }
}

/// `#RRGGBB` form of a color.
pub fn to_hex_color(color: Rgba<u8>) -> String {
    format!("#{:02X}{:02X}{:02X}", color.0[0], color.0[1], color.0[2])
}
