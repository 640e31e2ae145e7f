//! Rasterization adapter and the built-in page renderer.
//!
//! [`rasterize`] is the only entry point the editor uses; it talks to any
//! [`RenderBackend`]. [`PdfRenderDocument`] is the render-only parse of an
//! uploaded PDF and paints pages by walking their content streams.

use crate::error::{EditorError, Result};
use crate::fonts::FontFamily;
use crate::forms::{page_annotations, PageAnnotation};
use crate::raster::{self, Mask, MAX_PIXELS, WHITE};
use crate::streams::{self, number, resolve_dict, resource_entry};
use ab_glyph::FontRef;
use image::{imageops, ImageFormat, Rgba, RgbaImage};
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use tracing::{debug, warn};

/// Nested Form XObjects deeper than this are not painted.
const MAX_FORM_DEPTH: usize = 16;

/// Line segments used to flatten one Bézier curve.
const CURVE_STEPS: usize = 12;

/// How overlapping subpaths of one fill combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FillRule {
    NonZero,
    EvenOdd,
}

/// Page dimensions in PDF points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

/// Page dimensions in pixels for a given scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
    pub scale: f32,
}

impl Viewport {
    pub fn pixel_width(&self) -> u32 {
        (self.width.round() as u32).max(1)
    }

    pub fn pixel_height(&self) -> u32 {
        (self.height.round() as u32).max(1)
    }
}

/// One page of a render-only document.
pub trait RenderPage {
    /// 1-based page number.
    fn number(&self) -> u32;

    fn size(&self) -> PageSize;

    fn viewport(&self, scale: f32) -> Viewport {
        let size = self.size();
        Viewport {
            width: size.width * scale,
            height: size.height * scale,
            scale,
        }
    }

    /// Paint the page into `target`, which is sized to `viewport`.
    fn render(&self, target: &mut RgbaImage, viewport: &Viewport) -> Result<()>;

    /// Annotations on the page; form widgets have subtype `Widget`.
    fn annotations(&self) -> Vec<PageAnnotation>;
}

/// A document that can be rasterized page by page.
pub trait RenderBackend {
    fn page_count(&self) -> u32;

    fn page(&self, number: u32) -> Result<Box<dyn RenderPage + '_>>;
}

/// A rasterized page.
///
/// `pixels` holds `page_size × scale × dpi_multiplier` pixels; the page is
/// meant to be displayed at `page_size × scale` (see [`Bitmap::display_size`]).
#[derive(Debug, Clone)]
pub struct Bitmap {
    pub pixels: RgbaImage,
    pub page: u32,
    pub scale: f32,
    pub dpi_multiplier: f32,
    pub page_size: PageSize,
}

impl Bitmap {
    pub fn pixel_size(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    /// On-screen size: the pixel size with the DPI multiplier divided back out.
    pub fn display_size(&self) -> (f32, f32) {
        let (w, h) = self.pixels.dimensions();
        (w as f32 / self.dpi_multiplier, h as f32 / self.dpi_multiplier)
    }

    pub fn encode_png(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.pixels
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| EditorError::render(self.page, format!("Failed to encode PNG: {}", e)))?;
        Ok(bytes)
    }
}

/// Rasterize `page` at `scale × dpi_multiplier` pixels per point.
pub fn rasterize<B: RenderBackend + ?Sized>(
    backend: &B,
    page: u32,
    scale: f32,
    dpi_multiplier: f32,
) -> Result<Bitmap> {
    if !(scale.is_finite() && scale > 0.0) {
        return Err(EditorError::render(page, format!("scale must be positive, got {}", scale)));
    }
    if !(dpi_multiplier.is_finite() && dpi_multiplier > 0.0) {
        return Err(EditorError::render(
            page,
            format!("DPI multiplier must be positive, got {}", dpi_multiplier),
        ));
    }

    let handle = backend.page(page)?;
    let viewport = handle.viewport(scale * dpi_multiplier);
    let (width, height) = (viewport.pixel_width(), viewport.pixel_height());
    if width as u64 * height as u64 > MAX_PIXELS {
        return Err(EditorError::render(
            page,
            format!("{}x{} pixels exceeds the rasterization limit", width, height),
        ));
    }

    let mut pixels = RgbaImage::from_pixel(width, height, WHITE);
    handle.render(&mut pixels, &viewport)?;
    debug!(page, scale, dpi_multiplier, width, height, "rasterized page");

    Ok(Bitmap {
        pixels,
        page,
        scale,
        dpi_multiplier,
        page_size: handle.size(),
    })
}

/// Render-only parse of a PDF: rasterization and introspection, never saved.
#[derive(Debug)]
pub struct PdfRenderDocument {
    doc: Document,
    pages: Vec<ObjectId>,
}

impl PdfRenderDocument {
    /// Parse `bytes`, taking ownership of the buffer.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let doc = Document::load_mem(&bytes).map_err(|e| EditorError::Load(e.to_string()))?;
        drop(bytes);
        let pages = doc.get_pages().into_values().collect();
        Ok(PdfRenderDocument { doc, pages })
    }

    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }
}

impl RenderBackend for PdfRenderDocument {
    fn page_count(&self) -> u32 {
        PdfRenderDocument::page_count(self)
    }

    fn page(&self, number: u32) -> Result<Box<dyn RenderPage + '_>> {
        let id = number
            .checked_sub(1)
            .and_then(|index| self.pages.get(index as usize))
            .copied()
            .ok_or_else(|| {
                EditorError::render(
                    number,
                    format!("page index out of range (document has {} pages)", self.pages.len()),
                )
            })?;

        Ok(Box::new(PdfPage::new(&self.doc, id, number)))
    }
}

/// The editable model renders too, so a save can rasterize exactly what it writes.
impl RenderBackend for Document {
    fn page_count(&self) -> u32 {
        self.get_pages().len() as u32
    }

    fn page(&self, number: u32) -> Result<Box<dyn RenderPage + '_>> {
        let pages = self.get_pages();
        let id = pages.get(&number).copied().ok_or_else(|| {
            EditorError::render(
                number,
                format!("page index out of range (document has {} pages)", pages.len()),
            )
        })?;
        Ok(Box::new(PdfPage::new(self, id, number)))
    }
}

struct PdfPage<'a> {
    doc: &'a Document,
    id: ObjectId,
    number: u32,
    media_box: [f32; 4],
}

impl<'a> PdfPage<'a> {
    fn new(doc: &'a Document, id: ObjectId, number: u32) -> Self {
        PdfPage {
            doc,
            id,
            number,
            media_box: streams::page_media_box(doc, id),
        }
    }
}

impl RenderPage for PdfPage<'_> {
    fn number(&self) -> u32 {
        self.number
    }

    fn size(&self) -> PageSize {
        let [x0, y0, x1, y1] = self.media_box;
        PageSize {
            width: x1 - x0,
            height: y1 - y0,
        }
    }

    fn render(&self, target: &mut RgbaImage, viewport: &Viewport) -> Result<()> {
        let s = viewport.scale;
        let [x0, _, _, y1] = self.media_box;
        // PDF user space (origin bottom-left) to device pixels (origin top-left)
        let base = Matrix {
            a: s,
            b: 0.0,
            c: 0.0,
            d: -s,
            e: -x0 * s,
            f: y1 * s,
        };

        let page_dict = self
            .doc
            .get_dictionary(self.id)
            .map_err(|e| EditorError::render(self.number, e.to_string()))?;
        let content = match page_dict.get(b"Contents") {
            Ok(contents) => streams::content_data(self.doc, contents),
            Err(_) => Vec::new(),
        };
        let resources = streams::page_resources(self.doc, self.id);

        let mut painter = PagePainter::new(self.doc, target);
        painter
            .paint(&content, &resources, GraphicsState::new(base))
            .map_err(|reason| EditorError::render(self.number, reason))
    }

    fn annotations(&self) -> Vec<PageAnnotation> {
        page_annotations(self.doc, self.id)
    }
}

/// 2D transformation matrix [a, b, c, d, e, f]
/// Represents: | a b 0 |
///             | c d 0 |
///             | e f 1 |
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Matrix {
    a: f32,
    b: f32,
    c: f32,
    d: f32,
    e: f32,
    f: f32,
}

impl Matrix {
    fn identity() -> Self {
        Matrix {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            e: 0.0,
            f: 0.0,
        }
    }

    fn translate(tx: f32, ty: f32) -> Self {
        Matrix {
            e: tx,
            f: ty,
            ..Matrix::identity()
        }
    }

    fn from_operands(operands: &[Object]) -> Option<Self> {
        if operands.len() < 6 {
            return None;
        }
        Some(Matrix {
            a: number(&operands[0])?,
            b: number(&operands[1])?,
            c: number(&operands[2])?,
            d: number(&operands[3])?,
            e: number(&operands[4])?,
            f: number(&operands[5])?,
        })
    }

    /// Parse a transformation matrix from a dictionary's /Matrix entry
    fn from_dict(dict: &Dictionary) -> Self {
        match dict.get(b"Matrix") {
            Ok(Object::Array(arr)) => Matrix::from_operands(arr).unwrap_or_else(Matrix::identity),
            _ => Matrix::identity(),
        }
    }

    /// Concatenate another matrix: self * other
    fn concat(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    fn scale_x(&self) -> f32 {
        (self.a * self.a + self.b * self.b).sqrt()
    }

    fn scale_y(&self) -> f32 {
        (self.c * self.c + self.d * self.d).sqrt()
    }
}

#[derive(Debug, Clone)]
struct GraphicsState {
    ctm: Matrix,
    fill: Rgba<u8>,
    stroke: Rgba<u8>,
    line_width: f32,
    fill_alpha: f32,
    stroke_alpha: f32,
    font: FontFamily,
    font_size: f32,
    leading: f32,
    text_render_mode: i64,
}

impl GraphicsState {
    fn new(ctm: Matrix) -> Self {
        GraphicsState {
            ctm,
            fill: Rgba([0, 0, 0, 255]),
            stroke: Rgba([0, 0, 0, 255]),
            line_width: 1.0,
            fill_alpha: 1.0,
            stroke_alpha: 1.0,
            font: FontFamily::Arial,
            font_size: 12.0,
            leading: 0.0,
            text_render_mode: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TextState {
    matrix: Matrix,
    line: Matrix,
}

impl Default for TextState {
    fn default() -> Self {
        TextState {
            matrix: Matrix::identity(),
            line: Matrix::identity(),
        }
    }
}

impl TextState {
    fn next_line(&mut self, tx: f32, ty: f32) {
        self.line = Matrix::translate(tx, ty).concat(&self.line);
        self.matrix = self.line;
    }
}

/// Path under construction, already in device space.
#[derive(Default)]
struct PathBuilder {
    subpaths: Vec<Vec<(f32, f32)>>,
    current: (f32, f32),
    start: (f32, f32),
}

impl PathBuilder {
    fn move_to(&mut self, ctm: &Matrix, x: f32, y: f32) {
        self.subpaths.push(vec![ctm.apply(x, y)]);
        self.current = (x, y);
        self.start = (x, y);
    }

    fn line_to(&mut self, ctm: &Matrix, x: f32, y: f32) {
        match self.subpaths.last_mut() {
            Some(subpath) => subpath.push(ctm.apply(x, y)),
            None => return self.move_to(ctm, x, y),
        }
        self.current = (x, y);
    }

    fn curve_to(&mut self, ctm: &Matrix, c1: (f32, f32), c2: (f32, f32), end: (f32, f32)) {
        let p0 = self.current;
        for step in 1..=CURVE_STEPS {
            let t = step as f32 / CURVE_STEPS as f32;
            let u = 1.0 - t;
            let (b0, b1, b2, b3) = (u * u * u, 3.0 * u * u * t, 3.0 * u * t * t, t * t * t);
            let x = b0 * p0.0 + b1 * c1.0 + b2 * c2.0 + b3 * end.0;
            let y = b0 * p0.1 + b1 * c1.1 + b2 * c2.1 + b3 * end.1;
            self.line_to(ctm, x, y);
        }
    }

    fn close(&mut self) {
        if let Some(subpath) = self.subpaths.last_mut() {
            if let (Some(&first), Some(&last)) = (subpath.first(), subpath.last()) {
                if subpath.len() > 1 && first != last {
                    subpath.push(first);
                }
            }
        }
        self.current = self.start;
    }

    fn rect(&mut self, ctm: &Matrix, x: f32, y: f32, w: f32, h: f32) {
        self.move_to(ctm, x, y);
        self.line_to(ctm, x + w, y);
        self.line_to(ctm, x + w, y + h);
        self.line_to(ctm, x, y + h);
        self.close();
    }

    fn take(&mut self) -> Vec<Vec<(f32, f32)>> {
        std::mem::take(&mut self.subpaths)
    }
}

fn color_from(operands: &[Object]) -> Option<Rgba<u8>> {
    let nums: Vec<f32> = operands.iter().filter_map(number).collect();
    let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    match nums.len() {
        1 => {
            let g = channel(nums[0]);
            Some(Rgba([g, g, g, 255]))
        }
        3 => Some(Rgba([channel(nums[0]), channel(nums[1]), channel(nums[2]), 255])),
        4 => {
            let [r, g, b] = streams::cmyk_to_rgb(
                nums[0].clamp(0.0, 1.0),
                nums[1].clamp(0.0, 1.0),
                nums[2].clamp(0.0, 1.0),
                nums[3].clamp(0.0, 1.0),
            );
            Some(Rgba([r, g, b, 255]))
        }
        _ => None,
    }
}

fn with_alpha(color: Rgba<u8>, alpha: f32) -> Rgba<u8> {
    Rgba([color.0[0], color.0[1], color.0[2], (alpha.clamp(0.0, 1.0) * 255.0).round() as u8])
}

fn fill_rule(operator: &str) -> FillRule {
    if operator.ends_with('*') {
        FillRule::EvenOdd
    } else {
        FillRule::NonZero
    }
}

fn name_bytes(obj: Option<&Object>) -> Option<&[u8]> {
    match obj {
        Some(Object::Name(n)) => Some(n.as_slice()),
        _ => None,
    }
}

/// Paints content streams onto a canvas.
///
/// Walks operators the way a graphics-state machine does: `q`/`Q` save and
/// restore state, `cm` concatenates onto the CTM, paths are flattened into
/// device-space polygons and painted through coverage masks.
struct PagePainter<'a> {
    doc: &'a Document,
    canvas: &'a mut RgbaImage,
    forms_in_progress: HashSet<ObjectId>,
    fonts: HashMap<FontFamily, FontRef<'static>>,
}

impl<'a> PagePainter<'a> {
    fn new(doc: &'a Document, canvas: &'a mut RgbaImage) -> Self {
        PagePainter {
            doc,
            canvas,
            forms_in_progress: HashSet::new(),
            fonts: HashMap::new(),
        }
    }

    fn font(&mut self, family: FontFamily) -> Option<FontRef<'static>> {
        if let Some(font) = self.fonts.get(&family) {
            return Some(font.clone());
        }
        match family.font() {
            Ok(font) => {
                self.fonts.insert(family, font.clone());
                Some(font)
            }
            Err(e) => {
                warn!("text skipped: {}", e);
                None
            }
        }
    }

    fn paint(
        &mut self,
        content: &[u8],
        resources: &Dictionary,
        initial: GraphicsState,
    ) -> std::result::Result<(), String> {
        if content.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(());
        }
        let operations = Content::decode(content)
            .map_err(|e| format!("Invalid content stream: {}", e))?
            .operations;

        let mut state = initial;
        let mut saved: Vec<GraphicsState> = Vec::new();
        let mut path = PathBuilder::default();
        let mut text = TextState::default();

        for op in &operations {
            let operands = &op.operands;
            let num = |i: usize| operands.get(i).and_then(number);

            match op.operator.as_str() {
                "q" => saved.push(state.clone()),
                "Q" => {
                    if let Some(previous) = saved.pop() {
                        state = previous;
                    }
                }
                "cm" => {
                    if let Some(m) = Matrix::from_operands(operands) {
                        state.ctm = m.concat(&state.ctm);
                    }
                }
                "w" => {
                    if let Some(w) = num(0) {
                        state.line_width = w.max(0.0);
                    }
                }
                "g" | "rg" | "k" | "sc" | "scn" => {
                    if let Some(color) = color_from(operands) {
                        state.fill = color;
                    }
                }
                "G" | "RG" | "K" | "SC" | "SCN" => {
                    if let Some(color) = color_from(operands) {
                        state.stroke = color;
                    }
                }
                "gs" => {
                    if let Some(name) = name_bytes(operands.first()) {
                        self.apply_ext_gstate(resources, name, &mut state);
                    }
                }

                "m" => {
                    if let (Some(x), Some(y)) = (num(0), num(1)) {
                        path.move_to(&state.ctm, x, y);
                    }
                }
                "l" => {
                    if let (Some(x), Some(y)) = (num(0), num(1)) {
                        path.line_to(&state.ctm, x, y);
                    }
                }
                "c" => {
                    if let (Some(x1), Some(y1), Some(x2), Some(y2), Some(x3), Some(y3)) =
                        (num(0), num(1), num(2), num(3), num(4), num(5))
                    {
                        path.curve_to(&state.ctm, (x1, y1), (x2, y2), (x3, y3));
                    }
                }
                "v" => {
                    let args = (num(0), num(1), num(2), num(3));
                    if let (Some(x2), Some(y2), Some(x3), Some(y3)) = args {
                        let c1 = path.current;
                        path.curve_to(&state.ctm, c1, (x2, y2), (x3, y3));
                    }
                }
                "y" => {
                    let args = (num(0), num(1), num(2), num(3));
                    if let (Some(x1), Some(y1), Some(x3), Some(y3)) = args {
                        path.curve_to(&state.ctm, (x1, y1), (x3, y3), (x3, y3));
                    }
                }
                "h" => path.close(),
                "re" => {
                    if let (Some(x), Some(y), Some(w), Some(h)) = (num(0), num(1), num(2), num(3)) {
                        path.rect(&state.ctm, x, y, w, h);
                    }
                }

                "f" | "F" | "f*" => {
                    let subpaths = path.take();
                    self.fill(&subpaths, &state, fill_rule(&op.operator));
                }
                "S" => {
                    let subpaths = path.take();
                    self.stroke(&subpaths, &state);
                }
                "s" => {
                    path.close();
                    let subpaths = path.take();
                    self.stroke(&subpaths, &state);
                }
                "B" | "B*" => {
                    let subpaths = path.take();
                    self.fill(&subpaths, &state, fill_rule(&op.operator));
                    self.stroke(&subpaths, &state);
                }
                "b" | "b*" => {
                    path.close();
                    let subpaths = path.take();
                    self.fill(&subpaths, &state, fill_rule(&op.operator));
                    self.stroke(&subpaths, &state);
                }
                "n" => {
                    path.take();
                }

                "BT" => text = TextState::default(),
                "Tf" => {
                    if let Some(name) = name_bytes(operands.first()) {
                        state.font = self.font_family(resources, name);
                    }
                    if let Some(size) = num(1) {
                        state.font_size = size;
                    }
                }
                "TL" => {
                    if let Some(leading) = num(0) {
                        state.leading = leading;
                    }
                }
                "Tr" => {
                    if let Some(mode) = operands.first().and_then(streams::integer) {
                        state.text_render_mode = mode;
                    }
                }
                "Td" => {
                    if let (Some(tx), Some(ty)) = (num(0), num(1)) {
                        text.next_line(tx, ty);
                    }
                }
                "TD" => {
                    if let (Some(tx), Some(ty)) = (num(0), num(1)) {
                        state.leading = -ty;
                        text.next_line(tx, ty);
                    }
                }
                "Tm" => {
                    if let Some(m) = Matrix::from_operands(operands) {
                        text.line = m;
                        text.matrix = m;
                    }
                }
                "T*" => text.next_line(0.0, -state.leading),
                "Tj" => {
                    if let Some(Object::String(bytes, _)) = operands.first() {
                        self.show_text(bytes, &state, &mut text);
                    }
                }
                "'" => {
                    text.next_line(0.0, -state.leading);
                    if let Some(Object::String(bytes, _)) = operands.first() {
                        self.show_text(bytes, &state, &mut text);
                    }
                }
                "\"" => {
                    text.next_line(0.0, -state.leading);
                    if let Some(Object::String(bytes, _)) = operands.get(2) {
                        self.show_text(bytes, &state, &mut text);
                    }
                }
                "TJ" => {
                    if let Some(Object::Array(items)) = operands.first() {
                        for item in items {
                            match item {
                                Object::String(bytes, _) => {
                                    self.show_text(bytes, &state, &mut text)
                                }
                                other => {
                                    if let Some(adjust) = number(other) {
                                        let tx = -adjust / 1000.0 * state.font_size;
                                        let shift = Matrix::translate(tx, 0.0);
                                        text.matrix = shift.concat(&text.matrix);
                                    }
                                }
                            }
                        }
                    }
                }

                "Do" => {
                    if let Some(name) = name_bytes(operands.first()) {
                        self.paint_xobject(resources, name, &state);
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn apply_ext_gstate(&self, resources: &Dictionary, name: &[u8], state: &mut GraphicsState) {
        let doc = self.doc;
        let Some(Object::Dictionary(gs)) = resource_entry(doc, resources, b"ExtGState", name) else {
            return;
        };
        if let Some(ca) = gs.get(b"ca").ok().and_then(number) {
            state.fill_alpha = ca.clamp(0.0, 1.0);
        }
        if let Some(ca) = gs.get(b"CA").ok().and_then(number) {
            state.stroke_alpha = ca.clamp(0.0, 1.0);
        }
        if let Some(lw) = gs.get(b"LW").ok().and_then(number) {
            state.line_width = lw.max(0.0);
        }
    }

    fn font_family(&self, resources: &Dictionary, name: &[u8]) -> FontFamily {
        let doc = self.doc;
        resource_entry(doc, resources, b"Font", name)
            .and_then(|font| resolve_dict(doc, font))
            .and_then(|dict| dict.get(b"BaseFont").ok())
            .and_then(streams::name_of)
            .map(|base| FontFamily::from_base_font(&base))
            .unwrap_or_default()
    }

    fn fill(&mut self, subpaths: &[Vec<(f32, f32)>], state: &GraphicsState, rule: FillRule) {
        let all: Vec<(f32, f32)> = subpaths.iter().flatten().copied().collect();
        let Some(bounds) = raster::bounds_of(&all, 1.0) else {
            return;
        };
        if let Some(mut mask) = Mask::covering(self.canvas.dimensions(), bounds) {
            match rule {
                FillRule::NonZero => {
                    for subpath in subpaths.iter().filter(|sp| sp.len() > 1) {
                        mask.fill_polygon(subpath);
                    }
                }
                FillRule::EvenOdd => mask.fill_even_odd(subpaths),
            }
            mask.paint(self.canvas, state.fill, state.fill_alpha);
        }
    }

    fn stroke(&mut self, subpaths: &[Vec<(f32, f32)>], state: &GraphicsState) {
        let width = (state.line_width * (state.ctm.scale_x() + state.ctm.scale_y()) / 2.0)
            .max(1.0)
            .min(2.0 * raster::diagonal(self.canvas.dimensions()));
        let all: Vec<(f32, f32)> = subpaths.iter().flatten().copied().collect();
        let Some(bounds) = raster::bounds_of(&all, width + 1.0) else {
            return;
        };
        if let Some(mut mask) = Mask::covering(self.canvas.dimensions(), bounds) {
            for subpath in subpaths {
                mask.stroke_polyline(subpath, width);
            }
            mask.paint(self.canvas, state.stroke, state.stroke_alpha);
        }
    }

    fn show_text(&mut self, bytes: &[u8], state: &GraphicsState, text: &mut TextState) {
        let line: String = bytes
            .iter()
            .map(|&b| b as char)
            .filter(|c| !c.is_control())
            .collect();
        if line.is_empty() || state.font_size == 0.0 {
            return;
        }

        let trm = text.matrix.concat(&state.ctm);
        let size_px = state.font_size.abs() * trm.scale_y();
        let Some(font) = self.font(state.font) else {
            return;
        };

        let (x, y) = trm.apply(0.0, 0.0);
        let invisible = matches!(state.text_render_mode, 3 | 7);
        let width_px = if invisible || !(0.5..=4096.0).contains(&size_px) {
            raster::text_width(&font, size_px.clamp(0.5, 4096.0), &line)
        } else {
            raster::draw_text(
                self.canvas,
                &font,
                size_px,
                x,
                y,
                with_alpha(state.fill, state.fill_alpha),
                &line,
            )
        };

        let unit = trm.scale_x();
        if unit > f32::EPSILON {
            text.matrix = Matrix::translate(width_px / unit, 0.0).concat(&text.matrix);
        }
    }

    fn paint_xobject(&mut self, resources: &Dictionary, name: &[u8], state: &GraphicsState) {
        let doc = self.doc;
        let Some(group) = resources.get(b"XObject").ok().and_then(|o| resolve_dict(doc, o)) else {
            return;
        };
        let Ok(Object::Reference(id)) = group.get(name) else {
            return;
        };
        let Ok(Object::Stream(stream)) = doc.get_object(*id) else {
            return;
        };

        match stream.dict.get(b"Subtype").ok().and_then(streams::name_of).as_deref() {
            Some("Image") => self.paint_image(stream, state),
            Some("Form") => self.paint_form(*id, stream, resources, state),
            _ => {}
        }
    }

    fn paint_image(&mut self, stream: &Stream, state: &GraphicsState) {
        if matches!(stream.dict.get(b"ImageMask"), Ok(Object::Boolean(true))) {
            debug!("stencil image masks are not painted");
            return;
        }
        let mut image = match streams::decode_image_xobject(self.doc, stream) {
            Ok(image) => image,
            Err(e) => {
                debug!("image XObject skipped: {}", e);
                return;
            }
        };

        let ctm = &state.ctm;
        let corners = [
            ctm.apply(0.0, 0.0),
            ctm.apply(1.0, 0.0),
            ctm.apply(0.0, 1.0),
            ctm.apply(1.0, 1.0),
        ];
        let Some((x0, y0, x1, y1)) = raster::bounds_of(&corners, 0.0) else {
            return;
        };

        // Image space has row 0 at the top (unit y = 1); flip when the CTM mirrors it
        if ctm.d > 0.0 {
            imageops::flip_vertical_in_place(&mut image);
        }
        if ctm.a < 0.0 {
            imageops::flip_horizontal_in_place(&mut image);
        }

        raster::draw_image(self.canvas, &image, x0, y0, x1 - x0, y1 - y0, state.fill_alpha);
    }

    fn paint_form(
        &mut self,
        id: ObjectId,
        stream: &Stream,
        parent_resources: &Dictionary,
        state: &GraphicsState,
    ) {
        if self.forms_in_progress.len() >= MAX_FORM_DEPTH || !self.forms_in_progress.insert(id) {
            return;
        }

        let doc = self.doc;
        let resources = stream
            .dict
            .get(b"Resources")
            .ok()
            .and_then(|o| resolve_dict(doc, o))
            .cloned()
            .unwrap_or_else(|| parent_resources.clone());

        let mut form_state = state.clone();
        form_state.ctm = Matrix::from_dict(&stream.dict).concat(&state.ctm);

        let content = streams::decompress_stream(stream);
        if let Err(e) = self.paint(&content, &resources, form_state) {
            debug!("form XObject {:?} skipped: {}", id, e);
        }

        self.forms_in_progress.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::Operation;

    fn one_page_pdf(width: i64, height: i64, operations: Vec<Operation>) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));
        let page_id = doc.add_object(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(pages_id)),
            (
                "MediaBox",
                Object::Array(vec![0.into(), 0.into(), width.into(), height.into()]),
            ),
            ("Contents", Object::Reference(content_id)),
        ]));
        doc.objects.insert(
            pages_id,
            Object::Dictionary(Dictionary::from_iter(vec![
                ("Type", Object::Name(b"Pages".to_vec())),
                ("Kids", Object::Array(vec![Object::Reference(page_id)])),
                ("Count", Object::Integer(1)),
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

    fn filled_rect_ops() -> Vec<Operation> {
        vec![
            Operation::new("rg", vec![1.into(), 0.into(), 0.into()]),
            Operation::new("re", vec![50.into(), 25.into(), 100.into(), 50.into()]),
            Operation::new("f", vec![]),
        ]
    }

    #[test]
    fn pixel_size_includes_dpi_multiplier() {
        let doc = PdfRenderDocument::from_bytes(one_page_pdf(200, 100, vec![])).unwrap();
        let bitmap = rasterize(&doc, 1, 1.5, 2.0).unwrap();
        assert_eq!(bitmap.pixel_size(), (600, 300));
        assert_eq!(bitmap.display_size(), (300.0, 150.0));
        assert_eq!(bitmap.page_size, PageSize { width: 200.0, height: 100.0 });
    }

    #[test]
    fn filled_rectangle_lands_in_device_space() {
        let doc = PdfRenderDocument::from_bytes(one_page_pdf(200, 100, filled_rect_ops())).unwrap();
        let bitmap = rasterize(&doc, 1, 1.0, 2.0).unwrap();

        // User rect (50,25)-(150,75) maps to device (100,50)-(300,150)
        assert_eq!(bitmap.pixels.get_pixel(200, 100), &Rgba([255, 0, 0, 255]));
        assert_eq!(bitmap.pixels.get_pixel(20, 20), &WHITE);
        assert_eq!(bitmap.pixels.get_pixel(380, 180), &WHITE);
    }

    #[test]
    fn restore_discards_transform() {
        let ops = vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![1.into(), 0.into(), 0.into(), 1.into(), 1000.into(), 0.into()],
            ),
            Operation::new("Q", vec![]),
            Operation::new("re", vec![0.into(), 0.into(), 10.into(), 10.into()]),
            Operation::new("f", vec![]),
        ];
        let doc = PdfRenderDocument::from_bytes(one_page_pdf(100, 100, ops)).unwrap();
        let bitmap = rasterize(&doc, 1, 1.0, 1.0).unwrap();
        assert_eq!(bitmap.pixels.get_pixel(5, 95), &Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn text_operators_paint_glyphs() {
        let ops = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), 24.into()]),
            Operation::new("Td", vec![10.into(), 40.into()]),
            Operation::new("Tj", vec![Object::string_literal("Hello")]),
            Operation::new("ET", vec![]),
        ];
        let doc = PdfRenderDocument::from_bytes(one_page_pdf(200, 100, ops)).unwrap();
        let bitmap = rasterize(&doc, 1, 1.0, 1.0).unwrap();
        let dark = bitmap
            .pixels
            .enumerate_pixels()
            .filter(|(x, y, p)| *x < 120 && *y > 30 && *y < 62 && p.0[0] < 128)
            .count();
        assert!(dark > 20, "expected glyph pixels, found {}", dark);
    }

    #[test]
    fn invalid_page_and_scale_are_render_errors() {
        let doc = PdfRenderDocument::from_bytes(one_page_pdf(100, 100, vec![])).unwrap();
        assert!(matches!(rasterize(&doc, 0, 1.0, 1.0), Err(EditorError::Render { page: 0, .. })));
        assert!(matches!(rasterize(&doc, 2, 1.0, 1.0), Err(EditorError::Render { page: 2, .. })));
        assert!(matches!(rasterize(&doc, 1, 0.0, 1.0), Err(EditorError::Render { .. })));
        assert!(matches!(rasterize(&doc, 1, 1.0, -2.0), Err(EditorError::Render { .. })));
    }

    fn nested_squares(operator: &str) -> Vec<Operation> {
        vec![
            Operation::new("rg", vec![1.into(), 0.into(), 0.into()]),
            Operation::new("re", vec![10.into(), 10.into(), 80.into(), 80.into()]),
            Operation::new("re", vec![30.into(), 30.into(), 40.into(), 40.into()]),
            Operation::new(operator, vec![]),
        ]
    }

    #[test]
    fn star_fill_operators_use_even_odd_rule() {
        let red = Rgba([255, 0, 0, 255]);
        for operator in ["f*", "B*"] {
            let bytes = one_page_pdf(100, 100, nested_squares(operator));
            let doc = PdfRenderDocument::from_bytes(bytes).unwrap();
            let bitmap = rasterize(&doc, 1, 1.0, 1.0).unwrap();
            assert_eq!(bitmap.pixels.get_pixel(50, 50), &WHITE, "{}", operator);
            assert_eq!(bitmap.pixels.get_pixel(20, 50), &red, "{}", operator);
        }

        let bytes = one_page_pdf(100, 100, nested_squares("f"));
        let doc = PdfRenderDocument::from_bytes(bytes).unwrap();
        let bitmap = rasterize(&doc, 1, 1.0, 1.0).unwrap();
        assert_eq!(bitmap.pixels.get_pixel(50, 50), &red);
    }

    #[test]
    fn enormous_line_width_paints_within_the_page() {
        let ops = vec![
            Operation::new("w", vec![Object::Real(1.0e30)]),
            Operation::new("m", vec![50.into(), 50.into()]),
            Operation::new("l", vec![60.into(), 50.into()]),
            Operation::new("S", vec![]),
        ];
        let doc = PdfRenderDocument::from_bytes(one_page_pdf(100, 100, ops)).unwrap();
        let bitmap = rasterize(&doc, 1, 1.0, 1.0).unwrap();
        assert_eq!(bitmap.pixels.get_pixel(0, 0), &Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn oversized_rasterization_is_refused() {
        let doc = PdfRenderDocument::from_bytes(one_page_pdf(1000, 1000, vec![])).unwrap();
        let err = rasterize(&doc, 1, 3.0, 4.0).unwrap_err();
        assert!(err.to_string().contains("exceeds the rasterization limit"), "{}", err);
    }

    #[test]
    fn matrix_concat_applies_left_operand_first() {
        let scale = Matrix { a: 2.0, d: 2.0, ..Matrix::identity() };
        let shift = Matrix::translate(10.0, 0.0);
        // scale then shift
        assert_eq!(scale.concat(&shift).apply(1.0, 1.0), (12.0, 2.0));
        // shift then scale
        assert_eq!(shift.concat(&scale).apply(1.0, 1.0), (22.0, 2.0));
    }
}
