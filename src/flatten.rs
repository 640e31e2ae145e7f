//! Flattening an annotated page into the PDF as a raster overlay.

use crate::error::{EditorError, Result};
use crate::render::{self, Bitmap};
use crate::streams::{self, page_media_box, page_resources, resolve, resolve_dict};
use crate::surface::{AnnotationSurface, ImageEncoding};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// How the overlay image is stored in the PDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayEncoding {
    /// Lossless DeviceRGB, FlateDecode.
    #[default]
    Flate,
    /// DCTDecode at the given quality (1-100).
    Jpeg { quality: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    /// Flate-compress every uncompressed stream before writing.
    pub compress_streams: bool,
    pub overlay: OverlayEncoding,
}

impl SaveOptions {
    /// Regular save: quality over size.
    pub fn for_save() -> Self {
        SaveOptions {
            compress_streams: false,
            overlay: OverlayEncoding::Flate,
        }
    }

    pub fn for_compress() -> Self {
        SaveOptions {
            compress_streams: true,
            overlay: OverlayEncoding::Flate,
        }
    }

    pub fn with_overlay(mut self, overlay: OverlayEncoding) -> Self {
        self.overlay = overlay;
        self
    }
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self::for_save()
    }
}

/// Look up the object id of a 1-based page.
pub(crate) fn page_id(doc: &Document, page: u32) -> Result<ObjectId> {
    let pages = doc.get_pages();
    pages.get(&page).copied().ok_or(EditorError::PageIndex {
        page,
        total: pages.len() as u32,
    })
}

/// Rasterize `page` of the editable model at `multiplier` pixels per point.
pub(crate) fn page_bitmap(editable: &Document, page: u32, multiplier: f32) -> Result<Bitmap> {
    render::rasterize(editable, page, multiplier, 1.0).map_err(|e| EditorError::Save(e.to_string()))
}

/// Render `page` afresh, compose `surface` over it and flatten the result.
///
/// The page index is validated before anything is rendered. The surface's
/// display background is not used.
pub fn save_page(
    editable: &Document,
    surface: &AnnotationSurface,
    page: u32,
    multiplier: f32,
    options: &SaveOptions,
) -> Result<Vec<u8>> {
    page_id(editable, page)?;
    let bitmap = page_bitmap(editable, page, multiplier)?;
    let overlay = surface
        .serialize_over(&bitmap, multiplier, ImageEncoding::Png)
        .map_err(|e| EditorError::Save(e.to_string()))?;
    flatten_overlay(editable, &overlay, page, options)
}

/// Embed `overlay` (PNG or JPEG bytes) over the full media box of `page`.
///
/// Works on a clone of `editable`; the source document is never modified.
pub fn flatten_overlay(
    editable: &Document,
    overlay: &[u8],
    page: u32,
    options: &SaveOptions,
) -> Result<Vec<u8>> {
    let page_id = page_id(editable, page)?;

    let image = image::load_from_memory(overlay)
        .map_err(|e| EditorError::Save(format!("overlay image could not be decoded: {}", e)))?
        .to_rgba8();

    let mut doc = editable.clone();

    let mut image_stream = match options.overlay {
        OverlayEncoding::Flate => streams::flate_rgb_stream(&image),
        OverlayEncoding::Jpeg { quality } => {
            streams::jpeg_rgb_stream(&image, quality.clamp(1, 100))
        }
    }
    .map_err(EditorError::Save)?;

    if streams::has_alpha(&image) {
        let smask = match options.overlay {
            OverlayEncoding::Flate => streams::flate_smask_stream(&image),
            OverlayEncoding::Jpeg { quality } => {
                streams::jpeg_smask_stream(&image, quality.clamp(1, 100))
            }
        }
        .map_err(EditorError::Save)?;
        let smask_id = doc.add_object(smask);
        image_stream.dict.set("SMask", Object::Reference(smask_id));
    }
    let image_id = doc.add_object(image_stream);

    // Inherited resources are copied onto the page so the new name can be added
    let mut resources = page_resources(&doc, page_id);
    let mut xobjects = resources
        .get(b"XObject")
        .ok()
        .and_then(|o| resolve_dict(&doc, o))
        .cloned()
        .unwrap_or_else(Dictionary::new);
    let name = unused_name(&xobjects, "Overlay");
    xobjects.set(name.clone(), Object::Reference(image_id));
    resources.set("XObject", Object::Dictionary(xobjects));

    let existing = existing_contents(&doc, page_id);
    let [x0, y0, x1, y1] = page_media_box(&doc, page_id);

    let save_id = add_content(&mut doc, vec![Operation::new("q", vec![])])?;
    let restore_id = add_content(&mut doc, vec![Operation::new("Q", vec![])])?;
    let overlay_id = add_content(
        &mut doc,
        vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Real(x1 - x0),
                    0.into(),
                    0.into(),
                    Object::Real(y1 - y0),
                    Object::Real(x0),
                    Object::Real(y0),
                ],
            ),
            Operation::new("Do", vec![Object::Name(name.as_bytes().to_vec())]),
            Operation::new("Q", vec![]),
        ],
    )?;

    let mut contents = Vec::with_capacity(existing.len() + 3);
    contents.push(Object::Reference(save_id));
    contents.extend(existing);
    contents.push(Object::Reference(restore_id));
    contents.push(Object::Reference(overlay_id));

    let page_dict = doc
        .get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .map_err(|e| EditorError::Save(e.to_string()))?;
    page_dict.set("Resources", Object::Dictionary(resources));
    page_dict.set("Contents", Object::Array(contents));

    if options.compress_streams {
        doc.compress();
    }

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| EditorError::Save(e.to_string()))?;

    info!(
        page,
        overlay_width = image.width(),
        overlay_height = image.height(),
        size = bytes.len(),
        "flattened overlay"
    );
    Ok(bytes)
}

fn add_content(doc: &mut Document, operations: Vec<Operation>) -> Result<ObjectId> {
    let data = Content { operations }
        .encode()
        .map_err(|e| EditorError::Save(e.to_string()))?;
    Ok(doc.add_object(Stream::new(Dictionary::new(), data)))
}

/// The page's content streams as a list of references.
fn existing_contents(doc: &Document, page_id: ObjectId) -> Vec<Object> {
    let Ok(page) = doc.get_dictionary(page_id) else {
        return Vec::new();
    };
    match page.get(b"Contents") {
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(items)) => items.clone(),
            Ok(_) => vec![Object::Reference(*id)],
            Err(_) => Vec::new(),
        },
        Ok(Object::Array(items)) => items
            .iter()
            .filter(|item| resolve(doc, item).is_some())
            .cloned()
            .collect(),
        Ok(_) => {
            debug!("ignoring direct /Contents object");
            Vec::new()
        }
        Err(_) => Vec::new(),
    }
}

fn unused_name(dict: &Dictionary, prefix: &str) -> String {
    let mut index = 0;
    loop {
        let candidate = format!("{}{}", prefix, index);
        if !dict.has(candidate.as_bytes()) {
            return candidate;
        }
        index += 1;
    }
}
