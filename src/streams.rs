//! Low-level helpers for PDF objects and image streams.
//!
//! Shared by the rasterizer (decoding content and image streams) and the
//! flatten pipeline (encoding the overlay as an image XObject).

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use image::{DynamicImage, ImageFormat, RgbImage, RgbaImage};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::io::{Read, Write};

/// Default page size (US Letter) when a page has no usable `/MediaBox`.
pub const DEFAULT_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

/// Inheritable page attributes are looked up at most this many levels up.
const MAX_TREE_DEPTH: usize = 32;

/// Read a numeric operand or dictionary value.
pub(crate) fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(n) => Some(*n as f32),
        Object::Real(n) => Some(*n),
        _ => None,
    }
}

pub(crate) fn integer(obj: &Object) -> Option<i64> {
    match obj {
        Object::Integer(n) => Some(*n),
        Object::Real(n) => Some(*n as i64),
        _ => None,
    }
}

pub(crate) fn name_of(obj: &Object) -> Option<String> {
    match obj {
        Object::Name(n) => Some(String::from_utf8_lossy(n).to_string()),
        _ => None,
    }
}

/// Decode a PDF text string (UTF-16BE with BOM, otherwise byte-per-char).
pub(crate) fn text_string(obj: &Object) -> Option<String> {
    let bytes = match obj {
        Object::String(bytes, _) => bytes,
        Object::Name(n) => return Some(String::from_utf8_lossy(n).to_string()),
        _ => return None,
    };
    if bytes.starts_with(&[0xFE, 0xFF]) {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        Some(String::from_utf16_lossy(&units))
    } else {
        Some(bytes.iter().map(|&b| b as char).collect())
    }
}

/// Follow a reference to the object it points at.
pub(crate) fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        _ => Some(obj),
    }
}

pub(crate) fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match resolve(doc, obj)? {
        Object::Dictionary(d) => Some(d),
        Object::Stream(s) => Some(&s.dict),
        _ => None,
    }
}

/// Look up a page attribute, walking `/Parent` for inheritable keys.
pub(crate) fn inherited_attribute<'a>(
    doc: &'a Document,
    page_id: ObjectId,
    key: &[u8],
) -> Option<&'a Object> {
    let mut current = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = current.get(key) {
            return Some(value);
        }
        current = match current.get(b"Parent") {
            Ok(Object::Reference(parent_id)) => doc.get_dictionary(*parent_id).ok()?,
            _ => return None,
        };
    }
    None
}

/// The page's `/MediaBox` as `[x0, y0, x1, y1]`, normalized so x0 < x1, y0 < y1.
pub(crate) fn page_media_box(doc: &Document, page_id: ObjectId) -> [f32; 4] {
    let values = inherited_attribute(doc, page_id, b"MediaBox")
        .and_then(|obj| resolve(doc, obj))
        .and_then(|obj| match obj {
            Object::Array(arr) if arr.len() == 4 => {
                let nums: Vec<f32> = arr.iter().filter_map(number).collect();
                (nums.len() == 4).then_some(nums)
            }
            _ => None,
        });

    match values {
        Some(v) => {
            let (x0, x1) = (v[0].min(v[2]), v[0].max(v[2]));
            let (y0, y1) = (v[1].min(v[3]), v[1].max(v[3]));
            if x1 - x0 > 0.0 && y1 - y0 > 0.0 {
                [x0, y0, x1, y1]
            } else {
                DEFAULT_MEDIA_BOX
            }
        }
        None => DEFAULT_MEDIA_BOX,
    }
}

/// Resolved copy of the page's effective `/Resources` (possibly inherited).
pub(crate) fn page_resources(doc: &Document, page_id: ObjectId) -> Dictionary {
    inherited_attribute(doc, page_id, b"Resources")
        .and_then(|obj| resolve_dict(doc, obj))
        .cloned()
        .unwrap_or_else(Dictionary::new)
}

/// Look up `/Category /Name` in a resource dictionary, resolving references.
pub(crate) fn resource_entry<'a>(
    doc: &'a Document,
    resources: &'a Dictionary,
    category: &[u8],
    name: &[u8],
) -> Option<&'a Object> {
    let group = resolve_dict(doc, resources.get(category).ok()?)?;
    resolve(doc, group.get(name).ok()?)
}

/// Filter names of a stream, in application order.
pub(crate) fn filter_names(dict: &Dictionary) -> Vec<String> {
    match dict.get(b"Filter") {
        Ok(Object::Name(n)) => vec![String::from_utf8_lossy(n).to_string()],
        Ok(Object::Array(arr)) => arr.iter().filter_map(name_of).collect(),
        _ => Vec::new(),
    }
}

/// Decompress a stream's content. Unknown filters leave the data as-is.
pub(crate) fn decompress_stream(stream: &Stream) -> Vec<u8> {
    let mut data = stream.content.clone();

    for filter_name in filter_names(&stream.dict) {
        match filter_name.as_str() {
            "FlateDecode" => {
                let mut decoder = ZlibDecoder::new(&data[..]);
                let mut decoded = Vec::new();
                if decoder.read_to_end(&mut decoded).is_ok() {
                    data = decoded;
                } else {
                    return stream.content.clone();
                }
            }
            _ => return data,
        }
    }

    data
}

/// Content bytes from a `/Contents` entry (a stream, a reference, or an array of them).
pub(crate) fn content_data(doc: &Document, contents: &Object) -> Vec<u8> {
    match contents {
        Object::Reference(id) => match doc.get_object(*id) {
            Ok(obj) => content_data(doc, obj),
            Err(_) => Vec::new(),
        },
        Object::Stream(stream) => decompress_stream(stream),
        Object::Array(arr) => {
            let mut combined = Vec::new();
            for item in arr {
                combined.extend(content_data(doc, item));
                combined.push(b'\n');
            }
            combined
        }
        _ => Vec::new(),
    }
}

fn flate_decode(content: &[u8]) -> Result<Vec<u8>, String> {
    let mut decoder = ZlibDecoder::new(content);
    let mut decoded = Vec::new();
    decoder
        .read_to_end(&mut decoded)
        .map_err(|e| e.to_string())?;
    Ok(decoded)
}

fn flate_encode(data: &[u8]) -> Result<Vec<u8>, String> {
    let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| format!("Failed to compress image data: {}", e))?;
    encoder
        .finish()
        .map_err(|e| format!("Failed to finish compression: {}", e))
}

/// Get color space name from PDF object
pub(crate) fn color_space_name(obj: &Object, doc: &Document) -> String {
    match obj {
        Object::Name(name) => String::from_utf8_lossy(name).to_string(),
        Object::Array(arr) => {
            if let Some(Object::Name(name)) = arr.first() {
                String::from_utf8_lossy(name).to_string()
            } else {
                "Unknown".to_string()
            }
        }
        Object::Reference(id) => {
            if let Ok(resolved) = doc.get_object(*id) {
                color_space_name(resolved, doc)
            } else {
                "Unknown".to_string()
            }
        }
        _ => "Unknown".to_string(),
    }
}

/// Largest image XObject decoded for painting.
const MAX_IMAGE_PIXELS: u64 = 100_000_000;

/// `width × height` without overflow, refusing images over the decode limit.
fn pixel_count(width: u32, height: u32) -> Result<usize, String> {
    let pixels = width as u64 * height as u64;
    if pixels > MAX_IMAGE_PIXELS {
        return Err(format!("Image of {}x{} pixels exceeds the decode limit", width, height));
    }
    usize::try_from(pixels)
        .map_err(|_| format!("Image of {}x{} pixels is too large", width, height))
}

fn jpeg_dimension(value: u32) -> Result<u16, String> {
    u16::try_from(value).map_err(|_| format!("JPEG dimension {} exceeds 65535", value))
}

/// Decode an SMask stream (grayscale alpha channel)
fn decode_smask_stream(stream: &Stream, width: u32, height: u32) -> Result<Vec<u8>, String> {
    let filters = filter_names(&stream.dict);
    let decoded_data = match filters.first().map(String::as_str) {
        Some("FlateDecode") => flate_decode(&stream.content)?,
        Some("DCTDecode") => {
            image::load_from_memory_with_format(&stream.content, ImageFormat::Jpeg)
                .map_err(|e| format!("Failed to decode JPEG SMask: {}", e))?
                .to_luma8()
                .into_raw()
        }
        None => stream.content.clone(),
        Some(other) => return Err(format!("Unsupported SMask filter: {}", other)),
    };

    let expected_size = pixel_count(width, height)?;
    if decoded_data.len() >= expected_size {
        Ok(decoded_data[..expected_size].to_vec())
    } else {
        Err(format!(
            "SMask data size mismatch: got {} expected {}",
            decoded_data.len(),
            expected_size
        ))
    }
}

/// Decode a PDF image stream into raw pixel data
fn decode_image_stream(
    stream: &Stream,
    width: u32,
    height: u32,
    color_space: &str,
    bits_per_component: u32,
) -> Result<DynamicImage, String> {
    let content = &stream.content;
    let filters = filter_names(&stream.dict);

    let decoded_data = match filters.first().map(String::as_str) {
        Some("FlateDecode") => flate_decode(content)?,
        Some("DCTDecode") => {
            return image::load_from_memory_with_format(content, ImageFormat::Jpeg)
                .map_err(|e| format!("Failed to decode JPEG image: {}", e));
        }
        None => content.clone(),
        Some(other) => return Err(format!("Unsupported filter: {}", other)),
    };

    if bits_per_component != 8 {
        return Err(format!(
            "Unsupported bits per component: {}",
            bits_per_component
        ));
    }

    let pixels = pixel_count(width, height)?;
    match color_space {
        "DeviceRGB" | "RGB" | "CalRGB" => {
            if decoded_data.len() < pixels * 3 {
                return Err(format!(
                    "RGB data size mismatch: got {} expected {}",
                    decoded_data.len(),
                    pixels * 3
                ));
            }
            let img = RgbImage::from_raw(width, height, decoded_data[..pixels * 3].to_vec())
                .ok_or("Failed to create RGB image from raw data")?;
            Ok(DynamicImage::ImageRgb8(img))
        }
        "DeviceGray" | "Gray" | "CalGray" => {
            if decoded_data.len() < pixels {
                return Err(format!(
                    "Gray data size mismatch: got {} expected {}",
                    decoded_data.len(),
                    pixels
                ));
            }
            let img = image::GrayImage::from_raw(width, height, decoded_data[..pixels].to_vec())
                .ok_or("Failed to create grayscale image from raw data")?;
            Ok(DynamicImage::ImageLuma8(img))
        }
        "DeviceCMYK" | "CMYK" => {
            if decoded_data.len() < pixels * 4 {
                return Err(format!(
                    "CMYK data size mismatch: got {} expected {}",
                    decoded_data.len(),
                    pixels * 4
                ));
            }
            let mut rgb_data = Vec::with_capacity(pixels * 3);
            for chunk in decoded_data[..pixels * 4].chunks(4) {
                let [r, g, b] = cmyk_to_rgb(
                    chunk[0] as f32 / 255.0,
                    chunk[1] as f32 / 255.0,
                    chunk[2] as f32 / 255.0,
                    chunk[3] as f32 / 255.0,
                );
                rgb_data.extend_from_slice(&[r, g, b]);
            }
            let img = RgbImage::from_raw(width, height, rgb_data)
                .ok_or("Failed to create RGB image from CMYK data")?;
            Ok(DynamicImage::ImageRgb8(img))
        }
        "ICCBased" => {
            // Guess the component count from the data size
            if decoded_data.len() >= pixels * 3 {
                let img = RgbImage::from_raw(width, height, decoded_data[..pixels * 3].to_vec())
                    .ok_or("Failed to create RGB image from ICCBased data")?;
                Ok(DynamicImage::ImageRgb8(img))
            } else if decoded_data.len() >= pixels {
                let img =
                    image::GrayImage::from_raw(width, height, decoded_data[..pixels].to_vec())
                        .ok_or("Failed to create grayscale image from ICCBased data")?;
                Ok(DynamicImage::ImageLuma8(img))
            } else {
                Err("Could not determine ICCBased color space format".to_string())
            }
        }
        _ => Err(format!("Unsupported color space: {}", color_space)),
    }
}

pub(crate) fn cmyk_to_rgb(c: f32, m: f32, y: f32, k: f32) -> [u8; 3] {
    [
        ((1.0 - c) * (1.0 - k) * 255.0) as u8,
        ((1.0 - m) * (1.0 - k) * 255.0) as u8,
        ((1.0 - y) * (1.0 - k) * 255.0) as u8,
    ]
}

fn dimension(dict: &Dictionary, key: &[u8]) -> u32 {
    dict.get(key)
        .ok()
        .and_then(integer)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0)
}

/// Decode an image XObject, applying its `/SMask` when present.
pub(crate) fn decode_image_xobject(doc: &Document, stream: &Stream) -> Result<RgbaImage, String> {
    let width = dimension(&stream.dict, b"Width");
    let height = dimension(&stream.dict, b"Height");
    if width == 0 || height == 0 {
        return Err("Invalid image dimensions".to_string());
    }
    pixel_count(width, height)?;

    let color_space = stream
        .dict
        .get(b"ColorSpace")
        .ok()
        .map(|cs| color_space_name(cs, doc))
        .unwrap_or_else(|| "DeviceRGB".to_string());

    let bits_per_component = stream
        .dict
        .get(b"BitsPerComponent")
        .ok()
        .and_then(integer)
        .unwrap_or(8) as u32;

    let mut rgba = decode_image_stream(stream, width, height, &color_space, bits_per_component)?
        .to_rgba8();

    if let Ok(Object::Reference(smask_id)) = stream.dict.get(b"SMask") {
        if let Ok(Object::Stream(smask_stream)) = doc.get_object(*smask_id) {
            let (w, h) = rgba.dimensions();
            match decode_smask_stream(smask_stream, w, h) {
                Ok(alpha_data) => {
                    for (pixel, alpha) in rgba.pixels_mut().zip(alpha_data.iter()) {
                        pixel.0[3] = *alpha;
                    }
                }
                Err(e) => tracing::debug!("ignoring undecodable SMask: {}", e),
            }
        }
    }

    Ok(rgba)
}

fn image_dict(
    width: u32,
    height: u32,
    color_space: &[u8],
    filter: &[u8],
    length: usize,
) -> Dictionary {
    let mut dict = Dictionary::new();
    dict.set("Type", Object::Name(b"XObject".to_vec()));
    dict.set("Subtype", Object::Name(b"Image".to_vec()));
    dict.set("Width", Object::Integer(width as i64));
    dict.set("Height", Object::Integer(height as i64));
    dict.set("ColorSpace", Object::Name(color_space.to_vec()));
    dict.set("BitsPerComponent", Object::Integer(8));
    dict.set("Filter", Object::Name(filter.to_vec()));
    dict.set("Length", Object::Integer(length as i64));
    dict
}

/// Encode the RGB channels losslessly as a FlateDecode image stream.
pub(crate) fn flate_rgb_stream(img: &RgbaImage) -> Result<Stream, String> {
    let (width, height) = img.dimensions();
    let mut rgb_data = Vec::with_capacity(width as usize * height as usize * 3);
    for chunk in img.as_raw().chunks(4) {
        rgb_data.extend_from_slice(&chunk[..3]);
    }
    let compressed = flate_encode(&rgb_data)?;
    let dict = image_dict(width, height, b"DeviceRGB", b"FlateDecode", compressed.len());
    Ok(Stream::new(dict, compressed))
}

/// Encode the RGB channels as a JPEG (DCTDecode) image stream.
pub(crate) fn jpeg_rgb_stream(img: &RgbaImage, quality: u8) -> Result<Stream, String> {
    let rgb = DynamicImage::ImageRgba8(img.clone()).to_rgb8();
    let (width, height) = rgb.dimensions();
    let (w16, h16) = (jpeg_dimension(width)?, jpeg_dimension(height)?);

    let mut jpeg_bytes = Vec::new();
    let mut encoder = jpeg_encoder::Encoder::new(&mut jpeg_bytes, quality);
    encoder.set_sampling_factor(jpeg_encoder::SamplingFactor::R_4_2_0);
    encoder
        .encode(
            rgb.as_raw(),
            w16,
            h16,
            jpeg_encoder::ColorType::Rgb,
        )
        .map_err(|e| format!("Failed to encode JPEG: {}", e))?;

    let dict = image_dict(width, height, b"DeviceRGB", b"DCTDecode", jpeg_bytes.len());
    Ok(Stream::new(dict, jpeg_bytes))
}

fn alpha_channel(img: &RgbaImage) -> Vec<u8> {
    img.as_raw().chunks(4).map(|chunk| chunk[3]).collect()
}

/// Encode the alpha channel as a FlateDecode soft mask.
pub(crate) fn flate_smask_stream(img: &RgbaImage) -> Result<Stream, String> {
    let (width, height) = img.dimensions();
    let compressed = flate_encode(&alpha_channel(img))?;
    let dict = image_dict(width, height, b"DeviceGray", b"FlateDecode", compressed.len());
    Ok(Stream::new(dict, compressed))
}

/// Encode the alpha channel as a JPEG soft mask.
pub(crate) fn jpeg_smask_stream(img: &RgbaImage, quality: u8) -> Result<Stream, String> {
    let (width, height) = img.dimensions();
    let (w16, h16) = (jpeg_dimension(width)?, jpeg_dimension(height)?);
    let mut jpeg_bytes = Vec::new();
    let encoder = jpeg_encoder::Encoder::new(&mut jpeg_bytes, quality);
    encoder
        .encode(
            &alpha_channel(img),
            w16,
            h16,
            jpeg_encoder::ColorType::Luma,
        )
        .map_err(|e| format!("Failed to encode SMask as JPEG: {}", e))?;

    let dict = image_dict(width, height, b"DeviceGray", b"DCTDecode", jpeg_bytes.len());
    Ok(Stream::new(dict, jpeg_bytes))
}

/// Check if an image has meaningful alpha
pub(crate) fn has_alpha(img: &RgbaImage) -> bool {
    img.pixels().any(|p| p.0[3] < 255)
}
