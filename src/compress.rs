//! Document compression and its size report.
//!
//! Compression here is structural: unreferenced objects are pruned and
//! uncompressed streams are Flate-encoded. `target_size_kb` and `quality`
//! are validated and reported against, but page images are not resampled.

use crate::error::{EditorError, Result};
use crate::loader::PdfDocument;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompressionSettings {
    pub target_size_kb: u32,
    /// 0.0 to 1.0
    pub quality: f32,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        CompressionSettings {
            target_size_kb: 100,
            quality: 0.9,
        }
    }
}

impl CompressionSettings {
    pub fn validate(&self) -> Result<()> {
        if self.target_size_kb == 0 {
            return Err(EditorError::InvalidSettings(
                "target size must be greater than 0 KB".to_string(),
            ));
        }
        if !(self.quality.is_finite() && (0.0..=1.0).contains(&self.quality)) {
            return Err(EditorError::InvalidSettings(format!(
                "quality must be between 0 and 1, got {}",
                self.quality
            )));
        }
        Ok(())
    }

    pub fn quality_percent(&self) -> u8 {
        (self.quality.clamp(0.0, 1.0) * 100.0).round() as u8
    }
}

/// Sizes before and after compression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionReport {
    pub original_bytes: usize,
    pub compressed_bytes: usize,
    pub original_kb: u64,
    pub compressed_kb: u64,
    /// `round((1 - compressed / original) * 100)`
    pub reduction_percent: i64,
    pub target_met: bool,
}

impl CompressionReport {
    pub fn new(original_bytes: usize, compressed_bytes: usize, target_size_kb: u32) -> Self {
        let reduction_percent = if original_bytes == 0 {
            0
        } else {
            ((1.0 - compressed_bytes as f64 / original_bytes as f64) * 100.0).round() as i64
        };
        let compressed_kb = to_kb(compressed_bytes);
        CompressionReport {
            original_bytes,
            compressed_bytes,
            original_kb: to_kb(original_bytes),
            compressed_kb,
            reduction_percent,
            target_met: compressed_kb <= target_size_kb as u64,
        }
    }
}

fn to_kb(bytes: usize) -> u64 {
    (bytes as f64 / 1024.0).round() as u64
}

/// Selectable target sizes for a document of `original_kb`: at least 10 KB
/// or a tenth of the original, up to the original size.
pub fn target_range_kb(original_kb: u64) -> (u64, u64) {
    let min = 10.max((original_kb as f64 * 0.1).round() as u64);
    (min.min(original_kb.max(1)), original_kb.max(1))
}

/// Compress `document`, never returning something larger than the original.
pub fn compress_document(
    document: &PdfDocument,
    settings: &CompressionSettings,
) -> Result<(Vec<u8>, CompressionReport)> {
    settings.validate()?;

    let mut doc = document.editable().clone();
    doc.prune_objects();
    doc.compress();

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| EditorError::Save(e.to_string()))?;

    let original = document.original_bytes();
    if bytes.len() >= original.len() {
        bytes = original.to_vec();
    }

    let report = CompressionReport::new(original.len(), bytes.len(), settings.target_size_kb);
    info!(
        original_kb = report.original_kb,
        compressed_kb = report.compressed_kb,
        reduction = report.reduction_percent,
        target_kb = settings.target_size_kb,
        "compressed document"
    );
    Ok((bytes, report))
}
