//! Bundled font faces for text objects and PDF text rendering.

use crate::error::{EditorError, Result};
use ab_glyph::FontRef;
use serde::{Deserialize, Serialize};

static SANS: &[u8] = include_bytes!("../assets/fonts/DejaVuSans.ttf");
static SERIF: &[u8] = include_bytes!("../assets/fonts/DejaVuSerif.ttf");
static MONO: &[u8] = include_bytes!("../assets/fonts/DejaVuSansMono.ttf");

/// Font families offered by the text tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FontFamily {
    #[default]
    Arial,
    TimesNewRoman,
    CourierNew,
    Georgia,
    Verdana,
}

impl FontFamily {
    pub const ALL: [FontFamily; 5] = [
        FontFamily::Arial,
        FontFamily::TimesNewRoman,
        FontFamily::CourierNew,
        FontFamily::Georgia,
        FontFamily::Verdana,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            FontFamily::Arial => "Arial",
            FontFamily::TimesNewRoman => "Times New Roman",
            FontFamily::CourierNew => "Courier New",
            FontFamily::Georgia => "Georgia",
            FontFamily::Verdana => "Verdana",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|family| family.label().eq_ignore_ascii_case(label.trim()))
    }

    /// Best match for a PDF `/BaseFont` name such as `Times-Bold` or `ABCDEF+Courier`.
    pub fn from_base_font(base_font: &str) -> Self {
        let lower = base_font.to_ascii_lowercase();
        if lower.contains("courier") || lower.contains("mono") {
            FontFamily::CourierNew
        } else if lower.contains("times") || (lower.contains("serif") && !lower.contains("sans")) {
            FontFamily::TimesNewRoman
        } else if lower.contains("georgia") {
            FontFamily::Georgia
        } else {
            FontFamily::Arial
        }
    }

    fn face_data(&self) -> &'static [u8] {
        match self {
            FontFamily::Arial | FontFamily::Verdana => SANS,
            FontFamily::TimesNewRoman | FontFamily::Georgia => SERIF,
            FontFamily::CourierNew => MONO,
        }
    }

    pub fn font(&self) -> Result<FontRef<'static>> {
        FontRef::try_from_slice(self.face_data())
            .map_err(|e| EditorError::Font(format!("{}: {}", self.label(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_family_loads() {
        for family in FontFamily::ALL {
            assert!(family.font().is_ok(), "{} failed to load", family.label());
        }
    }

    #[test]
    fn labels_round_trip() {
        assert_eq!(
            FontFamily::from_label("times new roman"),
            Some(FontFamily::TimesNewRoman)
        );
        assert_eq!(FontFamily::from_label("Comic Sans"), None);
    }

    #[test]
    fn base_font_names_map_to_faces() {
        assert_eq!(FontFamily::from_base_font("Courier-Bold"), FontFamily::CourierNew);
        assert_eq!(FontFamily::from_base_font("ABCDEF+Times-Roman"), FontFamily::TimesNewRoman);
        assert_eq!(FontFamily::from_base_font("Helvetica"), FontFamily::Arial);
        assert_eq!(FontFamily::from_base_font("DejaVuSans"), FontFamily::Arial);
    }
}
