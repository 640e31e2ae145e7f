//! Page annotations and AcroForm field discovery.

use crate::render::RenderBackend;
use crate::streams::{integer, name_of, number, resolve, resolve_dict, text_string};
use lopdf::{Dictionary, Document, Object, ObjectId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

const MAX_FIELD_DEPTH: usize = 16;

const FLAG_REQUIRED: i64 = 1 << 1;
const FLAG_RADIO: i64 = 1 << 15;
const FLAG_PUSHBUTTON: i64 = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Checkbox,
    Radio,
    Dropdown,
}

/// A fillable field offered by the form tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormFieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
    pub value: String,
    pub options: Vec<String>,
    pub required: bool,
    pub placeholder: String,
}

impl FormFieldDescriptor {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        let placeholder = format!("Enter {}", name.to_lowercase());
        FormFieldDescriptor {
            name,
            field_type,
            value: String::new(),
            options: Vec::new(),
            required: false,
            placeholder,
        }
    }
}

/// An entry of a page's `/Annots` array.
#[derive(Debug, Clone, PartialEq)]
pub struct PageAnnotation {
    pub subtype: String,
    /// Normalized `[x0, y0, x1, y1]` in PDF user space.
    pub rect: [f32; 4],
    pub field: Option<FormFieldDescriptor>,
}

impl PageAnnotation {
    pub fn is_widget(&self) -> bool {
        self.subtype == "Widget"
    }
}

pub(crate) fn page_annotations(doc: &Document, page_id: ObjectId) -> Vec<PageAnnotation> {
    let Ok(page) = doc.get_dictionary(page_id) else {
        return Vec::new();
    };
    let Some(Object::Array(annots)) = page.get(b"Annots").ok().and_then(|o| resolve(doc, o)) else {
        return Vec::new();
    };

    annots
        .iter()
        .filter_map(|entry| resolve_dict(doc, entry))
        .map(|dict| {
            let subtype = dict
                .get(b"Subtype")
                .ok()
                .and_then(name_of)
                .unwrap_or_default();
            let field = if subtype == "Widget" {
                widget_field(doc, dict)
            } else {
                None
            };
            PageAnnotation {
                subtype,
                rect: annotation_rect(doc, dict),
                field,
            }
        })
        .collect()
}

fn annotation_rect(doc: &Document, dict: &Dictionary) -> [f32; 4] {
    let values: Vec<f32> = match dict.get(b"Rect").ok().and_then(|o| resolve(doc, o)) {
        Some(Object::Array(arr)) => arr.iter().filter_map(number).collect(),
        _ => Vec::new(),
    };
    if values.len() < 4 {
        return [0.0; 4];
    }
    [
        values[0].min(values[2]),
        values[1].min(values[3]),
        values[0].max(values[2]),
        values[1].max(values[3]),
    ]
}

/// The widget dictionary followed by its `/Parent` chain.
fn field_chain<'a>(doc: &'a Document, widget: &'a Dictionary) -> Vec<&'a Dictionary> {
    let mut chain = vec![widget];
    let mut current = widget;
    while chain.len() < MAX_FIELD_DEPTH {
        match current.get(b"Parent").ok().and_then(|p| resolve_dict(doc, p)) {
            Some(parent) => {
                chain.push(parent);
                current = parent;
            }
            None => break,
        }
    }
    chain
}

fn inherited<'a>(doc: &'a Document, chain: &[&'a Dictionary], key: &[u8]) -> Option<&'a Object> {
    chain
        .iter()
        .find_map(|dict| dict.get(key).ok())
        .and_then(|obj| resolve(doc, obj))
}

fn widget_field(doc: &Document, widget: &Dictionary) -> Option<FormFieldDescriptor> {
    let chain = field_chain(doc, widget);
    let kind = inherited(doc, &chain, b"FT").and_then(name_of)?;
    let flags = inherited(doc, &chain, b"Ff").and_then(integer).unwrap_or(0);

    let field_type = match kind.as_str() {
        "Tx" => FieldType::Text,
        "Btn" if flags & FLAG_PUSHBUTTON != 0 => return None,
        "Btn" if flags & FLAG_RADIO != 0 => FieldType::Radio,
        "Btn" => FieldType::Checkbox,
        "Ch" => FieldType::Dropdown,
        other => {
            debug!("skipping {} field", other);
            return None;
        }
    };

    // Fully qualified name: partial names from the root down
    let partials: Vec<String> = chain
        .iter()
        .rev()
        .filter_map(|dict| dict.get(b"T").ok().and_then(|t| resolve(doc, t)).and_then(text_string))
        .collect();
    if partials.is_empty() {
        return None;
    }

    let mut field = FormFieldDescriptor::new(partials.join("."), field_type);
    field.required = flags & FLAG_REQUIRED != 0;
    field.value = match inherited(doc, &chain, b"V") {
        Some(Object::Name(name)) => String::from_utf8_lossy(name).into_owned(),
        Some(other) => text_string(other).unwrap_or_default(),
        None => String::new(),
    };
    if let Some(Object::Array(options)) = inherited(doc, &chain, b"Opt") {
        field.options = options
            .iter()
            .filter_map(|opt| match resolve(doc, opt)? {
                // [export value, display text]
                Object::Array(pair) => pair.last().and_then(text_string),
                single => text_string(single),
            })
            .collect();
    }
    Some(field)
}

/// True when any page carries a form widget.
pub fn has_forms<B: RenderBackend + ?Sized>(backend: &B) -> bool {
    (1..=backend.page_count()).any(|number| {
        backend
            .page(number)
            .map(|page| page.annotations().iter().any(PageAnnotation::is_widget))
            .unwrap_or(false)
    })
}

/// Distinct form fields in page order; widgets sharing a name count once.
pub fn form_fields<B: RenderBackend + ?Sized>(backend: &B) -> Vec<FormFieldDescriptor> {
    let mut seen = HashSet::new();
    let mut fields = Vec::new();
    for number in 1..=backend.page_count() {
        let Ok(page) = backend.page(number) else {
            continue;
        };
        for field in page.annotations().into_iter().filter_map(|a| a.field) {
            if seen.insert(field.name.clone()) {
                fields.push(field);
            }
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::StringFormat;
    use pretty_assertions::assert_eq;

    fn string(s: &str) -> Object {
        Object::String(s.as_bytes().to_vec(), StringFormat::Literal)
    }

    fn page_with_annots(doc: &mut Document, annots: Vec<Object>) -> ObjectId {
        doc.add_object(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Page".to_vec())),
            ("Annots", Object::Array(annots)),
        ]))
    }

    #[test]
    fn placeholder_uses_lowercased_name() {
        let field = FormFieldDescriptor::new("Full Name", FieldType::Text);
        assert_eq!(field.placeholder, "Enter full name");
    }

    #[test]
    fn widgets_resolve_inherited_attributes() {
        let mut doc = Document::with_version("1.5");
        let parent = doc.add_object(Dictionary::from_iter(vec![
            ("FT", Object::Name(b"Btn".to_vec())),
            ("T", string("choice")),
            ("Ff", Object::Integer(FLAG_RADIO | FLAG_REQUIRED)),
            ("V", Object::Name(b"A".to_vec())),
        ]));
        let widget = Dictionary::from_iter(vec![
            ("Subtype", Object::Name(b"Widget".to_vec())),
            ("Parent", Object::Reference(parent)),
            (
                "Rect",
                Object::Array(vec![200.into(), 700.into(), 100.into(), 650.into()]),
            ),
        ]);
        let link = Dictionary::from_iter(vec![("Subtype", Object::Name(b"Link".to_vec()))]);
        let annots = vec![Object::Dictionary(widget), Object::Dictionary(link)];
        let page = page_with_annots(&mut doc, annots);

        let annots = page_annotations(&doc, page);
        assert_eq!(annots.len(), 2);
        assert!(annots[0].is_widget());
        assert_eq!(annots[0].rect, [100.0, 650.0, 200.0, 700.0]);

        let field = annots[0].field.clone().unwrap();
        assert_eq!(field.name, "choice");
        assert_eq!(field.field_type, FieldType::Radio);
        assert!(field.required);
        assert_eq!(field.value, "A");

        assert!(!annots[1].is_widget());
        assert_eq!(annots[1].field, None);
    }

    #[test]
    fn choice_options_prefer_display_text() {
        let mut doc = Document::with_version("1.5");
        let widget = Dictionary::from_iter(vec![
            ("Subtype", Object::Name(b"Widget".to_vec())),
            ("FT", Object::Name(b"Ch".to_vec())),
            ("T", string("Country")),
            (
                "Opt",
                Object::Array(vec![
                    string("Norway"),
                    Object::Array(vec![string("se"), string("Sweden")]),
                ]),
            ),
        ]);
        let page = page_with_annots(&mut doc, vec![Object::Dictionary(widget)]);

        let field = page_annotations(&doc, page).remove(0).field.unwrap();
        assert_eq!(field.field_type, FieldType::Dropdown);
        assert_eq!(field.options, vec!["Norway".to_string(), "Sweden".to_string()]);
        assert_eq!(field.placeholder, "Enter country");
    }

    #[test]
    fn push_buttons_are_not_fields() {
        let mut doc = Document::with_version("1.5");
        let widget = Dictionary::from_iter(vec![
            ("Subtype", Object::Name(b"Widget".to_vec())),
            ("FT", Object::Name(b"Btn".to_vec())),
            ("T", string("Submit")),
            ("Ff", Object::Integer(FLAG_PUSHBUTTON)),
        ]);
        let page = page_with_annots(&mut doc, vec![Object::Dictionary(widget)]);

        let annots = page_annotations(&doc, page);
        assert!(annots[0].is_widget());
        assert_eq!(annots[0].field, None);
    }
}
