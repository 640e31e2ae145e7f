//! Shared PDF fixtures for integration tests.

#![allow(dead_code)]

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat};

pub const PAGE_WIDTH: i64 = 300;
pub const PAGE_HEIGHT: i64 = 300;
const PAGE: (i64, i64) = (PAGE_WIDTH, PAGE_HEIGHT);

fn save(mut doc: Document) -> Vec<u8> {
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

fn finish(mut doc: Document, pages_id: ObjectId, kids: Vec<ObjectId>) -> Vec<u8> {
    doc.objects.insert(
        pages_id,
        Object::Dictionary(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Count", Object::Integer(kids.len() as i64)),
            (
                "Kids",
                Object::Array(kids.into_iter().map(Object::Reference).collect()),
            ),
        ])),
    );
    let catalog_id = doc.add_object(Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]));
    doc.trailer.set("Root", Object::Reference(catalog_id));
    save(doc)
}

fn add_page(
    doc: &mut Document,
    pages_id: ObjectId,
    (width, height): (i64, i64),
    operations: Vec<Operation>,
    extra: Vec<(&str, Object)>,
) -> ObjectId {
    let content = Content { operations };
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));
    let mut page = Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Page".to_vec())),
        ("Parent", Object::Reference(pages_id)),
        (
            "MediaBox",
            Object::Array(vec![0.into(), 0.into(), width.into(), height.into()]),
        ),
        ("Contents", Object::Reference(content_id)),
    ]);
    for (key, value) in extra {
        page.set(key, value);
    }
    doc.add_object(page)
}

/// A red 100x50 rectangle whose top-left corner sits at (50, 50) in
/// top-left page coordinates.
pub fn red_rect_ops() -> Vec<Operation> {
    vec![
        Operation::new("rg", vec![1.into(), 0.into(), 0.into()]),
        Operation::new(
            "re",
            vec![50.into(), (PAGE_HEIGHT - 100).into(), 100.into(), 50.into()],
        ),
        Operation::new("f", vec![]),
    ]
}

/// One page holding [`red_rect_ops`].
pub fn rect_pdf() -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let page = add_page(&mut doc, pages_id, PAGE, red_rect_ops(), vec![]);
    finish(doc, pages_id, vec![page])
}

/// `count` blank pages.
pub fn blank_pdf(count: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let kids = (0..count)
        .map(|_| add_page(&mut doc, pages_id, PAGE, vec![], vec![]))
        .collect();
    finish(doc, pages_id, kids)
}

/// A 100x100 page painted solid red, then a blank 1000x1000 page.
pub fn red_then_large_pdf() -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let red = vec![
        Operation::new("rg", vec![1.into(), 0.into(), 0.into()]),
        Operation::new("re", vec![0.into(), 0.into(), 100.into(), 100.into()]),
        Operation::new("f", vec![]),
    ];
    let first = add_page(&mut doc, pages_id, (100, 100), red, vec![]);
    let second = add_page(&mut doc, pages_id, (1000, 1000), vec![], vec![]);
    finish(doc, pages_id, vec![first, second])
}

/// One page drawing an image XObject that claims 70000x70000 RGB pixels.
pub fn oversized_image_pdf() -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let image = Stream::new(
        Dictionary::from_iter(vec![
            ("Type", Object::Name(b"XObject".to_vec())),
            ("Subtype", Object::Name(b"Image".to_vec())),
            ("Width", Object::Integer(70_000)),
            ("Height", Object::Integer(70_000)),
            ("ColorSpace", Object::Name(b"DeviceRGB".to_vec())),
            ("BitsPerComponent", Object::Integer(8)),
        ]),
        vec![0; 64],
    );
    let image_id = doc.add_object(image);
    let resources = Dictionary::from_iter(vec![(
        "XObject",
        Object::Dictionary(Dictionary::from_iter(vec![("Im0", Object::Reference(image_id))])),
    )]);
    let ops = vec![
        Operation::new("q", vec![]),
        Operation::new(
            "cm",
            vec![200.into(), 0.into(), 0.into(), 200.into(), 50.into(), 50.into()],
        ),
        Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
        Operation::new("Q", vec![]),
    ];
    let page = add_page(
        &mut doc,
        pages_id,
        PAGE,
        ops,
        vec![("Resources", Object::Dictionary(resources))],
    );
    finish(doc, pages_id, vec![page])
}

/// A page tree with no pages at all.
pub fn empty_pdf() -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    finish(doc, pages_id, vec![])
}

/// One blank page with a required text field named "Full Name" and a
/// checkbox named "Agree".
pub fn form_pdf() -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let text = Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Annot".to_vec())),
        ("Subtype", Object::Name(b"Widget".to_vec())),
        ("FT", Object::Name(b"Tx".to_vec())),
        ("T", Object::String(b"Full Name".to_vec(), StringFormat::Literal)),
        ("Ff", Object::Integer(1 << 1)),
        (
            "Rect",
            Object::Array(vec![50.into(), 200.into(), 250.into(), 224.into()]),
        ),
    ]);
    let checkbox = Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Annot".to_vec())),
        ("Subtype", Object::Name(b"Widget".to_vec())),
        ("FT", Object::Name(b"Btn".to_vec())),
        ("T", Object::String(b"Agree".to_vec(), StringFormat::Literal)),
        (
            "Rect",
            Object::Array(vec![50.into(), 150.into(), 66.into(), 166.into()]),
        ),
    ]);
    let text_id = doc.add_object(text);
    let checkbox_id = doc.add_object(checkbox);
    let page = add_page(
        &mut doc,
        pages_id,
        PAGE,
        vec![],
        vec![(
            "Annots",
            Object::Array(vec![Object::Reference(text_id), Object::Reference(checkbox_id)]),
        )],
    );
    finish(doc, pages_id, vec![page])
}

/// Count pixels in a rectangle whose channels are all below `threshold`.
pub fn dark_pixels(
    image: &image::RgbaImage,
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
    threshold: u8,
) -> usize {
    let mut count = 0;
    for y in y0..y1.min(image.height()) {
        for x in x0..x1.min(image.width()) {
            let p = image.get_pixel(x, y);
            if p[0] < threshold && p[1] < threshold && p[2] < threshold {
                count += 1;
            }
        }
    }
    count
}
