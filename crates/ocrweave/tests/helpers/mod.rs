//! Shared builders for synthetic test PDFs.
//!
//! All fixtures are generated in-test with lopdf so the suite carries no
//! binary files.

#![allow(dead_code)] // not every test binary uses every helper

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};

pub struct PageSpec {
    /// Draw a full-page image of this pixel size; None for a vector-only page.
    pub image: Option<(i64, i64)>,
    /// `/Rotate` value.
    pub rotation: i64,
    /// Add a visible text object in the page interior.
    pub visible_text: bool,
    /// Add an invisible (render mode 3) text object.
    pub invisible_text: bool,
}

impl Default for PageSpec {
    fn default() -> Self {
        Self {
            image: Some((1700, 2200)),
            rotation: 0,
            visible_text: false,
            invisible_text: false,
        }
    }
}

/// Letter-size document with one page per spec, optionally with an outline
/// entry pointing at each page.
pub fn build_pdf(pages: &[PageSpec], with_outline: bool) -> Document {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::new();
    let mut page_ids = Vec::new();

    for spec in pages {
        let mut operations: Vec<Operation> = Vec::new();
        let mut resources = dictionary! {};

        if let Some((px_w, px_h)) = spec.image {
            let image_id = doc.add_object(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => px_w,
                    "Height" => px_h,
                    "BitsPerComponent" => 8,
                    "ColorSpace" => "DeviceGray",
                    "Filter" => "DCTDecode",
                },
                vec![0u8; 16],
            ));
            resources.set(
                "XObject",
                dictionary! { "Im0" => Object::Reference(image_id) },
            );
            operations.extend(vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Real(612.0),
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Real(792.0),
                        Object::Integer(0),
                        Object::Integer(0),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ]);
        }

        if spec.visible_text || spec.invisible_text {
            resources.set(
                "Font",
                dictionary! {
                    "F1" => dictionary! {
                        "Type" => "Font",
                        "Subtype" => "Type1",
                        "BaseFont" => "Helvetica",
                    },
                },
            );
        }
        if spec.visible_text {
            operations.extend(text_object(0, "visible words", 300.0, 400.0));
        }
        if spec.invisible_text {
            operations.extend(text_object(3, "hidden ocr layer", 300.0, 300.0));
        }

        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("encode content"),
        ));
        let mut page = dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => Object::Reference(content_id),
            "Resources" => resources,
        };
        if spec.rotation != 0 {
            page.set("Rotate", spec.rotation);
        }
        let page_id = doc.add_object(page);
        page_ids.push(page_id);
        kids.push(Object::Reference(page_id));
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages.len() as i64,
        }),
    );

    let mut catalog = dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    };
    if with_outline {
        let outlines_id = add_outline(&mut doc, &page_ids);
        catalog.set("Outlines", Object::Reference(outlines_id));
    }
    let catalog_id = doc.add_object(catalog);
    doc.trailer.set("Root", catalog_id);
    doc
}

fn text_object(render_mode: i64, text: &str, x: f64, y: f64) -> Vec<Operation> {
    vec![
        Operation::new("BT", vec![]),
        Operation::new(
            "Tf",
            vec![Object::Name(b"F1".to_vec()), Object::Real(12.0)],
        ),
        Operation::new("Tr", vec![Object::Integer(render_mode)]),
        Operation::new(
            "Td",
            vec![Object::Real(x as f32), Object::Real(y as f32)],
        ),
        Operation::new("Tj", vec![Object::string_literal(text)]),
        Operation::new("ET", vec![]),
    ]
}

fn add_outline(doc: &mut Document, page_ids: &[ObjectId]) -> ObjectId {
    let outlines_id = doc.new_object_id();
    let mut item_ids: Vec<ObjectId> = page_ids.iter().map(|_| doc.new_object_id()).collect();
    for (n, page_id) in page_ids.iter().enumerate() {
        let mut item = dictionary! {
            "Title" => Object::string_literal(format!("Page {}", n + 1)),
            "Parent" => Object::Reference(outlines_id),
            "Dest" => vec![
                Object::Reference(*page_id),
                "XYZ".into(),
                Object::Null,
                Object::Null,
                Object::Null,
            ],
        };
        if n > 0 {
            item.set("Prev", Object::Reference(item_ids[n - 1]));
        }
        if n + 1 < item_ids.len() {
            item.set("Next", Object::Reference(item_ids[n + 1]));
        }
        doc.objects.insert(item_ids[n], Object::Dictionary(item));
    }
    let first = item_ids.first().copied();
    let last = item_ids.pop();
    let mut outlines = dictionary! { "Type" => "Outlines" };
    if let Some(first) = first {
        outlines.set("First", Object::Reference(first));
    }
    if let Some(last) = last {
        outlines.set("Last", Object::Reference(last));
    }
    doc.objects.insert(outlines_id, Object::Dictionary(outlines));
    outlines_id
}

/// Save a document into `dir` under `name` and return the path.
pub fn save(doc: &Document, dir: &std::path::Path, name: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    let mut doc = doc.clone();
    doc.save(&path).expect("save test pdf");
    path
}

/// MediaBox of a 0-based page as (left, bottom, right, top).
pub fn mediabox(doc: &Document, page_index: usize) -> [f64; 4] {
    let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
    let page = doc.get_dictionary(pages[page_index]).expect("page");
    let arr = page
        .get(b"MediaBox")
        .expect("mediabox")
        .as_array()
        .expect("array");
    let mut result = [0.0f64; 4];
    for (slot, obj) in result.iter_mut().zip(arr.iter()) {
        *slot = match obj {
            Object::Integer(v) => *v as f64,
            Object::Real(v) => f64::from(*v),
            _ => panic!("non-numeric mediabox"),
        };
    }
    result
}
