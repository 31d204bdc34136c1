//! PDF page synthesis: the invisible text layer and the visible image layer.

pub mod glyphless;
pub mod hocr_pdf;
pub mod image_pdf;

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::{dictionary, Document, Object, ObjectId};

use crate::error::{OcrWeaveError, Result};

pub(crate) fn flate_compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| OcrWeaveError::Other(format!("deflate failed: {e}")))
}

/// Skeleton single-page document: returns (doc, page_id) with the page's
/// `/MediaBox` set and empty `/Resources`; the caller fills in contents.
pub(crate) fn single_page_document(width_pt: f64, height_pt: f64) -> (Document, ObjectId) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => Object::Reference(pages_id),
        "MediaBox" => vec![
            0.into(),
            0.into(),
            Object::Real(width_pt as f32),
            Object::Real(height_pt as f32),
        ],
        "Resources" => dictionary! {},
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", catalog_id);
    (doc, page_id)
}
