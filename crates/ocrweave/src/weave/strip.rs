//! Removal of invisible text objects from a page.
//!
//! `--redo-ocr` must take out the previous OCR layer before adding a new
//! one. Text objects are buffered between `BT` and `ET`; if the text render
//! mode in effect at `ET` is 3 (invisible), the whole object is dropped,
//! otherwise it is kept verbatim. The render mode resets at each `BT`.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use tracing::debug;

use crate::error::{OcrWeaveError, Result};

/// Strip invisible text objects from `page_id`'s content.
///
/// Returns the number of text objects removed. The page's `/Contents` is
/// replaced with a single rebuilt stream when anything was removed.
pub fn strip_invisible_text(doc: &mut Document, page_id: ObjectId) -> Result<usize> {
    let data = doc
        .get_page_content(page_id)
        .map_err(|e| OcrWeaveError::PdfMergeFailed {
            message: format!("cannot read page content: {e}"),
        })?;
    let content = Content::decode(&data).map_err(|e| OcrWeaveError::PdfMergeFailed {
        message: format!("cannot parse page content: {e}"),
    })?;

    let (kept, removed) = filter_content(content.operations);
    if removed == 0 {
        return Ok(0);
    }
    debug!(removed, "stripped invisible text objects");

    let rebuilt = Content { operations: kept };
    let encoded = rebuilt
        .encode()
        .map_err(|e| OcrWeaveError::PdfMergeFailed {
            message: format!("cannot re-encode page content: {e}"),
        })?;
    let stream_id = doc.add_object(Stream::new(dictionary! {}, encoded));
    let page = doc
        .get_dictionary_mut(page_id)
        .map_err(|e| OcrWeaveError::PdfMergeFailed {
            message: format!("page object vanished: {e}"),
        })?;
    page.set("Contents", Object::Reference(stream_id));
    Ok(removed)
}

fn filter_content(operations: Vec<Operation>) -> (Vec<Operation>, usize) {
    let mut kept: Vec<Operation> = Vec::with_capacity(operations.len());
    let mut text_object: Vec<Operation> = Vec::new();
    let mut in_text_object = false;
    let mut render_mode = 0i64;
    let mut removed = 0usize;

    for op in operations {
        if !in_text_object {
            if op.operator == "BT" {
                in_text_object = true;
                render_mode = 0;
                text_object.push(op);
            } else {
                kept.push(op);
            }
        } else {
            if op.operator == "Tr" {
                if let Some(Ok(mode)) = op.operands.first().map(|o| o.as_i64()) {
                    render_mode = mode;
                }
            }
            let is_et = op.operator == "ET";
            text_object.push(op);
            if is_et {
                in_text_object = false;
                if render_mode != 3 {
                    kept.append(&mut text_object);
                } else {
                    removed += 1;
                    text_object.clear();
                }
            }
        }
    }
    // An unterminated text object is malformed; keep it rather than lose
    // content.
    if !text_object.is_empty() {
        kept.append(&mut text_object);
    }
    (kept, removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_object(mode: Option<i64>, text: &str) -> Vec<Operation> {
        let mut ops = vec![Operation::new("BT", vec![])];
        if let Some(mode) = mode {
            ops.push(Operation::new("Tr", vec![Object::Integer(mode)]));
        }
        ops.push(Operation::new(
            "Tj",
            vec![Object::string_literal(text)],
        ));
        ops.push(Operation::new("ET", vec![]));
        ops
    }

    #[test]
    fn test_invisible_object_removed() {
        let mut ops = text_object(Some(3), "ghost");
        ops.extend(text_object(None, "real"));
        let (kept, removed) = filter_content(ops);
        assert_eq!(removed, 1);
        let text: Vec<&str> = kept
            .iter()
            .filter(|op| op.operator == "Tj")
            .map(|_| "tj")
            .collect();
        assert_eq!(text.len(), 1);
    }

    #[test]
    fn test_visible_object_kept() {
        let (kept, removed) = filter_content(text_object(Some(0), "real"));
        assert_eq!(removed, 0);
        assert_eq!(kept.len(), 4);
    }

    #[test]
    fn test_mode_at_et_decides() {
        // Starts invisible but switches to fill before ET: kept.
        let ops = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tr", vec![Object::Integer(3)]),
            Operation::new("Tj", vec![Object::string_literal("a")]),
            Operation::new("Tr", vec![Object::Integer(0)]),
            Operation::new("Tj", vec![Object::string_literal("b")]),
            Operation::new("ET", vec![]),
        ];
        let (kept, removed) = filter_content(ops);
        assert_eq!(removed, 0);
        assert_eq!(kept.len(), 6);
    }

    #[test]
    fn test_mode_does_not_leak_between_objects() {
        // First object ends in mode 3; second object sets nothing and must
        // default to visible again.
        let mut ops = text_object(Some(3), "ghost");
        ops.extend(text_object(None, "real"));
        let (kept, removed) = filter_content(ops);
        assert_eq!(removed, 1);
        assert!(kept.iter().any(|op| op.operator == "Tj"));
    }

    #[test]
    fn test_non_text_content_untouched() {
        let ops = vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Integer(1),
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(1),
                    Object::Integer(0),
                    Object::Integer(0),
                ],
            ),
            Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
            Operation::new("Q", vec![]),
        ];
        let (kept, removed) = filter_content(ops.clone());
        assert_eq!(removed, 0);
        assert_eq!(kept.len(), ops.len());
    }

    #[test]
    fn test_unterminated_text_object_kept() {
        let ops = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tr", vec![Object::Integer(3)]),
            Operation::new("Tj", vec![Object::string_literal("x")]),
            // no ET
        ];
        let (kept, removed) = filter_content(ops);
        assert_eq!(removed, 0);
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn test_strip_on_document() {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut operations = text_object(Some(3), "old ocr");
        operations.extend(text_object(Some(0), "visible"));
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().unwrap(),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => Object::Reference(content_id),
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

        let removed = strip_invisible_text(&mut doc, page_id).unwrap();
        assert_eq!(removed, 1);

        let rebuilt = doc.get_page_content(page_id).unwrap();
        let parsed = Content::decode(&rebuilt).unwrap();
        let tj_count = parsed
            .operations
            .iter()
            .filter(|op| op.operator == "Tj")
            .count();
        assert_eq!(tj_count, 1);
    }
}
