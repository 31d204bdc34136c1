//! The weaver: grafts OCR text layers (and replacement image layers) into
//! the base PDF.
//!
//! For every page it decides between keeping the original content (lossless
//! reconstruction) and replacing the page with a rasterized image layer,
//! then splices the invisible text layer in front, rotated and scaled into
//! the page's coordinate frame. Afterwards the table of contents is repaired
//! for any pages whose object identity changed.

pub mod import;
pub mod strip;
pub mod toc;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::{debug, info, warn};

use crate::error::{OcrWeaveError, Result};
use crate::pdfinfo::{inherited, resolve};
use import::Importer;

/// Font resource names the text layer may use: our hOCR renderer and
/// tesseract's text-only PDFs respectively. The grafted content stream
/// selects the font by this name, so each page's resources must register the
/// imported font under the same key.
const POSSIBLE_FONT_KEYS: [&str; 2] = ["f-0-0", "F1"];

/// Per-page graft instructions, consumed in page order.
#[derive(Debug, Clone)]
pub struct PageGraft {
    pub page_index: usize,
    /// Single-page PDF containing only invisible text; absent or zero-size
    /// when the page was skipped.
    pub text_pdf: Option<PathBuf>,
    /// Replacement visible layer; absent under lossless reconstruction.
    pub image_pdf: Option<PathBuf>,
    /// Clockwise rotation applied at rasterization time.
    pub orientation_correction: i32,
    /// The page's `/Rotate` in the original document.
    pub original_rotation: i32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WeaveOptions {
    /// Strip prior invisible text from kept pages (`--redo-ocr`).
    pub strip_old_text: bool,
}

/// Merge all page layers into `base_pdf`, writing the result to `output`.
pub fn weave_layers(
    base_pdf: &Path,
    output: &Path,
    pages: &[PageGraft],
    options: WeaveOptions,
) -> Result<()> {
    let mut doc = Document::load(base_pdf)
        .map_err(|e| OcrWeaveError::input_from("cannot reopen input PDF", e))?;
    let mut page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();

    let procset_id = doc.add_object(Object::Array(vec![
        Object::Name(b"PDF".to_vec()),
        Object::Name(b"Text".to_vec()),
        Object::Name(b"ImageB".to_vec()),
        Object::Name(b"ImageC".to_vec()),
        Object::Name(b"ImageI".to_vec()),
    ]));

    let mut font: Option<(String, ObjectId)> = None;
    let mut page_remap: HashMap<ObjectId, ObjectId> = HashMap::new();

    for graft in pages {
        let index = graft.page_index;
        if index >= page_ids.len() {
            return Err(OcrWeaveError::PdfMergeFailed {
                message: format!("page {} out of range", index + 1),
            });
        }

        let mut content_rotation = graft.original_rotation;
        let correction = graft.orientation_correction.rem_euclid(360);

        if let Some(image_pdf) = &graft.image_pdf {
            debug!(page = index + 1, "replacing page content with image layer");
            let new_id = replace_page(&mut doc, page_ids[index], image_pdf, &mut page_remap)?;
            page_ids[index] = new_id;
            content_rotation = correction;
        }

        let text_misaligned = (correction - content_rotation).rem_euclid(360);

        if let Some(text_pdf) = &graft.text_pdf {
            let text_size = std::fs::metadata(text_pdf).map(|m| m.len()).unwrap_or(0);
            if text_size > 0 {
                let text_doc =
                    Document::load(text_pdf).map_err(|e| OcrWeaveError::PdfMergeFailed {
                        message: format!("cannot open text layer: {e}"),
                    })?;
                if font.is_none() {
                    font = find_and_import_font(&mut doc, &text_doc);
                    if font.is_none() {
                        warn!("text layer has no recognizable font; text will not be grafted");
                    }
                }
                if let Some((font_key, font_id)) = &font {
                    debug!(page = index + 1, misaligned = text_misaligned, "grafting");
                    graft_text_layer(
                        &mut doc,
                        page_ids[index],
                        &text_doc,
                        text_misaligned,
                        options.strip_old_text,
                    )?;
                    update_page_resources(&mut doc, page_ids[index], font_key, *font_id, procset_id)?;
                }
            }
        }

        // Make the composite render with the original visual orientation.
        let rotate = (content_rotation - correction).rem_euclid(360);
        let page = doc
            .get_dictionary_mut(page_ids[index])
            .map_err(|e| OcrWeaveError::PdfMergeFailed {
                message: format!("page object vanished: {e}"),
            })?;
        page.set("Rotate", Object::Integer(i64::from(rotate)));
    }

    toc::fix_toc(&mut doc, &page_remap)?;
    let pruned = prune_unreachable(&mut doc);
    if pruned > 0 {
        info!(pruned, "dropped unreachable objects from replaced pages");
    }

    doc.save(output)
        .map_err(|e| OcrWeaveError::PdfMergeFailed {
            message: format!("cannot save woven PDF: {e}"),
        })?;
    Ok(())
}

/// Swap the page object for page 0 of `image_pdf`; returns the new page id.
fn replace_page(
    doc: &mut Document,
    old_id: ObjectId,
    image_pdf: &Path,
    page_remap: &mut HashMap<ObjectId, ObjectId>,
) -> Result<ObjectId> {
    let image_doc = Document::load(image_pdf).map_err(|e| OcrWeaveError::PdfMergeFailed {
        message: format!("cannot open image layer: {e}"),
    })?;
    let src_page_id = *image_doc
        .get_pages()
        .get(&1)
        .ok_or_else(|| OcrWeaveError::PdfMergeFailed {
            message: "image layer has no page".into(),
        })?;

    let parent_id = doc
        .get_dictionary(old_id)
        .ok()
        .and_then(|page| page.get(b"Parent").ok())
        .and_then(|p| p.as_reference().ok())
        .ok_or_else(|| OcrWeaveError::PdfMergeFailed {
            message: "page has no parent node".into(),
        })?;

    let mut importer = Importer::new();
    let new_id = importer.import_page(doc, &image_doc, src_page_id, parent_id)?;

    // Point the parent's /Kids entry at the replacement.
    let parent = doc
        .get_dictionary_mut(parent_id)
        .map_err(|e| OcrWeaveError::PdfMergeFailed {
            message: format!("page tree node unreadable: {e}"),
        })?;
    let kids = parent
        .get_mut(b"Kids")
        .ok()
        .and_then(|k| match k {
            Object::Array(items) => Some(items),
            _ => None,
        })
        .ok_or_else(|| OcrWeaveError::PdfMergeFailed {
            message: "page tree node has no /Kids".into(),
        })?;
    let mut replaced = false;
    for kid in kids.iter_mut() {
        if let Object::Reference(id) = kid {
            if *id == old_id {
                *kid = Object::Reference(new_id);
                replaced = true;
                break;
            }
        }
    }
    if !replaced {
        return Err(OcrWeaveError::PdfMergeFailed {
            message: "replaced page not found in its parent's /Kids".into(),
        });
    }

    page_remap.insert(old_id, new_id);
    doc.objects.remove(&old_id);
    Ok(new_id)
}

/// Copy the text layer's content stream onto the base page, wrapped in a
/// transform that rotates and scales it into the page's coordinate frame.
fn graft_text_layer(
    doc: &mut Document,
    base_page_id: ObjectId,
    text_doc: &Document,
    rotation_cw: i32,
    strip_old_text: bool,
) -> Result<()> {
    let text_page_id = *text_doc
        .get_pages()
        .get(&1)
        .ok_or_else(|| OcrWeaveError::PdfMergeFailed {
            message: "text layer has no page".into(),
        })?;
    let text_contents =
        text_doc
            .get_page_content(text_page_id)
            .map_err(|e| OcrWeaveError::PdfMergeFailed {
                message: format!("cannot read text layer content: {e}"),
            })?;
    if text_contents.is_empty() {
        return Ok(());
    }

    let (wt, ht) = page_dimensions(text_doc, text_page_id)?;
    let (wp, hp) = page_dimensions(doc, base_page_id)?;

    // The text layer is upright; the page content may be rotated. Rotate the
    // text about its center (the input angle is clockwise, the matrix
    // convention counterclockwise), correct for any size difference caused
    // by DPI rounding, and recenter on the target page.
    let ccw = f64::from((360 - rotation_cw.rem_euclid(360)) % 360);
    let (wt_rot, ht_rot) = if rotation_cw.rem_euclid(360) % 180 == 90 {
        (ht, wt)
    } else {
        (wt, ht)
    };
    let scale_x = wp / wt_rot;
    let scale_y = hp / ht_rot;
    debug!("text layer scale {:?}", (scale_x, scale_y));

    use crate::pdfinfo::content_stream::Matrix;
    let ctm = Matrix::translated(-wt / 2.0, -ht / 2.0)
        .cat(&Matrix::rotated(ccw))
        .cat(&Matrix::scaled(scale_x, scale_y))
        .cat(&Matrix::translated(wp / 2.0, hp / 2.0));

    let mut wrapped = format!(
        "q {:.6} {:.6} {:.6} {:.6} {:.6} {:.6} cm\n",
        ctm.a, ctm.b, ctm.c, ctm.d, ctm.e, ctm.f
    )
    .into_bytes();
    wrapped.extend_from_slice(&text_contents);
    wrapped.extend_from_slice(b"\nQ\n");

    if strip_old_text {
        strip::strip_invisible_text(doc, base_page_id)?;
    }

    let stream_id = doc.add_object(lopdf::Stream::new(lopdf::dictionary! {}, wrapped));
    prepend_content(doc, base_page_id, stream_id)
}

/// MediaBox width/height of a page, honoring page-tree inheritance.
fn page_dimensions(doc: &Document, page_id: ObjectId) -> Result<(f64, f64)> {
    let page = doc
        .get_dictionary(page_id)
        .map_err(|e| OcrWeaveError::PdfMergeFailed {
            message: format!("page unreadable: {e}"),
        })?;
    let mediabox = inherited(doc, page, b"MediaBox")
        .map(|obj| resolve(doc, obj))
        .and_then(|obj| obj.as_array().ok())
        .ok_or_else(|| OcrWeaveError::PdfMergeFailed {
            message: "page has no MediaBox".into(),
        })?;
    let mut coords = [0.0f64; 4];
    for (slot, item) in coords.iter_mut().zip(mediabox.iter()) {
        *slot = crate::pdfinfo::number(resolve(doc, item)).ok_or_else(|| {
            OcrWeaveError::PdfMergeFailed {
                message: "page MediaBox is malformed".into(),
            }
        })?;
    }
    Ok((coords[2] - coords[0], coords[3] - coords[1]))
}

/// Make `stream_id` the first element of the page's content array.
fn prepend_content(doc: &mut Document, page_id: ObjectId, stream_id: ObjectId) -> Result<()> {
    // Normalize existing /Contents into a list of stream references.
    let existing: Vec<Object> = {
        let page = doc
            .get_dictionary(page_id)
            .map_err(|e| OcrWeaveError::PdfMergeFailed {
                message: format!("page unreadable: {e}"),
            })?;
        match page.get(b"Contents") {
            Ok(Object::Array(items)) => items.clone(),
            Ok(Object::Reference(id)) => match doc.get_object(*id) {
                Ok(Object::Array(items)) => items.clone(),
                _ => vec![Object::Reference(*id)],
            },
            Ok(other) => vec![other.clone()],
            Err(_) => Vec::new(),
        }
    };

    let mut contents = Vec::with_capacity(existing.len() + 1);
    contents.push(Object::Reference(stream_id));
    contents.extend(existing);

    let page = doc
        .get_dictionary_mut(page_id)
        .map_err(|e| OcrWeaveError::PdfMergeFailed {
            message: format!("page unreadable: {e}"),
        })?;
    page.set("Contents", Object::Array(contents));
    Ok(())
}

/// Locate the glyphless font in the text layer and copy it into `doc`,
/// remembering the resource name the text content selects it by.
fn find_and_import_font(doc: &mut Document, text_doc: &Document) -> Option<(String, ObjectId)> {
    let text_page_id = *text_doc.get_pages().get(&1)?;
    let page = text_doc.get_dictionary(text_page_id).ok()?;
    let resources = inherited(text_doc, page, b"Resources").map(|o| resolve(text_doc, o))?;
    let Object::Dictionary(resources) = resources else {
        return None;
    };
    let fonts = resources
        .get(b"Font")
        .ok()
        .map(|o| resolve(text_doc, o))?;
    let Object::Dictionary(fonts) = fonts else {
        return None;
    };
    for key in POSSIBLE_FONT_KEYS {
        if let Ok(entry) = fonts.get(key.as_bytes()) {
            if let Ok(src_id) = entry.as_reference() {
                let mut importer = Importer::new();
                let font_id = importer.import_ref(doc, text_doc, src_id).ok()?;
                return Some((key.to_string(), font_id));
            }
        }
    }
    None
}

/// Register the glyphless font and the universal /ProcSet on a page.
fn update_page_resources(
    doc: &mut Document,
    page_id: ObjectId,
    font_key: &str,
    font_id: ObjectId,
    procset_id: ObjectId,
) -> Result<()> {
    // Materialize inherited or shared resources as a direct dictionary owned
    // by this page, so the edit cannot leak onto other pages.
    let mut resources: Dictionary = {
        let page = doc
            .get_dictionary(page_id)
            .map_err(|e| OcrWeaveError::PdfMergeFailed {
                message: format!("page unreadable: {e}"),
            })?;
        match inherited(doc, page, b"Resources").map(|o| resolve(doc, o)) {
            Some(Object::Dictionary(dict)) => dict.clone(),
            _ => Dictionary::new(),
        }
    };

    let mut fonts: Dictionary = match resources.get(b"Font").map(|o| resolve(doc, o)) {
        Ok(Object::Dictionary(dict)) => dict.clone(),
        _ => Dictionary::new(),
    };
    if !fonts.has(font_key.as_bytes()) {
        fonts.set(font_key, Object::Reference(font_id));
    }
    resources.set("Font", Object::Dictionary(fonts));
    resources.set("ProcSet", Object::Reference(procset_id));

    let page = doc
        .get_dictionary_mut(page_id)
        .map_err(|e| OcrWeaveError::PdfMergeFailed {
            message: format!("page unreadable: {e}"),
        })?;
    page.set("Resources", Object::Dictionary(resources));
    Ok(())
}

/// Drop objects unreachable from the trailer; returns how many went away.
///
/// Replaced pages leave their old content streams and images orphaned, which
/// would otherwise be written into the output.
fn prune_unreachable(doc: &mut Document) -> usize {
    let mut visited: HashSet<ObjectId> = HashSet::new();
    let mut queue: Vec<ObjectId> = Vec::new();

    fn enqueue(obj: &Object, queue: &mut Vec<ObjectId>) {
        match obj {
            Object::Reference(id) => queue.push(*id),
            Object::Array(items) => {
                for item in items {
                    enqueue(item, queue);
                }
            }
            Object::Dictionary(dict) => {
                for (_, value) in dict.iter() {
                    enqueue(value, queue);
                }
            }
            Object::Stream(stream) => {
                for (_, value) in stream.dict.iter() {
                    enqueue(value, queue);
                }
            }
            _ => {}
        }
    }

    for (_, value) in doc.trailer.iter() {
        enqueue(value, &mut queue);
    }
    while let Some(id) = queue.pop() {
        if !visited.insert(id) {
            continue;
        }
        if let Ok(object) = doc.get_object(id) {
            enqueue(object, &mut queue);
        }
    }

    let all: Vec<ObjectId> = doc.objects.keys().copied().collect();
    let mut pruned = 0;
    for id in all {
        if !visited.contains(&id) {
            doc.objects.remove(&id);
            pruned += 1;
        }
    }
    pruned
}
