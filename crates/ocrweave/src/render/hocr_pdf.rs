//! hOCR to text-only PDF rendering.
//!
//! Produces a single-page PDF whose dimensions equal the OCR input image
//! scaled to points at the given DPI, containing each recognized word as
//! invisible text (render mode 3) in the glyphless font. Words are stretched
//! horizontally with a `Tz` scale so each one exactly spans its detected
//! bounding box, which is what makes selection and highlight rectangles line
//! up with the underlying image.

use std::path::Path;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream, StringFormat};
use tracing::debug;

use super::glyphless;
use super::{flate_compress, single_page_document};
use crate::error::{OcrWeaveError, Result};
use crate::hocr::{parse_hocr, HocrPage};

/// Resource name of the glyphless font on the text layer page.
///
/// The weaver looks for this name (and tesseract's `/F1`) when re-grafting.
pub const FONT_KEY: &str = "f-0-0";

/// Smallest font size we will emit, points.
const MIN_FONT_SIZE: f64 = 1.0;

/// Render a parsed hOCR page into `output_pdf`.
pub fn render_hocr_page(hocr_file: &Path, output_pdf: &Path, dpi: f64) -> Result<()> {
    let xml = std::fs::read_to_string(hocr_file)?;
    let page = parse_hocr(&xml)?;
    let mut doc = build_text_pdf(&page, dpi)?;
    doc.save(output_pdf)
        .map_err(|e| OcrWeaveError::Other(format!("cannot save text layer PDF: {e}")))?;
    Ok(())
}

/// Build the single-page text-only PDF document in memory.
pub fn build_text_pdf(page: &HocrPage, dpi: f64) -> Result<Document> {
    if dpi <= 0.0 {
        return Err(OcrWeaveError::Other("text renderer needs a positive DPI".into()));
    }
    let scale = 72.0 / dpi;
    let width_pt = page.width * scale;
    let height_pt = page.height * scale;

    let (mut doc, page_id) = single_page_document(width_pt, height_pt);
    let font_id = add_glyphless_font(&mut doc)?;

    let mut operations: Vec<Operation> = Vec::new();
    let mut words = 0usize;
    for line in &page.lines {
        for word in &line.words {
            if let Some(ops) = word_operations(word.bbox, &word.text, height_pt, scale) {
                operations.extend(ops);
                words += 1;
            }
        }
    }
    debug!(words, "rendered hOCR words into text layer");

    let content = Content { operations };
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        content
            .encode()
            .map_err(|e| OcrWeaveError::Other(format!("cannot encode text layer: {e}")))?,
    ));

    let page_dict = doc
        .get_dictionary_mut(page_id)
        .map_err(|e| OcrWeaveError::Other(format!("page object vanished: {e}")))?;
    page_dict.set("Contents", Object::Reference(content_id));
    page_dict.set(
        "Resources",
        dictionary! {
            "Font" => dictionary! {
                FONT_KEY => Object::Reference(font_id),
            },
        },
    );
    Ok(doc)
}

/// Operations for one invisible word, or None for degenerate boxes.
fn word_operations(
    bbox: [f64; 4],
    text: &str,
    page_height_pt: f64,
    px_to_pt: f64,
) -> Option<Vec<Operation>> {
    let box_width_pt = (bbox[2] - bbox[0]) * px_to_pt;
    let box_height_pt = (bbox[3] - bbox[1]) * px_to_pt;
    if box_width_pt <= 0.0 || box_height_pt <= 0.0 {
        return None;
    }
    let font_size = box_height_pt.max(MIN_FONT_SIZE);

    // Natural advance of the text in the glyphless font, then a horizontal
    // scale to make it exactly span the detected box.
    let natural_units: u32 = text.chars().map(|c| glyphless::char_width_units(c) as u32).sum();
    let natural_width_pt = natural_units as f64 / 1000.0 * font_size;
    let horiz_scale = if natural_width_pt > 0.0 {
        box_width_pt / natural_width_pt * 100.0
    } else {
        100.0
    };

    let x_pt = bbox[0] * px_to_pt;
    // Image coordinates have a top-left origin; PDF a bottom-left one. The
    // baseline sits one descent above the box bottom so the font's selection
    // rectangle coincides with the bbox.
    let descent_ratio = f64::from(-glyphless::DESCENT) / f64::from(glyphless::UNITS_PER_EM);
    let y_pt = page_height_pt - bbox[3] * px_to_pt + descent_ratio * font_size;

    let encoded = encode_utf16be(text);

    Some(vec![
        Operation::new("BT", vec![]),
        Operation::new("Tr", vec![Object::Integer(3)]),
        Operation::new(
            "Tf",
            vec![
                Object::Name(FONT_KEY.as_bytes().to_vec()),
                Object::Real(font_size as f32),
            ],
        ),
        Operation::new("Tz", vec![Object::Real(horiz_scale as f32)]),
        Operation::new(
            "Tm",
            vec![
                Object::Integer(1),
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(1),
                Object::Real(x_pt as f32),
                Object::Real(y_pt as f32),
            ],
        ),
        Operation::new(
            "Tj",
            vec![Object::String(encoded, StringFormat::Hexadecimal)],
        ),
        Operation::new("ET", vec![]),
    ])
}

/// UTF-16BE code units; characters outside the BMP become U+FFFD, matching
/// the 2-byte Identity-H code space.
fn encode_utf16be(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() * 2);
    for c in text.chars() {
        let unit = if (c as u32) <= 0xFFFF {
            c as u32 as u16
        } else {
            0xFFFD
        };
        out.extend_from_slice(&unit.to_be_bytes());
    }
    out
}

/// Install the glyphless Type0 font into `doc`; returns the font dict id.
pub fn add_glyphless_font(doc: &mut Document) -> Result<ObjectId> {
    let program = glyphless::font_program();
    let compressed = flate_compress(program)?;
    let font_file_id = doc.add_object(Stream::new(
        dictionary! {
            "Filter" => "FlateDecode",
            "Length1" => program.len() as i64,
        },
        compressed,
    ));

    let descriptor_id = doc.add_object(dictionary! {
        "Type" => "FontDescriptor",
        "FontName" => glyphless::FONT_NAME,
        "Flags" => 4, // symbolic
        "FontBBox" => vec![
            0.into(),
            i64::from(glyphless::DESCENT).into(),
            i64::from(glyphless::DEFAULT_WIDTH).into(),
            i64::from(glyphless::ASCENT).into(),
        ],
        "ItalicAngle" => 0,
        "Ascent" => i64::from(glyphless::ASCENT),
        "Descent" => i64::from(glyphless::DESCENT),
        "CapHeight" => 700,
        "StemV" => 80,
        "FontFile2" => Object::Reference(font_file_id),
    });

    // Every 2-byte CID maps to glyph 1, the blank.
    let mut cid_to_gid = Vec::with_capacity(0x10000 * 2);
    for _ in 0..0x10000u32 {
        cid_to_gid.extend_from_slice(&[0x00, 0x01]);
    }
    let cid_to_gid_id = doc.add_object(Stream::new(
        dictionary! { "Filter" => "FlateDecode" },
        flate_compress(&cid_to_gid)?,
    ));

    let cid_font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "CIDFontType2",
        "BaseFont" => glyphless::FONT_NAME,
        "CIDSystemInfo" => dictionary! {
            "Registry" => Object::String(b"Adobe".to_vec(), StringFormat::Literal),
            "Ordering" => Object::String(b"Identity".to_vec(), StringFormat::Literal),
            "Supplement" => 0,
        },
        "FontDescriptor" => Object::Reference(descriptor_id),
        "DW" => i64::from(glyphless::DEFAULT_WIDTH),
        "W" => width_ranges(),
        "CIDToGIDMap" => Object::Reference(cid_to_gid_id),
    });

    let to_unicode_id = doc.add_object(Stream::new(
        dictionary! { "Filter" => "FlateDecode" },
        flate_compress(IDENTITY_TOUNICODE.as_bytes())?,
    ));

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type0",
        "BaseFont" => glyphless::FONT_NAME,
        "Encoding" => "Identity-H",
        "DescendantFonts" => vec![Object::Reference(cid_font_id)],
        "ToUnicode" => Object::Reference(to_unicode_id),
    });
    Ok(font_id)
}

/// `/W` ranges giving zero width to combining marks and a full em to wide
/// CJK, mirroring [`glyphless::char_width_units`].
fn width_ranges() -> Vec<Object> {
    const ZERO: &[(u32, u32)] = &[
        (0x0300, 0x036F),
        (0x0483, 0x0489),
        (0x0591, 0x05BD),
        (0x064B, 0x065F),
        (0x1AB0, 0x1AFF),
        (0x1DC0, 0x1DFF),
        (0x200B, 0x200F),
        (0x202A, 0x202E),
        (0x2060, 0x2064),
        (0x20D0, 0x20FF),
        (0xFE00, 0xFE0F),
        (0xFE20, 0xFE2F),
        (0xFEFF, 0xFEFF),
    ];
    const WIDE: &[(u32, u32)] = &[
        (0x1100, 0x115F),
        (0x2E80, 0x303E),
        (0x3041, 0x33FF),
        (0x3400, 0x4DBF),
        (0x4E00, 0x9FFF),
        (0xA000, 0xA4CF),
        (0xAC00, 0xD7A3),
        (0xF900, 0xFAFF),
        (0xFE30, 0xFE4F),
        (0xFF00, 0xFF60),
        (0xFFE0, 0xFFE6),
    ];
    let mut w = Vec::new();
    for &(start, end) in ZERO {
        w.push(Object::Integer(start as i64));
        w.push(Object::Integer(end as i64));
        w.push(Object::Integer(0));
    }
    for &(start, end) in WIDE {
        w.push(Object::Integer(start as i64));
        w.push(Object::Integer(end as i64));
        w.push(Object::Integer(1000));
    }
    w
}

const IDENTITY_TOUNICODE: &str = r#"/CIDInit /ProcSet findresource begin
12 dict begin
begincmap
/CIDSystemInfo
<< /Registry (Adobe)
/Ordering (UCS)
/Supplement 0
>> def
/CMapName /Adobe-Identity-UCS def
/CMapType 2 def
1 begincodespacerange
<0000> <FFFF>
endcodespacerange
1 beginbfrange
<0000> <FFFF> <0000>
endbfrange
endcmap
CMapName currentdict /CMap defineresource pop
end
end
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hocr::{HocrLine, HocrWord};

    fn sample_page() -> HocrPage {
        HocrPage {
            width: 1700.0,
            height: 2200.0,
            lines: vec![HocrLine {
                bbox: [100.0, 200.0, 900.0, 260.0],
                words: vec![
                    HocrWord {
                        bbox: [100.0, 200.0, 400.0, 260.0],
                        text: "Hello".into(),
                        confidence: Some(95.0),
                    },
                    HocrWord {
                        bbox: [450.0, 200.0, 900.0, 260.0],
                        text: "world".into(),
                        confidence: Some(90.0),
                    },
                ],
            }],
        }
    }

    fn decode_first_page_content(doc: &Document) -> Content {
        let pages = doc.get_pages();
        let page_id = pages[&1];
        let data = doc.get_page_content(page_id).unwrap();
        Content::decode(&data).unwrap()
    }

    #[test]
    fn test_page_dimensions_at_200_dpi() {
        let doc = build_text_pdf(&sample_page(), 200.0).unwrap();
        let pages = doc.get_pages();
        let page = doc.get_dictionary(pages[&1]).unwrap();
        let mediabox = page.get(b"MediaBox").unwrap().as_array().unwrap();
        let w = match mediabox[2] {
            Object::Real(v) => f64::from(v),
            Object::Integer(v) => v as f64,
            _ => panic!(),
        };
        // 1700 px at 200 DPI = 8.5 in = 612 pt.
        assert!((w - 612.0).abs() < 0.01);
    }

    #[test]
    fn test_every_word_is_invisible() {
        let doc = build_text_pdf(&sample_page(), 200.0).unwrap();
        let content = decode_first_page_content(&doc);
        let mut tj = 0;
        let mut saw_visible_mode = false;
        let mut current_mode = 0i64;
        for op in &content.operations {
            match op.operator.as_str() {
                "BT" => current_mode = 0,
                "Tr" => {
                    current_mode = op.operands[0].as_i64().unwrap();
                }
                "Tj" => {
                    tj += 1;
                    if current_mode != 3 {
                        saw_visible_mode = true;
                    }
                }
                _ => {}
            }
        }
        assert_eq!(tj, 2);
        assert!(!saw_visible_mode, "all text must be render mode 3");
    }

    #[test]
    fn test_text_encoded_as_utf16be() {
        assert_eq!(encode_utf16be("AB"), vec![0x00, 0x41, 0x00, 0x42]);
        assert_eq!(encode_utf16be("\u{4E2D}"), vec![0x4E, 0x2D]);
        // Astral characters degrade to U+FFFD rather than breaking the
        // 2-byte code space.
        assert_eq!(encode_utf16be("\u{1F600}"), vec![0xFF, 0xFD]);
    }

    #[test]
    fn test_font_installed_under_expected_key() {
        let doc = build_text_pdf(&sample_page(), 200.0).unwrap();
        let pages = doc.get_pages();
        let page = doc.get_dictionary(pages[&1]).unwrap();
        let resources = page.get(b"Resources").unwrap().as_dict().unwrap();
        let fonts = resources.get(b"Font").unwrap().as_dict().unwrap();
        assert!(fonts.has(FONT_KEY.as_bytes()));
    }

    #[test]
    fn test_blank_page_renders_empty_content() {
        let page = HocrPage {
            width: 640.0,
            height: 480.0,
            lines: Vec::new(),
        };
        let doc = build_text_pdf(&page, 100.0).unwrap();
        let content = decode_first_page_content(&doc);
        assert!(content.operations.is_empty());
    }

    #[test]
    fn test_word_operations_horizontal_scaling() {
        // A 100 pt wide box holding "ab" (2 * 500 units) at font size 10:
        // natural width 10 pt, so Tz must be 1000%.
        let ops = word_operations([0.0, 0.0, 100.0, 10.0], "ab", 100.0, 1.0).unwrap();
        let tz = ops
            .iter()
            .find(|op| op.operator == "Tz")
            .expect("has Tz operation");
        match tz.operands[0] {
            Object::Real(v) => assert!((f64::from(v) - 1000.0).abs() < 0.1),
            _ => panic!("Tz operand must be real"),
        }
    }

    #[test]
    fn test_degenerate_boxes_skipped() {
        assert!(word_operations([5.0, 5.0, 5.0, 10.0], "x", 100.0, 1.0).is_none());
        assert!(word_operations([5.0, 5.0, 10.0, 5.0], "x", 100.0, 1.0).is_none());
    }

    #[test]
    fn test_render_hocr_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let hocr_path = dir.path().join("page.hocr");
        std::fs::write(
            &hocr_path,
            r#"<html xmlns="http://www.w3.org/1999/xhtml"><body>
            <div class='ocr_page' title='image "x"; bbox 0 0 850 1100'>
              <span class='ocr_line' title='bbox 100 100 800 160'>
                <span class='ocrx_word' title='bbox 100 100 300 160'>Test</span>
              </span>
            </div></body></html>"#,
        )
        .unwrap();
        let pdf_path = dir.path().join("page.pdf");
        render_hocr_page(&hocr_path, &pdf_path, 100.0).unwrap();

        let doc = Document::load(&pdf_path).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }
}
