//! hOCR parsing.
//!
//! hOCR is the HTML-shaped OCR output format: nested elements whose `class`
//! attributes identify pages, lines, and words, and whose `title` attributes
//! carry properties like `bbox 102 33 514 90` in image pixel coordinates
//! (origin top-left).

use roxmltree::{Document, Node};

use crate::error::{OcrWeaveError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct HocrWord {
    /// (x0, y0, x1, y1) in image pixels, top-left origin.
    pub bbox: [f64; 4],
    pub text: String,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HocrLine {
    pub bbox: [f64; 4],
    pub words: Vec<HocrWord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HocrPage {
    pub width: f64,
    pub height: f64,
    pub lines: Vec<HocrLine>,
}

impl HocrPage {
    pub fn is_blank(&self) -> bool {
        self.lines.iter().all(|l| l.words.is_empty())
    }
}

/// Element classes that represent a line of text.
const LINE_CLASSES: &[&str] = &["ocr_line", "ocr_header", "ocr_caption", "ocr_textfloat"];

/// Parse the first page of an hOCR document.
pub fn parse_hocr(xml: &str) -> Result<HocrPage> {
    let doc = Document::parse(xml)
        .map_err(|e| OcrWeaveError::Other(format!("cannot parse hOCR: {e}")))?;

    let page_node = doc
        .descendants()
        .find(|n| has_class(n, "ocr_page"))
        .ok_or_else(|| OcrWeaveError::Other("hOCR document has no ocr_page".into()))?;

    let (width, height) = page_bbox(&page_node)
        .ok_or_else(|| OcrWeaveError::Other("hOCR page has no bbox".into()))?;

    let mut lines = Vec::new();
    for node in page_node.descendants() {
        if !LINE_CLASSES.iter().any(|c| has_class(&node, c)) {
            continue;
        }
        let Some(line_bbox) = title_bbox(&node) else {
            continue;
        };
        let mut words = Vec::new();
        for word_node in node.descendants().filter(|n| has_class(n, "ocrx_word")) {
            let Some(bbox) = title_bbox(&word_node) else {
                continue;
            };
            let text = element_text(&word_node);
            if text.trim().is_empty() {
                continue;
            }
            words.push(HocrWord {
                bbox,
                text: text.trim().to_string(),
                confidence: title_property(&word_node, "x_wconf")
                    .and_then(|v| v.parse().ok()),
            });
        }
        lines.push(HocrLine {
            bbox: line_bbox,
            words,
        });
    }

    Ok(HocrPage {
        width,
        height,
        lines,
    })
}

fn has_class(node: &Node, class: &str) -> bool {
    node.attribute("class")
        .map_or(false, |attr| attr.split_whitespace().any(|c| c == class))
}

fn page_bbox(node: &Node) -> Option<(f64, f64)> {
    let bbox = title_bbox(node)?;
    Some((bbox[2] - bbox[0], bbox[3] - bbox[1]))
}

/// Extract the `bbox` property from a node's hOCR title attribute.
fn title_bbox(node: &Node) -> Option<[f64; 4]> {
    let value = title_property(node, "bbox")?;
    let mut coords = [0.0f64; 4];
    let mut parts = value.split_whitespace();
    for slot in coords.iter_mut() {
        *slot = parts.next()?.parse().ok()?;
    }
    Some(coords)
}

/// hOCR title attributes are semicolon-separated `name value...` properties.
fn title_property(node: &Node, name: &str) -> Option<String> {
    let title = node.attribute("title")?;
    for clause in title.split(';') {
        let clause = clause.trim();
        if let Some(rest) = clause.strip_prefix(name) {
            if rest.starts_with(char::is_whitespace) {
                return Some(rest.trim().to_string());
            }
        }
    }
    None
}

/// Concatenated text of an element and its descendants.
fn element_text(node: &Node) -> String {
    let mut text = String::new();
    for descendant in node.descendants() {
        if descendant.is_text() {
            if let Some(t) = descendant.text() {
                text.push_str(t);
            }
        }
    }
    text
}
