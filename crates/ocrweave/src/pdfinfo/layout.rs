//! Detailed per-page text layout analysis.
//!
//! Walks the content stream's text objects and produces one [`TextBox`] per
//! text-showing operation, carrying an approximate bounding box in PDF
//! points, a visibility flag (render mode 3 is invisible), and a corruption
//! flag for text that cannot be mapped back to Unicode. This is the
//! information `--redo-ocr` needs to mask visible text before OCR and to
//! warn about unmappable glyphs.

use std::collections::HashMap;

use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::warn;

use super::content_stream::Matrix;
use super::{inherited, page_contents, resolve, TextBox};
use crate::error::Result;

/// Per-font facts needed to decode show strings.
#[derive(Debug, Clone, Default)]
struct FontInfo {
    /// Type0 fonts use 2-byte codes (we assume Identity-style CMaps).
    two_byte_codes: bool,
    /// code -> unicode string, from the /ToUnicode CMap when present.
    to_unicode: Option<HashMap<u32, String>>,
}

/// Analyze one page and return its text boxes.
pub fn analyze_text_boxes(doc: &Document, page_id: ObjectId) -> Result<Vec<TextBox>> {
    let page = match doc.get_dictionary(page_id) {
        Ok(page) => page,
        Err(_) => return Ok(Vec::new()),
    };
    let fonts = page_fonts(doc, page);
    let data = page_contents(doc, page_id)?;
    let content = match Content::decode(&data) {
        Ok(content) => content,
        Err(e) => {
            warn!("cannot parse content stream for layout analysis: {e}");
            return Ok(Vec::new());
        }
    };
    Ok(walk_text_objects(&content, &fonts))
}

/// Decide whether a page "has text", ignoring text confined to the margins.
///
/// A margin band of 12.5% on each side is excluded; only boxes intersecting
/// the interior region count.
pub fn page_has_interior_text(
    boxes: impl Iterator<Item = [f64; 4]>,
    page_width: f64,
    page_height: f64,
) -> bool {
    let margin_ratio = 0.125;
    // Interior rect as (left, bottom, right, top) in the first quadrant.
    let interior = [
        margin_ratio * page_width,
        margin_ratio * page_height,
        (1.0 - margin_ratio) * page_width,
        (1.0 - margin_ratio) * page_height,
    ];
    for bbox in boxes {
        let intersects = bbox[0] < interior[2]
            && bbox[2] > interior[0]
            && bbox[1] < interior[3]
            && bbox[3] > interior[1];
        if intersects {
            return true;
        }
    }
    false
}

fn page_fonts(doc: &Document, page: &Dictionary) -> HashMap<String, FontInfo> {
    let mut fonts = HashMap::new();
    let Some(Object::Dictionary(resources)) =
        inherited(doc, page, b"Resources").map(|o| resolve(doc, o))
    else {
        return fonts;
    };
    let Some(Object::Dictionary(font_dict)) = resources.get(b"Font").ok().map(|o| resolve(doc, o))
    else {
        return fonts;
    };
    for (name, entry) in font_dict.iter() {
        let Object::Dictionary(font) = resolve(doc, entry) else {
            continue;
        };
        let subtype = font
            .get(b"Subtype")
            .ok()
            .and_then(|o| o.as_name().ok())
            .map(|n| String::from_utf8_lossy(n).into_owned())
            .unwrap_or_default();
        let two_byte_codes = subtype == "Type0";
        let to_unicode = font
            .get(b"ToUnicode")
            .ok()
            .map(|o| resolve(doc, o))
            .and_then(|obj| match obj {
                Object::Stream(stream) => stream
                    .decompressed_content()
                    .ok()
                    .or_else(|| Some(stream.content.clone())),
                _ => None,
            })
            .map(|data| parse_tounicode_cmap(&data));
        fonts.insert(
            String::from_utf8_lossy(name).into_owned(),
            FontInfo {
                two_byte_codes,
                to_unicode,
            },
        );
    }
    fonts
}

/// Parse the `bfchar` and `bfrange` sections of a ToUnicode CMap.
fn parse_tounicode_cmap(data: &[u8]) -> HashMap<u32, String> {
    let text = String::from_utf8_lossy(data);
    let mut map = HashMap::new();

    let mut tokens = text.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        match token {
            "beginbfchar" => {
                while let Some(&next) = tokens.peek() {
                    if next == "endbfchar" {
                        tokens.next();
                        break;
                    }
                    let src = tokens.next().and_then(hex_token);
                    let dst = tokens.next().and_then(hex_token_utf16);
                    if let (Some(src), Some(dst)) = (src, dst) {
                        map.insert(src, dst);
                    }
                }
            }
            "beginbfrange" => {
                while let Some(&next) = tokens.peek() {
                    if next == "endbfrange" {
                        tokens.next();
                        break;
                    }
                    let lo = tokens.next().and_then(hex_token);
                    let hi = tokens.next().and_then(hex_token);
                    let Some(dst_token) = tokens.next() else { break };
                    if dst_token.starts_with('[') {
                        // Array form: individually listed destinations.
                        let (Some(lo), Some(hi)) = (lo, hi) else { continue };
                        let mut code = lo;
                        let mut token = dst_token.to_string();
                        loop {
                            let is_last = token.ends_with(']');
                            let cleaned = token.trim_start_matches('[').trim_end_matches(']');
                            if let Some(dst) = hex_token_utf16(cleaned) {
                                if code <= hi {
                                    map.insert(code, dst);
                                    code += 1;
                                }
                            }
                            if is_last || code > hi {
                                break;
                            }
                            match tokens.next() {
                                Some(t) => token = t.to_string(),
                                None => break,
                            }
                        }
                    } else if let (Some(lo), Some(hi), Some(base)) =
                        (lo, hi, hex_token(dst_token))
                    {
                        // Contiguous range starting at a base codepoint.
                        for (offset, code) in (lo..=hi.min(lo + 0xFFFF)).enumerate() {
                            if let Some(ch) = char::from_u32(base + offset as u32) {
                                map.insert(code, ch.to_string());
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }
    map
}

fn hex_token(token: &str) -> Option<u32> {
    let inner = token.strip_prefix('<')?.strip_suffix('>')?;
    u32::from_str_radix(inner, 16).ok()
}

fn hex_token_utf16(token: &str) -> Option<String> {
    let inner = token.strip_prefix('<')?.strip_suffix('>')?;
    if inner.len() % 4 != 0 {
        // Odd-length destination; fall back to a single codepoint parse.
        return u32::from_str_radix(inner, 16)
            .ok()
            .and_then(char::from_u32)
            .map(|c| c.to_string());
    }
    let mut units = Vec::with_capacity(inner.len() / 4);
    for chunk in inner.as_bytes().chunks(4) {
        let s = std::str::from_utf8(chunk).ok()?;
        units.push(u16::from_str_radix(s, 16).ok()?);
    }
    Some(String::from_utf16_lossy(&units))
}

struct TextState {
    ctm: Matrix,
    ctm_stack: Vec<Matrix>,
    tm: Matrix,
    tlm: Matrix,
    font: Option<String>,
    font_size: f64,
    leading: f64,
    render_mode: i64,
    in_text: bool,
}

impl TextState {
    fn new() -> Self {
        Self {
            ctm: Matrix::identity(),
            ctm_stack: Vec::new(),
            tm: Matrix::identity(),
            tlm: Matrix::identity(),
            font: None,
            font_size: 0.0,
            leading: 0.0,
            render_mode: 0,
            in_text: false,
        }
    }

    fn next_line(&mut self, tx: f64, ty: f64) {
        self.tlm = Matrix::translated(tx, ty).cat(&self.tlm);
        self.tm = self.tlm;
    }
}

fn walk_text_objects(content: &Content, fonts: &HashMap<String, FontInfo>) -> Vec<TextBox> {
    let mut state = TextState::new();
    let mut boxes = Vec::new();

    for op in &content.operations {
        let operands = op.operands.as_slice();
        match op.operator.as_str() {
            "q" => state.ctm_stack.push(state.ctm),
            "Q" => {
                if let Some(prev) = state.ctm_stack.pop() {
                    state.ctm = prev;
                }
            }
            "cm" => {
                if let Some(m) = matrix6_operands(operands) {
                    state.ctm = m.cat(&state.ctm);
                }
            }
            "BT" => {
                state.in_text = true;
                state.tm = Matrix::identity();
                state.tlm = Matrix::identity();
                state.render_mode = 0;
            }
            "ET" => state.in_text = false,
            "Tf" => {
                state.font = operands.first().and_then(name_operand);
                state.font_size = operands.get(1).and_then(number_operand).unwrap_or(0.0);
            }
            "Tr" => {
                state.render_mode = operands
                    .first()
                    .and_then(|o| o.as_i64().ok())
                    .unwrap_or(state.render_mode);
            }
            "TL" => {
                state.leading = operands.first().and_then(number_operand).unwrap_or(0.0);
            }
            "Td" => {
                let tx = operands.first().and_then(number_operand).unwrap_or(0.0);
                let ty = operands.get(1).and_then(number_operand).unwrap_or(0.0);
                state.next_line(tx, ty);
            }
            "TD" => {
                let tx = operands.first().and_then(number_operand).unwrap_or(0.0);
                let ty = operands.get(1).and_then(number_operand).unwrap_or(0.0);
                state.leading = -ty;
                state.next_line(tx, ty);
            }
            "T*" => {
                let leading = state.leading;
                state.next_line(0.0, -leading);
            }
            "Tm" => {
                if let Some(m) = matrix6_operands(operands) {
                    state.tm = m;
                    state.tlm = m;
                }
            }
            "Tj" => {
                if state.in_text {
                    show_string(&mut state, operands.first(), fonts, &mut boxes);
                }
            }
            "'" => {
                if state.in_text {
                    let leading = state.leading;
                    state.next_line(0.0, -leading);
                    show_string(&mut state, operands.first(), fonts, &mut boxes);
                }
            }
            "\"" => {
                if state.in_text {
                    let leading = state.leading;
                    state.next_line(0.0, -leading);
                    show_string(&mut state, operands.get(2), fonts, &mut boxes);
                }
            }
            "TJ" => {
                if state.in_text {
                    if let Some(Object::Array(items)) = operands.first() {
                        for item in items {
                            match item {
                                Object::String(_, _) => {
                                    show_string(&mut state, Some(item), fonts, &mut boxes);
                                }
                                // Negative adjustments move right in text space.
                                Object::Integer(_) | Object::Real(_) => {
                                    let adj = number_operand(item).unwrap_or(0.0);
                                    let tx = -adj / 1000.0 * state.font_size;
                                    state.tm = Matrix::translated(tx, 0.0).cat(&state.tm);
                                }
                                _ => {}
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }
    boxes
}

fn show_string(
    state: &mut TextState,
    operand: Option<&Object>,
    fonts: &HashMap<String, FontInfo>,
    boxes: &mut Vec<TextBox>,
) {
    let Some(Object::String(bytes, _)) = operand else {
        return;
    };
    if bytes.is_empty() {
        return;
    }
    let font = state.font.as_deref().and_then(|name| fonts.get(name));
    let (decoded, corrupt) = decode_show_string(bytes, font);
    if decoded == 0 {
        return;
    }

    // Average glyph advance of half an em is a serviceable estimate for the
    // box width; the mask painter dilates boxes anyway.
    let text_width = decoded as f64 * 0.5 * state.font_size;
    let text_height = state.font_size;

    let trm = state.tm.cat(&state.ctm);
    let corners = [
        transform_point(&trm, 0.0, 0.0),
        transform_point(&trm, text_width, 0.0),
        transform_point(&trm, 0.0, text_height),
        transform_point(&trm, text_width, text_height),
    ];
    let bbox = [
        corners.iter().map(|c| c.0).fold(f64::INFINITY, f64::min),
        corners.iter().map(|c| c.1).fold(f64::INFINITY, f64::min),
        corners.iter().map(|c| c.0).fold(f64::NEG_INFINITY, f64::max),
        corners.iter().map(|c| c.1).fold(f64::NEG_INFINITY, f64::max),
    ];
    boxes.push(TextBox {
        bbox,
        visible: state.render_mode != 3,
        corrupt,
    });

    // Advance the text matrix past what we just showed.
    state.tm = Matrix::translated(text_width, 0.0).cat(&state.tm);
}

/// Returns (number of decoded characters, corrupt flag).
fn decode_show_string(bytes: &[u8], font: Option<&FontInfo>) -> (usize, bool) {
    match font {
        Some(info) => {
            let codes: Vec<u32> = if info.two_byte_codes {
                bytes
                    .chunks(2)
                    .map(|c| {
                        if c.len() == 2 {
                            u32::from(c[0]) << 8 | u32::from(c[1])
                        } else {
                            u32::from(c[0])
                        }
                    })
                    .collect()
            } else {
                bytes.iter().map(|&b| u32::from(b)).collect()
            };
            match &info.to_unicode {
                Some(map) => {
                    let corrupt = codes.iter().any(|code| {
                        map.get(code).map_or(true, |s| s.contains('\u{FFFD}'))
                    });
                    (codes.len(), corrupt)
                }
                // A composite font with no ToUnicode cannot be mapped back to
                // characters; a simple font falls back to its byte encoding.
                None => (codes.len(), info.two_byte_codes),
            }
        }
        None => (bytes.len(), false),
    }
}

fn transform_point(m: &Matrix, x: f64, y: f64) -> (f64, f64) {
    (m.a * x + m.c * y + m.e, m.b * x + m.d * y + m.f)
}

fn matrix6_operands(operands: &[Object]) -> Option<Matrix> {
    if operands.len() < 6 {
        return None;
    }
    let mut s = [0.0f64; 6];
    for (slot, obj) in s.iter_mut().zip(operands.iter()) {
        *slot = number_operand(obj)?;
    }
    Some(Matrix::from_shorthand(s))
}

fn number_operand(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

fn name_operand(obj: &Object) -> Option<String> {
    match obj {
        Object::Name(n) => Some(String::from_utf8_lossy(n).into_owned()),
        _ => None,
    }
}
