//! PDF content stream interpretation.
//!
//! We track only the current transformation matrix (CTM) through the graphics
//! stack; a full interpreter would need to track far more state. The CTM is
//! all that is needed to work out the effective resolution of every image
//! drawn on a page.
//!
//! Per the PDF specification the graphics stack is limited to 32 entries.
//! Other viewers tolerate more, so we warn past that limit and fail only
//! past a hard limit that bounds memory. A stack underflow is undefined in
//! the PDF specification; we leave the CTM unchanged and carry on.

use std::collections::HashMap;

use lopdf::content::Content;
use lopdf::Object;
use tracing::warn;

use crate::error::{OcrWeaveError, Result};
use crate::resolution::Resolution;

/// The PDF specification's limit on graphics stack depth; exceeding it
/// draws a warning.
const STACK_SOFT_LIMIT: usize = 32;
/// Hard limit that bounds our memory; exceeding it is fatal for the page.
const STACK_HARD_LIMIT: usize = 128;

pub const UNIT_SQUARE: [f64; 6] = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

/// A PDF affine transform in row-vector convention:
///
/// ```text
/// [x' y' 1] = [x y 1] @ | a b 0 |
///                       | c d 0 |
///                       | e f 1 |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Matrix {
    pub fn identity() -> Self {
        Self::from_shorthand(UNIT_SQUARE)
    }

    pub fn from_shorthand(s: [f64; 6]) -> Self {
        Self {
            a: s[0],
            b: s[1],
            c: s[2],
            d: s[3],
            e: s[4],
            f: s[5],
        }
    }

    pub fn shorthand(&self) -> [f64; 6] {
        [self.a, self.b, self.c, self.d, self.e, self.f]
    }

    /// `self` applied first, then `rhs` (PDF `cm` concatenation order).
    pub fn cat(&self, rhs: &Matrix) -> Matrix {
        Matrix {
            a: self.a * rhs.a + self.b * rhs.c,
            b: self.a * rhs.b + self.b * rhs.d,
            c: self.c * rhs.a + self.d * rhs.c,
            d: self.c * rhs.b + self.d * rhs.d,
            e: self.e * rhs.a + self.f * rhs.c + rhs.e,
            f: self.e * rhs.b + self.f * rhs.d + rhs.f,
        }
    }

    pub fn translated(tx: f64, ty: f64) -> Matrix {
        Matrix::from_shorthand([1.0, 0.0, 0.0, 1.0, tx, ty])
    }

    pub fn scaled(sx: f64, sy: f64) -> Matrix {
        Matrix::from_shorthand([sx, 0.0, 0.0, sy, 0.0, 0.0])
    }

    /// Counterclockwise rotation by `degrees`.
    pub fn rotated(degrees: f64) -> Matrix {
        let r = degrees.to_radians();
        let (sin, cos) = (r.sin(), r.cos());
        Matrix::from_shorthand([cos, sin, -sin, cos, 0.0, 0.0])
    }
}

/// One drawing of an XObject via the `Do` operator.
#[derive(Debug, Clone)]
pub struct XobjectDraw {
    pub name: String,
    pub shorthand: [f64; 6],
    pub stack_depth: usize,
}

/// One inline image (`BI`/`ID`/`EI`) found in the stream.
#[derive(Debug, Clone)]
pub struct InlineImageDraw {
    pub settings: InlineImageSettings,
    pub shorthand: [f64; 6],
    pub stack_depth: usize,
}

/// The subset of the inline image dictionary we understand.
#[derive(Debug, Clone, Default)]
pub struct InlineImageSettings {
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub bits_per_component: Option<i64>,
    pub colorspace: Option<String>,
    pub filter: Option<String>,
    pub image_mask: bool,
}

/// Everything the interpreter learned about one content stream.
#[derive(Debug, Default)]
pub struct ContentsInfo {
    pub xobject_draws: Vec<XobjectDraw>,
    pub inline_images: Vec<InlineImageDraw>,
    pub found_vector: bool,
    pub found_text: bool,
    /// Indexes into `xobject_draws`, keyed by XObject name.
    pub name_index: HashMap<String, Vec<usize>>,
}

const VECTOR_OPS: &[&str] = &["S", "s", "f", "F", "f*", "B", "B*", "b", "b*"];
const TEXT_SHOWING_OPS: &[&str] = &["Tj", "TJ", "'", "\""];

fn operand_number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

fn operand_name(obj: &Object) -> Option<String> {
    match obj {
        Object::Name(n) => Some(String::from_utf8_lossy(n).into_owned()),
        _ => None,
    }
}

fn matrix_from_operands(operands: &[Object]) -> Option<Matrix> {
    if operands.len() < 6 {
        return None;
    }
    let mut s = [0.0f64; 6];
    for (slot, obj) in s.iter_mut().zip(operands.iter()) {
        *slot = operand_number(obj)?;
    }
    Some(Matrix::from_shorthand(s))
}

/// Parse the key/value pairs of an inline image dictionary.
///
/// lopdf surfaces the `BI` operands either as a dictionary object or as a
/// flattened name/value sequence depending on version; accept both, and both
/// the abbreviated and full key spellings.
fn inline_settings(operands: &[Object]) -> InlineImageSettings {
    let mut settings = InlineImageSettings::default();
    let mut apply = |key: &str, value: &Object| match key {
        "W" | "Width" => settings.width = value.as_i64().ok(),
        "H" | "Height" => settings.height = value.as_i64().ok(),
        "BPC" | "BitsPerComponent" => settings.bits_per_component = value.as_i64().ok(),
        "CS" | "ColorSpace" => settings.colorspace = operand_name(value),
        "F" | "Filter" => {
            settings.filter = match value {
                Object::Array(items) => items.first().and_then(operand_name),
                other => operand_name(other),
            }
        }
        "IM" | "ImageMask" => settings.image_mask = value.as_bool().unwrap_or(false),
        _ => {}
    };
    if let Some(Object::Dictionary(dict)) = operands.first() {
        for (key, value) in dict.iter() {
            apply(&String::from_utf8_lossy(key), value);
        }
        return settings;
    }
    let mut iter = operands.iter();
    while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
        if let Some(key) = operand_name(key) {
            apply(&key, value);
        }
    }
    settings
}

/// Interpret a decoded content stream, starting from `initial` as the CTM.
pub fn interpret_contents(content: &Content, initial: Matrix) -> Result<ContentsInfo> {
    let mut stack: Vec<Matrix> = Vec::new();
    let mut ctm = initial;
    let mut info = ContentsInfo::default();
    let mut soft_limit_reported = false;

    for (n, op) in normalized_operations(content).into_iter().enumerate() {
        let (operator, operands) = op;
        match operator {
            "q" => {
                stack.push(ctm);
                if stack.len() > STACK_SOFT_LIMIT {
                    if stack.len() > STACK_HARD_LIMIT {
                        return Err(OcrWeaveError::input(format!(
                            "PDF graphics stack overflowed hard limit at operator {n}"
                        )));
                    }
                    if !soft_limit_reported {
                        warn!("PDF graphics stack overflowed spec limit");
                        soft_limit_reported = true;
                    }
                }
            }
            "Q" => match stack.pop() {
                Some(prev) => ctm = prev,
                None => {
                    // Leaving the CTM unchanged is the only sensible recovery.
                    warn!("PDF graphics stack underflowed - PDF may be malformed");
                }
            },
            "cm" => {
                let concat = matrix_from_operands(operands).ok_or_else(|| {
                    OcrWeaveError::input(
                        "PDF content stream is corrupt - this PDF is malformed. Use a \
                         PDF editor that is capable of visually inspecting the PDF.",
                    )
                })?;
                ctm = concat.cat(&ctm);
            }
            "Do" => {
                if let Some(name) = operands.first().and_then(operand_name) {
                    let draw = XobjectDraw {
                        name: name.clone(),
                        shorthand: ctm.shorthand(),
                        stack_depth: stack.len(),
                    };
                    info.xobject_draws.push(draw);
                    info.name_index
                        .entry(name)
                        .or_default()
                        .push(info.xobject_draws.len() - 1);
                }
            }
            "BI" => {
                info.inline_images.push(InlineImageDraw {
                    settings: inline_settings(operands),
                    shorthand: ctm.shorthand(),
                    stack_depth: stack.len(),
                });
            }
            "ID" | "EI" => {}
            op if VECTOR_OPS.contains(&op) => info.found_vector = true,
            op if TEXT_SHOWING_OPS.contains(&op) => info.found_text = true,
            _ => {}
        }
    }

    Ok(info)
}

/// Flatten into `(operator, operands)` pairs, splitting any run-together
/// `qQ` operator tokens (zero or more `Q` followed by one or more `q`) into
/// individual pushes and pops.
fn normalized_operations(content: &Content) -> Vec<(&str, &[Object])> {
    let mut out = Vec::with_capacity(content.operations.len());
    for op in &content.operations {
        let operator = op.operator.as_str();
        if is_qq_run(operator) && operator.len() > 1 {
            for i in 0..operator.len() {
                out.push((&operator[i..i + 1], &[] as &[Object]));
            }
        } else {
            out.push((operator, op.operands.as_slice()));
        }
    }
    out
}

fn is_qq_run(operator: &str) -> bool {
    let mut chars = operator.chars().peekable();
    while chars.peek() == Some(&'Q') {
        chars.next();
    }
    let mut saw_q = false;
    for ch in chars {
        if ch != 'q' {
            return false;
        }
        saw_q = true;
    }
    saw_q
}

/// Whether the shorthand is approximately the identity transform.
///
/// At least one PDF in the wild draws an image when the graphics stack depth
/// is 0 with the CTM at identity, so the image lands in a 1x1 PDF-unit square
/// and its apparent DPI exceeds 100,000. Such draws are excluded from the
/// page DPI maximum.
pub fn is_unit_square(shorthand: &[f64; 6]) -> bool {
    shorthand
        .iter()
        .zip(UNIT_SQUARE.iter())
        .all(|(a, b)| approx_eq_rel(*a, *b, 1e-3))
}

fn approx_eq_rel(a: f64, b: f64, rel_tol: f64) -> bool {
    (a - b).abs() <= rel_tol * a.abs().max(b.abs()) || (a - b).abs() <= 1e-6
}

/// Effective DPI of an image drawn with the given CTM shorthand.
///
/// The drawn width of the image is the magnitude of the transformed width
/// basis vector, `hypot(a, b)`, and likewise `hypot(c, d)` for the height;
/// translation cancels out. The effective DPI is the ratio of pixel size to
/// drawn size, times 72. A zero drawn dimension yields infinite DPI, which
/// excludes the image from resolution planning.
pub fn image_dpi(shorthand: &[f64; 6], pixels: (i64, i64)) -> Resolution {
    let drawn_w = shorthand[0].hypot(shorthand[1]);
    let drawn_h = shorthand[2].hypot(shorthand[3]);
    let calc = |drawn: f64, px: i64| -> f64 {
        if drawn == 0.0 {
            f64::INFINITY
        } else {
            px as f64 / drawn * 72.0
        }
    };
    Resolution::new(calc(drawn_w, pixels.0), calc(drawn_h, pixels.1))
}
