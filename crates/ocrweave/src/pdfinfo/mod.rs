//! Input PDF inspection.
//!
//! Builds a [`PdfInfo`] describing every page of the input without modifying
//! it: page geometry, rotation, UserUnit, the raster images drawn on the page
//! together with their effective DPI, and whether vector or text marks are
//! present. With detailed analysis enabled, also extracts per-text-box
//! visibility and corruption flags for `--redo-ocr`.

pub mod content_stream;
pub mod layout;

use std::collections::HashSet;
use std::path::Path;

use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{OcrWeaveError, Result};
use crate::resolution::Resolution;
use content_stream::{
    image_dpi, interpret_contents, is_unit_square, ContentsInfo, Matrix,
};

/// Maximum Form XObject nesting depth we will recurse into.
const MAX_FORM_DEPTH: usize = 10;

/// A detection that may not have been performed at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Tristate {
    Yes,
    No,
    /// Detailed analysis was not run for this page.
    Unknown,
}

impl Tristate {
    pub fn is_yes(self) -> bool {
        self == Tristate::Yes
    }

    pub fn from_bool(b: bool) -> Self {
        if b { Tristate::Yes } else { Tristate::No }
    }
}

/// Image color model, with an escape hatch for colorspaces we do not map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Colorspace {
    Gray,
    Rgb,
    Cmyk,
    Lab,
    Icc { components: u8 },
    Indexed,
    Separation,
    DeviceN,
    Pattern,
    Jpeg2000,
    Unknown(String),
}

/// Image stream encoding, with an escape hatch for unrecognized filters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Encoding {
    Ccitt,
    Jpeg,
    Jpeg2000,
    Jbig2,
    Flate,
    Lzw,
    AsciiHex,
    Ascii85,
    RunLength,
    None,
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImageKind {
    Image,
    /// `/ImageMask true`: a 1-bit stencil painted with the current color.
    StencilMask,
}

/// One drawing of a raster image on a page.
#[derive(Debug, Clone, Serialize)]
pub struct ImageInfo {
    pub name: String,
    pub kind: ImageKind,
    pub width: i64,
    pub height: i64,
    pub bits_per_component: i64,
    pub colorspace: Colorspace,
    pub encoding: Encoding,
    /// CTM shorthand at draw time.
    pub shorthand: [f64; 6],
}

impl ImageInfo {
    /// Effective resolution of this drawing of the image.
    pub fn dpi(&self) -> Resolution {
        image_dpi(&self.shorthand, (self.width, self.height))
    }
}

/// A text box found by detailed layout analysis.
#[derive(Debug, Clone, Serialize)]
pub struct TextBox {
    /// (left, bottom, right, top) in PDF points.
    pub bbox: [f64; 4],
    /// Render mode 3 text is invisible.
    pub visible: bool,
    /// True when the text decodes to U+FFFD and cannot be mapped back to
    /// characters.
    pub corrupt: bool,
}

/// Everything the inspector learned about one page.
#[derive(Debug, Clone, Serialize)]
pub struct PageInfo {
    pub page_index: usize,
    /// (left, bottom, right, top) in PDF points.
    pub mediabox: [f64; 4],
    pub user_unit: f64,
    /// Normalized to one of 0, 90, 180, 270.
    pub rotation: i32,
    pub has_text: Tristate,
    pub has_vector: Tristate,
    pub images: Vec<ImageInfo>,
    pub text_boxes: Vec<TextBox>,
}

impl PageInfo {
    pub fn width_pt(&self) -> f64 {
        self.mediabox[2] - self.mediabox[0]
    }

    pub fn height_pt(&self) -> f64 {
        self.mediabox[3] - self.mediabox[1]
    }

    pub fn width_inches(&self) -> f64 {
        self.width_pt() * self.user_unit / 72.0
    }

    pub fn height_inches(&self) -> f64 {
        self.height_pt() * self.user_unit / 72.0
    }

    /// Maximum effective DPI over all images, excluding infinite axes from
    /// degenerate draws.
    pub fn dpi(&self) -> Resolution {
        self.images
            .iter()
            .map(|im| im.dpi())
            .filter(|d| d.x.is_finite() && d.y.is_finite())
            .fold(Resolution::default(), Resolution::take_max)
    }

    pub fn width_pixels(&self) -> i64 {
        (self.dpi().x * self.width_inches()).round() as i64
    }

    pub fn height_pixels(&self) -> i64 {
        (self.dpi().y * self.height_inches()).round() as i64
    }

    pub fn has_corrupt_text(&self) -> bool {
        self.text_boxes.iter().any(|tb| tb.corrupt)
    }

    /// Text box bboxes filtered by visibility and corruption.
    ///
    /// `None` means "either way".
    pub fn text_areas(
        &self,
        visible: Option<bool>,
        corrupt: Option<bool>,
    ) -> impl Iterator<Item = [f64; 4]> + '_ {
        self.text_boxes
            .iter()
            .filter(move |tb| visible.map_or(true, |want| tb.visible == want))
            .filter(move |tb| corrupt.map_or(true, |want| tb.corrupt == want))
            .map(|tb| tb.bbox)
    }

    /// Minimum PDF version able to express this page.
    pub fn min_version(&self) -> &'static str {
        if (self.user_unit - 1.0).abs() > f64::EPSILON {
            "1.6"
        } else {
            "1.5"
        }
    }
}

/// Summary information about an input PDF.
#[derive(Debug)]
pub struct PdfInfo {
    pages: Vec<PageInfo>,
    has_acroform: bool,
    needs_rendering: bool,
}

impl PdfInfo {
    /// Inspect `input` and build per-page information.
    ///
    /// With `detailed`, each inspected page also gets text-box level analysis
    /// (needed for `--redo-ocr` masking).
    pub fn inspect(input: &Path, detailed: bool) -> Result<Self> {
        let doc = Document::load(input).map_err(|e| {
            OcrWeaveError::input_from(format!("{} is not a valid PDF", input.display()), e)
        })?;
        if doc.is_encrypted() {
            return Err(OcrWeaveError::EncryptedPdf);
        }

        let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
        let mut pages = Vec::with_capacity(page_ids.len());
        for (index, page_id) in page_ids.iter().enumerate() {
            pages.push(inspect_page(&doc, *page_id, index, detailed)?);
        }

        let catalog = doc
            .catalog()
            .map_err(|e| OcrWeaveError::input_from("PDF has no document catalog", e))?;
        let needs_rendering = catalog
            .get(b"NeedsRendering")
            .ok()
            .and_then(|o| o.as_bool().ok())
            .unwrap_or(false);
        let has_acroform = match catalog.get(b"AcroForm").ok().map(|o| resolve(&doc, o)) {
            Some(Object::Dictionary(acroform)) => {
                let has_fields = acroform
                    .get(b"Fields")
                    .ok()
                    .map(|o| resolve(&doc, o))
                    .and_then(|o| o.as_array().ok())
                    .is_some_and(|fields| !fields.is_empty());
                has_fields || acroform.has(b"XFA")
            }
            _ => false,
        };

        Ok(Self {
            pages,
            has_acroform,
            needs_rendering,
        })
    }

    pub fn pages(&self) -> &[PageInfo] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn has_acroform(&self) -> bool {
        self.has_acroform
    }

    pub fn needs_rendering(&self) -> bool {
        self.needs_rendering
    }

    pub fn has_userunit(&self) -> bool {
        self.pages
            .iter()
            .any(|p| (p.user_unit - 1.0).abs() > f64::EPSILON)
    }

    /// The minimum version is the maximum any page requires.
    pub fn min_version(&self) -> &'static str {
        self.pages
            .iter()
            .map(|p| p.min_version())
            .max()
            .unwrap_or("1.5")
    }
}

fn inspect_page(
    doc: &Document,
    page_id: ObjectId,
    page_index: usize,
    detailed: bool,
) -> Result<PageInfo> {
    let page = doc.get_dictionary(page_id).map_err(|e| {
        OcrWeaveError::input_from(format!("cannot read page {}", page_index + 1), e)
    })?;

    let mediabox = inherited(doc, page, b"MediaBox")
        .and_then(|obj| rectangle(doc, obj))
        .unwrap_or_else(|| {
            warn!("page {} has no MediaBox; assuming letter size", page_index + 1);
            [0.0, 0.0, 612.0, 792.0]
        });

    let user_unit = page
        .get(b"UserUnit")
        .ok()
        .map(|o| resolve(doc, o))
        .and_then(number)
        .unwrap_or(1.0);

    let rotation = inherited(doc, page, b"Rotate")
        .map(|o| resolve(doc, o))
        .and_then(number)
        .map(normalize_rotation)
        .unwrap_or(0);

    // UserUnit scales user space; feed it in as the initial CTM so image DPI
    // comes out in physical units.
    let initial = Matrix::from_shorthand([user_unit, 0.0, 0.0, user_unit, 0.0, 0.0]);

    let mut found = PageContent::default();
    let mut visiting = HashSet::new();
    visiting.insert(page_id);
    let contents = page_contents(doc, page_id)?;
    scan_container(doc, page, &contents, initial, 0, &mut visiting, &mut found)?;

    let text_boxes = if detailed {
        layout::analyze_text_boxes(doc, page_id)?
    } else {
        Vec::new()
    };

    let has_text = if detailed {
        // Text hidden entirely in the margins does not make a page "have
        // text"; only interior boxes count.
        let boxes = text_boxes.iter().map(|tb| tb.bbox);
        Tristate::from_bool(layout::page_has_interior_text(
            boxes,
            mediabox[2] - mediabox[0],
            mediabox[3] - mediabox[1],
        ))
    } else {
        Tristate::from_bool(found.has_text)
    };

    debug!(
        page = page_index + 1,
        images = found.images.len(),
        has_text = ?has_text,
        has_vector = found.has_vector,
        rotation,
        "inspected page"
    );

    Ok(PageInfo {
        page_index,
        mediabox,
        user_unit,
        rotation,
        has_text,
        has_vector: Tristate::from_bool(found.has_vector),
        images: found.images,
        text_boxes,
    })
}

#[derive(Debug, Default)]
struct PageContent {
    images: Vec<ImageInfo>,
    has_vector: bool,
    has_text: bool,
}

/// Interpret a container's content and collect image draws, recursing into
/// Form XObjects with their `/Matrix` prepended to the CTM.
fn scan_container(
    doc: &Document,
    container: &Dictionary,
    content_data: &[u8],
    initial: Matrix,
    depth: usize,
    visiting: &mut HashSet<ObjectId>,
    found: &mut PageContent,
) -> Result<()> {
    let content = match Content::decode(content_data) {
        Ok(content) => content,
        Err(e) => {
            warn!("could not parse a content stream; ignoring it: {e}");
            return Ok(());
        }
    };
    let info = interpret_contents(&content, initial)?;
    found.has_vector |= info.found_vector;
    found.has_text |= info.found_text;

    collect_inline_images(&info, found);
    collect_xobject_images(doc, container, &info, found);

    if depth >= MAX_FORM_DEPTH {
        warn!("form XObjects nested deeper than {MAX_FORM_DEPTH}; not recursing further");
        return Ok(());
    }

    // Recurse into Form XObjects, once per drawing event so each instance
    // gets its own CTM.
    for (name, xobj_id, xobj) in form_xobjects(doc, container) {
        let Some(indices) = info.name_index.get(&name) else {
            continue;
        };
        if visiting.contains(&xobj_id) {
            warn!("cyclic form XObject {name}; skipping");
            continue;
        }
        let form_matrix = xobj
            .dict
            .get(b"Matrix")
            .ok()
            .and_then(|obj| matrix6(doc, obj))
            .unwrap_or_else(Matrix::identity);
        let data = match xobj.decompressed_content() {
            Ok(data) => data,
            Err(_) => xobj.content.clone(),
        };
        visiting.insert(xobj_id);
        for &ix in indices {
            let draw_ctm = Matrix::from_shorthand(info.xobject_draws[ix].shorthand);
            let form_initial = form_matrix.cat(&draw_ctm);
            scan_container(doc, &xobj.dict, &data, form_initial, depth + 1, visiting, found)?;
        }
        visiting.remove(&xobj_id);
    }

    Ok(())
}

fn collect_inline_images(info: &ContentsInfo, found: &mut PageContent) {
    for (n, inline) in info.inline_images.iter().enumerate() {
        let settings = &inline.settings;
        let (Some(width), Some(height)) = (settings.width, settings.height) else {
            debug!("inline image without dimensions; not counted for DPI");
            continue;
        };
        found.images.push(ImageInfo {
            name: format!("inline-{n:02}"),
            kind: if settings.image_mask {
                ImageKind::StencilMask
            } else {
                ImageKind::Image
            },
            width,
            height,
            bits_per_component: settings.bits_per_component.unwrap_or(1),
            colorspace: settings
                .colorspace
                .as_deref()
                .map(colorspace_from_name)
                .unwrap_or(Colorspace::Gray),
            encoding: settings
                .filter
                .as_deref()
                .map(encoding_from_name)
                .unwrap_or(Encoding::None),
            shorthand: inline.shorthand,
        });
    }
}

fn collect_xobject_images(
    doc: &Document,
    container: &Dictionary,
    info: &ContentsInfo,
    found: &mut PageContent,
) {
    for (name, _id, stream) in image_xobjects(doc, container) {
        let Some(indices) = info.name_index.get(&name) else {
            continue;
        };
        for &ix in indices {
            let draw = &info.xobject_draws[ix];
            if draw.stack_depth == 0 && is_unit_square(&draw.shorthand) {
                // Degenerate 1x1 pt draw; see content_stream::is_unit_square.
                continue;
            }
            if let Some(image) = image_info_from_stream(doc, &name, stream, draw.shorthand) {
                found.images.push(image);
            }
        }
    }
}

fn image_info_from_stream(
    doc: &Document,
    name: &str,
    stream: &lopdf::Stream,
    shorthand: [f64; 6],
) -> Option<ImageInfo> {
    let dict = &stream.dict;
    let width = dict.get(b"Width").ok().map(|o| resolve(doc, o))?.as_i64().ok()?;
    let height = dict.get(b"Height").ok().map(|o| resolve(doc, o))?.as_i64().ok()?;
    let image_mask = dict
        .get(b"ImageMask")
        .ok()
        .and_then(|o| o.as_bool().ok())
        .unwrap_or(false);
    let bits_per_component = dict
        .get(b"BitsPerComponent")
        .ok()
        .map(|o| resolve(doc, o))
        .and_then(|o| o.as_i64().ok())
        .unwrap_or(if image_mask { 1 } else { 8 });

    let encoding = dict
        .get(b"Filter")
        .ok()
        .map(|o| resolve(doc, o))
        .map(|obj| match obj {
            Object::Array(filters) => filters
                .first()
                .map(|f| resolve(doc, f))
                .and_then(|f| f.as_name().ok())
                .map(|n| encoding_from_name(&String::from_utf8_lossy(n)))
                .unwrap_or(Encoding::None),
            Object::Name(n) => encoding_from_name(&String::from_utf8_lossy(n)),
            _ => Encoding::None,
        })
        .unwrap_or(Encoding::None);

    let mut colorspace = dict
        .get(b"ColorSpace")
        .ok()
        .map(|o| resolve(doc, o))
        .map(|obj| parse_colorspace(doc, obj))
        .unwrap_or(Colorspace::Gray);
    if encoding == Encoding::Jpeg2000 {
        // JPX carries its own colorspace inside the codestream.
        colorspace = Colorspace::Jpeg2000;
    }

    Some(ImageInfo {
        name: name.to_string(),
        kind: if image_mask {
            ImageKind::StencilMask
        } else {
            ImageKind::Image
        },
        width,
        height,
        bits_per_component,
        colorspace,
        encoding,
        shorthand,
    })
}

fn parse_colorspace(doc: &Document, obj: &Object) -> Colorspace {
    match obj {
        Object::Name(name) => colorspace_from_name(&String::from_utf8_lossy(name)),
        Object::Array(parts) => {
            let family = parts
                .first()
                .map(|o| resolve(doc, o))
                .and_then(|o| o.as_name().ok())
                .map(|n| String::from_utf8_lossy(n).into_owned())
                .unwrap_or_default();
            match family.as_str() {
                "ICCBased" => {
                    let components = parts
                        .get(1)
                        .map(|o| resolve(doc, o))
                        .and_then(|o| match o {
                            Object::Stream(s) => {
                                s.dict.get(b"N").ok().and_then(|n| n.as_i64().ok())
                            }
                            _ => None,
                        })
                        .unwrap_or(3);
                    Colorspace::Icc {
                        components: components.clamp(1, 4) as u8,
                    }
                }
                "Indexed" | "I" => Colorspace::Indexed,
                "Separation" => Colorspace::Separation,
                "DeviceN" => Colorspace::DeviceN,
                "Pattern" => Colorspace::Pattern,
                "CalRGB" => Colorspace::Rgb,
                "CalGray" => Colorspace::Gray,
                "Lab" => Colorspace::Lab,
                other => Colorspace::Unknown(other.to_string()),
            }
        }
        other => Colorspace::Unknown(format!("{other:?}")),
    }
}

fn colorspace_from_name(name: &str) -> Colorspace {
    match name {
        "DeviceGray" | "CalGray" | "G" => Colorspace::Gray,
        "DeviceRGB" | "CalRGB" | "RGB" => Colorspace::Rgb,
        "DeviceCMYK" | "CMYK" => Colorspace::Cmyk,
        "Lab" => Colorspace::Lab,
        "Indexed" | "I" => Colorspace::Indexed,
        "Separation" => Colorspace::Separation,
        "DeviceN" => Colorspace::DeviceN,
        "Pattern" => Colorspace::Pattern,
        other => Colorspace::Unknown(other.to_string()),
    }
}

fn encoding_from_name(name: &str) -> Encoding {
    match name {
        "CCITTFaxDecode" | "CCF" => Encoding::Ccitt,
        "DCTDecode" | "DCT" => Encoding::Jpeg,
        "JPXDecode" => Encoding::Jpeg2000,
        "JBIG2Decode" => Encoding::Jbig2,
        "FlateDecode" | "Fl" => Encoding::Flate,
        "LZWDecode" | "LZW" => Encoding::Lzw,
        "ASCIIHexDecode" | "AHx" => Encoding::AsciiHex,
        "ASCII85Decode" | "A85" => Encoding::Ascii85,
        "RunLengthDecode" | "RL" => Encoding::RunLength,
        other => Encoding::Unknown(other.to_string()),
    }
}

/// Image XObjects reachable from the container's `/Resources /XObject`.
fn image_xobjects<'a>(
    doc: &'a Document,
    container: &'a Dictionary,
) -> Vec<(String, ObjectId, &'a lopdf::Stream)> {
    xobjects_of_subtype(doc, container, b"Image")
}

/// Form XObjects reachable from the container's `/Resources /XObject`.
fn form_xobjects<'a>(
    doc: &'a Document,
    container: &'a Dictionary,
) -> Vec<(String, ObjectId, &'a lopdf::Stream)> {
    xobjects_of_subtype(doc, container, b"Form")
}

fn xobjects_of_subtype<'a>(
    doc: &'a Document,
    container: &'a Dictionary,
    subtype: &[u8],
) -> Vec<(String, ObjectId, &'a lopdf::Stream)> {
    let mut result = Vec::new();
    let Some(resources) = inherited(doc, container, b"Resources").map(|o| resolve(doc, o)) else {
        return result;
    };
    let Object::Dictionary(resources) = resources else {
        return result;
    };
    let Some(Object::Dictionary(xobjects)) =
        resources.get(b"XObject").ok().map(|o| resolve(doc, o))
    else {
        return result;
    };
    for (name, candidate) in xobjects.iter() {
        let id = candidate.as_reference().ok();
        let Object::Stream(stream) = resolve(doc, candidate) else {
            continue;
        };
        let matches = stream
            .dict
            .get(b"Subtype")
            .ok()
            .and_then(|o| o.as_name().ok())
            .is_some_and(|n| n == subtype);
        if matches {
            result.push((
                String::from_utf8_lossy(name).into_owned(),
                id.unwrap_or((0, 0)),
                stream,
            ));
        }
    }
    result
}

/// Concatenated, decoded content streams of a page.
///
/// A page with no `/Contents` is legal (it is blank) and an unreadable
/// stream is recoverable; both come back empty.
pub(crate) fn page_contents(doc: &Document, page_id: ObjectId) -> Result<Vec<u8>> {
    match doc.get_page_content(page_id) {
        Ok(data) => Ok(data),
        Err(e) => {
            warn!("cannot read a page content stream; treating page as blank: {e}");
            Ok(Vec::new())
        }
    }
}

/// Resolve reference chains to a direct object.
pub(crate) fn resolve<'a>(doc: &'a Document, mut obj: &'a Object) -> &'a Object {
    // Bounded to defend against reference cycles.
    for _ in 0..32 {
        match obj {
            Object::Reference(id) => match doc.get_object(*id) {
                Ok(target) => obj = target,
                Err(_) => return obj,
            },
            _ => return obj,
        }
    }
    obj
}

/// Look up a possibly-inherited page attribute by walking `/Parent`.
pub(crate) fn inherited<'a>(
    doc: &'a Document,
    dict: &'a Dictionary,
    key: &[u8],
) -> Option<&'a Object> {
    let mut current = dict;
    for _ in 0..64 {
        if let Ok(obj) = current.get(key) {
            return Some(obj);
        }
        let parent_id = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = doc.get_dictionary(parent_id).ok()?;
    }
    None
}

fn matrix6(doc: &Document, obj: &Object) -> Option<Matrix> {
    let arr = resolve(doc, obj).as_array().ok()?;
    if arr.len() < 6 {
        return None;
    }
    let mut s = [0.0f64; 6];
    for (slot, item) in s.iter_mut().zip(arr.iter()) {
        *slot = number(resolve(doc, item))?;
    }
    Some(Matrix::from_shorthand(s))
}

fn rectangle(doc: &Document, obj: &Object) -> Option<[f64; 4]> {
    let arr = resolve(doc, obj).as_array().ok()?;
    if arr.len() != 4 {
        return None;
    }
    let mut rect = [0.0f64; 4];
    for (slot, item) in rect.iter_mut().zip(arr.iter()) {
        *slot = number(resolve(doc, item))?;
    }
    Some(rect)
}

pub(crate) fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

/// Snap an arbitrary `/Rotate` value to the nearest cardinal angle in 0..360.
fn normalize_rotation(value: f64) -> i32 {
    let r = (value.round() as i64).rem_euclid(360);
    let snapped = ((r as f64 / 90.0).round() as i64 * 90).rem_euclid(360);
    snapped as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Stream};

    fn single_image_pdf(ctm: [f32; 6]) -> Document {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let image = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 850,
                "Height" => 1100,
                "BitsPerComponent" => 8,
                "ColorSpace" => "DeviceGray",
                "Filter" => "DCTDecode",
            },
            vec![0u8; 10],
        );
        let image_id = doc.add_object(image);
        let content = Content {
            operations: vec![
                lopdf::content::Operation::new("q", vec![]),
                lopdf::content::Operation::new(
                    "cm",
                    ctm.iter().map(|v| Object::Real(*v)).collect(),
                ),
                lopdf::content::Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                lopdf::content::Operation::new("Q", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().unwrap(),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => Object::Reference(content_id),
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => Object::Reference(image_id) },
            },
        });
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => 1,
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(pages_id),
        });
        doc.trailer.set("Root", catalog_id);
        doc
    }

    fn inspect_doc(doc: &Document) -> PageInfo {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.pdf");
        let mut doc = doc.clone();
        doc.save(&path).unwrap();
        let info = PdfInfo::inspect(&path, false).unwrap();
        info.pages()[0].clone()
    }

    #[test]
    fn test_inspect_image_dpi() {
        let doc = single_image_pdf([612.0, 0.0, 0.0, 792.0, 0.0, 0.0]);
        let page = inspect_doc(&doc);
        assert_eq!(page.images.len(), 1);
        let dpi = page.images[0].dpi();
        assert!((dpi.x - 100.0).abs() < 0.01, "dpi.x = {}", dpi.x);
        assert!((dpi.y - 100.0).abs() < 0.01);
        assert_eq!(page.images[0].colorspace, Colorspace::Gray);
        assert_eq!(page.images[0].encoding, Encoding::Jpeg);
        assert_eq!(page.has_text, Tristate::No);
    }

    #[test]
    fn test_inspect_mediabox_and_rotation_defaults() {
        let doc = single_image_pdf([612.0, 0.0, 0.0, 792.0, 0.0, 0.0]);
        let page = inspect_doc(&doc);
        assert_eq!(page.mediabox, [0.0, 0.0, 612.0, 792.0]);
        assert_eq!(page.rotation, 0);
        assert!((page.user_unit - 1.0).abs() < f64::EPSILON);
        assert!((page.width_inches() - 8.5).abs() < 1e-9);
    }

    #[test]
    fn test_unit_square_draw_excluded_from_page_dpi() {
        let doc = single_image_pdf([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        let page = inspect_doc(&doc);
        // Drawn at stack depth 1, so not excluded; drawn dimension of 1 pt
        // still yields a finite (huge) DPI. Move the draw to depth 0 to test
        // the exclusion path separately via content_stream tests.
        assert_eq!(page.images.len(), 1);
    }

    #[test]
    fn test_normalize_rotation() {
        assert_eq!(normalize_rotation(0.0), 0);
        assert_eq!(normalize_rotation(90.0), 90);
        assert_eq!(normalize_rotation(-90.0), 270);
        assert_eq!(normalize_rotation(450.0), 90);
        assert_eq!(normalize_rotation(89.0), 90);
        assert_eq!(normalize_rotation(359.0), 0);
    }

    #[test]
    fn test_tristate() {
        assert!(Tristate::Yes.is_yes());
        assert!(!Tristate::No.is_yes());
        assert!(!Tristate::Unknown.is_yes());
        assert_eq!(Tristate::from_bool(true), Tristate::Yes);
    }

    #[test]
    fn test_encoding_names() {
        assert_eq!(encoding_from_name("DCTDecode"), Encoding::Jpeg);
        assert_eq!(encoding_from_name("CCF"), Encoding::Ccitt);
        assert_eq!(
            encoding_from_name("MadeUpDecode"),
            Encoding::Unknown("MadeUpDecode".into())
        );
    }

    #[test]
    fn test_colorspace_names() {
        assert_eq!(colorspace_from_name("DeviceRGB"), Colorspace::Rgb);
        assert_eq!(colorspace_from_name("G"), Colorspace::Gray);
        assert!(matches!(
            colorspace_from_name("Esoteric"),
            Colorspace::Unknown(_)
        ));
    }
}
