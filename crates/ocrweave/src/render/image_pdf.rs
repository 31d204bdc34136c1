//! Wrapping a rasterized page image into a single-page PDF.
//!
//! The visible layer of a replaced page is one image drawn to fill the page
//! exactly. JPEG inputs pass through byte-for-byte under DCTDecode so no
//! generation loss occurs; everything else is embedded as flate-compressed
//! raw samples.

use std::path::Path;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Object, Stream};

use super::{flate_compress, single_page_document};
use crate::error::{OcrWeaveError, Result};
use crate::resolution::Resolution;

/// Convert `image_file` into a one-page PDF whose physical size is the image
/// size at `dpi`. Non-square resolutions are preserved.
pub fn image_to_pdf(image_file: &Path, output_pdf: &Path, dpi: Resolution) -> Result<()> {
    if dpi.x <= 0.0 || dpi.y <= 0.0 {
        return Err(OcrWeaveError::Other("image wrapper needs positive DPI".into()));
    }
    let bytes = std::fs::read(image_file)?;
    let embedded = prepare_image(&bytes)?;

    let width_pt = embedded.width as f64 / dpi.x * 72.0;
    let height_pt = embedded.height as f64 / dpi.y * 72.0;

    let (mut doc, page_id) = single_page_document(width_pt, height_pt);

    let image_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => embedded.width as i64,
            "Height" => embedded.height as i64,
            "ColorSpace" => embedded.colorspace,
            "BitsPerComponent" => 8,
            "Filter" => embedded.filter,
        },
        embedded.data,
    ));

    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Real(width_pt as f32),
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Real(height_pt as f32),
                    Object::Integer(0),
                    Object::Integer(0),
                ],
            ),
            Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        content
            .encode()
            .map_err(|e| OcrWeaveError::Other(format!("cannot encode page content: {e}")))?,
    ));

    let page = doc
        .get_dictionary_mut(page_id)
        .map_err(|e| OcrWeaveError::Other(format!("page object vanished: {e}")))?;
    page.set("Contents", Object::Reference(content_id));
    page.set(
        "Resources",
        dictionary! {
            "XObject" => dictionary! { "Im0" => Object::Reference(image_id) },
        },
    );

    doc.save(output_pdf)
        .map_err(|e| OcrWeaveError::Other(format!("cannot save image PDF: {e}")))?;
    Ok(())
}

struct EmbeddedImage {
    width: u32,
    height: u32,
    colorspace: &'static str,
    filter: &'static str,
    data: Vec<u8>,
}

fn prepare_image(bytes: &[u8]) -> Result<EmbeddedImage> {
    let is_jpeg = bytes.starts_with(&[0xFF, 0xD8, 0xFF]);
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| OcrWeaveError::Other(format!("cannot decode page image: {e}")))?;

    if is_jpeg {
        // DCT passthrough; the decoder is only consulted for geometry and
        // color model.
        let colorspace = match decoded.color().channel_count() {
            1 => "DeviceGray",
            _ => "DeviceRGB",
        };
        return Ok(EmbeddedImage {
            width: decoded.width(),
            height: decoded.height(),
            colorspace,
            filter: "DCTDecode",
            data: bytes.to_vec(),
        });
    }

    let (colorspace, raw) = match decoded {
        image::DynamicImage::ImageLuma8(gray) => {
            let (w, h) = gray.dimensions();
            ((w, h, "DeviceGray"), gray.into_raw())
        }
        other => {
            let rgb = other.to_rgb8();
            let (w, h) = rgb.dimensions();
            ((w, h, "DeviceRGB"), rgb.into_raw())
        }
    };
    Ok(EmbeddedImage {
        width: colorspace.0,
        height: colorspace.1,
        colorspace: colorspace.2,
        filter: "FlateDecode",
        data: flate_compress(&raw)?,
    })
}
