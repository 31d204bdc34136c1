//! OCR input masking.
//!
//! When re-OCRing a page that already has text, the engine must not see the
//! existing visible text or it would be recognized twice. White rectangles
//! are painted over the affected text boxes before OCR. The painted image is
//! never shown to a user; it exists only as engine input.

use std::path::Path;

use image::{DynamicImage, GenericImage, Rgba};
use tracing::debug;

use super::{load, save};
use crate::error::Result;
use crate::resolution::Resolution;

/// Paint white over each text box, given in PDF points with a bottom-left
/// origin. Pixel space has a top-left origin, so Y flips.
pub fn mask_text_areas(
    input_file: &Path,
    output_file: &Path,
    text_boxes: &[[f64; 4]],
    dpi: Resolution,
) -> Result<()> {
    let mut image = load(input_file)?;
    let height = image.height() as i64;
    let xscale = dpi.x / 72.0;
    let yscale = dpi.y / 72.0;

    for bbox in text_boxes {
        let left = (bbox[0] * xscale).round() as i64;
        let top = height - (bbox[3] * yscale).round() as i64;
        let right = (bbox[2] * xscale).round() as i64;
        let bottom = height - (bbox[1] * yscale).round() as i64;
        debug!("blanking {:?}", (left, top, right, bottom));
        fill_white(&mut image, left, top, right, bottom);
    }

    save(&image, output_file)
}

fn fill_white(image: &mut DynamicImage, left: i64, top: i64, right: i64, bottom: i64) {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let x0 = left.clamp(0, w);
    let x1 = right.clamp(0, w);
    let y0 = top.clamp(0, h);
    let y1 = bottom.clamp(0, h);
    match image {
        DynamicImage::ImageLuma8(buf) => {
            for y in y0..y1 {
                for x in x0..x1 {
                    buf.put_pixel(x as u32, y as u32, image::Luma([255]));
                }
            }
        }
        DynamicImage::ImageRgb8(buf) => {
            for y in y0..y1 {
                for x in x0..x1 {
                    buf.put_pixel(x as u32, y as u32, image::Rgb([255, 255, 255]));
                }
            }
        }
        other => {
            for y in y0..y1 {
                for x in x0..x1 {
                    other.put_pixel(x as u32, y as u32, Rgba([255, 255, 255, 255]));
                }
            }
        }
    }
}
