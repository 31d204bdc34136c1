//! Raster image preprocessing: OCR masking, background removal, deskew.
//!
//! These filters mirror what the external page-cleaning stack does, operating
//! on the square-DPI rasterization of a page. Each stage reads the previous
//! stage's output file and writes a new file, so any stage can be skipped by
//! passing the prior path through.

pub mod background;
pub mod deskew;
pub mod mask;

use std::path::Path;

use image::DynamicImage;

use crate::error::{OcrWeaveError, Result};

pub(crate) fn load(path: &Path) -> Result<DynamicImage> {
    image::open(path)
        .map_err(|e| OcrWeaveError::Other(format!("cannot load image {}: {e}", path.display())))
}

pub(crate) fn save(image: &DynamicImage, path: &Path) -> Result<()> {
    image
        .save(path)
        .map_err(|e| OcrWeaveError::Other(format!("cannot save image {}: {e}", path.display())))
}

/// Rotate a grayscale image by a small angle (degrees, counterclockwise),
/// sampling bilinearly and filling uncovered corners with white.
pub(crate) fn rotate_small_angle(src: &image::GrayImage, degrees: f64) -> image::GrayImage {
    let (w, h) = src.dimensions();
    let mut dst = image::GrayImage::from_pixel(w, h, image::Luma([255u8]));
    let rad = degrees.to_radians();
    let (sin, cos) = (rad.sin(), rad.cos());
    let (cx, cy) = (w as f64 / 2.0, h as f64 / 2.0);

    for y in 0..h {
        for x in 0..w {
            // Inverse mapping: where in the source does this output pixel
            // come from?
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            let sx = cos * dx + sin * dy + cx;
            let sy = -sin * dx + cos * dy + cy;
            if sx < 0.0 || sy < 0.0 || sx > (w - 1) as f64 || sy > (h - 1) as f64 {
                continue;
            }
            let x0 = sx.floor() as u32;
            let y0 = sy.floor() as u32;
            let x1 = (x0 + 1).min(w - 1);
            let y1 = (y0 + 1).min(h - 1);
            let fx = sx - x0 as f64;
            let fy = sy - y0 as f64;
            let p00 = src.get_pixel(x0, y0).0[0] as f64;
            let p10 = src.get_pixel(x1, y0).0[0] as f64;
            let p01 = src.get_pixel(x0, y1).0[0] as f64;
            let p11 = src.get_pixel(x1, y1).0[0] as f64;
            let value = p00 * (1.0 - fx) * (1.0 - fy)
                + p10 * fx * (1.0 - fy)
                + p01 * (1.0 - fx) * fy
                + p11 * fx * fy;
            dst.put_pixel(x, y, image::Luma([value.round().clamp(0.0, 255.0) as u8]));
        }
    }
    dst
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotate_small_angle_identity() {
        let mut src = image::GrayImage::from_pixel(20, 20, image::Luma([255]));
        src.put_pixel(10, 10, image::Luma([0]));
        let out = rotate_small_angle(&src, 0.0);
        assert_eq!(out.get_pixel(10, 10).0[0], 0);
    }

    #[test]
    fn test_rotate_small_angle_preserves_dimensions() {
        let src = image::GrayImage::from_pixel(31, 17, image::Luma([128]));
        let out = rotate_small_angle(&src, 2.5);
        assert_eq!(out.dimensions(), (31, 17));
    }
}
