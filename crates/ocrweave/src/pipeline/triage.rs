//! Input triage: PDFs pass through, single images are wrapped into a
//! one-page PDF before the pipeline proper begins.
//!
//! Wrapping an image requires a credible physical resolution. We honor an
//! explicit `--image-dpi`, otherwise look for one embedded in the file (PNG
//! `pHYs`, JPEG JFIF density); an absent or implausible value is an input
//! error rather than a guess.

use std::path::Path;

use tracing::{info, warn};

use crate::error::{OcrWeaveError, Result};
use crate::options::PipelineOptions;
use crate::render::image_pdf::image_to_pdf;
use crate::resolution::Resolution;

const METERS_PER_INCH: f64 = 0.0254;

/// Sniff whether a file looks like a PDF.
pub fn is_pdf(path: &Path) -> Result<bool> {
    let mut header = [0u8; 1024];
    let n = {
        use std::io::Read;
        let mut file = std::fs::File::open(path)?;
        file.read(&mut header)?
    };
    Ok(header[..n].windows(5).any(|w| w == b"%PDF-"))
}

/// Wrap a single input image into a one-page PDF at `output`.
pub fn image_to_single_page_pdf(
    input: &Path,
    output: &Path,
    options: &PipelineOptions,
) -> Result<()> {
    info!("input file is not a PDF, checking if it is an image");
    let bytes = std::fs::read(input)?;
    let decoded = image::load_from_memory(&bytes).map_err(|e| {
        OcrWeaveError::input(format!("unsupported input image: {e}"))
    })?;

    if decoded.color().has_alpha() {
        return Err(OcrWeaveError::input(
            "the input image has an alpha channel; remove the alpha channel first",
        ));
    }

    let dpi = match options.image_dpi {
        Some(dpi) => Resolution::square(dpi),
        None => {
            let embedded = embedded_dpi(&bytes);
            match embedded {
                Some(dpi) if dpi.x > 96.0 && dpi.y > 96.0 => dpi,
                Some(dpi) => {
                    warn!("image resolution: {dpi}");
                    return Err(OcrWeaveError::input(
                        "the input image's resolution (DPI) is not credible. Estimate \
                         the resolution at which the image was scanned and specify it \
                         using --image-dpi",
                    ));
                }
                None => {
                    return Err(OcrWeaveError::input(
                        "the input image has no resolution (DPI) in its metadata. \
                         Estimate the resolution at which the image was scanned and \
                         specify it using --image-dpi",
                    ));
                }
            }
        }
    };

    info!(
        "image size ({}, {}), resolution {dpi}",
        decoded.width(),
        decoded.height()
    );
    image_to_pdf(input, output, dpi)
}

/// Resolution embedded in the file's own metadata, if any.
pub fn embedded_dpi(bytes: &[u8]) -> Option<Resolution> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        png_phys_dpi(bytes)
    } else if bytes.starts_with(&[0xFF, 0xD8]) {
        jfif_dpi(bytes)
    } else {
        None
    }
}

/// Walk PNG chunks looking for `pHYs` with a pixels-per-meter unit.
fn png_phys_dpi(bytes: &[u8]) -> Option<Resolution> {
    let mut pos = 8; // past signature
    while pos + 8 <= bytes.len() {
        let length = u32::from_be_bytes(bytes.get(pos..pos + 4)?.try_into().ok()?) as usize;
        let chunk_type = bytes.get(pos + 4..pos + 8)?;
        if chunk_type == b"pHYs" && length >= 9 {
            let data = bytes.get(pos + 8..pos + 8 + 9)?;
            let x_ppm = u32::from_be_bytes(data[0..4].try_into().ok()?);
            let y_ppm = u32::from_be_bytes(data[4..8].try_into().ok()?);
            let unit = data[8];
            if unit == 1 && x_ppm > 0 && y_ppm > 0 {
                return Some(Resolution::new(
                    x_ppm as f64 * METERS_PER_INCH,
                    y_ppm as f64 * METERS_PER_INCH,
                ));
            }
            return None;
        }
        if chunk_type == b"IDAT" || chunk_type == b"IEND" {
            return None;
        }
        pos += 12 + length; // length + type + data + crc
    }
    None
}

/// Read the JFIF APP0 density fields.
fn jfif_dpi(bytes: &[u8]) -> Option<Resolution> {
    let mut pos = 2;
    while pos + 4 <= bytes.len() {
        if bytes[pos] != 0xFF {
            return None;
        }
        let marker = bytes[pos + 1];
        let length = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
        if marker == 0xE0
            && length >= 14
            && bytes.len() >= pos + 16
            && bytes.get(pos + 4..pos + 9)? == b"JFIF\0"
        {
            let units = bytes[pos + 11];
            let x = u16::from_be_bytes([bytes[pos + 12], bytes[pos + 13]]) as f64;
            let y = u16::from_be_bytes([bytes[pos + 14], bytes[pos + 15]]) as f64;
            return match units {
                1 if x > 0.0 && y > 0.0 => Some(Resolution::new(x, y)), // dots/inch
                2 if x > 0.0 && y > 0.0 => {
                    Some(Resolution::new(x * 2.54, y * 2.54)) // dots/cm
                }
                _ => None,
            };
        }
        if marker == 0xDA {
            return None; // start of scan; no JFIF header coming
        }
        pos += 2 + length;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_pdf_detection() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("a.pdf");
        std::fs::write(&pdf, b"%PDF-1.5\n%rest").unwrap();
        assert!(is_pdf(&pdf).unwrap());

        let not_pdf = dir.path().join("b.bin");
        std::fs::write(&not_pdf, b"PNG stuff").unwrap();
        assert!(!is_pdf(&not_pdf).unwrap());
    }

    #[test]
    fn test_png_without_phys_has_no_dpi() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("x.png");
        image::DynamicImage::new_luma8(10, 10).save(&png).unwrap();
        let bytes = std::fs::read(&png).unwrap();
        assert!(embedded_dpi(&bytes).is_none());
    }

    #[test]
    fn test_png_phys_parsed() {
        // Craft a minimal PNG prefix with a pHYs chunk at 300 DPI
        // (11811 pixels per meter).
        let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        // IHDR (13 bytes of zeros is fine for the scanner)
        bytes.extend_from_slice(&13u32.to_be_bytes());
        bytes.extend_from_slice(b"IHDR");
        bytes.extend_from_slice(&[0u8; 13 + 4]);
        // pHYs
        bytes.extend_from_slice(&9u32.to_be_bytes());
        bytes.extend_from_slice(b"pHYs");
        bytes.extend_from_slice(&11811u32.to_be_bytes());
        bytes.extend_from_slice(&11811u32.to_be_bytes());
        bytes.push(1);
        bytes.extend_from_slice(&[0u8; 4]); // crc
        let dpi = embedded_dpi(&bytes).unwrap();
        assert!((dpi.x - 300.0).abs() < 0.5);
    }

    #[test]
    fn test_image_without_dpi_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("x.png");
        image::DynamicImage::new_luma8(10, 10).save(&png).unwrap();
        let options = PipelineOptions::default();
        let err =
            image_to_single_page_pdf(&png, &dir.path().join("out.pdf"), &options).unwrap_err();
        assert!(matches!(err, OcrWeaveError::InputFile { .. }));
    }

    #[test]
    fn test_image_with_explicit_dpi_wrapped() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("x.png");
        image::DynamicImage::new_luma8(100, 100).save(&png).unwrap();
        let options = PipelineOptions {
            image_dpi: Some(150.0),
            ..Default::default()
        };
        let out = dir.path().join("out.pdf");
        image_to_single_page_pdf(&png, &out, &options).unwrap();
        let doc = lopdf::Document::load(&out).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn test_alpha_image_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("x.png");
        image::DynamicImage::new_rgba8(10, 10).save(&png).unwrap();
        let options = PipelineOptions {
            image_dpi: Some(300.0),
            ..Default::default()
        };
        let err =
            image_to_single_page_pdf(&png, &dir.path().join("out.pdf"), &options).unwrap_err();
        assert!(matches!(err, OcrWeaveError::InputFile { .. }));
    }
}
