//! Ghostscript adapter: page rasterization and PDF/A normalization.

use std::path::{Path, PathBuf};

use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, error};

use super::{program_path, run_command, stderr_excerpt};
use crate::error::{OcrWeaveError, Result};
use crate::resolution::Resolution;

const TOOL: &str = "gs";

static ERROR_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)error").expect("static regex"));

fn gs_program() -> PathBuf {
    #[cfg(windows)]
    {
        // The console binary has a different name on Windows.
        for name in ["gswin64c", "gswin32c"] {
            let path = program_path(name);
            if path.is_file() || path != Path::new(name) {
                return path;
            }
        }
    }
    program_path("gs")
}

pub async fn version() -> Result<String> {
    super::get_version(TOOL, gs_program(), None).await
}

/// Output raster device, promoted to the widest color model any page image
/// needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RasterDevice {
    /// 1-bit monochrome.
    Mono,
    /// 8-bit grayscale.
    Gray,
    /// 8-bit indexed color.
    Indexed,
    /// 24-bit RGB.
    Rgb,
}

impl RasterDevice {
    pub fn gs_name(self) -> &'static str {
        match self {
            RasterDevice::Mono => "pngmono",
            RasterDevice::Gray => "pnggray",
            RasterDevice::Indexed => "png256",
            RasterDevice::Rgb => "png16m",
        }
    }

    /// Grayscale JPEG device used for orientation previews.
    pub const PREVIEW_DEVICE: &'static str = "jpeggray";
}

/// Rasterize one page of a PDF to a PNG at `raster_dpi`.
///
/// `page_dpi` is the resolution the produced file should be *treated* as
/// having; it may differ from `raster_dpi` after Ghostscript's rounding, and
/// preserving it preserves the physical page size. If `rotation` is 90, 180,
/// or 270 the image is rotated counterclockwise by that angle after
/// rasterization, cancelling a clockwise page rotation; for 90 and 270 the
/// returned page DPI has its axes swapped.
#[allow(clippy::too_many_arguments)]
pub async fn rasterize_pdf(
    input_file: &Path,
    output_file: &Path,
    raster_device: &str,
    raster_dpi: Resolution,
    pageno: usize,
    page_dpi: Option<Resolution>,
    rotation: i32,
    filter_vector: bool,
) -> Result<Resolution> {
    let raster_dpi = raster_dpi.round(6);
    let mut page_dpi = page_dpi.unwrap_or(raster_dpi);

    let mut command = Command::new(gs_program());
    command
        .arg("-dQUIET")
        .arg("-dSAFER")
        .arg("-dBATCH")
        .arg("-dNOPAUSE")
        .arg(format!("-sDEVICE={raster_device}"))
        .arg(format!("-dFirstPage={pageno}"))
        .arg(format!("-dLastPage={pageno}"))
        .arg(format!("-r{:.6}x{:.6}", raster_dpi.x, raster_dpi.y));
    if filter_vector {
        command.arg("-dFILTERVECTOR");
    }
    command
        .arg("-o")
        .arg("-")
        .arg("-sstdout=%stderr")
        .arg("-dAutoRotatePages=/None")
        .arg("-f")
        .arg(input_file);

    let output = run_command(TOOL, &mut command).await?;
    if !output.status.success() {
        error!("{}", String::from_utf8_lossy(&output.stderr));
        return Err(OcrWeaveError::SubprocessOutput {
            tool: TOOL,
            message: "Ghostscript rasterizing failed".into(),
        });
    }
    report_stderr(&output.stderr);

    let mut image = image::load_from_memory(&output.stdout).map_err(|e| {
        OcrWeaveError::SubprocessOutput {
            tool: TOOL,
            message: format!("Ghostscript produced an unreadable raster: {e}"),
        }
    })?;

    if rotation != 0 {
        debug!("rotating raster output by {rotation}");
        // `rotation` is a clockwise angle; rotating counterclockwise by the
        // same amount cancels it. The image crate's rotateN are clockwise.
        image = match rotation {
            90 => image.rotate270(),
            180 => image.rotate180(),
            270 => image.rotate90(),
            _ => image,
        };
        if rotation % 180 == 90 {
            page_dpi = page_dpi.flip_axis();
        }
    }

    image
        .save(output_file)
        .map_err(|e| OcrWeaveError::Other(format!("cannot save raster image: {e}")))?;
    Ok(page_dpi)
}

/// PDF/A image compression strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PdfaCompression {
    #[default]
    Auto,
    Jpeg,
    Lossless,
}

/// Drive Ghostscript's pdfwrite device to produce a PDF/A.
///
/// `pdf_pages` is the working PDF followed by the pdfmark PostScript stub
/// declaring the OutputIntent. Ghostscript does not change its exit status
/// when it fails to achieve PDF/A, so the caller must verify the result
/// claims PDF/A afterwards.
pub async fn generate_pdfa(
    pdf_pages: &[&Path],
    output_file: &Path,
    compression: PdfaCompression,
    pdf_version: &str,
    pdfa_part: &str,
) -> Result<()> {
    let compression_args: &[&str] = match compression {
        PdfaCompression::Jpeg => &[
            "-dAutoFilterColorImages=false",
            "-dColorImageFilter=/DCTEncode",
            "-dAutoFilterGrayImages=false",
            "-dGrayImageFilter=/DCTEncode",
        ],
        PdfaCompression::Lossless => &[
            "-dAutoFilterColorImages=false",
            "-dColorImageFilter=/FlateEncode",
            "-dAutoFilterGrayImages=false",
            "-dGrayImageFilter=/FlateEncode",
        ],
        PdfaCompression::Auto => &[
            "-dAutoFilterColorImages=true",
            "-dAutoFilterGrayImages=true",
        ],
    };

    let mut command = Command::new(gs_program());
    command
        .arg("-dQUIET")
        .arg("-dBATCH")
        .arg("-dNOPAUSE")
        .arg("-dSAFER")
        .arg(format!("-dCompatibilityLevel={pdf_version}"))
        .arg("-sDEVICE=pdfwrite")
        .arg("-dAutoRotatePages=/None")
        .arg("-sColorConversionStrategy=RGB")
        .args(compression_args)
        .arg("-dJPEGQ=95")
        .arg(format!("-dPDFA={pdfa_part}"))
        .arg("-dPDFACompatibilityPolicy=1")
        .arg("-o")
        .arg(output_file)
        .arg("-sstdout=%stderr");
    for page in pdf_pages {
        command.arg(page);
    }

    let output = run_command(TOOL, &mut command).await?;
    if !output.status.success() {
        // The real PDF/A verdict comes from the post-check; a hard failure
        // here means Ghostscript could not write anything at all.
        error!("{}", String::from_utf8_lossy(&output.stderr));
        return Err(OcrWeaveError::SubprocessOutput {
            tool: TOOL,
            message: format!("Ghostscript PDF/A rendering failed: {}", stderr_excerpt(&output)),
        });
    }
    report_stderr(&output.stderr);
    Ok(())
}

fn report_stderr(stderr: &[u8]) {
    if stderr.is_empty() {
        return;
    }
    let text = String::from_utf8_lossy(stderr);
    if ERROR_PATTERN.is_match(&text) {
        error!("{}", text.trim());
    } else if text.contains("overprint mode not set") {
        // pdfwrite removed overprinting during conversion; harmless for
        // documents destined for screens.
        debug!("ghostscript removed overprint mode during conversion");
    } else if !text.trim().is_empty() {
        debug!("{}", text.trim());
    }
}

/// Decode a raster written by [`rasterize_pdf`].
pub fn load_raster(path: &Path) -> Result<DynamicImage> {
    image::open(path).map_err(|e| {
        OcrWeaveError::Other(format!("cannot load raster {}: {e}", path.display()))
    })
}
