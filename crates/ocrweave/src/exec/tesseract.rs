//! Tesseract adapter: orientation detection, hOCR, and text-only PDF output.
//!
//! Tesseract is always invoked with `OMP_THREAD_LIMIT=1`; parallelism happens
//! at the page level, and letting the engine spin up its own threads on top
//! of that only adds contention.

use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;
use tracing::{error, info, warn};

use super::{program_path, run_command};
use crate::error::{OcrWeaveError, Result};

const TOOL: &str = "tesseract";

static VERSION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"tesseract\s+v?(\S+)").expect("static regex"));

/// hOCR document reporting no text, sized to match an input image.
const NULL_HOCR_TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Transitional//EN"
    "http://www.w3.org/TR/xhtml1/DTD/xhtml1-transitional.dtd">
<html xmlns="http://www.w3.org/1999/xhtml" xml:lang="en" lang="en">
 <head>
  <title></title>
<meta http-equiv="Content-Type" content="text/html;charset=utf-8" />
  <meta name='ocr-system' content='tesseract' />
  <meta name='ocr-capabilities' content='ocr_page ocr_carea ocr_par ocr_line ocrx_word ocrp_wconf'/>
</head>
<body>
  <div class='ocr_page' id='page_1' title='image "_blank.png"; bbox 0 0 {w} {h}; ppageno 0'>
  </div>
 </body>
</html>
"#;

pub const SKIPPED_PAGE_SENTINEL: &str = "[skipped page]";

/// Engine parameters shared by every per-page invocation.
#[derive(Debug, Clone)]
pub struct TesseractParams {
    pub languages: Vec<String>,
    pub engine_mode: Option<u32>,
    pub pagesegmode: Option<u32>,
    pub tessconfig: Vec<String>,
    /// Zero disables OCR entirely: the adapter behaves as if every page
    /// timed out, which still yields a coherent output file.
    pub timeout: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationConfidence {
    /// Clockwise angle of the page's text: 0, 90, 180, or 270.
    pub angle: i32,
    pub confidence: f64,
}

pub async fn version() -> Result<String> {
    super::get_version(TOOL, program_path(TOOL), Some(&VERSION_PATTERN)).await
}

fn base_command(params: &TesseractParams) -> Command {
    let mut command = Command::new(program_path(TOOL));
    // One thread per engine; we parallelize across pages instead.
    command.env("OMP_THREAD_LIMIT", "1");
    if !params.languages.is_empty() {
        command.arg("-l").arg(params.languages.join("+"));
    }
    if let Some(oem) = params.engine_mode {
        command.arg("--oem").arg(oem.to_string());
    }
    command
}

fn timeout_of(params: &TesseractParams) -> Option<Duration> {
    if params.timeout > 0.0 {
        Some(Duration::from_secs_f64(params.timeout))
    } else {
        None
    }
}

/// Run tesseract with the per-page timeout. `Ok(None)` means timed out.
async fn run_with_timeout(
    command: &mut Command,
    timeout: Option<Duration>,
) -> Result<Option<Output>> {
    match timeout {
        None => Ok(None),
        Some(limit) => match tokio::time::timeout(limit, run_command(TOOL, command)).await {
            Ok(result) => result.map(Some),
            // kill_on_drop reaps the child when the future is dropped.
            Err(_elapsed) => Ok(None),
        },
    }
}

/// Detect page orientation from a low-DPI preview.
///
/// Timeouts and tesseract's "too few characters" / "image too large"
/// conditions are recoverable and return zero confidence.
pub async fn get_orientation(
    preview: &Path,
    params: &TesseractParams,
) -> Result<OrientationConfidence> {
    let mut command = Command::new(program_path(TOOL));
    command.env("OMP_THREAD_LIMIT", "1");
    command.arg("-l").arg("osd");
    if let Some(oem) = params.engine_mode {
        command.arg("--oem").arg(oem.to_string());
    }
    command.arg("--psm").arg("0").arg(preview).arg("stdout");

    let zero = OrientationConfidence {
        angle: 0,
        confidence: 0.0,
    };
    if params.timeout == 0.0 {
        return Ok(zero);
    }
    let Some(output) = run_with_timeout(&mut command, timeout_of(params)).await? else {
        warn!("orientation check took too long - assuming upright");
        return Ok(zero);
    };

    let combined = combined_output(&output);
    if !output.status.success() {
        scan_output_for_errors(&combined, preview)?;
        if combined.contains("Too few characters. Skipping this page")
            || combined.contains("Image too large")
        {
            return Ok(zero);
        }
        return Err(OcrWeaveError::SubprocessOutput {
            tool: TOOL,
            message: format!("orientation detection failed: {}", combined.trim()),
        });
    }

    let mut angle = 0i32;
    let mut confidence = 0.0f64;
    for line in combined.lines() {
        if let Some((key, value)) = line.split_once(':') {
            match key.trim() {
                "Orientation in degrees" => {
                    angle = value.trim().parse().unwrap_or(0);
                }
                "Orientation confidence" => {
                    confidence = value.trim().parse().unwrap_or(0.0);
                }
                _ => {}
            }
        }
    }
    Ok(OrientationConfidence {
        angle: angle.rem_euclid(360),
        confidence,
    })
}

/// Produce `<output_hocr>` and `<output_sidecar>` for one page image.
///
/// On timeout or "image too large", a null hOCR of the image's size and a
/// skipped-page sidecar are substituted.
pub async fn generate_hocr(
    input_image: &Path,
    output_hocr: &Path,
    output_sidecar: &Path,
    dpi: f64,
    params: &TesseractParams,
) -> Result<()> {
    let prefix = output_prefix(output_hocr);
    let mut command = base_command(params);
    if let Some(psm) = params.pagesegmode {
        command.arg("--psm").arg(psm.to_string());
    }
    command.arg("--dpi").arg(format!("{}", dpi.round() as i64));
    command.arg(input_image).arg(&prefix).arg("hocr").arg("txt");
    for config in &params.tessconfig {
        command.arg(config);
    }

    let Some(output) = run_with_timeout(&mut command, timeout_of(params)).await? else {
        page_timed_out(input_image, params.timeout);
        return write_null_hocr(input_image, output_hocr, output_sidecar).await;
    };

    let combined = combined_output(&output);
    if !output.status.success() {
        scan_output_for_errors(&combined, input_image)?;
        if combined.contains("Image too large") {
            return write_null_hocr(input_image, output_hocr, output_sidecar).await;
        }
        return Err(OcrWeaveError::SubprocessOutput {
            tool: TOOL,
            message: format!("OCR failed: {}", combined.trim()),
        });
    }
    log_output(&combined, input_image)?;

    rename_products(&prefix, &[("hocr", output_hocr), ("txt", output_sidecar)]).await
}

/// Produce a text-only single-page PDF plus sidecar text for one page image.
///
/// On timeout or "image too large", a zero-byte PDF (meaning "no text layer")
/// and a skipped-page sidecar are substituted.
pub async fn generate_textonly_pdf(
    input_image: &Path,
    output_pdf: &Path,
    output_sidecar: &Path,
    dpi: f64,
    params: &TesseractParams,
) -> Result<()> {
    let prefix = output_prefix(output_pdf);
    let mut command = base_command(params);
    if let Some(psm) = params.pagesegmode {
        command.arg("--psm").arg(psm.to_string());
    }
    command.arg("-c").arg("textonly_pdf=1");
    command.arg("--dpi").arg(format!("{}", dpi.round() as i64));
    command.arg(input_image).arg(&prefix).arg("pdf").arg("txt");
    for config in &params.tessconfig {
        command.arg(config);
    }

    let Some(output) = run_with_timeout(&mut command, timeout_of(params)).await? else {
        page_timed_out(input_image, params.timeout);
        return write_skip_page(output_pdf, output_sidecar).await;
    };

    let combined = combined_output(&output);
    if !output.status.success() {
        scan_output_for_errors(&combined, input_image)?;
        if combined.contains("Image too large") {
            return write_skip_page(output_pdf, output_sidecar).await;
        }
        return Err(OcrWeaveError::SubprocessOutput {
            tool: TOOL,
            message: format!("OCR failed: {}", combined.trim()),
        });
    }
    log_output(&combined, input_image)?;

    rename_products(&prefix, &[("pdf", output_pdf), ("txt", output_sidecar)]).await
}

fn output_prefix(path: &Path) -> PathBuf {
    path.with_extension("")
}

/// Tesseract appends its own suffixes to the output prefix; move its
/// products to the names the caller asked for.
async fn rename_products(prefix: &Path, products: &[(&str, &Path)]) -> Result<()> {
    for (ext, target) in products {
        let produced = prefix.with_extension(ext);
        if produced != **target && produced.exists() {
            tokio::fs::rename(&produced, target).await?;
        }
    }
    Ok(())
}

fn page_timed_out(input_image: &Path, timeout: f64) {
    if timeout > 0.0 {
        warn!(
            "{}: [tesseract] took too long to OCR - skipping",
            input_image.display()
        );
    }
}

async fn write_skip_page(output_pdf: &Path, output_sidecar: &Path) -> Result<()> {
    // A zero-byte file tells the weaver there is no text layer to graft.
    tokio::fs::write(output_pdf, b"").await?;
    tokio::fs::write(output_sidecar, SKIPPED_PAGE_SENTINEL).await?;
    Ok(())
}

async fn write_null_hocr(
    input_image: &Path,
    output_hocr: &Path,
    output_sidecar: &Path,
) -> Result<()> {
    let (w, h) = image::image_dimensions(input_image)
        .map_err(|e| OcrWeaveError::Other(format!("cannot size skipped page: {e}")))?;
    let hocr = NULL_HOCR_TEMPLATE
        .replace("{w}", &w.to_string())
        .replace("{h}", &h.to_string());
    tokio::fs::write(output_hocr, hocr).await?;
    tokio::fs::write(output_sidecar, SKIPPED_PAGE_SENTINEL).await?;
    Ok(())
}

fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.stderr.is_empty() {
        text.push('\n');
        text.push_str(&String::from_utf8_lossy(&output.stderr));
    }
    text
}

/// Raise typed errors hiding in tesseract's output.
fn scan_output_for_errors(text: &str, input: &Path) -> Result<()> {
    for line in text.lines() {
        let lowered = line.to_lowercase();
        if lowered.contains("parameter not found: ") {
            error!("{}: [tesseract] {}", input.display(), line.trim());
            let problem = line
                .split("not found: ")
                .nth(1)
                .unwrap_or("unknown parameter")
                .trim();
            return Err(OcrWeaveError::TesseractConfig(problem.to_string()));
        }
        if lowered.contains("read_params_file") {
            error!("{}: [tesseract] {}", input.display(), line.trim());
            return Err(OcrWeaveError::TesseractConfig(line.trim().to_string()));
        }
    }
    Ok(())
}

/// Demote tesseract's routine chatter, surface its real warnings.
fn log_output(text: &str, input: &Path) -> Result<()> {
    scan_output_for_errors(text, input)?;
    let prefix = input.display();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty()
            || line.starts_with("Tesseract Open Source")
            || line.starts_with("Warning in pixReadMem")
            || line.contains("Error in pixScanForForeground")
            || line.contains("Error in boxClipToRectangle")
        {
            continue;
        }
        if line.contains("diacritics") {
            warn!("{prefix}: [tesseract] lots of diacritics - possibly poor OCR");
        } else if line.starts_with("OSD: Weak margin") {
            warn!("{prefix}: [tesseract] unsure about page orientation");
        } else if line.to_lowercase().contains("error")
            || line.to_lowercase().contains("exception")
        {
            error!("{prefix}: [tesseract] {line}");
        } else if line.to_lowercase().contains("warning") {
            warn!("{prefix}: [tesseract] {line}");
        } else {
            info!("{prefix}: [tesseract] {line}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> TesseractParams {
        TesseractParams {
            languages: vec!["eng".into()],
            engine_mode: None,
            pagesegmode: None,
            tessconfig: Vec::new(),
            timeout: 180.0,
        }
    }

    #[test]
    fn test_version_pattern() {
        let caps = VERSION_PATTERN.captures("tesseract 5.3.4\n leptonica-1.83").unwrap();
        assert_eq!(&caps[1], "5.3.4");
        let caps = VERSION_PATTERN.captures("tesseract v4.1.1").unwrap();
        assert_eq!(&caps[1], "4.1.1");
    }

    #[test]
    fn test_config_error_detection() {
        let err = scan_output_for_errors(
            "read_params_file: parameter not found: bogus_param",
            Path::new("x.png"),
        )
        .unwrap_err();
        match err {
            OcrWeaveError::TesseractConfig(problem) => {
                assert_eq!(problem, "bogus_param");
            }
            other => panic!("wrong error: {other:?}"),
        }
    }

    #[test]
    fn test_clean_output_passes() {
        assert!(scan_output_for_errors("Page 1\nDetected 32 words", Path::new("x.png")).is_ok());
    }

    #[test]
    fn test_timeout_of_zero_disables() {
        let mut p = params();
        p.timeout = 0.0;
        assert!(timeout_of(&p).is_none());
        p.timeout = 15.0;
        assert_eq!(timeout_of(&p), Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_output_prefix_strips_extension() {
        assert_eq!(
            output_prefix(Path::new("/tmp/000001.ocr.pdf")),
            PathBuf::from("/tmp/000001.ocr")
        );
    }

    #[tokio::test]
    async fn test_write_skip_page() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("p.pdf");
        let txt = dir.path().join("p.txt");
        write_skip_page(&pdf, &txt).await.unwrap();
        assert_eq!(std::fs::metadata(&pdf).unwrap().len(), 0);
        assert_eq!(std::fs::read_to_string(&txt).unwrap(), SKIPPED_PAGE_SENTINEL);
    }

    #[tokio::test]
    async fn test_null_hocr_has_image_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let img = dir.path().join("page.png");
        image::DynamicImage::new_luma8(640, 480).save(&img).unwrap();
        let hocr = dir.path().join("page.hocr");
        let txt = dir.path().join("page.txt");
        write_null_hocr(&img, &hocr, &txt).await.unwrap();
        let content = std::fs::read_to_string(&hocr).unwrap();
        assert!(content.contains("bbox 0 0 640 480"));
        assert_eq!(std::fs::read_to_string(&txt).unwrap(), SKIPPED_PAGE_SENTINEL);
    }
}
