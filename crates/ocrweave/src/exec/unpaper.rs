//! unpaper adapter: page cleaning.
//!
//! unpaper cannot write to stdout and accepts whatever arguments it is
//! given, so the invocation is sandboxed: it runs with its working directory
//! set to a private temporary directory containing only its own input, and
//! user-supplied arguments were already rejected if they contain `/`.

use std::path::Path;

use image::DynamicImage;
use tokio::process::Command;
use tracing::debug;

use super::{program_path, run_command, stderr_excerpt};
use crate::error::{OcrWeaveError, Result};

const TOOL: &str = "unpaper";

pub async fn version() -> Result<String> {
    super::get_version(TOOL, program_path(TOOL), None).await
}

/// Clean one page image, reading back the result at the same DPI.
pub async fn clean(
    input_file: &Path,
    output_file: &Path,
    dpi: f64,
    mode_args: &[String],
) -> Result<()> {
    let tmpdir = tempfile::tempdir()?;

    let image = image::open(input_file)
        .map_err(|e| OcrWeaveError::Other(format!("cannot load image for cleaning: {e}")))?;
    let (input_png, output_pnm) = setup_io(tmpdir.path(), input_file, &image)?;

    let mut command = Command::new(program_path(TOOL));
    command
        .arg("-v")
        .arg("--dpi")
        .arg(format!("{}", dpi.round() as i64))
        .args(mode_args)
        .arg(&input_png)
        .arg(&output_pnm)
        .current_dir(tmpdir.path());

    let output = run_command(TOOL, &mut command).await?;
    if !output.status.success() {
        return Err(OcrWeaveError::SubprocessOutput {
            tool: TOOL,
            message: stderr_excerpt(&output),
        });
    }
    debug!("{}", String::from_utf8_lossy(&output.stdout).trim());

    let cleaned = image::open(&output_pnm).map_err(|_| OcrWeaveError::SubprocessOutput {
        tool: TOOL,
        message: format!(
            "unpaper failed to produce the expected output file (called with {mode_args:?})"
        ),
    })?;
    cleaned
        .save(output_file)
        .map_err(|e| OcrWeaveError::Other(format!("cannot save cleaned image: {e}")))?;
    Ok(())
}

/// Stage the input for unpaper and choose the PNM flavor of its output.
fn setup_io(
    tmpdir: &Path,
    input_file: &Path,
    image: &DynamicImage,
) -> Result<(std::path::PathBuf, std::path::PathBuf)> {
    let (needs_rgb, suffix) = match image {
        DynamicImage::ImageLuma8(_) => (false, "pgm"),
        DynamicImage::ImageRgb8(_) => (false, "ppm"),
        _ => (true, "ppm"),
    };

    let input_png = tmpdir.join("input.png");
    if needs_rgb {
        debug!("converting image to RGB for cleaning");
        DynamicImage::ImageRgb8(image.to_rgb8())
            .save(&input_png)
            .map_err(|e| OcrWeaveError::Other(format!("cannot stage image for cleaning: {e}")))?;
    } else if input_file.extension().is_some_and(|e| e == "png") {
        std::fs::copy(input_file, &input_png)?;
    } else {
        image
            .save(&input_png)
            .map_err(|e| OcrWeaveError::Other(format!("cannot stage image for cleaning: {e}")))?;
    }

    let output_pnm = tmpdir.join(format!("output.{suffix}"));
    Ok((input_png, output_pnm))
}
