//! The per-page work function: rasterize, preprocess, estimate orientation,
//! OCR, and render the layers the weaver will graft.
//!
//! Each page is a pure function of `(page info, decision, options, input
//! path, working directory)`; workers share nothing and write only under
//! their page's filename prefix.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use super::workdir::page_path;
use crate::classify::PageDecision;
use crate::error::Result;
use crate::exec::ghostscript::{self, RasterDevice};
use crate::exec::tesseract::{self, OrientationConfidence, TesseractParams};
use crate::exec::unpaper;
use crate::image::{background, deskew, mask};
use crate::options::{OcrMode, PdfRenderer, PipelineOptions};
use crate::pdfinfo::{Colorspace, Encoding, ImageKind, PageInfo};
use crate::render::hocr_pdf::render_hocr_page;
use crate::render::image_pdf::image_to_pdf;
use crate::resolution::{canvas_square_dpi, page_square_dpi, Resolution};

/// Everything a page worker needs; cheap to clone into a task.
#[derive(Debug, Clone)]
pub struct PageJob {
    pub page_index: usize,
    pub pageinfo: PageInfo,
    pub decision: PageDecision,
    pub options: Arc<PipelineOptions>,
    pub input_pdf: PathBuf,
    pub workdir: PathBuf,
}

/// What one worker hands to the weaver and sidecar merger.
#[derive(Debug, Clone)]
pub struct PageWorkResult {
    pub page_index: usize,
    /// Single-page PDF wrapping the final visible image; absent when the
    /// original page is kept (lossless reconstruction or skip).
    pub visible_image_pdf: Option<PathBuf>,
    /// Single-page PDF containing only invisible OCR text; absent on
    /// skipped pages.
    pub text_layer_pdf: Option<PathBuf>,
    /// Plain-text OCR output; absent when OCR never ran.
    pub sidecar_text: Option<PathBuf>,
    /// Clockwise correction applied during rasterization.
    pub orientation_correction: i32,
    pub original_rotation: i32,
}

impl PageWorkResult {
    fn skipped(page_index: usize, original_rotation: i32) -> Self {
        Self {
            page_index,
            visible_image_pdf: None,
            text_layer_pdf: None,
            sidecar_text: None,
            orientation_correction: 0,
            original_rotation,
        }
    }
}

/// Run components rasterize -> preprocess -> orientation -> OCR -> render
/// for one page.
pub async fn process_page(job: PageJob) -> Result<PageWorkResult> {
    let page_number = job.page_index + 1;
    let pageinfo = &job.pageinfo;
    let options = &job.options;

    if !job.decision.needs_ocr() {
        debug!(page = page_number, reason = %job.decision.reason, "skipping page");
        return Ok(PageWorkResult::skipped(job.page_index, pageinfo.rotation));
    }

    let canvas_dpi = canvas_square_dpi(pageinfo, options);
    let page_dpi = page_square_dpi(pageinfo, options);
    let tess = tesseract_params(options);

    // Orientation first, from a preview, so the real rasterization can bake
    // the correction in.
    let correction = if options.rotate_pages {
        orientation_correction(&job, canvas_dpi, page_dpi, &tess).await?
    } else {
        0
    };

    // Square-DPI rasterization; image tools and OCR need square pixels.
    let raster_png = page_path(&job.workdir, job.page_index, "rasterize", "png");
    let device = select_raster_device(pageinfo);
    let raster_dpi_out = ghostscript::rasterize_pdf(
        &job.input_pdf,
        &raster_png,
        device.gs_name(),
        Resolution::square(canvas_dpi),
        page_number,
        Some(Resolution::square(page_dpi)),
        correction,
        false,
    )
    .await?;

    let (ocr_image, visible_image) =
        preprocess(&job, &raster_png, raster_dpi_out, correction).await?;

    // The visible layer is only needed when the page will be replaced.
    let visible_image_pdf = if options.lossless_reconstruction() {
        None
    } else {
        let pdf_path = page_path(&job.workdir, job.page_index, "image-layer", "pdf");
        let staged = stage_visible_image(&job, &visible_image, pageinfo)?;
        image_to_pdf(&staged, &pdf_path, raster_dpi_out)?;
        Some(pdf_path)
    };

    let text_pdf = page_path(&job.workdir, job.page_index, "text", "pdf");
    let sidecar = page_path(&job.workdir, job.page_index, "sidecar", "txt");
    let ocr_dpi = raster_dpi_out.x.max(raster_dpi_out.y);
    match renderer(options) {
        PdfRenderer::Hocr => {
            let hocr = page_path(&job.workdir, job.page_index, "ocr", "hocr");
            tesseract::generate_hocr(&ocr_image, &hocr, &sidecar, ocr_dpi, &tess).await?;
            render_hocr_page(&hocr, &text_pdf, ocr_dpi)?;
        }
        _ => {
            tesseract::generate_textonly_pdf(&ocr_image, &text_pdf, &sidecar, ocr_dpi, &tess)
                .await?;
        }
    }

    Ok(PageWorkResult {
        page_index: job.page_index,
        visible_image_pdf,
        text_layer_pdf: Some(text_pdf),
        sidecar_text: Some(sidecar),
        orientation_correction: correction,
        original_rotation: pageinfo.rotation,
    })
}

fn tesseract_params(options: &PipelineOptions) -> TesseractParams {
    TesseractParams {
        languages: options.languages.clone(),
        engine_mode: options.tesseract_oem,
        pagesegmode: options.tesseract_pagesegmode,
        tessconfig: options.tesseract_config.clone(),
        timeout: options.tesseract_timeout,
    }
}

fn renderer(options: &PipelineOptions) -> PdfRenderer {
    match options.pdf_renderer {
        PdfRenderer::Auto => PdfRenderer::Sandwich,
        explicit => explicit,
    }
}

/// Rasterize a grayscale preview and ask the OCR engine which way is up.
async fn orientation_correction(
    job: &PageJob,
    canvas_dpi: f64,
    page_dpi: f64,
    tess: &TesseractParams,
) -> Result<i32> {
    let options = &job.options;
    let preview_dpi = canvas_dpi.min(300.0);
    let preview = page_path(&job.workdir, job.page_index, "rasterize-preview", "jpg");
    ghostscript::rasterize_pdf(
        &job.input_pdf,
        &preview,
        RasterDevice::PREVIEW_DEVICE,
        Resolution::square(preview_dpi),
        job.page_index + 1,
        Some(Resolution::square(page_dpi.min(300.0))),
        0,
        false,
    )
    .await?;

    let orient = tesseract::get_orientation(&preview, tess).await?;
    let correction = orient.angle.rem_euclid(360);
    info!(
        page = job.page_index + 1,
        "{}",
        describe_rotation(job.pageinfo.rotation, &orient, correction, options)
    );
    if orient.confidence >= options.rotate_pages_threshold && correction != 0 {
        Ok(correction)
    } else {
        Ok(0)
    }
}

fn describe_rotation(
    existing_rotation: i32,
    orient: &OrientationConfidence,
    correction: i32,
    options: &PipelineOptions,
) -> String {
    let direction = |angle: i32| match angle.rem_euclid(360) {
        0 => "up",
        90 => "right",
        180 => "down",
        270 => "left",
        _ => "?",
    };
    let action = if orient.confidence >= options.rotate_pages_threshold {
        if correction != 0 {
            "will rotate"
        } else {
            "rotation appears correct"
        }
    } else if correction != 0 {
        "confidence too low to rotate"
    } else {
        "no change"
    };
    let mut facing = String::new();
    if existing_rotation != 0 {
        facing = format!("with existing rotation {}, ", direction(existing_rotation));
    }
    format!(
        "{facing}page is facing {}, confidence {:.2} - {action}",
        direction(orient.angle),
        orient.confidence
    )
}

/// Promote the raster device to the widest color model any page image needs;
/// vector content always gets full color.
fn select_raster_device(pageinfo: &PageInfo) -> RasterDevice {
    let mut device = RasterDevice::Mono;
    for image in &pageinfo.images {
        if image.kind != ImageKind::Image {
            continue; // stencil masks draw in the page's color, ignore
        }
        if image.bits_per_component > 1 {
            let at_least = match image.colorspace {
                Colorspace::Indexed => RasterDevice::Indexed,
                Colorspace::Gray => RasterDevice::Gray,
                _ => RasterDevice::Rgb,
            };
            device = device.max(at_least);
        }
    }
    if pageinfo.has_vector.is_yes() {
        device = device.max(RasterDevice::Rgb);
    }
    device
}

/// Run the conditional preprocessing chain.
///
/// Returns `(ocr_input, visible_image)`: the image the OCR engine sees, and
/// the image that may become the page's visible layer.
async fn preprocess(
    job: &PageJob,
    raster: &std::path::Path,
    dpi: Resolution,
    correction: i32,
) -> Result<(PathBuf, PathBuf)> {
    let options = &job.options;
    let pageinfo = &job.pageinfo;
    let mut current = raster.to_path_buf();

    // Visible-layer preference: cleaned if clean-final, else deskewed, else
    // background-removed, else the raw rasterization.
    let mut visible = current.clone();

    if options.remove_background {
        if pageinfo
            .images
            .iter()
            .any(|image| image.bits_per_component > 1)
        {
            let output = page_path(&job.workdir, job.page_index, "pp-background", "png");
            let input = current.clone();
            let out = output.clone();
            tokio::task::spawn_blocking(move || background::remove_background(&input, &out))
                .await
                .map_err(join_error)??;
            current = output;
            visible = current.clone();
        } else {
            info!(page = job.page_index + 1, "background removal skipped on mono page");
        }
    }

    if options.deskew {
        let output = page_path(&job.workdir, job.page_index, "pp-deskew", "png");
        let input = current.clone();
        let out = output.clone();
        let deskew_dpi = dpi.x.max(dpi.y);
        tokio::task::spawn_blocking(move || deskew::deskew(&input, &out, deskew_dpi))
            .await
            .map_err(join_error)??;
        current = output;
        visible = current.clone();
    }

    if options.clean {
        let output = page_path(&job.workdir, job.page_index, "pp-clean", "png");
        unpaper::clean(
            &current,
            &output,
            dpi.x.max(dpi.y),
            &options.unpaper_args,
        )
        .await?;
        current = output;
        if options.clean_final {
            visible = current.clone();
        }
    }

    // Mask existing text out of the OCR input. With --redo-ocr only visible
    // text is masked (the old invisible layer is stripped by the weaver);
    // with --force-ocr nothing is masked because everything is re-read.
    if options.ocr_mode != OcrMode::ForceOcr {
        let visible_filter = if options.ocr_mode == OcrMode::RedoOcr {
            Some(true)
        } else {
            None
        };
        let boxes: Vec<[f64; 4]> = pageinfo.text_areas(visible_filter, None).collect();
        if !boxes.is_empty() && correction == 0 {
            let output = page_path(&job.workdir, job.page_index, "ocr-mask", "png");
            let input = current.clone();
            let out = output.clone();
            tokio::task::spawn_blocking(move || {
                mask::mask_text_areas(&input, &out, &boxes, dpi)
            })
            .await
            .map_err(join_error)??;
            current = output;
        }
    }

    Ok((current, visible))
}

/// If every raster image on the page was a JPEG, write the visible layer
/// back out as JPEG so the replacement stays in the same family.
fn stage_visible_image(
    job: &PageJob,
    visible: &std::path::Path,
    pageinfo: &PageInfo,
) -> Result<PathBuf> {
    let all_jpeg = !pageinfo.images.is_empty()
        && pageinfo
            .images
            .iter()
            .all(|image| image.encoding == Encoding::Jpeg);
    if !all_jpeg {
        return Ok(visible.to_path_buf());
    }
    let jpg = page_path(&job.workdir, job.page_index, "visible", "jpg");
    let decoded = crate::image::load(visible)?;
    decoded
        .save(&jpg)
        .map_err(|e| crate::error::OcrWeaveError::Other(format!("cannot save JPEG: {e}")))?;
    Ok(jpg)
}

fn join_error(e: tokio::task::JoinError) -> crate::error::OcrWeaveError {
    crate::error::OcrWeaveError::Other(format!("worker task failed: {e}"))
}
