//! Per-page OCR decision.

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{OcrWeaveError, Result};
use crate::options::{OcrMode, PipelineOptions};
use crate::pdfinfo::{PageInfo, Tristate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PageMode {
    /// Forward the page untouched.
    Skip,
    /// Normal OCR of a page with no text.
    OcrNew,
    /// Rasterize everything, including existing text, and OCR it.
    OcrForce,
    /// Strip prior invisible text and OCR again.
    OcrRedo,
}

/// The classifier's verdict for one page.
#[derive(Debug, Clone, Serialize)]
pub struct PageDecision {
    pub mode: PageMode,
    pub reason: String,
    /// With force-OCR of a vector-only page, rasterize at the oversample DPI.
    pub oversample_vector: bool,
}

impl PageDecision {
    fn skip(reason: impl Into<String>) -> Self {
        Self {
            mode: PageMode::Skip,
            reason: reason.into(),
            oversample_vector: false,
        }
    }

    fn ocr(mode: PageMode, reason: impl Into<String>) -> Self {
        Self {
            mode,
            reason: reason.into(),
            oversample_vector: false,
        }
    }

    pub fn needs_ocr(&self) -> bool {
        self.mode != PageMode::Skip
    }
}

/// Decide whether and how to OCR one page.
///
/// Fails with `PriorOcrFound` when a page already has text and the user gave
/// no mode that knows how to handle it.
pub fn decide_page(pageinfo: &PageInfo, options: &PipelineOptions) -> Result<PageDecision> {
    let page_number = pageinfo.page_index + 1;

    if let Some(filter) = &options.pages {
        if !filter.contains(pageinfo.page_index) {
            return Ok(PageDecision::skip("not selected by --pages"));
        }
    }

    let mut decision = if pageinfo.has_text == Tristate::Yes {
        match options.ocr_mode {
            OcrMode::Normal => {
                return Err(OcrWeaveError::PriorOcrFound { page: page_number });
            }
            OcrMode::SkipText => {
                info!(page = page_number, "page already has text - skipping all processing");
                PageDecision::skip("page already has text")
            }
            OcrMode::ForceOcr => {
                info!(
                    page = page_number,
                    "page already has text - rasterizing text and running OCR anyway"
                );
                PageDecision::ocr(PageMode::OcrForce, "force-ocr over existing text")
            }
            OcrMode::RedoOcr => {
                if pageinfo.has_corrupt_text() {
                    warn!(
                        page = page_number,
                        "some text on this page cannot be mapped to characters: \
                         consider using --force-ocr instead"
                    );
                } else {
                    info!(page = page_number, "redoing OCR");
                }
                PageDecision::ocr(PageMode::OcrRedo, "redoing OCR")
            }
        }
    } else if pageinfo.images.is_empty() && !options.lossless_reconstruction() {
        // No images and no text: possibly vector art. Only rasterize it if
        // the user forces OCR; otherwise pass the page through so no detail
        // is lost.
        if options.ocr_mode == OcrMode::ForceOcr {
            if options.oversample.is_some() {
                info!(
                    page = page_number,
                    "page has no images - rasterizing at the oversample DPI \
                     because --force-ocr --oversample was specified"
                );
            } else {
                warn!(
                    page = page_number,
                    "page has no images - all vector content will be rasterized, \
                     losing some resolution and likely increasing file size. \
                     Use --oversample to adjust the DPI"
                );
            }
            PageDecision {
                mode: PageMode::OcrForce,
                reason: "force-ocr of vector-only page".into(),
                oversample_vector: true,
            }
        } else {
            info!(
                page = page_number,
                "page has no images - skipping all processing to avoid losing \
                 detail. Use --force-ocr to OCR pages with vector content"
            );
            PageDecision::skip("vector-only pages are not OCRed by default")
        }
    } else {
        PageDecision::ocr(PageMode::OcrNew, "no existing text")
    };

    if decision.needs_ocr() && !pageinfo.images.is_empty() {
        if let Some(skip_big) = options.skip_big {
            let pixel_count = pageinfo.width_pixels() * pageinfo.height_pixels();
            if pixel_count as f64 > skip_big * 1_000_000.0 {
                warn!(
                    page = page_number,
                    "page too big, skipping OCR ({:.1} MPixels > {:.1} MPixels --skip-big)",
                    pixel_count as f64 / 1_000_000.0,
                    skip_big
                );
                decision = PageDecision::skip("too big");
            }
        }
    }

    Ok(decision)
}
