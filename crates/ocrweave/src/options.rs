//! Validated pipeline options.
//!
//! The CLI maps raw flags into a [`PipelineOptions`]; [`PipelineOptions::validate`]
//! enforces cross-flag rules so the library rejects bad combinations no
//! matter who constructed it.

use std::path::PathBuf;

use serde::Serialize;
use tracing::warn;

use crate::error::{OcrWeaveError, Result};

/// What to do with pages that already have text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum OcrMode {
    /// Fail on pages that already have text.
    #[default]
    Normal,
    /// Rasterize everything and OCR it, discarding any existing text.
    ForceOcr,
    /// Skip pages that already have text.
    SkipText,
    /// Strip existing invisible text and OCR again.
    RedoOcr,
}

/// Output flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum OutputType {
    /// PDF/A, defaulting to part 2.
    #[default]
    Pdfa,
    Pdfa1,
    Pdfa2,
    Pdfa3,
    /// Plain PDF, no normalization.
    Pdf,
    /// Do not produce an output PDF (sidecar only).
    None,
}

impl OutputType {
    pub fn is_pdfa(self) -> bool {
        matches!(self, Self::Pdfa | Self::Pdfa1 | Self::Pdfa2 | Self::Pdfa3)
    }

    /// PDF/A part number for the normalizer.
    pub fn pdfa_part(self) -> &'static str {
        match self {
            Self::Pdfa1 => "1",
            Self::Pdfa | Self::Pdfa2 => "2",
            Self::Pdfa3 => "3",
            Self::Pdf | Self::None => "2",
        }
    }
}

/// Which OCR output is grafted into the PDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PdfRenderer {
    /// Pick based on engine capability (currently: sandwich).
    #[default]
    Auto,
    /// Engine produces a text-only PDF directly.
    Sandwich,
    /// Engine produces hOCR; we render the text layer ourselves.
    Hocr,
}

/// Destination for the main output or the sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum OutputTarget {
    Stdout,
    Path(PathBuf),
}

impl OutputTarget {
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            Self::Stdout
        } else {
            Self::Path(PathBuf::from(arg))
        }
    }
}

/// A 0-based page selection parsed from `--pages`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageFilter {
    /// Inclusive 0-based ranges; `None` end means "to the last page".
    ranges: Vec<(usize, Option<usize>)>,
}

impl PageFilter {
    /// Parse a 1-based range list such as `1-3,5,7-`.
    ///
    /// A bare `-` is rejected. Out-of-order ranges are tolerated with a
    /// warning.
    pub fn parse(spec: &str) -> Result<Self> {
        let mut ranges = Vec::new();
        let mut previous_start = 0usize;
        for token in spec.split(',') {
            let token = token.trim();
            if token.is_empty() || token == "-" {
                return Err(OcrWeaveError::BadArgs(format!(
                    "invalid page range: {spec:?}"
                )));
            }
            let (start, end) = match token.split_once('-') {
                None => {
                    let n = parse_page_number(token, spec)?;
                    (n, Some(n))
                }
                Some((lhs, "")) => (parse_page_number(lhs, spec)?, None),
                Some(("", _)) => {
                    return Err(OcrWeaveError::BadArgs(format!(
                        "invalid page range: {spec:?}"
                    )));
                }
                Some((lhs, rhs)) => {
                    let start = parse_page_number(lhs, spec)?;
                    let end = parse_page_number(rhs, spec)?;
                    if end < start {
                        return Err(OcrWeaveError::BadArgs(format!(
                            "page range {token:?} is reversed"
                        )));
                    }
                    (start, Some(end))
                }
            };
            if start < previous_start {
                warn!("page ranges {spec:?} are not in ascending order");
            }
            previous_start = start;
            ranges.push((start, end));
        }
        Ok(Self { ranges })
    }

    /// Whether the 0-based `page_index` is selected.
    pub fn contains(&self, page_index: usize) -> bool {
        self.ranges.iter().any(|(start, end)| {
            page_index >= *start && end.map_or(true, |e| page_index <= e)
        })
    }
}

fn parse_page_number(token: &str, whole: &str) -> Result<usize> {
    let n: usize = token
        .trim()
        .parse()
        .map_err(|_| OcrWeaveError::BadArgs(format!("invalid page range: {whole:?}")))?;
    if n == 0 {
        return Err(OcrWeaveError::BadArgs(
            "page numbers are 1-based; 0 is not a page".into(),
        ));
    }
    Ok(n - 1)
}

/// Everything the pipeline needs to know, validated once up front and then
/// immutable.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOptions {
    pub input_file: PathBuf,
    pub output_file: OutputTarget,

    pub ocr_mode: OcrMode,
    pub languages: Vec<String>,

    pub deskew: bool,
    pub clean: bool,
    pub clean_final: bool,
    pub remove_background: bool,
    pub rotate_pages: bool,
    pub rotate_pages_threshold: f64,
    pub oversample: Option<f64>,

    pub output_type: OutputType,
    pub pdf_renderer: PdfRenderer,
    pub sidecar: Option<OutputTarget>,

    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Option<String>,

    pub tesseract_timeout: f64,
    pub tesseract_pagesegmode: Option<u32>,
    pub tesseract_oem: Option<u32>,
    pub tesseract_config: Vec<String>,

    pub skip_big: Option<f64>,
    pub jobs: Option<usize>,
    pub use_threads: bool,
    pub pages: Option<PageFilter>,
    pub unpaper_args: Vec<String>,
    pub image_dpi: Option<f64>,
    /// Linearize when the final file exceeds this many megabytes.
    pub fast_web_view: f64,
    pub keep_temporary_files: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            input_file: PathBuf::new(),
            output_file: OutputTarget::Stdout,
            ocr_mode: OcrMode::Normal,
            languages: vec!["eng".to_string()],
            deskew: false,
            clean: false,
            clean_final: false,
            remove_background: false,
            rotate_pages: false,
            rotate_pages_threshold: 14.0,
            oversample: None,
            output_type: OutputType::default(),
            pdf_renderer: PdfRenderer::default(),
            sidecar: None,
            title: None,
            author: None,
            subject: None,
            keywords: None,
            tesseract_timeout: 180.0,
            tesseract_pagesegmode: None,
            tesseract_oem: None,
            tesseract_config: Vec::new(),
            skip_big: None,
            jobs: None,
            use_threads: false,
            pages: None,
            unpaper_args: Vec::new(),
            image_dpi: None,
            fast_web_view: 100.0,
            keep_temporary_files: false,
        }
    }
}

impl PipelineOptions {
    /// Enforce cross-flag rules; normalizes implied flags.
    pub fn validate(&mut self) -> Result<()> {
        if self.clean_final {
            self.clean = true;
        }
        if self.languages.is_empty() {
            self.languages.push("eng".to_string());
        }
        for lang in &self.languages {
            if lang.is_empty()
                || !lang
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(OcrWeaveError::BadArgs(format!(
                    "invalid language code: {lang:?}"
                )));
            }
        }
        if self.tesseract_timeout < 0.0 {
            return Err(OcrWeaveError::BadArgs(
                "--tesseract-timeout must not be negative".into(),
            ));
        }
        if let Some(oversample) = self.oversample {
            if !(0.0..=5000.0).contains(&oversample) {
                return Err(OcrWeaveError::BadArgs(
                    "--oversample must be between 0 and 5000 DPI".into(),
                ));
            }
        }
        if let Some(skip_big) = self.skip_big {
            if skip_big <= 0.0 {
                return Err(OcrWeaveError::BadArgs(
                    "--skip-big requires a positive megapixel count".into(),
                ));
            }
        }
        if let Some(jobs) = self.jobs {
            if jobs == 0 {
                return Err(OcrWeaveError::BadArgs("-j requires at least one job".into()));
            }
        }
        // Filenames in cleaner arguments could clobber arbitrary files.
        if self.unpaper_args.iter().any(|arg| arg.contains('/')) {
            return Err(OcrWeaveError::BadArgs(
                "no filenames allowed in --unpaper-args".into(),
            ));
        }
        if self.clean && self.unpaper_args.is_empty() {
            // Defaults chosen to only remove scanning debris, nothing that
            // could change the page layout.
            self.unpaper_args = [
                "--layout",
                "none",
                "--mask-scan-size",
                "100",
                "--no-border-align",
                "--no-mask-center",
                "--no-grayfilter",
                "--no-blackfilter",
                "--no-deskew",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect();
        }
        Ok(())
    }

    /// True when no option alters page pixels, so original pages can be kept
    /// and only a text layer added.
    pub fn lossless_reconstruction(&self) -> bool {
        !(self.deskew
            || self.clean_final
            || self.remove_background
            || self.ocr_mode == OcrMode::ForceOcr)
    }

    /// Page worker count: scale with page count, bounded by `-j`/CPUs.
    pub fn worker_count(&self, n_pages: usize) -> usize {
        if self.use_threads {
            return 1;
        }
        let max_workers = self.jobs.unwrap_or_else(num_cpus::get).max(1);
        (1 + n_pages / 4).min(max_workers).max(1)
    }
}
