//! ocrweave — add an invisible OCR text layer to scanned PDFs, producing a
//! searchable PDF or PDF/A.
//!
//! The pipeline inspects each input page, decides whether OCR is needed,
//! rasterizes the page at a computed resolution, optionally preprocesses the
//! image (background removal, deskew, cleaning, orientation correction),
//! runs the OCR engine, and grafts the recognized text back into the PDF as
//! an invisible layer aligned with the original content. Table of contents
//! and document metadata are carried through, and the result can be
//! normalized to PDF/A for archival.
//!
//! External tools (Ghostscript, Tesseract, unpaper, qpdf) are driven as
//! subprocesses through narrow adapters in [`exec`]; everything else is done
//! in-process on the PDF object level.
//!
//! # Example
//!
//! ```no_run
//! use ocrweave::{run_pipeline, OutputTarget, PipelineOptions};
//!
//! # async fn demo() -> ocrweave::Result<()> {
//! let options = PipelineOptions {
//!     input_file: "scan.pdf".into(),
//!     output_file: OutputTarget::Path("searchable.pdf".into()),
//!     ..Default::default()
//! };
//! run_pipeline(options).await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod classify;
pub mod error;
pub mod exec;
pub mod hocr;
pub mod image;
pub mod metadata;
pub mod options;
pub mod pdfa;
pub mod pdfinfo;
pub mod pipeline;
pub mod render;
pub mod resolution;
pub mod sidecar;
pub mod weave;

pub use classify::{decide_page, PageDecision, PageMode};
pub use error::{ExitCode, OcrWeaveError, Result};
pub use options::{
    OcrMode, OutputTarget, OutputType, PageFilter, PdfRenderer, PipelineOptions,
};
pub use pdfinfo::PdfInfo;
pub use pipeline::run_pipeline;
pub use resolution::Resolution;
