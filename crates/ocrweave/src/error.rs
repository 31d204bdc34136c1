//! Error taxonomy and process exit codes.
//!
//! Every failure the pipeline can surface maps to one stable exit code; the
//! CLI calls [`OcrWeaveError::exit_code`] on the first error it sees.

use std::path::PathBuf;
use thiserror::Error;

/// Stable exit codes forming part of the CLI contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Ok = 0,
    BadArgs = 1,
    InputFile = 2,
    MissingDependency = 3,
    InvalidOutputPdf = 4,
    FileAccessError = 5,
    AlreadyDoneOcr = 6,
    ChildProcessError = 7,
    EncryptedPdf = 8,
    InvalidConfig = 9,
    PdfaConversionFailed = 10,
    OtherError = 15,
    CtrlC = 130,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Errors produced by the ocrweave pipeline.
#[derive(Debug, Error)]
pub enum OcrWeaveError {
    /// Invalid or conflicting command-line options.
    #[error("invalid arguments: {0}")]
    BadArgs(String),

    /// Unreadable or malformed input (PDF parse failure, unsupported image).
    #[error("input file error: {message}")]
    InputFile {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A required external tool is absent or below the minimum version.
    #[error("missing dependency: {0}")]
    MissingDependency(String),

    /// The finished output failed post-run validation.
    #[error("output PDF failed validation: {0}")]
    InvalidOutputPdf(String),

    /// The requested output location cannot be written.
    #[error("cannot write output file {path}: {message}")]
    OutputFileAccess { path: PathBuf, message: String },

    /// A page already carries a text layer and no OCR mode override was given.
    #[error(
        "page {page} already has text! - aborting (use --force-ocr to force OCR; \
         --skip-text to skip pages with text; --redo-ocr to redo OCR on pages with text)"
    )]
    PriorOcrFound { page: usize },

    /// An external tool exited nonzero unexpectedly.
    #[error("{tool} failed: {message}")]
    SubprocessOutput { tool: &'static str, message: String },

    /// The input PDF is password protected.
    #[error(
        "input PDF is encrypted. The encryption must be removed to perform OCR, \
         for example with: qpdf --decrypt infile.pdf outfile.pdf"
    )]
    EncryptedPdf,

    /// Tesseract rejected its configuration.
    #[error("error while parsing a Tesseract configuration: {0}")]
    TesseractConfig(String),

    /// The PDF/A normalizer ran but the result does not claim PDF/A.
    #[error("PDF/A conversion failed: {0}")]
    PdfaConversionFailed(String),

    /// Merging the text layer into the base PDF raised from the PDF library.
    #[error(
        "failed to merge the OCR layer into the PDF: {message}. The input PDF may be \
         malformed; try the alternative --pdf-renderer"
    )]
    PdfMergeFailed { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),

    /// The user interrupted the run.
    #[error("interrupted")]
    Interrupted,
}

impl OcrWeaveError {
    /// Map this error to its contractual process exit code.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::BadArgs(_) => ExitCode::BadArgs,
            Self::InputFile { .. } => ExitCode::InputFile,
            Self::MissingDependency(_) => ExitCode::MissingDependency,
            Self::InvalidOutputPdf(_) => ExitCode::InvalidOutputPdf,
            Self::OutputFileAccess { .. } => ExitCode::FileAccessError,
            Self::PriorOcrFound { .. } => ExitCode::AlreadyDoneOcr,
            Self::SubprocessOutput { .. } => ExitCode::ChildProcessError,
            Self::EncryptedPdf => ExitCode::EncryptedPdf,
            Self::TesseractConfig(_) => ExitCode::InvalidConfig,
            Self::PdfaConversionFailed(_) => ExitCode::PdfaConversionFailed,
            // The merge failure is surfaced as an input-file problem, matching
            // the guidance given to the user.
            Self::PdfMergeFailed { .. } => ExitCode::InputFile,
            Self::Io(_) => ExitCode::FileAccessError,
            Self::Other(_) => ExitCode::OtherError,
            Self::Interrupted => ExitCode::CtrlC,
        }
    }

    /// Convenience constructor for input-file errors without an underlying cause.
    pub fn input(message: impl Into<String>) -> Self {
        Self::InputFile {
            message: message.into(),
            source: None,
        }
    }

    /// Convenience constructor wrapping a lopdf error as an input-file error.
    pub fn input_from(message: impl Into<String>, source: lopdf::Error) -> Self {
        Self::InputFile {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

pub type Result<T> = std::result::Result<T, OcrWeaveError>;
