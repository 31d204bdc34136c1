//! ocrweave CLI - add an invisible OCR text layer to scanned PDFs.
//!
//! Thin wrapper over the `ocrweave` library: parses arguments with `clap`,
//! configures `tracing` output, runs the pipeline, and maps the first error
//! to the stable exit-code contract (0 ok, 1 bad args, 2 input error,
//! 3 missing dependency, 4 invalid output, 5 output access, 6 prior OCR,
//! 7 child process error, 8 encrypted, 9 bad engine config, 10 PDF/A
//! conversion failed, 15 other, 130 interrupted).

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode as ProcessExitCode;

use clap::{ArgGroup, Parser};
use ocrweave::{
    OcrMode, OcrWeaveError, OutputTarget, OutputType, PageFilter, PdfRenderer, PipelineOptions,
};
use tracing_subscriber::EnvFilter;

/// Add an invisible OCR text layer to a scanned PDF (or image), producing a
/// searchable PDF or PDF/A.
#[derive(Parser, Debug)]
#[command(name = "ocrweave")]
#[command(version, about, long_about = None)]
#[command(group(
    ArgGroup::new("ocr_mode")
        .args(["force_ocr", "skip_text", "redo_ocr"])
        .multiple(false)
))]
struct Cli {
    /// Input PDF or image ('-' reads from stdin)
    input: String,

    /// Output PDF ('-' writes to stdout)
    output: String,

    /// Rasterize and OCR every page, discarding any existing text
    #[arg(long)]
    force_ocr: bool,

    /// Skip pages that already contain text
    #[arg(long)]
    skip_text: bool,

    /// Strip existing invisible OCR text and OCR those pages again
    #[arg(long)]
    redo_ocr: bool,

    /// Languages to pass to the OCR engine, e.g. eng or eng+deu
    #[arg(short = 'l', long = "language", value_delimiter = '+')]
    languages: Vec<String>,

    /// Deskew each page before OCR
    #[arg(short = 'd', long)]
    deskew: bool,

    /// Clean pages with unpaper before OCR (OCR input only)
    #[arg(short = 'c', long)]
    clean: bool,

    /// Clean pages and keep the cleaned image in the output
    #[arg(short = 'i', long)]
    clean_final: bool,

    /// Normalize the page background to white before OCR
    #[arg(long)]
    remove_background: bool,

    /// Detect and correct page orientation
    #[arg(short = 'r', long)]
    rotate_pages: bool,

    /// Orientation confidence required before rotating a page
    #[arg(long, default_value_t = 14.0)]
    rotate_pages_threshold: f64,

    /// Rasterize at no less than this DPI
    #[arg(long, value_name = "DPI")]
    oversample: Option<f64>,

    /// Output flavor
    #[arg(long, value_name = "TYPE", default_value = "pdfa")]
    output_type: String,

    /// OCR result renderer (sandwich or hocr)
    #[arg(long, value_name = "RENDERER", default_value = "auto")]
    pdf_renderer: String,

    /// Write OCR text to FILE, or to <output>.txt when FILE is omitted
    /// ('-' for stdout)
    #[arg(long, value_name = "FILE", num_args = 0..=1, default_missing_value = "")]
    sidecar: Option<String>,

    /// Override the output document title
    #[arg(long)]
    title: Option<String>,

    /// Override the output document author
    #[arg(long)]
    author: Option<String>,

    /// Override the output document subject
    #[arg(long)]
    subject: Option<String>,

    /// Override the output document keywords
    #[arg(long)]
    keywords: Option<String>,

    /// Seconds to wait for OCR on each page (0 disables OCR)
    #[arg(long, default_value_t = 180.0)]
    tesseract_timeout: f64,

    /// Tesseract page segmentation mode
    #[arg(long, value_name = "PSM")]
    tesseract_pagesegmode: Option<u32>,

    /// Tesseract OCR engine mode
    #[arg(long, value_name = "OEM")]
    tesseract_oem: Option<u32>,

    /// Additional Tesseract configuration files
    #[arg(long = "tesseract-config", value_name = "CFG")]
    tesseract_config: Vec<String>,

    /// Skip OCR on pages larger than this many megapixels
    #[arg(long, value_name = "MPixels")]
    skip_big: Option<f64>,

    /// Number of parallel page workers (default: CPU count)
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Use a single thread instead of parallel workers (for debugging)
    #[arg(long)]
    use_threads: bool,

    /// Limit OCR to these pages, e.g. 1-3,5,7- (1-based)
    #[arg(long, value_name = "RANGES")]
    pages: Option<String>,

    /// Extra arguments for unpaper (no filenames allowed)
    #[arg(long, value_name = "ARGS", allow_hyphen_values = true)]
    unpaper_args: Option<String>,

    /// Resolution to assume for image inputs that carry none
    #[arg(long, value_name = "DPI")]
    image_dpi: Option<f64>,

    /// Linearize the output when it exceeds this size in MB
    #[arg(long, value_name = "MB", default_value_t = 100.0)]
    fast_web_view: f64,

    /// Keep the temporary working directory for debugging
    #[arg(short = 'k', long)]
    keep_temporary_files: bool,

    /// Increase log verbosity (-v, -vv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all log output except errors
    #[arg(short = 'q', long)]
    quiet: bool,
}

fn parse_output_type(value: &str) -> Result<OutputType, OcrWeaveError> {
    match value {
        "pdfa" => Ok(OutputType::Pdfa),
        "pdfa-1" => Ok(OutputType::Pdfa1),
        "pdfa-2" => Ok(OutputType::Pdfa2),
        "pdfa-3" => Ok(OutputType::Pdfa3),
        "pdf" => Ok(OutputType::Pdf),
        "none" => Ok(OutputType::None),
        other => Err(OcrWeaveError::BadArgs(format!(
            "invalid --output-type: {other:?} (expected pdfa, pdfa-1, pdfa-2, pdfa-3, pdf, none)"
        ))),
    }
}

fn parse_renderer(value: &str) -> Result<PdfRenderer, OcrWeaveError> {
    match value {
        "auto" => Ok(PdfRenderer::Auto),
        "sandwich" => Ok(PdfRenderer::Sandwich),
        "hocr" => Ok(PdfRenderer::Hocr),
        other => Err(OcrWeaveError::BadArgs(format!(
            "invalid --pdf-renderer: {other:?} (expected auto, sandwich, hocr)"
        ))),
    }
}

/// Stage stdin into a temporary file so the pipeline can seek and reopen it.
fn stage_stdin(workdir: &tempfile::TempDir) -> std::io::Result<PathBuf> {
    use std::io::{Read, Write};
    let path = workdir.path().join("stdin");
    let mut buffer = Vec::new();
    std::io::stdin().lock().read_to_end(&mut buffer)?;
    let mut file = std::fs::File::create(&path)?;
    file.write_all(&buffer)?;
    Ok(path)
}

fn build_options(cli: &Cli, stdin_dir: &tempfile::TempDir) -> Result<PipelineOptions, OcrWeaveError> {
    let mode_flags = [cli.force_ocr, cli.skip_text, cli.redo_ocr];
    if mode_flags.iter().filter(|&&flag| flag).count() > 1 {
        return Err(OcrWeaveError::BadArgs(
            "--force-ocr, --skip-text and --redo-ocr are mutually exclusive".into(),
        ));
    }
    let ocr_mode = if cli.force_ocr {
        OcrMode::ForceOcr
    } else if cli.skip_text {
        OcrMode::SkipText
    } else if cli.redo_ocr {
        OcrMode::RedoOcr
    } else {
        OcrMode::Normal
    };

    let input_file = if cli.input == "-" {
        stage_stdin(stdin_dir).map_err(|e| {
            OcrWeaveError::BadArgs(format!("cannot read input from stdin: {e}"))
        })?
    } else {
        PathBuf::from(&cli.input)
    };

    let sidecar = match cli.sidecar.as_deref() {
        None => None,
        Some("") => {
            // Bare --sidecar: derive the name from the output file.
            if cli.output == "-" {
                return Err(OcrWeaveError::BadArgs(
                    "--sidecar requires a FILE argument when the output is stdout".into(),
                ));
            }
            Some(OutputTarget::Path(PathBuf::from(format!("{}.txt", cli.output))))
        }
        Some(path) => Some(OutputTarget::from_arg(path)),
    };

    let pages = match &cli.pages {
        Some(spec) => Some(PageFilter::parse(spec)?),
        None => None,
    };
    let unpaper_args = match &cli.unpaper_args {
        Some(args) => args.split_whitespace().map(str::to_string).collect(),
        None => Vec::new(),
    };

    let mut options = PipelineOptions {
        input_file,
        output_file: OutputTarget::from_arg(&cli.output),
        ocr_mode,
        languages: if cli.languages.is_empty() {
            vec!["eng".to_string()]
        } else {
            cli.languages.clone()
        },
        deskew: cli.deskew,
        clean: cli.clean,
        clean_final: cli.clean_final,
        remove_background: cli.remove_background,
        rotate_pages: cli.rotate_pages,
        rotate_pages_threshold: cli.rotate_pages_threshold,
        oversample: cli.oversample,
        output_type: parse_output_type(&cli.output_type)?,
        pdf_renderer: parse_renderer(&cli.pdf_renderer)?,
        sidecar,
        title: cli.title.clone(),
        author: cli.author.clone(),
        subject: cli.subject.clone(),
        keywords: cli.keywords.clone(),
        tesseract_timeout: cli.tesseract_timeout,
        tesseract_pagesegmode: cli.tesseract_pagesegmode,
        tesseract_oem: cli.tesseract_oem,
        tesseract_config: cli.tesseract_config.clone(),
        skip_big: cli.skip_big,
        jobs: cli.jobs,
        use_threads: cli.use_threads,
        pages,
        unpaper_args,
        image_dpi: cli.image_dpi,
        fast_web_view: cli.fast_web_view,
        keep_temporary_files: cli.keep_temporary_files,
    };
    options.validate()?;
    Ok(options)
}

fn init_logging(cli: &Cli) {
    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ocrweave={default_level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ProcessExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    let stdin_dir = match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("ocrweave: cannot create temporary directory: {e}");
            return ProcessExitCode::from(15);
        }
    };

    let options = match build_options(&cli, &stdin_dir) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("ocrweave: {e}");
            return exit_code(&e);
        }
    };

    let result = tokio::select! {
        result = ocrweave::run_pipeline(options) => result,
        _ = tokio::signal::ctrl_c() => Err(OcrWeaveError::Interrupted),
    };

    match result {
        Ok(()) => ProcessExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ocrweave: {e}");
            exit_code(&e)
        }
    }
}

fn exit_code(e: &OcrWeaveError) -> ProcessExitCode {
    // ExitCode::from takes a u8; the contract's codes all fit.
    ProcessExitCode::from(e.exit_code().as_i32() as u8)
}
