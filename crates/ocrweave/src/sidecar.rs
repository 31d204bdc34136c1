//! Sidecar text assembly.
//!
//! Concatenates the per-page OCR text files in page order, one U+000C form
//! feed between consecutive pages. Some OCR engine builds append their own
//! trailing form feed to each page; that byte is absorbed so the page count
//! invariant (exactly `n_pages - 1` separators) always holds.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{OcrWeaveError, Result};

/// One entry per page: the page's text file, or None when OCR never ran.
pub fn merge_sidecars(txt_files: &[Option<PathBuf>], mut out: impl Write) -> Result<()> {
    for (page_index, txt_file) in txt_files.iter().enumerate() {
        if page_index != 0 {
            out.write_all(b"\x0c")?;
        }
        match txt_file {
            Some(path) => {
                let text = read_page_text(path)?;
                out.write_all(text.as_bytes())?;
            }
            None => {
                write!(out, "[OCR skipped on page {}]", page_index + 1)?;
            }
        }
    }
    out.flush()?;
    Ok(())
}

/// Write the merged sidecar to a file path, or stdout when `path` is None.
pub fn write_sidecar(txt_files: &[Option<PathBuf>], path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            let file = std::fs::File::create(path).map_err(|e| {
                OcrWeaveError::OutputFileAccess {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                }
            })?;
            merge_sidecars(txt_files, std::io::BufWriter::new(file))
        }
        None => {
            let stdout = std::io::stdout();
            merge_sidecars(txt_files, stdout.lock())
        }
    }
}

fn read_page_text(path: &Path) -> Result<String> {
    let raw = std::fs::read(path)?;
    let mut text = String::from_utf8_lossy(&raw).into_owned();
    // The engine's own page separator, if any, is ours to manage.
    if text.ends_with('\x0c') {
        text.pop();
    }
    Ok(text)
}
