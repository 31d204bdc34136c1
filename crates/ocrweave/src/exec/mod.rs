//! Adapters for the external tools the pipeline drives.
//!
//! Each adapter owns the full contract with one executable: argument
//! construction, environment, timeout policy, and translation of its exit
//! status and chatter into typed errors. All invocations go through
//! [`run_command`] so that a missing binary is reported consistently as a
//! `MissingDependency`.

pub mod ghostscript;
pub mod qpdf;
pub mod tesseract;
pub mod unpaper;

use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::Output;

use tokio::process::Command;
use tracing::debug;

use crate::error::{OcrWeaveError, Result};

/// Resolve the executable path for a tool.
///
/// On most platforms this is just the bare name, resolved via `PATH`. On
/// Windows, the usual install locations under `%PROGRAMFILES%` are also
/// searched, because installers there frequently do not update `PATH`.
pub fn program_path(name: &str) -> PathBuf {
    #[cfg(windows)]
    {
        if let Some(found) = windows_program_path(name) {
            return found;
        }
    }
    PathBuf::from(name)
}

#[cfg(windows)]
fn windows_program_path(name: &str) -> Option<PathBuf> {
    let program_files = std::env::var_os("PROGRAMFILES")?;
    let program_files = PathBuf::from(program_files);
    let exe = format!("{name}.exe");
    let mut candidates: Vec<PathBuf> = vec![program_files.join("tesseract-ocr").join(&exe)];
    // Ghostscript installs under gs\gs<version>\bin.
    if let Ok(entries) = std::fs::read_dir(program_files.join("gs")) {
        for entry in entries.flatten() {
            candidates.push(entry.path().join("bin").join(&exe));
            candidates.push(entry.path().join("bin").join(format!("{name}win64c.exe")));
        }
    }
    candidates.into_iter().find(|c| c.is_file())
}

/// Run a command to completion, capturing stdout and stderr.
///
/// A failure to launch becomes `MissingDependency`; a nonzero exit is *not*
/// an error here, because several tools signal recoverable conditions through
/// their exit status. Callers decide.
pub(crate) async fn run_command(tool: &'static str, command: &mut Command) -> Result<Output> {
    debug!(tool, "spawning {:?}", command.as_std());
    command.kill_on_drop(true);
    let output = command.output().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            OcrWeaveError::MissingDependency(format!(
                "could not find program '{tool}' - make sure it is installed and on PATH"
            ))
        } else {
            OcrWeaveError::SubprocessOutput {
                tool,
                message: format!("failed to launch: {e}"),
            }
        }
    })?;
    Ok(output)
}

/// A short, loggable excerpt of a failed command's stderr.
pub(crate) fn stderr_excerpt(output: &Output) -> String {
    let text = String::from_utf8_lossy(&output.stderr);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        format!("exited with {}", output.status)
    } else {
        let mut lines: Vec<&str> = trimmed.lines().collect();
        if lines.len() > 10 {
            lines = lines.split_off(lines.len() - 10);
        }
        lines.join("\n")
    }
}

/// Query `<program> --version` and extract the version string.
pub(crate) async fn get_version(
    tool: &'static str,
    program: impl AsRef<OsStr>,
    pattern: Option<&regex::Regex>,
) -> Result<String> {
    let output = run_command(tool, Command::new(program.as_ref()).arg("--version")).await?;
    if !output.status.success() {
        return Err(OcrWeaveError::MissingDependency(format!(
            "'{tool}' did not report a version (exit {})",
            output.status
        )));
    }
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    if text.trim().is_empty() {
        text = String::from_utf8_lossy(&output.stderr).into_owned();
    }
    let version = match pattern {
        Some(re) => re
            .captures(&text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string()),
        None => text.split_whitespace().next_back().map(|s| s.to_string()),
    };
    version.ok_or_else(|| {
        OcrWeaveError::MissingDependency(format!("could not parse version of '{tool}'"))
    })
}
