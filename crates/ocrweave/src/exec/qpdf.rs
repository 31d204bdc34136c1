//! qpdf adapter: linearization of the finished file.

use std::path::Path;

use tokio::process::Command;

use super::{program_path, run_command, stderr_excerpt};
use crate::error::{OcrWeaveError, Result};

const TOOL: &str = "qpdf";

/// qpdf signals "completed with warnings" with this exit status.
const EXIT_WARNINGS: i32 = 3;

/// Rewrite `input` as a linearized ("fast web view") PDF at `output`.
pub async fn linearize(input: &Path, output: &Path) -> Result<()> {
    let mut command = Command::new(program_path(TOOL));
    command.arg("--linearize").arg(input).arg(output);
    let result = run_command(TOOL, &mut command).await?;
    let code = result.status.code().unwrap_or(-1);
    if !result.status.success() && code != EXIT_WARNINGS {
        return Err(OcrWeaveError::SubprocessOutput {
            tool: TOOL,
            message: stderr_excerpt(&result),
        });
    }
    Ok(())
}
