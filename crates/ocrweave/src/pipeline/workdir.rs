//! The pipeline's private working directory.
//!
//! All intermediate artifacts live here under a per-page prefix
//! (`NNNNNN.<role>.<ext>`, 1-based page number zero-padded to six digits),
//! so concurrent page workers never collide. The directory is deleted on
//! drop unless the user asked to keep it for debugging.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::info;

use crate::error::Result;

#[derive(Debug)]
pub struct WorkDir {
    dir: Option<TempDir>,
    path: PathBuf,
    keep: bool,
}

impl WorkDir {
    pub fn new(keep: bool) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("ocrweave.").tempdir()?;
        let path = dir.path().to_path_buf();
        Ok(Self {
            dir: Some(dir),
            path,
            keep,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `NNNNNN.<role>.<ext>` artifact path for a 0-based page index.
    pub fn page_path(&self, page_index: usize, role: &str, ext: &str) -> PathBuf {
        page_path(&self.path, page_index, role, ext)
    }

    /// Non-page-scoped artifact path.
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

pub fn page_path(workdir: &Path, page_index: usize, role: &str, ext: &str) -> PathBuf {
    workdir.join(format!("{:06}.{role}.{ext}", page_index + 1))
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.keep {
            if let Some(dir) = self.dir.take() {
                let kept = dir.keep();
                info!("temporary files kept at {}", kept.display());
            }
        }
        // Otherwise TempDir's drop removes the tree on every exit path.
    }
}
