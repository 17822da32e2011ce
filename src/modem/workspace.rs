//! # Temp Workspace Manager
//!
//! Each unit of work gets its own scratch directory (`ggwave-XXXXXX`) for the
//! audio files it hands to or receives from the external tools.
//!
//! ## Cleanup Contract:
//! - The normal path calls [`Workspace::destroy`], which removes the directory
//!   on the blocking pool so large audio files never stall the event loop.
//! - Any other exit path (an early `?`, a panic) drops the workspace, and
//!   `Drop` performs the removal instead.
//! - Either way there is exactly one removal attempt, and a failed removal is
//!   only logged.

use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

const PREFIX: &str = "ggwave-";

#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl Workspace {
    /// Create a fresh, uniquely named directory under `root`.
    pub fn create(root: &Path) -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix(PREFIX).tempdir_in(root)?;
        let path = dir.path().to_path_buf();
        debug!(path = %path.display(), "workspace created");
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of a file inside the workspace.
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Remove the directory and everything in it.
    pub async fn destroy(mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let path = self.path.clone();

        match tokio::task::spawn_blocking(move || dir.close()).await {
            Ok(result) => log_removal(&path, result),
            Err(err) => warn!(path = %path.display(), error = %err, "workspace cleanup task failed"),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            log_removal(&self.path, dir.close());
        }
    }
}

fn log_removal(path: &Path, result: io::Result<()>) {
    match result {
        Ok(()) => debug!(path = %path.display(), "workspace removed"),
        Err(err) => warn!(path = %path.display(), error = %err, "failed to remove workspace"),
    }
}
