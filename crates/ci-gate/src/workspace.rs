//! Per-run working directories.
//!
//! Every run executes in its own directory under a runs root, so runs in
//! different concurrency groups never see each other's files. Steps of the
//! same run share the directory. The directory is removed once the run is
//! terminal.

use crate::run::RunId;
use crate::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

/// Default parent for run directories: `<system temp>/ci-gate`.
pub fn default_runs_root() -> PathBuf {
    std::env::temp_dir().join("ci-gate")
}

/// Isolated working directory owned by one run.
///
/// Layout: `<runs root>/<run id>-<random suffix>`
#[derive(Debug)]
pub struct RunWorkspace {
    source: PathBuf,
    dir: TempDir,
}

impl RunWorkspace {
    /// Create a fresh, empty directory for `run_id` under `runs_root`.
    /// Creates `runs_root` if needed.
    ///
    /// `source` is the repository the run checks out from; it is exposed to
    /// steps as `${{ source }}` and never used as a working directory.
    pub fn create(source: &Path, runs_root: &Path, run_id: &RunId) -> Result<Self> {
        fs::create_dir_all(runs_root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", run_id))
            .tempdir_in(runs_root)?;

        debug!(run_id = %run_id, path = %dir.path().display(), "Created run workspace");

        Ok(Self {
            source: source.to_path_buf(),
            dir,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the directory and everything the steps left in it.
    ///
    /// Removal runs on the blocking pool; failures are logged, not returned,
    /// since the run has already reached its terminal state.
    pub async fn cleanup(self) {
        let path = self.dir.path().to_path_buf();
        match tokio::task::spawn_blocking(move || self.dir.close()).await {
            Ok(Ok(())) => debug!(path = %path.display(), "Removed run workspace"),
            Ok(Err(e)) => {
                warn!(path = %path.display(), error = %e, "Failed to remove run workspace")
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Workspace cleanup task failed"),
        }
    }
}
