//! Observing the running simulation: completion and produced files.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{IngestionError, Result};

/// Whether the simulation has finished.
pub trait SimulationLog: Send + Sync {
    fn has_completed(&self) -> bool;
}

/// Master log of the simulation (`rsl.out.0000`), complete once it contains
/// the success marker.
#[derive(Debug, Clone)]
pub struct MasterLog {
    path: PathBuf,
    marker: String,
}

impl MasterLog {
    pub fn new(path: impl Into<PathBuf>, marker: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            marker: marker.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SimulationLog for MasterLog {
    fn has_completed(&self) -> bool {
        match fs::read(&self.path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).contains(&self.marker),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Master log not readable");
                false
            }
        }
    }
}

/// Lists the data files currently present.
pub trait FileSource: Send + Sync {
    fn list(&self) -> Result<Vec<PathBuf>>;
}

/// Regular files in one directory whose names start with a prefix.
#[derive(Debug, Clone)]
pub struct DirectoryScanner {
    dir: PathBuf,
    prefix: String,
}

impl DirectoryScanner {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }
}

impl FileSource for DirectoryScanner {
    fn list(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let matches = entry
                .file_name()
                .to_str()
                .map(|n| n.starts_with(&self.prefix))
                .unwrap_or(false);
            if matches {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Wait until `path` exists, checking every `interval`.
pub async fn wait_for_path(
    path: &Path,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut announced = false;
    loop {
        if path.exists() {
            return Ok(());
        }
        if !announced {
            info!(path = %path.display(), "Waiting for directory to appear");
            announced = true;
        }
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(IngestionError::Cancelled(format!(
                    "waiting for {}",
                    path.display()
                )));
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
