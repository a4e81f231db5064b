//! Blocking until a run has been fully ingested by every writer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::checkpoint::{read_completed, CHECKPOINT_FILE};
use crate::error::{IngestionError, Result};
use crate::simulation::SimulationLog;

/// Checkpoint files directly below `logs_dir/<host>/`.
pub fn find_checkpoints(logs_dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(logs_dir)
        .min_depth(2)
        .max_depth(2)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!(error = %e, "Skipping unreadable log entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && entry.file_name() == CHECKPOINT_FILE)
        .map(|entry| entry.into_path())
        .collect()
}

pub struct CompletionWaiter {
    log: Box<dyn SimulationLog>,
    logs_dir: PathBuf,
    interval: Duration,
}

impl CompletionWaiter {
    pub fn new(log: Box<dyn SimulationLog>, logs_dir: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            log,
            logs_dir: logs_dir.into(),
            interval,
        }
    }

    /// Whether every checkpoint under the logs directory reports completion.
    ///
    /// Unreadable checkpoints count as incomplete. With no checkpoints at all
    /// there is nothing to wait for.
    pub fn all_writers_complete(&self) -> bool {
        let checkpoints = find_checkpoints(&self.logs_dir);
        if checkpoints.is_empty() {
            warn!(logs_dir = %self.logs_dir.display(), "No writer checkpoints found");
            return true;
        }
        checkpoints.iter().all(|path| match read_completed(path) {
            Ok(done) => done,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Checkpoint not readable");
                false
            }
        })
    }

    async fn sleep(&self, cancel: &CancellationToken, waiting_for: &str) -> Result<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(IngestionError::Cancelled(waiting_for.to_string())),
            _ = tokio::time::sleep(self.interval) => Ok(()),
        }
    }

    /// Wait for the simulation to finish, then for every writer to finish.
    pub async fn wait_for_finish(&self, cancel: &CancellationToken) -> Result<()> {
        while !self.log.has_completed() {
            self.sleep(cancel, "waiting for the simulation").await?;
        }
        info!("Simulation completed, waiting for writers");

        while !self.all_writers_complete() {
            self.sleep(cancel, "waiting for writers").await?;
        }
        info!("All writers completed");
        Ok(())
    }
}
