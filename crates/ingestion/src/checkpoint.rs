//! Durable record of ingested files.
//!
//! Stored as JSON at `<logs_dir>/<hostname>/checkpoint`:
//!
//! ```json
//! { "completed": false, "files": { "/out/wrfout_d01_...": true } }
//! ```
//!
//! `true` means processed, `false` pending and `"failed"` failed.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{IngestionError, Result};

/// File name of a checkpoint inside its host directory.
pub const CHECKPOINT_FILE: &str = "checkpoint";

/// Processing state of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawState", into = "RawState")]
pub enum FileState {
    Pending,
    Processed,
    Failed,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawState {
    Flag(bool),
    Text(String),
}

impl From<FileState> for RawState {
    fn from(state: FileState) -> Self {
        match state {
            FileState::Pending => RawState::Flag(false),
            FileState::Processed => RawState::Flag(true),
            FileState::Failed => RawState::Text("failed".to_string()),
        }
    }
}

impl TryFrom<RawState> for FileState {
    type Error = String;

    fn try_from(raw: RawState) -> std::result::Result<Self, Self::Error> {
        match raw {
            RawState::Flag(true) => Ok(FileState::Processed),
            RawState::Flag(false) => Ok(FileState::Pending),
            RawState::Text(s) if s == "failed" => Ok(FileState::Failed),
            RawState::Text(s) => Err(format!("unknown file state {:?}", s)),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Record {
    #[serde(default)]
    completed: bool,
    #[serde(default, alias = "datafiles")]
    files: BTreeMap<String, FileState>,
}

/// Host name used to separate checkpoints of different writer hosts.
pub fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .or_else(|| {
            fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "localhost".to_string())
}

/// Checkpoint of one writer process. Every mutation is persisted before it
/// returns.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    record: Record,
}

impl CheckpointStore {
    /// Load the checkpoint at `path`, or start empty when it does not exist.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let record = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| IngestionError::Checkpoint {
                path: path.clone(),
                reason: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No checkpoint, starting empty");
                Record::default()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, record })
    }

    /// Checkpoint of this host under `logs_dir`.
    pub fn for_host(logs_dir: &Path) -> Result<Self> {
        Self::load(logs_dir.join(hostname()).join(CHECKPOINT_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mark_processing(&mut self, file: &Path) -> Result<()> {
        self.set(file, FileState::Pending)
    }

    pub fn mark_processed(&mut self, file: &Path) -> Result<()> {
        self.set(file, FileState::Processed)
    }

    pub fn mark_failed(&mut self, file: &Path) -> Result<()> {
        self.set(file, FileState::Failed)
    }

    pub fn mark_run_complete(&mut self) -> Result<()> {
        self.record.completed = true;
        self.persist()?;
        info!(path = %self.path.display(), "Run marked complete");
        Ok(())
    }

    pub fn is_processed(&self, file: &Path) -> bool {
        self.state(file) == Some(FileState::Processed)
    }

    pub fn state(&self, file: &Path) -> Option<FileState> {
        self.record.files.get(&key(file)).copied()
    }

    /// Paths recorded as processed.
    pub fn processed_paths(&self) -> Vec<PathBuf> {
        self.record
            .files
            .iter()
            .filter(|(_, state)| **state == FileState::Processed)
            .map(|(path, _)| PathBuf::from(path))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.record.completed
    }

    fn set(&mut self, file: &Path, state: FileState) -> Result<()> {
        self.record.files.insert(key(file), state);
        self.persist()
    }

    /// Rewrite the whole record through a temporary file and a rename.
    fn persist(&self) -> Result<()> {
        let fail = |reason: String| IngestionError::Checkpoint {
            path: self.path.clone(),
            reason,
        };
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, &self.record)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| fail(e.to_string()))?;
        Ok(())
    }
}

fn key(file: &Path) -> String {
    file.to_string_lossy().into_owned()
}

/// Read only the completion flag of a checkpoint file.
pub fn read_completed(path: &Path) -> Result<bool> {
    let bytes = fs::read(path)?;
    let record: Record = serde_json::from_slice(&bytes).map_err(|e| IngestionError::Checkpoint {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(record.completed)
}
