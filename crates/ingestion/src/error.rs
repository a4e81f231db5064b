//! Error types for the ingestion crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during ingestion.
#[derive(Error, Debug)]
pub enum IngestionError {
    /// Mandatory run configuration is missing or inconsistent. Fatal at startup.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A file name does not follow the output naming convention. The file is skipped.
    #[error("Failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    /// A store node never appeared within the retry budget.
    #[error("Store node {name} unavailable after {attempts} attempts")]
    StoreUnavailable { name: String, attempts: u32 },

    /// A single slice or attribute write failed.
    #[error("Failed to write {target}: {reason}")]
    WriteFailure { target: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Dataset error: {0}")]
    Dataset(#[from] netcdf_parser::NetCdfError),

    #[error("Checkpoint error at {path}: {reason}")]
    Checkpoint { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Cancelled while {0}")]
    Cancelled(String),
}

impl IngestionError {
    pub fn is_config(&self) -> bool {
        matches!(self, IngestionError::Config(_))
    }
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestionError>;
