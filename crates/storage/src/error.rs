//! Error types for array store operations.

use thiserror::Error;

/// Result type for array store operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    /// The named array, group, or key-value store does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Schema is malformed or does not match the data written against it.
    #[error("Invalid schema for {name}: {reason}")]
    InvalidSchema { name: String, reason: String },

    /// Slice falls outside the array domain or has the wrong rank.
    #[error("Invalid slice for {name}: {reason}")]
    InvalidSlice { name: String, reason: String },

    /// The node exists but is of a different kind (e.g. a group used as an array).
    #[error("Wrong node kind for {name}: expected {expected}")]
    WrongKind { name: String, expected: &'static str },

    /// Storage backend rejected the request.
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
