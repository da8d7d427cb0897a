//! Error types for the migration engine.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Scan error: {0}")]
    Scan(#[from] walkdir::Error),

    /// No snapshot exists for the destination. Callers treat this as "start a new migration".
    #[error("No migration state found at {}", .0.display())]
    StateNotFound(PathBuf),

    #[error("Migration state at {} is unreadable: {source}", path.display())]
    CorruptState {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Source path does not exist: {0}")]
    SourceNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Destination is locked by another migration (remove {} if stale)", .0.display())]
    DestinationLocked(PathBuf),

    #[error("{message}")]
    Copy { path: String, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MigrationError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, MigrationError::StateNotFound(_))
    }
}

impl serde::Serialize for MigrationError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Result type alias for migration operations.
pub type MigrationResult<T> = Result<T, MigrationError>;
