//! Store errors

use thiserror::Error;

/// Errors that can occur when reading or writing the address store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Snapshot file could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Write rejected because it would break a table invariant
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Referenced row does not exist
    #[error("Not found: {0}")]
    NotFound(String),
}

impl StoreError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Io(_))
    }
}
