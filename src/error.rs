//! Error taxonomy for the FrostDB storage core.
//!
//! Variants map onto the recovery policy in the spec: configuration and
//! schema errors are hard-surfaced, encoding errors propagate to the
//! caller, WAL corruption is repaired internally and never reaches here,
//! and compaction/storage failures are logged and retried rather than
//! returned from the write path.

use thiserror::Error;

/// Result type for FrostDB storage core operations.
pub type Result<T> = std::result::Result<T, FrostError>;

#[derive(Error, Debug)]
pub enum FrostError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage corruption detected: {0}")]
    Corruption(String),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("invalid schema definition: {0}")]
    InvalidSchema(String),

    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("unsortable type for column {0}")]
    UnsortableType(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("table already exists: {0}")]
    TableExists(String),

    #[error("WAL write failed: {0}")]
    WalWriteFailed(String),

    #[error("compaction aborted at level {level}: {reason}")]
    CompactionAborted { level: usize, reason: String },

    #[error("storage persistence failed: {0}")]
    StorageFailure(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<bincode::Error> for FrostError {
    fn from(e: bincode::Error) -> Self {
        FrostError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for FrostError {
    fn from(e: serde_json::Error) -> Self {
        FrostError::Serialization(e.to_string())
    }
}

impl FrostError {
    /// Local retries apply to compaction and storage persistence failures.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FrostError::Io(_) | FrostError::StorageFailure(_) | FrostError::CompactionAborted { .. }
        )
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, FrostError::Corruption(_) | FrostError::ChecksumMismatch { .. })
    }
}
