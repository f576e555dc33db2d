//! Error types for the vector index

use thiserror::Error;

/// Result type alias for index operations
pub type Result<T> = std::result::Result<T, IndexError>;

/// Error types that can occur in index operations
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid vector: {reason}")]
    InvalidVector { reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Corrupt data: {0}")]
    CorruptData(String),

    #[error("Incompatible format: {0}")]
    IncompatibleFormat(String),

    #[error("Capacity error: {0}")]
    Capacity(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<std::collections::TryReserveError> for IndexError {
    fn from(err: std::collections::TryReserveError) -> Self {
        IndexError::Capacity(err.to_string())
    }
}
