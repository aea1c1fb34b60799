//! Error types shared across the FDC workspace

use thiserror::Error;

/// Result type alias for FDC operations
pub type Result<T> = std::result::Result<T, FdcError>;

/// Main error type for cross-cutting FDC concerns
#[derive(Error, Debug)]
pub enum FdcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Configuration error: {0}")]
    Config(String),
}
