// Session artifacts and storage

pub mod metadata;
pub mod storage;

pub use metadata::*;
pub use storage::*;

use std::path::PathBuf;

/// Error type for session storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid telemetry: {0}")]
    InvalidTelemetry(String),

    #[error("Not found: {0:?}")]
    NotFound(PathBuf),
}
