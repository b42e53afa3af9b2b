//! Error types for almadar-script

use std::path::PathBuf;
use thiserror::Error;

/// Schema loading error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),

    #[error("Unsupported schema file: {0:?}")]
    UnsupportedFile(PathBuf),

    #[error("Duplicate orbital: {0}")]
    DuplicateDefinition(String),

    #[error("Invalid orbital {orbital}: {source}")]
    Construction {
        orbital: String,
        #[source]
        source: almadar_core::Error,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
