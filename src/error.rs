use std::time::Duration;
use thiserror::Error;

use crate::storage::StoreError;

/// Fatal conditions. Anything that reaches a caller as `PipelineError` aborts
/// the enclosing operation.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing credentials: {}", .0.join(", "))]
    MissingCredentials(Vec<&'static str>),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Why a single attempt against an external source failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("invalid response structure: {0}")]
    InvalidStructure(String),

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),
}
