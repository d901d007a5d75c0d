//! Error types shared across the Cascade system.

use thiserror::Error;

/// Result type alias using the shared Cascade error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for Cascade collaborator boundaries.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
