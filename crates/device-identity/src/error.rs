//! Device identity error types.

use thiserror::Error;

/// Errors raised while resolving client identity material.
#[derive(Error, Debug)]
pub enum IdentityError {
    /// Durable storage is inaccessible.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] portal_storage::StorageError),

    /// Client info lookup failed.
    #[error("Client info lookup failed: {0}")]
    Lookup(String),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using IdentityError.
pub type IdentityResult<T> = Result<T, IdentityError>;
