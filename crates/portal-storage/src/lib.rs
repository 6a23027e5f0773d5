//! Durable client storage for the portal.
//!
//! Backends:
//! - **File**: a single JSON object on disk, rewritten atomically
//! - **Memory**: process-local map, used for tests and ephemeral sessions
//!
//! Callers that must survive a missing or broken store (device identity,
//! client info cache) match on [`StorageError::Unavailable`] and degrade.

mod file;
mod keys;
mod memory;
mod traits;

pub use file::FileStorage;
pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use traits::DurableStorage;

use std::path::Path;
use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The backing store cannot be read or written at all.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// True when the store as a whole is unusable, as opposed to one bad value.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_) | StorageError::Io(_))
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Open the default file-backed store at `path`.
pub fn create_storage(path: &Path) -> StorageResult<Box<dyn DurableStorage>> {
    let storage = FileStorage::open(path)?;
    Ok(Box::new(storage))
}
