//! JSON-file storage backend.

use crate::{DurableStorage, StorageError, StorageResult};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Stores all keys as one JSON object in a single file.
///
/// Every write replaces the file through a sibling temp file and a rename,
/// so a crash never leaves a half-written document behind.
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    /// Open a store at `path`, creating the parent directory if needed.
    ///
    /// The file itself is created lazily on first write.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                StorageError::Unavailable(format!(
                    "cannot create storage directory {}: {}",
                    parent.display(),
                    err
                ))
            })?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> StorageResult<Map<String, Value>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(err) => {
                return Err(StorageError::Unavailable(format!(
                    "cannot read {}: {}",
                    self.path.display(),
                    err
                )))
            }
        };

        if raw.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(StorageError::Encoding(format!(
                "{} does not contain a JSON object",
                self.path.display()
            ))),
            Err(err) => Err(StorageError::Encoding(format!(
                "{} is not valid JSON: {}",
                self.path.display(),
                err
            ))),
        }
    }

    fn write_document(&self, document: &Map<String, Value>) -> StorageResult<()> {
        let encoded = serde_json::to_string_pretty(document)
            .map_err(|err| StorageError::Encoding(err.to_string()))?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, encoded).map_err(|err| {
            StorageError::Unavailable(format!("cannot write {}: {}", tmp_path.display(), err))
        })?;
        std::fs::rename(&tmp_path, &self.path).map_err(|err| {
            StorageError::Unavailable(format!(
                "cannot replace {}: {}",
                self.path.display(),
                err
            ))
        })?;

        debug!(path = %self.path.display(), keys = document.len(), "storage file written");
        Ok(())
    }
}

impl DurableStorage for FileStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let _guard = self.lock.lock();
        let mut document = self.read_document()?;
        document.insert(key.to_string(), Value::String(value.to_string()));
        self.write_document(&document)
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let _guard = self.lock.lock();
        let document = self.read_document()?;
        Ok(document.get(key).map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }))
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let _guard = self.lock.lock();
        let mut document = self.read_document()?;
        let existed = document.remove(key).is_some();
        if existed {
            self.write_document(&document)?;
        }
        Ok(existed)
    }
}
