//! Permanent device identifier management.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use portal_storage::{DurableStorage, StorageKeys, StorageResult};
use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};
use serde::Serialize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A resolved device identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    /// Lowercase hyphenated UUID.
    pub id: String,
    /// When the identifier was first persisted, if known.
    pub created_at: Option<DateTime<Utc>>,
    /// False when storage was unavailable and the id lives only in this process.
    pub persistent: bool,
}

/// Creates and retrieves the permanent device identifier.
///
/// Once an identifier is written it is returned unchanged for as long as the
/// storage stays intact. When storage cannot be used the manager hands out an
/// in-process identifier instead and never touches storage for the rest of
/// its lifetime.
pub struct DeviceIdentityManager {
    storage: Arc<dyn DurableStorage>,
    /// Serializes first-time creation so concurrent callers agree.
    creation_lock: Mutex<()>,
    ephemeral: Mutex<Option<String>>,
}

impl DeviceIdentityManager {
    pub fn new(storage: Arc<dyn DurableStorage>) -> Self {
        Self {
            storage,
            creation_lock: Mutex::new(()),
            ephemeral: Mutex::new(None),
        }
    }

    /// Return the device identifier, creating and persisting it on first use.
    ///
    /// Never fails: storage problems are logged and answered with an
    /// ephemeral identifier.
    pub fn get_or_create(&self) -> String {
        if let Some(id) = self.ephemeral.lock().clone() {
            return id;
        }

        let _guard = self.creation_lock.lock();
        match self.resolve_persistent() {
            Ok(id) => id,
            Err(err) => {
                warn!(
                    error = %err,
                    "Durable storage unavailable, using a non-persistent device id"
                );
                self.ephemeral_id()
            }
        }
    }

    /// Like [`get_or_create`](Self::get_or_create) but also reports creation time
    /// and whether the identifier is persisted.
    pub fn identity(&self) -> DeviceIdentity {
        let id = self.get_or_create();
        if self.ephemeral.lock().is_some() {
            return DeviceIdentity {
                id,
                created_at: None,
                persistent: false,
            };
        }

        let created_at = self
            .storage
            .get(StorageKeys::DEVICE_CREATED_AT)
            .ok()
            .flatten()
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|ts| ts.with_timezone(&Utc));

        DeviceIdentity {
            id,
            created_at,
            persistent: true,
        }
    }

    fn resolve_persistent(&self) -> StorageResult<String> {
        if let Some(stored) = self.storage.get(StorageKeys::DEVICE_ID)? {
            match normalize_device_id(&stored) {
                Some(normalized) if normalized == stored => return Ok(stored),
                Some(normalized) => {
                    info!("Normalizing legacy device id format");
                    if let Err(err) = self.storage.set(StorageKeys::DEVICE_ID, &normalized) {
                        warn!(error = %err, "Failed to persist normalized device id");
                    }
                    return Ok(normalized);
                }
                None => {
                    warn!("Stored device id is not a valid identifier, replacing it");
                }
            }
        }

        let id = generate_device_id();
        self.storage.set(StorageKeys::DEVICE_ID, &id)?;
        if let Err(err) = self
            .storage
            .set(StorageKeys::DEVICE_CREATED_AT, &Utc::now().to_rfc3339())
        {
            warn!(error = %err, "Failed to persist device id creation time");
        }

        info!(device_id = %id, "Created new device id");
        Ok(id)
    }

    fn ephemeral_id(&self) -> String {
        let mut slot = self.ephemeral.lock();
        slot.get_or_insert_with(generate_device_id).clone()
    }
}

/// Normalize a stored identifier into the stable lowercase hyphenated form.
///
/// Accepts legacy encodings: JSON-quoted strings, upper case, braced,
/// `urn:uuid:` prefixed and unhyphenated UUIDs. Returns `None` for anything
/// else, including the nil UUID.
pub fn normalize_device_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches('"').trim();
    Uuid::parse_str(trimmed)
        .ok()
        .filter(|uuid| !uuid.is_nil())
        .map(|uuid| uuid.hyphenated().to_string())
}

fn generate_device_id() -> String {
    let mut bytes = [0u8; 16];
    if let Err(err) = OsRng.try_fill_bytes(&mut bytes) {
        warn!(error = %err, "OS random source unavailable, using seeded fallback generator");
        StdRng::seed_from_u64(fallback_seed()).fill_bytes(&mut bytes);
    }
    debug!("Generated device id");
    uuid::Builder::from_random_bytes(bytes)
        .into_uuid()
        .hyphenated()
        .to_string()
}

fn fallback_seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or_default();
    nanos ^ (u64::from(std::process::id()) << 32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_storage::{MemoryStorage, StorageError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Storage whose every operation fails, counting write attempts.
    #[derive(Default)]
    struct BrokenStorage {
        writes: AtomicUsize,
    }

    impl DurableStorage for BrokenStorage {
        fn set(&self, _key: &str, _value: &str) -> StorageResult<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::Unavailable("quota exceeded".into()))
        }

        fn get(&self, _key: &str) -> StorageResult<Option<String>> {
            Err(StorageError::Unavailable("access denied".into()))
        }

        fn delete(&self, _key: &str) -> StorageResult<bool> {
            Err(StorageError::Unavailable("access denied".into()))
        }
    }

    fn is_stable_format(id: &str) -> bool {
        id.len() == 36
            && id
                .chars()
                .all(|c| c == '-' || c.is_ascii_digit() || ('a'..='f').contains(&c))
            && normalize_device_id(id).as_deref() == Some(id)
    }

    #[test]
    fn test_first_call_creates_and_second_call_reuses() {
        let storage = Arc::new(MemoryStorage::new());
        let manager = DeviceIdentityManager::new(storage.clone());

        assert!(storage.get(StorageKeys::DEVICE_ID).unwrap().is_none());

        let first = manager.get_or_create();
        let second = manager.get_or_create();

        assert_eq!(first, second);
        assert!(is_stable_format(&first), "unexpected format: {first}");
        assert_eq!(storage.get(StorageKeys::DEVICE_ID).unwrap(), Some(first));
    }

    #[test]
    fn test_new_manager_on_same_storage_returns_same_id() {
        let storage = Arc::new(MemoryStorage::new());
        let first = DeviceIdentityManager::new(storage.clone()).get_or_create();
        let second = DeviceIdentityManager::new(storage).get_or_create();
        assert_eq!(first, second);
    }

    #[test]
    fn test_generated_id_is_version_4() {
        let manager = DeviceIdentityManager::new(Arc::new(MemoryStorage::new()));
        let id = manager.get_or_create();
        let uuid = Uuid::parse_str(&id).unwrap();
        assert_eq!(uuid.get_version_num(), 4);
    }

    #[test]
    fn test_legacy_formats_are_normalized_once() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set(
                StorageKeys::DEVICE_ID,
                "\"6F5DB7F9-C6EF-4D60-88F8-39F62F272F07\"",
            )
            .unwrap();

        let manager = DeviceIdentityManager::new(storage.clone());
        let id = manager.get_or_create();

        assert_eq!(id, "6f5db7f9-c6ef-4d60-88f8-39f62f272f07");
        assert_eq!(storage.get(StorageKeys::DEVICE_ID).unwrap(), Some(id));
    }

    #[test]
    fn test_normalize_device_id_variants() {
        let expected = Some("6f5db7f9-c6ef-4d60-88f8-39f62f272f07".to_string());
        assert_eq!(
            normalize_device_id("6f5db7f9c6ef4d6088f839f62f272f07"),
            expected
        );
        assert_eq!(
            normalize_device_id("{6f5db7f9-c6ef-4d60-88f8-39f62f272f07}"),
            expected
        );
        assert_eq!(
            normalize_device_id("urn:uuid:6f5db7f9-c6ef-4d60-88f8-39f62f272f07"),
            expected
        );
        assert_eq!(normalize_device_id("not-a-device"), None);
        assert_eq!(
            normalize_device_id("00000000-0000-0000-0000-000000000000"),
            None
        );
    }

    #[test]
    fn test_corrupt_value_is_replaced() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(StorageKeys::DEVICE_ID, "garbage").unwrap();

        let manager = DeviceIdentityManager::new(storage.clone());
        let id = manager.get_or_create();

        assert!(is_stable_format(&id));
        assert_eq!(storage.get(StorageKeys::DEVICE_ID).unwrap(), Some(id));
    }

    #[test]
    fn test_unavailable_storage_degrades_without_writing() {
        let storage = Arc::new(BrokenStorage::default());
        let manager = DeviceIdentityManager::new(storage.clone());

        let first = manager.get_or_create();
        let second = manager.get_or_create();

        assert!(is_stable_format(&first));
        assert_eq!(first, second);
        assert_eq!(storage.writes.load(Ordering::SeqCst), 0);

        let identity = manager.identity();
        assert!(!identity.persistent);
        assert_eq!(identity.id, first);
    }

    #[test]
    fn test_identity_reports_creation_time() {
        let manager = DeviceIdentityManager::new(Arc::new(MemoryStorage::new()));
        let before = Utc::now() - chrono::Duration::seconds(1);

        let identity = manager.identity();

        assert!(identity.persistent);
        assert!(identity.created_at.unwrap() >= before);
    }

    #[test]
    fn test_concurrent_first_use_yields_one_id() {
        let manager = Arc::new(DeviceIdentityManager::new(Arc::new(MemoryStorage::new())));

        let ids: Vec<String> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let manager = manager.clone();
                    scope.spawn(move || manager.get_or_create())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
    }
}
