//! Storage key constants.

/// Keys used in durable client storage.
pub struct StorageKeys;

impl StorageKeys {
    /// Permanent device identifier
    pub const DEVICE_ID: &'static str = "device_id";

    /// When the device identifier was first written (RFC 3339)
    pub const DEVICE_CREATED_AT: &'static str = "device_id_created_at";

    /// Cached IP address and user agent (JSON, 24h TTL)
    pub const CLIENT_INFO: &'static str = "client_info";
}
