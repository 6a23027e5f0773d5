//! Cached client network information (IP address and user agent).

use crate::{IdentityError, IdentityResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portal_storage::{DurableStorage, StorageKeys};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long a cached lookup stays valid.
pub const CLIENT_INFO_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Placeholder reported when the IP address cannot be determined.
pub const UNKNOWN_IP: &str = "unknown";

pub const DEFAULT_USER_AGENT: &str = concat!("portal/", env!("CARGO_PKG_VERSION"));

/// Client network information attached to authentication requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub ip_address: String,
    pub user_agent: String,
    pub cached_at: DateTime<Utc>,
}

impl ClientInfo {
    /// Info reported when no lookup succeeded.
    pub fn placeholder(user_agent: impl Into<String>) -> Self {
        Self {
            ip_address: UNKNOWN_IP.to_string(),
            user_agent: user_agent.into(),
            cached_at: Utc::now(),
        }
    }

    fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return false;
        };
        // A timestamp from the future means the clock moved; treat as stale.
        self.cached_at <= now && now - self.cached_at < ttl
    }

    pub fn is_placeholder(&self) -> bool {
        self.ip_address == UNKNOWN_IP
    }
}

/// Where the public IP address comes from.
#[async_trait]
pub trait ClientInfoSource: Send + Sync {
    async fn lookup_ip(&self) -> IdentityResult<String>;
}

#[derive(Deserialize)]
struct IpResponse {
    ip: String,
}

/// Looks the IP address up from an HTTP endpoint answering `{"ip": "..."}`.
pub struct HttpClientInfoSource {
    client: reqwest::Client,
    url: String,
}

impl HttpClientInfoSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> IdentityResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ClientInfoSource for HttpClientInfoSource {
    async fn lookup_ip(&self) -> IdentityResult<String> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(IdentityError::Lookup(format!(
                "lookup returned {}",
                response.status()
            )));
        }
        let body: IpResponse = response.json().await?;
        let ip = body.ip.trim().to_string();
        if ip.is_empty() {
            return Err(IdentityError::Lookup("empty ip in response".into()));
        }
        Ok(ip)
    }
}

/// 24-hour cache of [`ClientInfo`] in durable storage.
pub struct ClientInfoCache {
    storage: Arc<dyn DurableStorage>,
    user_agent: String,
    ttl: Duration,
}

impl ClientInfoCache {
    pub fn new(storage: Arc<dyn DurableStorage>) -> Self {
        Self {
            storage,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            ttl: CLIENT_INFO_TTL,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// The cached entry, if present and still fresh.
    pub fn cached(&self) -> Option<ClientInfo> {
        let raw = match self.storage.get(StorageKeys::CLIENT_INFO) {
            Ok(raw) => raw?,
            Err(err) => {
                debug!(error = %err, "Client info cache unreadable");
                return None;
            }
        };

        match serde_json::from_str::<ClientInfo>(&raw) {
            Ok(info) if info.is_fresh(Utc::now(), self.ttl) => Some(info),
            Ok(_) => None,
            Err(err) => {
                warn!(error = %err, "Discarding malformed client info cache entry");
                None
            }
        }
    }

    /// Return fresh client info, looking it up when the cache is empty or stale.
    ///
    /// A failed lookup yields the [`UNKNOWN_IP`] placeholder, which is never
    /// written to storage.
    pub async fn get_or_refresh(&self, source: &dyn ClientInfoSource) -> ClientInfo {
        if let Some(info) = self.cached() {
            return info;
        }

        match source.lookup_ip().await {
            Ok(ip_address) => {
                let info = ClientInfo {
                    ip_address,
                    user_agent: self.user_agent.clone(),
                    cached_at: Utc::now(),
                };
                self.persist(&info);
                info!("Client info refreshed");
                info
            }
            Err(err) => {
                warn!(error = %err, "Client info lookup failed, using placeholder");
                ClientInfo::placeholder(self.user_agent.clone())
            }
        }
    }

    pub fn invalidate(&self) {
        if let Err(err) = self.storage.delete(StorageKeys::CLIENT_INFO) {
            warn!(error = %err, "Failed to clear client info cache");
        }
    }

    fn persist(&self, info: &ClientInfo) {
        let encoded = match serde_json::to_string(info) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(error = %err, "Failed to encode client info");
                return;
            }
        };
        if let Err(err) = self.storage.set(StorageKeys::CLIENT_INFO, &encoded) {
            warn!(error = %err, "Failed to persist client info");
        }
    }
}
