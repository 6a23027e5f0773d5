//! Wiring for the whole session engine.
//!
//! One `AuthRuntime` per process owns the store, the coordinator and the
//! background worker, so every entry point shares one refresh authority.

use crate::background::{BackgroundMessage, BackgroundRefreshWorker};
use crate::coordinator::{RefreshCoordinator, RefreshOutcome};
use crate::headers::ClientHeaders;
use crate::identity_provider::{IdentityProviderClient, LogoutScope};
use crate::interceptor::RequestInterceptor;
use crate::route_gate::{Navigator, ProtectedRouteGate};
use crate::scheduler::{ProactiveRefreshScheduler, Visibility};
use crate::store::SessionStateStore;
use crate::transport::Transport;
use crate::AuthResult;
use device_identity::{
    ClientInfo, ClientInfoCache, DeviceIdentity, DeviceIdentityManager, HttpClientInfoSource,
    DEFAULT_USER_AGENT,
};
use parking_lot::Mutex;
use portal_config_and_utils::{Config, DEFAULT_LOGIN_PATH};
use portal_storage::DurableStorage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Runtime settings for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub identity_provider_url: String,
    pub login_path: String,
    /// Assumed access lifetime when the provider does not report one.
    pub access_token_ttl: Duration,
    pub refresh_margin: Duration,
    pub request_timeout: Duration,
    pub client_info_url: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        let login_path = if config.login_path.is_empty() {
            DEFAULT_LOGIN_PATH.to_string()
        } else {
            config.login_path.clone()
        };
        Self {
            identity_provider_url: config.identity_provider_url.clone(),
            login_path,
            access_token_ttl: Duration::from_secs(config.access_token_ttl_secs),
            refresh_margin: Duration::from_secs(config.refresh_margin_secs),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            client_info_url: config.client_info_url.clone(),
        }
    }
}

/// Shared session engine runtime.
pub struct AuthRuntime {
    settings: EngineSettings,
    store: Arc<SessionStateStore>,
    coordinator: Arc<RefreshCoordinator>,
    interceptor: Arc<RequestInterceptor>,
    provider: Arc<IdentityProviderClient>,
    devices: Arc<DeviceIdentityManager>,
    client_info: ClientInfoCache,
    background: BackgroundRefreshWorker,
    scheduler: Mutex<Option<ProactiveRefreshScheduler>>,
}

impl AuthRuntime {
    /// Build the engine. Must be called inside a tokio runtime.
    pub fn new(
        settings: EngineSettings,
        transport: Arc<dyn Transport>,
        storage: Arc<dyn DurableStorage>,
    ) -> Self {
        let devices = Arc::new(DeviceIdentityManager::new(storage.clone()));
        let device_id = devices.get_or_create();
        let headers = Arc::new(ClientHeaders::new(transport.clone(), device_id));
        let provider = Arc::new(IdentityProviderClient::new(transport.clone(), headers.clone()));
        let store = Arc::new(SessionStateStore::new());
        let coordinator = Arc::new(RefreshCoordinator::new(
            provider.clone(),
            store.clone(),
            settings.access_token_ttl,
        ));
        let interceptor = Arc::new(RequestInterceptor::new(
            transport,
            headers,
            coordinator.clone(),
        ));
        let background = BackgroundRefreshWorker::spawn(coordinator.clone());

        Self {
            settings,
            store,
            coordinator,
            interceptor,
            provider,
            devices,
            client_info: ClientInfoCache::new(storage),
            background,
            scheduler: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn store(&self) -> Arc<SessionStateStore> {
        self.store.clone()
    }

    pub fn coordinator(&self) -> Arc<RefreshCoordinator> {
        self.coordinator.clone()
    }

    pub fn interceptor(&self) -> Arc<RequestInterceptor> {
        self.interceptor.clone()
    }

    pub fn provider(&self) -> Arc<IdentityProviderClient> {
        self.provider.clone()
    }

    pub fn device_identity(&self) -> DeviceIdentity {
        self.devices.identity()
    }

    pub async fn silent_refresh(&self) -> Option<RefreshOutcome> {
        self.coordinator.silent_refresh().await
    }

    pub async fn refresh(&self) -> RefreshOutcome {
        self.coordinator.refresh().await
    }

    pub async fn logout(&self, scope: LogoutScope) -> AuthResult<()> {
        self.coordinator.logout(scope).await
    }

    pub async fn verify_otp(&self, code: &str) -> AuthResult<RefreshOutcome> {
        self.coordinator.verify_otp(code).await
    }

    pub async fn resend_otp(&self) -> AuthResult<Option<String>> {
        let client = self.client_info().await;
        self.coordinator.resend_otp(&client).await
    }

    /// Cached client info, looked up when stale.
    pub async fn client_info(&self) -> ClientInfo {
        if let Some(cached) = self.client_info.cached() {
            return cached;
        }
        let Some(url) = self.settings.client_info_url.as_deref() else {
            return ClientInfo::placeholder(DEFAULT_USER_AGENT);
        };
        match HttpClientInfoSource::new(url, self.settings.request_timeout) {
            Ok(source) => self.client_info.get_or_refresh(&source).await,
            Err(err) => {
                warn!(error = %err, "Client info source unavailable");
                ClientInfo::placeholder(DEFAULT_USER_AGENT)
            }
        }
    }

    /// Start the proactive scheduler. Calling again is a no-op.
    pub fn start_scheduler(&self) {
        let mut scheduler = self.scheduler.lock();
        if scheduler.is_some() {
            return;
        }
        info!(
            margin_secs = self.settings.refresh_margin.as_secs(),
            "Starting proactive refresh scheduler"
        );
        *scheduler = Some(ProactiveRefreshScheduler::spawn(
            self.coordinator.clone(),
            &self.store,
            self.background.handle(),
            self.settings.refresh_margin,
        ));
    }

    pub fn set_visibility(&self, visibility: Visibility) {
        if let Some(scheduler) = self.scheduler.lock().as_ref() {
            scheduler.set_visibility(visibility);
        }
    }

    pub fn next_proactive_refresh(&self) -> Option<tokio::time::Instant> {
        self.scheduler
            .lock()
            .as_ref()
            .and_then(ProactiveRefreshScheduler::next_fire_at)
    }

    pub fn subscribe_background(&self) -> broadcast::Receiver<BackgroundMessage> {
        self.background.subscribe()
    }

    pub fn route_gate(&self, navigator: Arc<dyn Navigator>) -> ProtectedRouteGate {
        ProtectedRouteGate::new(self.settings.login_path.clone(), navigator)
    }

    pub fn shutdown(&self) {
        if let Some(scheduler) = self.scheduler.lock().take() {
            scheduler.shutdown();
        }
        self.background.shutdown();
    }
}
