//! CLI command implementations.

mod device;
mod session;

pub use device::{client_info, device_id};
pub use session::{logout, refresh, status, watch};

use anyhow::{Context as _, Result};
use csrf_guard::cookies::REFRESH_COOKIE_NAME;
use portal_config_and_utils::{init_logging, Config, Paths};
use portal_storage::{DurableStorage, FileStorage, MemoryStorage};
use session_engine::{AuthRuntime, EngineSettings, ReqwestTransport};
use std::sync::Arc;
use tracing::{debug, warn};

/// Global options shared by every command.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub log_level: Option<String>,
    pub identity_provider_url: Option<String>,
    pub refresh_cookie: Option<String>,
}

/// Load configuration, initialize logging and wire the session engine.
pub fn build_runtime(options: &GlobalOptions) -> Result<AuthRuntime> {
    let paths = Paths::new().context("Failed to resolve portal directories")?;
    let mut config = Config::load(&paths).context("Failed to load configuration")?;
    if let Some(url) = &options.identity_provider_url {
        config.identity_provider_url = url.clone();
    }
    config.validate()?;

    init_logging(options.log_level.as_deref().unwrap_or(&config.log_level));
    debug!(base_dir = %paths.base_dir().display(), "Configuration loaded");

    let settings = EngineSettings::from(&config);
    let transport = Arc::new(ReqwestTransport::new(
        &settings.identity_provider_url,
        settings.request_timeout,
    )?);
    if let Some(value) = &options.refresh_cookie {
        transport.seed_cookie(REFRESH_COOKIE_NAME, value);
    }

    Ok(AuthRuntime::new(settings, transport, open_storage(&paths)))
}

/// File-backed storage, or an in-memory store when the file cannot be used.
fn open_storage(paths: &Paths) -> Arc<dyn DurableStorage> {
    let opened = paths
        .ensure_dirs()
        .map_err(|err| err.to_string())
        .and_then(|()| FileStorage::open(&paths.storage_file()).map_err(|err| err.to_string()));

    match opened {
        Ok(storage) => Arc::new(storage),
        Err(err) => {
            warn!(error = %err, "Durable storage unavailable, continuing in memory");
            Arc::new(MemoryStorage::new())
        }
    }
}
