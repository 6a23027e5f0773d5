//! Configuration management for the portal client.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Default identity provider base URL (overridable at compile time via PORTAL_IDENTITY_PROVIDER_URL).
pub const DEFAULT_IDENTITY_PROVIDER_URL: &str = match option_env!("PORTAL_IDENTITY_PROVIDER_URL") {
    Some(url) => url,
    None => "https://portal.example.com/api/auth/",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default login entry point used for redirects.
pub const DEFAULT_LOGIN_PATH: &str = "/login";

const DEFAULT_ACCESS_TOKEN_TTL_SECS: u64 = 15 * 60;
const DEFAULT_REFRESH_MARGIN_SECS: u64 = 60;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Main portal configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Base URL of the identity provider (the server-side adaptation layer).
    #[serde(default = "default_identity_provider_url")]
    pub identity_provider_url: String,
    /// Login entry point for redirects.
    #[serde(default = "default_login_path")]
    pub login_path: String,
    /// Assumed access credential lifetime when the provider does not report one.
    #[serde(default = "default_access_token_ttl_secs")]
    pub access_token_ttl_secs: u64,
    /// How long before expiry the proactive refresh fires.
    #[serde(default = "default_refresh_margin_secs")]
    pub refresh_margin_secs: u64,
    /// Transport timeout for identity provider calls.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Optional IP lookup endpoint used to populate the client info cache.
    #[serde(default)]
    pub client_info_url: Option<String>,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_identity_provider_url() -> String {
    DEFAULT_IDENTITY_PROVIDER_URL.to_string()
}

fn default_login_path() -> String {
    DEFAULT_LOGIN_PATH.to_string()
}

fn default_access_token_ttl_secs() -> u64 {
    DEFAULT_ACCESS_TOKEN_TTL_SECS
}

fn default_refresh_margin_secs() -> u64 {
    DEFAULT_REFRESH_MARGIN_SECS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            identity_provider_url: default_identity_provider_url(),
            login_path: default_login_path(),
            access_token_ttl_secs: DEFAULT_ACCESS_TOKEN_TTL_SECS,
            refresh_margin_secs: DEFAULT_REFRESH_MARGIN_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            client_info_url: None,
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        if let Some(level) = non_empty_env("PORTAL_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(url) = non_empty_env("PORTAL_IDENTITY_PROVIDER_URL") {
            self.identity_provider_url = url;
        }
    }

    /// Reject configurations the session engine cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        self.identity_provider_url()?;

        if !self.login_path.starts_with('/') {
            return Err(CoreError::Config(format!(
                "login_path must be an absolute path, got {:?}",
                self.login_path
            )));
        }
        if self.refresh_margin_secs >= self.access_token_ttl_secs {
            return Err(CoreError::Config(format!(
                "refresh_margin_secs ({}) must be smaller than access_token_ttl_secs ({})",
                self.refresh_margin_secs, self.access_token_ttl_secs
            )));
        }
        Ok(())
    }

    /// Get the identity provider URL as a parsed URL.
    pub fn identity_provider_url(&self) -> CoreResult<Url> {
        Url::parse(&self.identity_provider_url).map_err(CoreError::from)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}
