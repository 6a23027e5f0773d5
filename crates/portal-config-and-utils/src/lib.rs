//! Core configuration, paths, and logging setup for the client portal.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{Config, DEFAULT_IDENTITY_PROVIDER_URL, DEFAULT_LOG_LEVEL, DEFAULT_LOGIN_PATH};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
