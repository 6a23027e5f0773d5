//! # Observability
//!
//! Logging setup shared by every portal crate.
//!
//! Crates only emit events through `tracing` macros. The binary calls
//! [`init_with_config`] once at startup, which installs:
//!
//! - a JSON layer appending one event per line to `~/.portal/logs/portal.jsonl`
//! - an optional compact stderr layer for interactive use
//!
//! ```rust,ignore
//! fn main() {
//!     observability::init_with_config(observability::LogConfig {
//!         service_name: "portal".into(),
//!         default_level: "debug".into(),
//!         also_stderr: true,
//!         ..Default::default()
//!     });
//!     tracing::info!("ready");
//! }
//! ```

mod sink;

use std::path::PathBuf;

pub use sink::{default_log_path, LineWriter};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, written into the startup event.
    pub service_name: String,

    /// Default filter (e.g. "debug", "info", "session_engine=trace").
    /// `RUST_LOG` takes precedence when set.
    pub default_level: String,

    /// Custom JSONL file path. Defaults to [`default_log_path`].
    pub log_path: Option<PathBuf>,

    /// Disable the JSONL file sink entirely.
    pub file_sink: bool,

    /// Also emit compact logs to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            file_sink: true,
            also_stderr: false,
        }
    }
}

/// Initialize logging with default settings for the given service.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize logging with a custom configuration.
///
/// Calling this more than once is harmless: the second global subscriber
/// install fails and is ignored.
pub fn init_with_config(config: LogConfig) {
    sink::install(&config);
}

/// Re-export tracing macros so crates can use `observability::info!()`.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;
