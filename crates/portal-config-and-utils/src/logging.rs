//! Logging initialization for the portal.
//!
//! Thin wrapper over the observability crate so the binary has one call to make.

use observability::LogConfig;

/// Initialize logging with the given default level.
///
/// Writes JSONL to `~/.portal/logs/portal.jsonl`; `RUST_LOG` overrides `level`.
/// Set `PORTAL_LOG_STDERR=1` to mirror events to stderr.
pub fn init_logging(level: &str) {
    let also_stderr = std::env::var("PORTAL_LOG_STDERR")
        .map(|raw| matches!(raw.trim(), "1" | "true" | "yes"))
        .unwrap_or(false);

    observability::init_with_config(LogConfig {
        service_name: "portal".into(),
        default_level: level.into(),
        also_stderr,
        ..Default::default()
    });
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
