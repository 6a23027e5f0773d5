//! Device identity and client info commands.

use crate::output::{self, OutputFormat};
use anyhow::Result;
use session_engine::AuthRuntime;

/// Print the permanent device identifier.
pub async fn device_id(runtime: &AuthRuntime, format: &OutputFormat) -> Result<()> {
    let identity = runtime.device_identity();
    output::print(&identity, format, |identity| {
        output::print_heading("Device");
        output::print_row("ID", &identity.id);
        output::print_row(
            "Created",
            &identity
                .created_at
                .map(|at| at.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string()),
        );
        if !identity.persistent {
            output::print_row("Storage", "unavailable (not persisted)");
        }
    });
    Ok(())
}

/// Print the cached client network info, looking it up when stale.
pub async fn client_info(runtime: &AuthRuntime, format: &OutputFormat) -> Result<()> {
    let info = runtime.client_info().await;
    output::print(&info, format, |info| {
        output::print_heading("Client");
        output::print_row("IP address", &info.ip_address);
        output::print_row("User agent", &info.user_agent);
        output::print_row("Cached at", &info.cached_at.to_rfc3339());
    });
    Ok(())
}
