//! Session commands.

use crate::output::{self, OutputFormat};
use anyhow::{bail, Result};
use session_engine::{AuthRuntime, BackgroundMessage, LogoutScope, RefreshOutcome, Session};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

fn print_session(session: &Session, format: &OutputFormat) {
    output::print(session, format, |session| {
        output::print_heading("Session");
        output::print_row("Status", &session.status.to_string());
        output::print_row(
            "Access token",
            if session.access_token_present {
                "present"
            } else {
                "absent"
            },
        );
        if let Some(expires_at) = session.access_expires_at {
            output::print_row("Expires at", &expires_at.to_rfc3339());
        }
        if let Some(refreshed_at) = session.last_refreshed_at {
            output::print_row("Last refreshed", &refreshed_at.to_rfc3339());
        }
        if let Some(phone) = &session.masked_phone {
            output::print_row("Verification", &format!("code sent to {}", phone));
        }
    });
}

/// Run the start-up refresh and print the resulting session.
pub async fn status(runtime: &AuthRuntime, format: &OutputFormat) -> Result<()> {
    runtime.silent_refresh().await;
    print_session(&runtime.store().snapshot(), format);
    Ok(())
}

/// Force a refresh and report the outcome.
pub async fn refresh(runtime: &AuthRuntime, format: &OutputFormat) -> Result<()> {
    let outcome = runtime.refresh().await;
    output::print(&outcome, format, |outcome| match outcome {
        RefreshOutcome::Ok { expires_at } => {
            output::print_success(&format!("Session refreshed, expires at {}", expires_at), format)
        }
        RefreshOutcome::Failed { reason } => {
            output::print_error(&format!("Refresh failed: {}", reason), format)
        }
    });
    if !outcome.is_ok() {
        bail!("refresh did not produce a session");
    }
    Ok(())
}

/// End one or more sessions at the identity provider.
pub async fn logout(runtime: &AuthRuntime, scope: LogoutScope, format: &OutputFormat) -> Result<()> {
    // Revoking the current session needs a live access credential.
    runtime.silent_refresh().await;
    runtime.logout(scope.clone()).await?;

    let message = match &scope {
        LogoutScope::Current => "Logged out".to_string(),
        LogoutScope::All => "Logged out of all sessions".to_string(),
        LogoutScope::Others => "Logged out of other sessions".to_string(),
        LogoutScope::Session(id) => format!("Session {} revoked", id),
    };
    output::print_success(&message, format);
    Ok(())
}

/// Keep the session alive and print every change until interrupted.
pub async fn watch(runtime: &AuthRuntime, format: &OutputFormat) -> Result<()> {
    let store = runtime.store();
    let mut changes = store.changes();
    let mut background = runtime.subscribe_background();

    runtime.silent_refresh().await;
    print_session(&store.snapshot(), format);
    runtime.start_scheduler();
    info!("Watching session");

    loop {
        tokio::select! {
            change = changes.recv() => match change {
                Ok(change) => output::print_line(&change, format, |change| {
                    println!("{} -> {}", change.from, change.to);
                }),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Missed session changes"),
                Err(RecvError::Closed) => break,
            },
            message = background.recv() => match message {
                Ok(message) => output::print_line(&message, format, |message| match message {
                    BackgroundMessage::RefreshSucceeded { expires_at } => {
                        println!("background refresh succeeded, expires at {}", expires_at)
                    }
                    BackgroundMessage::RefreshFailed { reason } => {
                        println!("background refresh failed: {}", reason)
                    }
                    BackgroundMessage::RefreshError { message } => {
                        println!("background refresh error: {}", message)
                    }
                }),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Missed background messages"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping watch");
                break;
            }
        }
    }

    runtime.shutdown();
    Ok(())
}
