//! Portal CLI - drive the client session engine from a terminal.

mod commands;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use commands::GlobalOptions;
use session_engine::LogoutScope;

/// Portal CLI - inspect and maintain the client portal session.
#[derive(Parser)]
#[command(name = "portal")]
#[command(about = "Portal CLI for session inspection and maintenance")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: output::OutputFormat,

    /// Log level (trace, debug, info, warn, error); defaults to the config value
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Identity provider base URL, overriding the config file
    #[arg(long, env = "PORTAL_IDENTITY_PROVIDER_URL", global = true)]
    identity_provider_url: Option<String>,

    /// Refresh credential to start from
    #[arg(long, env = "PORTAL_REFRESH_COOKIE", hide_env_values = true, global = true)]
    refresh_cookie: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Restore the session and show its status
    Status,

    /// Force a credential refresh
    Refresh,

    /// Logout from the identity provider
    Logout {
        /// Which sessions to end
        #[arg(long, value_enum, default_value = "current", conflicts_with = "session")]
        scope: ScopeArg,
        /// Revoke one session by ID
        #[arg(long)]
        session: Option<String>,
    },

    /// Show the permanent device identifier
    DeviceId,

    /// Show cached client network info
    ClientInfo,

    /// Keep the session alive and print changes until Ctrl-C
    Watch,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ScopeArg {
    Current,
    All,
    Others,
}

fn logout_scope(scope: ScopeArg, session: Option<String>) -> LogoutScope {
    match (session, scope) {
        (Some(id), _) => LogoutScope::Session(id),
        (None, ScopeArg::Current) => LogoutScope::Current,
        (None, ScopeArg::All) => LogoutScope::All,
        (None, ScopeArg::Others) => LogoutScope::Others,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let format = cli.format;
    let options = GlobalOptions {
        log_level: cli.log_level,
        identity_provider_url: cli.identity_provider_url,
        refresh_cookie: cli.refresh_cookie,
    };

    let runtime = match commands::build_runtime(&options) {
        Ok(runtime) => runtime,
        Err(e) => {
            output::print_error(&format!("{:#}", e), &format);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Status => commands::status(&runtime, &format).await,
        Commands::Refresh => commands::refresh(&runtime, &format).await,
        Commands::Logout { scope, session } => {
            commands::logout(&runtime, logout_scope(scope, session), &format).await
        }
        Commands::DeviceId => commands::device_id(&runtime, &format).await,
        Commands::ClientInfo => commands::client_info(&runtime, &format).await,
        Commands::Watch => commands::watch(&runtime, &format).await,
    };
    runtime.shutdown();

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e), &format);
        std::process::exit(1);
    }
}
