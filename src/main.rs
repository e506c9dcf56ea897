//! hubnotify CLI.
//!
//! See the `hubnotify` library for the core functionality.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use hubnotify::{commands, AppContext, Config, CredentialStore};

#[derive(Parser)]
#[command(name = "hubnotify")]
#[command(version)]
#[command(about = "Notification feed and invitation responses from the terminal")]
struct Cli {
    /// Log at info level (RUST_LOG still wins).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and store the token
    Login {
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
    /// Forget the stored token
    Logout,
    /// Show sign-in state and endpoints
    Status,
    /// Print stored notifications
    List,
    /// Accept (default) or reject an invitation
    Respond {
        /// Related id of the invitation
        related_id: String,
        #[arg(long)]
        reject: bool,
    },
    /// Follow the live feed
    Watch {
        /// Hub endpoint, overriding the config
        #[arg(long)]
        hub_url: Option<String>,
    },
    /// Show or set config values
    Config {
        key: Option<String>,
        value: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    if let Commands::Config { key, value } = &cli.command {
        return commands::settings::run(key.as_deref(), value.as_deref());
    }

    let config = Config::load()?;
    let credentials = CredentialStore::system().context("Failed to open credential store")?;
    let ctx = AppContext::new(config, credentials).context("Failed to create HTTP client")?;

    match cli.command {
        Commands::Login { username, password } => {
            commands::account::login(&ctx, username, password).await?;
        }
        Commands::Logout => commands::account::logout(&ctx).await?,
        Commands::Status => commands::account::status(&ctx).await?,
        Commands::List => commands::inbox::list(&ctx).await?,
        Commands::Respond { related_id, reject } => {
            commands::inbox::respond(&ctx, &related_id, !reject).await?;
        }
        Commands::Watch { hub_url } => commands::watch::run(&ctx, hub_url).await?,
        Commands::Config { .. } => {}
    }

    Ok(())
}
