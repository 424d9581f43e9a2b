//! Costa CLI - sign in to Costa and hand out API tokens
//!
//! Logs in through the browser, keeps the OAuth token fresh and exchanges it
//! for the coding token used by editor and tool integrations.

mod auth;
mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use auth::vault::KeyringVault;
use auth::{AuthConfig, OutputFormat, TokenManager, TokenStore};
use config::{ConfigPaths, Settings};

#[derive(Parser)]
#[command(name = "costa")]
#[command(version, about = "Command-line client for Costa", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in through the browser
    Login,

    /// Remove stored credentials
    Logout {
        /// Output format
        #[arg(long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Show current authentication status
    Status {
        /// Output format
        #[arg(long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Print the coding token, refreshing it if needed
    Token {
        /// Print the full token instead of a redacted one
        #[arg(long)]
        raw: bool,

        /// Output format
        #[arg(long, value_enum, default_value_t)]
        format: OutputFormat,

        /// Also show the OAuth token (requires COSTA_DEBUG)
        #[arg(long)]
        include_oauth: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose || config::debug_enabled() {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let paths = ConfigPaths::discover()?;
    let settings = Settings::load(&paths)?;
    let auth_config = AuthConfig::from_settings(&settings);
    tracing::debug!("Using base URL {}", auth_config.base_url);

    let store = TokenStore::new(paths, Arc::new(KeyringVault::default()));
    let manager = Arc::new(
        TokenManager::new(auth_config, store).context("Failed to initialise authentication")?,
    );

    match cli.command {
        Commands::Login => {
            tracing::info!("Starting authentication flow...");
            auth::login(manager).await?;
        }
        Commands::Logout { format } => {
            auth::logout(manager, format).await?;
        }
        Commands::Status { format } => {
            auth::status(manager, format).await?;
        }
        Commands::Token {
            raw,
            format,
            include_oauth,
        } => {
            auth::token(manager, raw, format, include_oauth).await?;
        }
    }

    Ok(())
}
