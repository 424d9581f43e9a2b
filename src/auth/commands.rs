//! `costa login`, `logout`, `status` and `token`

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::login::{LoginFlow, LoginOutcome, SystemBrowser};
use super::manager::TokenManager;
use super::tokens::{Token, TokenData};
use crate::config;

/// Output format shared by the reporting commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Run the interactive browser login.
pub async fn login(manager: Arc<TokenManager>) -> Result<()> {
    let outcome = LoginFlow::new(manager, Arc::new(SystemBrowser))
        .run()
        .await
        .context("Login failed")?;

    match outcome {
        LoginOutcome::AlreadyAuthenticated => {
            println!("Already logged in. Run 'costa logout' first to sign in again.");
        }
        LoginOutcome::Authenticated {
            service_token_error,
        } => {
            if let Some(e) = service_token_error {
                eprintln!("Warning: could not fetch coding token: {}", e);
                eprintln!("It will be fetched again the next time it is needed.");
            }
            println!("Successfully authenticated!");
        }
        LoginOutcome::Joined => {
            println!("Successfully authenticated (login completed in another terminal).");
        }
    }
    Ok(())
}

/// Clear stored credentials from every backend.
pub async fn logout(manager: Arc<TokenManager>, format: OutputFormat) -> Result<()> {
    let was_logged_in = manager.is_authenticated();
    if was_logged_in {
        manager
            .delete_token()
            .context("Failed to remove stored credentials")?;
    }

    match format {
        OutputFormat::Json => {
            let body = serde_json::json!({
                "status": if was_logged_in { "logged_out" } else { "not_logged_in" },
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        OutputFormat::Text if was_logged_in => println!("Logged out."),
        OutputFormat::Text => println!("Not logged in."),
    }
    Ok(())
}

/// Report what is stored, without touching the network.
pub async fn status(manager: Arc<TokenManager>, format: OutputFormat) -> Result<()> {
    let token = manager
        .store()
        .load()
        .context("Failed to read stored credentials")?;
    let report = StatusReport::new(&token, manager.store().vault_active(), manager.base_url());

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => report.print(),
    }
    Ok(())
}

/// Print the coding token, refreshing it first when needed.
pub async fn token(
    manager: Arc<TokenManager>,
    raw: bool,
    format: OutputFormat,
    include_oauth: bool,
) -> Result<()> {
    if include_oauth && !config::debug_enabled() {
        bail!(
            "--include-oauth is only available when {} is set",
            config::DEBUG_ENV
        );
    }

    let coding = match manager.get_service_token().await {
        Ok(coding) => coding,
        Err(e) if e.needs_login() => return Err(e.into()),
        Err(e) => {
            // Fall back to whatever is cached
            let cached = manager
                .store()
                .load()
                .context("Failed to read stored credentials")?
                .coding;
            match cached {
                Some(coding) => {
                    eprintln!("Warning: could not refresh coding token: {}", e);
                    coding
                }
                None => return Err(e).context("No coding token available"),
            }
        }
    };

    let oauth = if include_oauth {
        manager
            .store()
            .load()
            .context("Failed to read stored credentials")?
            .oauth
    } else {
        None
    };

    let view = TokenView {
        coding: SecretView::new(&coding, raw),
        oauth: oauth.as_ref().map(|t| SecretView::new(t, raw)),
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&view)?),
        OutputFormat::Text if raw && view.oauth.is_none() => println!("{}", view.coding.token),
        OutputFormat::Text => view.print(),
    }
    Ok(())
}

/// Mask all but the ends of a secret.
pub fn redact(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 10 {
        return "****".to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}****{}", head, tail)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SlotState {
    Valid,
    Expired,
    Missing,
}

impl SlotState {
    fn label(self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Expired => "expired",
            Self::Missing => "none",
        }
    }
}

#[derive(Debug, Serialize)]
struct SlotStatus {
    state: SlotState,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

impl SlotStatus {
    fn of(slot: Option<&TokenData>) -> Self {
        match slot {
            None => Self {
                state: SlotState::Missing,
                expires_at: None,
            },
            Some(data) => Self {
                state: if data.is_valid() {
                    SlotState::Valid
                } else {
                    SlotState::Expired
                },
                expires_at: data.expires_at,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusReport {
    logged_in: bool,
    storage: &'static str,
    base_url: String,
    oauth: SlotStatus,
    refresh_token: bool,
    coding: SlotStatus,
}

impl StatusReport {
    fn new(token: &Token, vault_active: bool, base_url: &str) -> Self {
        Self {
            logged_in: !token.is_empty(),
            storage: if vault_active { "keyring" } else { "file" },
            base_url: base_url.to_string(),
            oauth: SlotStatus::of(token.oauth()),
            refresh_token: token.oauth().and_then(TokenData::refresh_token).is_some(),
            coding: SlotStatus::of(token.coding()),
        }
    }

    fn print(&self) {
        if !self.logged_in {
            println!("Not logged in.");
            println!("\nRun 'costa login' to authenticate.");
            return;
        }

        println!("Logged in to {}", self.base_url);
        println!("Storage:      {}", self.storage);
        print_slot("OAuth token: ", &self.oauth);
        println!(
            "Refresh tok:  {}",
            if self.refresh_token { "present" } else { "none" }
        );
        print_slot("Coding token:", &self.coding);
    }
}

fn print_slot(label: &str, slot: &SlotStatus) {
    println!("{} {}", label, slot.state.label());
    if let Some(exp) = slot.expires_at {
        println!("  expires_at: {}", exp.to_rfc3339());
    }
}

#[derive(Debug, Serialize)]
struct SecretView {
    token: String,
    token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

impl SecretView {
    fn new(data: &TokenData, raw: bool) -> Self {
        Self {
            token: if raw {
                data.access_token.clone()
            } else {
                redact(&data.access_token)
            },
            token_type: data.token_type.clone(),
            expires_at: data.expires_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct TokenView {
    coding: SecretView,
    #[serde(skip_serializing_if = "Option::is_none")]
    oauth: Option<SecretView>,
}

impl TokenView {
    fn print(&self) {
        print_secret("Coding token:", &self.coding);
        if let Some(oauth) = &self.oauth {
            print_secret("OAuth token: ", oauth);
        }
    }
}

fn print_secret(label: &str, view: &SecretView) {
    println!("{} {} ({})", label, view.token, view.token_type);
    if let Some(exp) = view.expires_at {
        println!("  expires_at: {}", exp.to_rfc3339());
    }
}
