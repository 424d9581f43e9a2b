//! Authentication for the Costa CLI
//!
//! Implements the OAuth2 authorization-code flow with PKCE against the Costa
//! identity provider, keeps the primary OAuth token fresh, and exchanges it
//! for the downstream "coding" token that tool integrations consume.

pub mod callback;
pub mod commands;
pub mod error;
pub mod login;
pub mod manager;
pub mod oauth;
pub mod pkce;
pub mod service;
pub mod store;
pub mod tokens;
pub mod vault;

use std::time::Duration;

pub use commands::{login, logout, status, token, OutputFormat};
pub use error::AuthError;
pub use manager::TokenManager;
pub use store::TokenStore;

use crate::config::{Settings, DEFAULT_BASE_URL};

/// Public client registered with the Costa identity provider
pub const CLIENT_ID: &str = "439DF956-14AC-41FC-99A5-C17F6DA6264B";

/// Fixed loopback port for the redirect URI. Binding it is also what keeps
/// concurrent `costa login` runs from starting two listeners.
pub const REDIRECT_PORT: u16 = 8765;

pub const CALLBACK_PATH: &str = "/costa-code-cli/callback";
pub const READY_PATH: &str = "/costa-code-cli/ready";

/// Provider and timing configuration for the auth subsystem
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// OAuth2 client ID (public client, no secret)
    pub client_id: String,
    /// Provider base URL, no trailing slash
    pub base_url: String,
    /// Loopback port of the redirect URI
    pub redirect_port: u16,
    /// Requested scope
    pub scope: String,
    /// Refresh the primary token this long before it expires
    pub skew: Duration,
    /// Deadline for authorization-code and refresh grants
    pub token_timeout: Duration,
    /// Deadline for service-token and liveness calls
    pub service_timeout: Duration,
    /// How long an interactive login may take
    pub login_timeout: Duration,
    /// Follower polling interval
    pub poll_interval: Duration,
    /// How often a follower checks that the listener is still alive
    pub liveness_interval: Duration,
}

impl AuthConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self::with_base_url(settings.base_url())
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client_id: CLIENT_ID.to_string(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            redirect_port: REDIRECT_PORT,
            scope: "api_tokens:read".to_string(),
            skew: tokens::DEFAULT_SKEW,
            token_timeout: Duration::from_secs(30),
            service_timeout: Duration::from_secs(5),
            login_timeout: Duration::from_secs(10 * 60),
            poll_interval: Duration::from_millis(500),
            liveness_interval: Duration::from_secs(2),
        }
    }

    pub fn auth_url(&self) -> String {
        format!("{}/oauth/authorize", self.base_url)
    }

    pub fn token_url(&self) -> String {
        format!("{}/oauth/token", self.base_url)
    }

    pub fn service_token_url(&self) -> String {
        format!("{}/api/v1/tokens/coding_current", self.base_url)
    }

    pub fn redirect_url(&self) -> String {
        format!("http://127.0.0.1:{}{}", self.redirect_port, CALLBACK_PATH)
    }

    pub fn ready_url(&self) -> String {
        format!("http://127.0.0.1:{}{}", self.redirect_port, READY_PATH)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }
}
