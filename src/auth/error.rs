//! Authentication error taxonomy

use thiserror::Error;

use super::vault::VaultError;

/// Failures of the secure token store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("token file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("token data is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Vault(#[from] VaultError),

    /// Both the vault and the file fallback rejected the write.
    #[error("could not persist token (vault: {vault}; file: {file})")]
    BothBackends { vault: String, file: String },
}

/// Errors surfaced by login, refresh and the downstream exchange
#[derive(Debug, Error)]
pub enum AuthError {
    /// No usable credential; the user must log in.
    #[error("{0}; please run 'costa login'")]
    Unauthenticated(String),

    #[error("failed to refresh OAuth token: {0}")]
    RefreshFailed(String),

    #[error("service token endpoint not found: HTTP {0}")]
    EndpointNotFound(u16),

    #[error("failed to fetch service token: {0}")]
    FetchFailed(String),

    #[error("token storage failed: {0}")]
    Storage(#[from] StoreError),

    #[error("invalid state parameter in OAuth callback")]
    StateMismatch,

    #[error("no authorization code received")]
    NoCode,

    #[error("authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("failed to exchange code for token: {0}")]
    ExchangeFailed(String),

    #[error("callback server error: {0}")]
    CallbackServer(String),

    #[error("authentication timeout - please try again")]
    Timeout,

    #[error("invalid auth configuration: {0}")]
    Config(String),
}

impl AuthError {
    /// The caller should prompt for a fresh login.
    pub fn needs_login(&self) -> bool {
        matches!(self, Self::Unauthenticated(_) | Self::RefreshFailed(_))
    }
}
