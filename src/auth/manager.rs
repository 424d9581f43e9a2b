//! Token manager: process-wide auth state and the refresh engine
//!
//! One `TokenManager` is built per process and shared by reference. It owns
//! the token store (and with it the active-backend flag) plus the mutex that
//! single-flights every refresh and service-token fetch, because refresh
//! tokens are one-time-use and concurrent refreshes would corrupt the bundle.

use oauth2::basic::BasicClient;
use tokio::sync::Mutex;

use super::oauth;
use super::store::TokenStore;
use super::tokens::TokenData;
use super::{AuthConfig, AuthError};

pub struct TokenManager {
    config: AuthConfig,
    store: TokenStore,
    oauth_client: BasicClient,
    pub(super) http: reqwest::Client,
    pub(super) lock: Mutex<()>,
}

impl TokenManager {
    pub fn new(config: AuthConfig, store: TokenStore) -> Result<Self, AuthError> {
        let oauth_client = oauth::build_client(&config)?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("costa-cli/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AuthError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            config,
            store,
            oauth_client,
            http,
            lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub(super) fn oauth_client(&self) -> &BasicClient {
        &self.oauth_client
    }

    /// Provider base URL (honours `COSTA_BASE_URL`).
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.is_authenticated()
    }

    /// Log out: purge the vault entries and both token files.
    pub fn delete_token(&self) -> Result<(), AuthError> {
        self.store.delete()?;
        Ok(())
    }

    /// Return a primary token that stays valid for at least the skew window,
    /// refreshing it through the provider if needed.
    pub async fn ensure_valid_primary(&self) -> Result<TokenData, AuthError> {
        let _guard = self.lock.lock().await;

        tracing::debug!("Checking OAuth token validity...");
        let mut token = self.store.load()?;

        let current = token
            .oauth()
            .cloned()
            .ok_or_else(|| AuthError::Unauthenticated("no OAuth token found".to_string()))?;

        if !current.is_expired_with_skew(self.config.skew) {
            tracing::debug!("OAuth token is valid (expires: {:?})", current.expires_at);
            return Ok(current);
        }

        tracing::debug!("OAuth token expired or near expiry, refreshing...");
        let refresh_token = current.refresh_token().ok_or_else(|| {
            AuthError::Unauthenticated(
                "OAuth token expired and no refresh token available".to_string(),
            )
        })?;

        let refreshed =
            oauth::refresh_grant(&self.oauth_client, &self.config, refresh_token).await?;

        token.oauth = Some(refreshed.clone());
        self.store.save(&token)?;

        tracing::info!(
            "OAuth token refreshed (expires: {:?})",
            refreshed.expires_at
        );
        Ok(refreshed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::manager;
    use crate::auth::tokens::Token;
    use chrono::{Duration, Utc};
    use std::sync::Arc;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn primary(expires_in: Duration, refresh: Option<&str>) -> Token {
        let mut oauth = TokenData::new("tok", Some(Utc::now() + expires_in));
        oauth.refresh_token = refresh.map(str::to_string);
        Token {
            oauth: Some(oauth),
            coding: None,
        }
    }

    async fn mount_refresh(server: &MockServer, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "refreshed",
                "refresh_token": "rt-2",
                "token_type": "bearer",
                "expires_in": 3600
            })))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_no_primary_is_unauthenticated() {
        let server = MockServer::start().await;
        let (_dir, manager) = manager(&server.uri());

        let err = manager.ensure_valid_primary().await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated(_)));
        assert!(err.needs_login());
    }

    #[tokio::test]
    async fn test_valid_primary_makes_no_call() {
        let server = MockServer::start().await;
        mount_refresh(&server, 0).await;
        let (_dir, manager) = manager(&server.uri());
        manager
            .store()
            .save(&primary(Duration::hours(1), Some("rt")))
            .unwrap();

        let token = manager.ensure_valid_primary().await.unwrap();
        assert_eq!(token.access_token, "tok");
    }

    #[tokio::test]
    async fn test_expired_without_refresh_token_is_unauthenticated() {
        let server = MockServer::start().await;
        mount_refresh(&server, 0).await;
        let (_dir, manager) = manager(&server.uri());
        manager
            .store()
            .save(&primary(Duration::hours(-1), None))
            .unwrap();

        let err = manager.ensure_valid_primary().await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn test_refresh_then_no_further_calls() {
        let server = MockServer::start().await;
        mount_refresh(&server, 1).await;
        let (_dir, manager) = manager(&server.uri());
        let expired = primary(Duration::hours(-1), Some("rt-1"));
        assert!(!expired.oauth().unwrap().is_valid());
        manager.store().save(&expired).unwrap();

        let first = manager.ensure_valid_primary().await.unwrap();
        assert_eq!(first.access_token, "refreshed");
        assert_eq!(first.refresh_token(), Some("rt-2"));

        // Persisted, so the second call is served from the store
        let second = manager.ensure_valid_primary().await.unwrap();
        assert_eq!(second, first);
        assert_eq!(manager.store().load().unwrap().oauth, Some(first));
    }

    #[tokio::test]
    async fn test_refresh_inside_skew_window() {
        let server = MockServer::start().await;
        mount_refresh(&server, 1).await;
        let (_dir, manager) = manager(&server.uri());
        // Still valid for 2 minutes, but within the 5 minute skew
        manager
            .store()
            .save(&primary(Duration::minutes(2), Some("rt-1")))
            .unwrap();

        let token = manager.ensure_valid_primary().await.unwrap();
        assert_eq!(token.access_token, "refreshed");
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let server = MockServer::start().await;
        mount_refresh(&server, 1).await;
        let (_dir, manager) = manager(&server.uri());
        manager
            .store()
            .save(&primary(Duration::hours(-1), Some("rt-1")))
            .unwrap();

        let results = futures::future::join_all((0..8).map(|_| {
            let manager = Arc::clone(&manager);
            async move { manager.ensure_valid_primary().await }
        }))
        .await;

        let tokens: Vec<TokenData> = results.into_iter().map(Result::unwrap).collect();
        assert_eq!(tokens.len(), 8);
        assert!(tokens.iter().all(|t| *t == tokens[0]));
        assert_eq!(tokens[0].access_token, "refreshed");
    }

    #[tokio::test]
    async fn test_refresh_rejection_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant"
            })))
            .expect(1)
            .mount(&server)
            .await;
        let (_dir, manager) = manager(&server.uri());
        let expired = primary(Duration::hours(-1), Some("rt-1"));
        manager.store().save(&expired).unwrap();

        let err = manager.ensure_valid_primary().await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshFailed(_)));
        // The stale token is left untouched
        assert_eq!(manager.store().load().unwrap(), expired);
    }

    #[tokio::test]
    async fn test_delete_token_logs_out() {
        let server = MockServer::start().await;
        let (_dir, manager) = manager(&server.uri());
        manager
            .store()
            .save(&primary(Duration::hours(1), None))
            .unwrap();
        assert!(manager.is_authenticated());

        manager.delete_token().unwrap();
        assert!(!manager.is_authenticated());
    }
}
