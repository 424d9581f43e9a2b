//! Downstream service token exchange
//!
//! Presents a valid primary OAuth token to the Costa API and caches the
//! returned "coding" token, which is what editor and tool integrations use.

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;

use super::manager::TokenManager;
use super::tokens::TokenData;
use super::AuthError;

/// Response from `/api/v1/tokens/coding_current`
#[derive(Debug, Deserialize)]
struct ServiceTokenResponse {
    token: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

impl TokenManager {
    /// Return a valid service token, fetching a new one only when the cached
    /// token is missing or expiring.
    pub async fn get_service_token(&self) -> Result<TokenData, AuthError> {
        let oauth_token = self.ensure_valid_primary().await?;

        // Guard the read-modify-write against a concurrent fetch
        let _guard = self.lock.lock().await;

        let mut token = self.store().load()?;
        if let Some(coding) = token.coding().filter(|t| t.is_valid()) {
            tracing::debug!("Coding token is valid (expires: {:?})", coding.expires_at);
            return Ok(coding.clone());
        }

        let url = self.config().service_token_url();
        tracing::debug!("Fetching coding token from {}", url);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(&oauth_token.access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.config().service_timeout)
            .send()
            .await
            .map_err(|e| AuthError::FetchFailed(e.to_string()))?;

        let status = resp.status();
        tracing::debug!("Coding token response: HTTP {}", status.as_u16());

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AuthError::Unauthenticated(format!(
                "authentication failed: HTTP {}",
                status.as_u16()
            )));
        }
        if status == StatusCode::NOT_FOUND {
            return Err(AuthError::EndpointNotFound(status.as_u16()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::FetchFailed(format!(
                "HTTP {} - {}",
                status.as_u16(),
                body
            )));
        }

        let body: ServiceTokenResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::FetchFailed(format!("invalid response: {}", e)))?;
        if body.token.is_empty() {
            return Err(AuthError::FetchFailed(
                "response did not contain a token".to_string(),
            ));
        }

        let coding = TokenData::new(body.token, body.expires_at);
        token.coding = Some(coding.clone());
        self.store().save(&token)?;

        tracing::info!("Coding token fetched (expires: {:?})", coding.expires_at);
        Ok(coding)
    }
}
