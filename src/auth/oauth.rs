//! OAuth2 client for the Costa identity provider: authorize URL,
//! authorization-code grant (PKCE) and refresh-token grant.

use chrono::Utc;
use oauth2::basic::{BasicClient, BasicErrorResponse, BasicTokenResponse, BasicTokenType};
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, CsrfToken, PkceCodeVerifier, RedirectUrl,
    RefreshToken, RequestTokenError, Scope, TokenResponse, TokenUrl,
};

use super::pkce::PkceParams;
use super::tokens::{TokenData, DEFAULT_TOKEN_TYPE};
use super::{AuthConfig, AuthError};

type GrantError = RequestTokenError<oauth2::reqwest::Error<reqwest::Error>, BasicErrorResponse>;

/// Build the OAuth2 client from an AuthConfig
pub fn build_client(config: &AuthConfig) -> Result<BasicClient, AuthError> {
    let auth_url = AuthUrl::new(config.auth_url())
        .map_err(|e| AuthError::Config(format!("authorize URL: {}", e)))?;
    let token_url = TokenUrl::new(config.token_url())
        .map_err(|e| AuthError::Config(format!("token URL: {}", e)))?;
    let redirect_url = RedirectUrl::new(config.redirect_url())
        .map_err(|e| AuthError::Config(format!("redirect URL: {}", e)))?;

    Ok(BasicClient::new(
        ClientId::new(config.client_id.clone()),
        None,
        auth_url,
        Some(token_url),
    )
    .set_auth_type(AuthType::RequestBody)
    .set_redirect_uri(redirect_url))
}

/// Browser URL for the authorization request, carrying `state` and the PKCE challenge.
pub fn authorize_url(
    client: &BasicClient,
    config: &AuthConfig,
    params: &PkceParams,
) -> url::Url {
    let state = params.state.clone();
    let (url, _) = client
        .authorize_url(move || CsrfToken::new(state))
        .add_scope(Scope::new(config.scope.clone()))
        .add_extra_param("access_type", "offline")
        .add_extra_param("code_challenge", params.code_challenge.as_str())
        .add_extra_param("code_challenge_method", params.challenge_method())
        .url();
    url
}

/// Exchange an authorization code (plus PKCE verifier) for the primary token.
pub async fn exchange_code(
    client: &BasicClient,
    config: &AuthConfig,
    code: &str,
    code_verifier: &str,
) -> Result<TokenData, AuthError> {
    tracing::debug!("Exchanging authorization code at {}", config.token_url());

    let request = client
        .exchange_code(AuthorizationCode::new(code.to_string()))
        .set_pkce_verifier(PkceCodeVerifier::new(code_verifier.to_string()))
        .request_async(async_http_client);

    let response = tokio::time::timeout(config.token_timeout, request)
        .await
        .map_err(|_| AuthError::ExchangeFailed("token endpoint timed out".to_string()))?
        .map_err(|e| AuthError::ExchangeFailed(describe(e)))?;

    Ok(token_from_response(&response, None))
}

/// Run a refresh-token grant. The provider may or may not rotate the refresh
/// token; when it omits one, the old refresh token is kept.
pub async fn refresh_grant(
    client: &BasicClient,
    config: &AuthConfig,
    refresh_token: &str,
) -> Result<TokenData, AuthError> {
    tracing::info!("Refreshing OAuth token...");

    let refresh_token_secret = RefreshToken::new(refresh_token.to_string());
    let request = client
        .exchange_refresh_token(&refresh_token_secret)
        .request_async(async_http_client);

    let response = tokio::time::timeout(config.token_timeout, request)
        .await
        .map_err(|_| AuthError::RefreshFailed("token endpoint timed out".to_string()))?
        .map_err(|e| AuthError::RefreshFailed(describe(e)))?;

    Ok(token_from_response(&response, Some(refresh_token)))
}

fn token_from_response(
    response: &BasicTokenResponse,
    previous_refresh: Option<&str>,
) -> TokenData {
    let expires_at = response
        .expires_in()
        .and_then(|d| chrono::Duration::from_std(d).ok())
        .and_then(|d| Utc::now().checked_add_signed(d));

    let refresh_token = response
        .refresh_token()
        .map(|rt| rt.secret().to_string())
        .filter(|rt| !rt.is_empty())
        .or_else(|| previous_refresh.map(str::to_string));

    TokenData {
        access_token: response.access_token().secret().to_string(),
        refresh_token,
        token_type: token_type_name(response.token_type()),
        expires_at,
    }
}

fn token_type_name(token_type: &BasicTokenType) -> String {
    match token_type {
        BasicTokenType::Bearer => DEFAULT_TOKEN_TYPE.to_string(),
        other => other.as_ref().to_string(),
    }
}

fn describe(e: GrantError) -> String {
    match e {
        RequestTokenError::ServerResponse(resp) => resp.to_string(),
        RequestTokenError::Request(e) => e.to_string(),
        RequestTokenError::Parse(e, _) => format!("unexpected token response: {}", e),
        RequestTokenError::Other(msg) => msg,
    }
}
