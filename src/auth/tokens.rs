//! Token model and validity policy

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Refresh this long before the real expiry.
pub const DEFAULT_SKEW: Duration = Duration::from_secs(5 * 60);

/// Token type assumed when the issuer does not report one.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// One bearer credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenData {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: String,
    /// Absolute expiry; `None` means the token does not expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenData {
    pub fn new(access_token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            token_type: DEFAULT_TOKEN_TYPE.to_string(),
            expires_at,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into()).filter(|s: &String| !s.is_empty());
        self
    }

    /// True if the token expires within `skew` from now.
    pub fn is_expired_with_skew(&self, skew: Duration) -> bool {
        let Some(expires_at) = self.expires_at else {
            return false;
        };
        let Ok(skew) = chrono::Duration::from_std(skew) else {
            return true;
        };
        match Utc::now().checked_add_signed(skew) {
            Some(deadline) => deadline > expires_at,
            None => true,
        }
    }

    /// Present and not expiring within [`DEFAULT_SKEW`].
    pub fn is_valid(&self) -> bool {
        !self.access_token.is_empty() && !self.is_expired_with_skew(DEFAULT_SKEW)
    }

    /// Usable refresh token, if any.
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|s| !s.is_empty())
    }
}

/// Per-user credential bundle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredBundle")]
pub struct Token {
    /// Primary token from the OAuth flow
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oauth: Option<TokenData>,
    /// Downstream service ("coding") token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coding: Option<TokenData>,
}

impl Token {
    /// Primary token, ignoring an empty access token.
    pub fn oauth(&self) -> Option<&TokenData> {
        self.oauth.as_ref().filter(|t| !t.access_token.is_empty())
    }

    /// Service token, ignoring an empty access token.
    pub fn coding(&self) -> Option<&TokenData> {
        self.coding.as_ref().filter(|t| !t.access_token.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.oauth().is_none() && self.coding().is_none()
    }
}

/// On-disk shape, including the retired `cli` slot.
#[derive(Deserialize)]
struct StoredBundle {
    #[serde(default)]
    oauth: Option<TokenData>,
    #[serde(default)]
    coding: Option<TokenData>,
    #[serde(default)]
    cli: Option<TokenData>,
}

impl From<StoredBundle> for Token {
    fn from(stored: StoredBundle) -> Self {
        // Older releases kept the service token under `cli`
        let coding = stored.coding.or(stored.cli);
        Self {
            oauth: stored.oauth.map(normalize),
            coding: coding.map(normalize),
        }
    }
}

fn normalize(mut token: TokenData) -> TokenData {
    token.refresh_token = token.refresh_token.filter(|s| !s.is_empty());
    token
}

/// Non-secret shadow of [`Token`], stored in plaintext next to the vault.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub oauth_token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coding_expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub coding_token_type: String,
}

impl TokenMetadata {
    /// Metadata for the slots present in `token`. A present slot always gets
    /// a non-empty token type, which is how the loader detects it.
    pub fn from_token(token: &Token) -> Self {
        let mut metadata = Self::default();
        if let Some(oauth) = token.oauth() {
            metadata.oauth_expires_at = oauth.expires_at;
            metadata.oauth_token_type = type_or_default(&oauth.token_type);
        }
        if let Some(coding) = token.coding() {
            metadata.coding_expires_at = coding.expires_at;
            metadata.coding_token_type = type_or_default(&coding.token_type);
        }
        metadata
    }

    pub fn has_oauth(&self) -> bool {
        !self.oauth_token_type.is_empty()
    }

    pub fn has_coding(&self) -> bool {
        !self.coding_token_type.is_empty()
    }
}

fn type_or_default(token_type: &str) -> String {
    if token_type.is_empty() {
        DEFAULT_TOKEN_TYPE.to_string()
    } else {
        token_type.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expiring_in(d: chrono::Duration) -> TokenData {
        TokenData::new("tok", Some(Utc::now() + d))
    }

    #[test]
    fn test_no_expiry_never_expires() {
        let token = TokenData::new("tok", None);
        assert!(!token.is_expired_with_skew(Duration::ZERO));
        assert!(!token.is_expired_with_skew(Duration::from_secs(365 * 24 * 3600)));
        assert!(token.is_valid());

        let empty = TokenData::new("", None);
        assert!(!empty.is_valid());
    }

    #[test]
    fn test_past_expiry_is_expired_for_any_skew() {
        let token = expiring_in(chrono::Duration::hours(-1));
        assert!(token.is_expired_with_skew(Duration::ZERO));
        assert!(token.is_expired_with_skew(Duration::from_secs(1)));
        assert!(token.is_expired_with_skew(DEFAULT_SKEW));
        assert!(!token.is_valid());
    }

    #[test]
    fn test_skew_window() {
        // Expires in 10 minutes
        let token = expiring_in(chrono::Duration::minutes(10));
        assert!(!token.is_expired_with_skew(Duration::ZERO));
        assert!(!token.is_expired_with_skew(Duration::from_secs(9 * 60)));
        assert!(token.is_expired_with_skew(Duration::from_secs(11 * 60)));
        assert!(token.is_valid());

        // Expires in 2 minutes: inside the default skew
        let soon = expiring_in(chrono::Duration::minutes(2));
        assert!(soon.is_expired_with_skew(DEFAULT_SKEW));
        assert!(!soon.is_valid());
    }

    #[test]
    fn test_huge_skew_counts_as_expired() {
        let token = expiring_in(chrono::Duration::hours(1));
        assert!(token.is_expired_with_skew(Duration::from_secs(u64::MAX)));
    }

    #[test]
    fn test_empty_access_token_is_absent() {
        let token = Token {
            oauth: Some(TokenData::new("", None)),
            coding: None,
        };
        assert!(token.oauth().is_none());
        assert!(token.is_empty());
    }

    #[test]
    fn test_legacy_cli_field_migrates_to_coding() {
        let json = r#"{"cli":{"access_token":"legacy","token_type":"Bearer"}}"#;
        let token: Token = serde_json::from_str(json).unwrap();

        assert_eq!(token.coding().unwrap().access_token, "legacy");
        assert!(token.oauth.is_none());

        let saved = serde_json::to_string(&token).unwrap();
        assert!(!saved.contains("\"cli\""));
        assert!(saved.contains("\"coding\""));

        // Loading the re-saved form is stable
        let again: Token = serde_json::from_str(&saved).unwrap();
        assert_eq!(again, token);
    }

    #[test]
    fn test_coding_wins_over_legacy_cli() {
        let json = r#"{
            "coding": {"access_token": "new", "token_type": "Bearer"},
            "cli": {"access_token": "old", "token_type": "Bearer"}
        }"#;
        let token: Token = serde_json::from_str(json).unwrap();
        assert_eq!(token.coding().unwrap().access_token, "new");
    }

    #[test]
    fn test_empty_refresh_token_is_dropped() {
        let json = r#"{"oauth":{"access_token":"a","refresh_token":"","token_type":"Bearer"}}"#;
        let token: Token = serde_json::from_str(json).unwrap();
        assert!(token.oauth().unwrap().refresh_token.is_none());
    }

    #[test]
    fn test_expires_at_uses_rfc3339() {
        let json = r#"{"oauth":{"access_token":"a","token_type":"Bearer","expires_at":"2030-01-02T03:04:05Z"}}"#;
        let token: Token = serde_json::from_str(json).unwrap();
        let expires_at = token.oauth().unwrap().expires_at.unwrap();
        assert_eq!(expires_at.to_rfc3339(), "2030-01-02T03:04:05+00:00");
    }

    #[test]
    fn test_metadata_marks_present_slots() {
        let mut coding = TokenData::new("svc", None);
        coding.token_type.clear();
        let token = Token {
            oauth: None,
            coding: Some(coding),
        };

        let metadata = TokenMetadata::from_token(&token);
        assert!(!metadata.has_oauth());
        assert!(metadata.has_coding());
        assert_eq!(metadata.coding_token_type, DEFAULT_TOKEN_TYPE);
    }
}
