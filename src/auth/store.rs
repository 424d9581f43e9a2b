//! Secure token store
//!
//! Secrets go to the native vault with a plaintext metadata file alongside.
//! When a vault write fails the store switches to a single owner-only JSON
//! file for the rest of the process. A later invocation notices that file on
//! load and stays in file mode too.

use std::fs;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::error::StoreError;
use super::tokens::{Token, TokenData, TokenMetadata};
use super::vault::{
    SecretVault, VaultError, ALL_ACCOUNTS, CODING_ACCESS_ACCOUNT, OAUTH_ACCESS_ACCOUNT,
    OAUTH_REFRESH_ACCOUNT,
};
use crate::config::{self, ConfigPaths};

pub struct TokenStore {
    paths: ConfigPaths,
    vault: Arc<dyn SecretVault>,
    /// Cleared once a vault write fails or a file-mode token is found.
    use_vault: AtomicBool,
}

impl TokenStore {
    pub fn new(paths: ConfigPaths, vault: Arc<dyn SecretVault>) -> Self {
        Self {
            paths,
            vault,
            use_vault: AtomicBool::new(true),
        }
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    /// Whether the native vault is still the active backend.
    pub fn vault_active(&self) -> bool {
        self.use_vault.load(Ordering::SeqCst)
    }

    fn downgrade_to_file(&self) {
        if self.use_vault.swap(false, Ordering::SeqCst) {
            tracing::debug!("Switching token storage to file mode for this process");
        }
    }

    /// Persist the whole bundle.
    pub fn save(&self, token: &Token) -> Result<(), StoreError> {
        config::create_private_dir(self.paths.config_dir())?;

        if self.vault_active() {
            match self.save_to_vault(token) {
                Ok(()) => {
                    tracing::debug!("Saved token to credential vault");
                    return Ok(());
                }
                Err(vault_err) => {
                    tracing::warn!(
                        "Failed to save token to credential vault, falling back to file: {}",
                        vault_err
                    );
                    self.downgrade_to_file();
                    return self.save_to_file(token).map_err(|file_err| {
                        StoreError::BothBackends {
                            vault: vault_err.to_string(),
                            file: file_err.to_string(),
                        }
                    });
                }
            }
        }

        self.save_to_file(token)
    }

    fn save_to_vault(&self, token: &Token) -> Result<(), StoreError> {
        let oauth = token.oauth();
        let coding = token.coding();

        put_or_clear(
            self.vault.as_ref(),
            OAUTH_ACCESS_ACCOUNT,
            oauth.map(|t| t.access_token.as_str()),
        )?;
        put_or_clear(
            self.vault.as_ref(),
            OAUTH_REFRESH_ACCOUNT,
            oauth.and_then(TokenData::refresh_token),
        )?;
        put_or_clear(
            self.vault.as_ref(),
            CODING_ACCESS_ACCOUNT,
            coding.map(|t| t.access_token.as_str()),
        )?;

        let metadata = TokenMetadata::from_token(token);
        let data = serde_json::to_vec_pretty(&metadata)?;
        config::write_private_file(&self.paths.metadata_file(), &data)?;
        Ok(())
    }

    fn save_to_file(&self, token: &Token) -> Result<(), StoreError> {
        let path = self.paths.token_file();
        tracing::debug!("Saving token to file: {}", path.display());

        let data = serde_json::to_vec_pretty(token)?;
        config::write_private_file(&path, &data)?;
        Ok(())
    }

    /// Load the bundle. A user who never logged in gets an empty bundle.
    pub fn load(&self) -> Result<Token, StoreError> {
        // A token file means some invocation already fell back to file mode
        if self.paths.token_file().exists() {
            tracing::debug!("Loading token from file (file fallback mode detected)");
            self.downgrade_to_file();
            return self.load_from_file();
        }

        if self.vault_active() {
            match self.load_from_vault() {
                Ok(token) => return Ok(token),
                Err(e) => {
                    // Only a failed write makes file mode sticky
                    tracing::debug!("Failed to load from credential vault, trying file: {}", e);
                }
            }
        }

        self.load_from_file()
    }

    fn load_from_vault(&self) -> Result<Token, StoreError> {
        let data = fs::read(self.paths.metadata_file())?;
        let metadata: TokenMetadata = serde_json::from_slice(&data)?;

        let mut token = Token::default();

        if metadata.has_oauth() {
            if let Some(access_token) = self.vault.get(OAUTH_ACCESS_ACCOUNT)? {
                // A missing refresh secret only means the token cannot be refreshed
                let refresh_token = self.vault.get(OAUTH_REFRESH_ACCOUNT).unwrap_or_else(|e| {
                    tracing::debug!("Could not read refresh token from vault: {}", e);
                    None
                });
                token.oauth = Some(TokenData {
                    access_token,
                    refresh_token: refresh_token.filter(|s| !s.is_empty()),
                    token_type: metadata.oauth_token_type.clone(),
                    expires_at: metadata.oauth_expires_at,
                });
            }
        }

        if metadata.has_coding() {
            if let Some(access_token) = self.vault.get(CODING_ACCESS_ACCOUNT)? {
                token.coding = Some(TokenData {
                    access_token,
                    refresh_token: None,
                    token_type: metadata.coding_token_type.clone(),
                    expires_at: metadata.coding_expires_at,
                });
            }
        }

        Ok(token)
    }

    fn load_from_file(&self) -> Result<Token, StoreError> {
        match fs::read(self.paths.token_file()) {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Token::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every trace of the credentials from both backends.
    pub fn delete(&self) -> Result<(), StoreError> {
        for account in ALL_ACCOUNTS {
            if let Err(e) = self.vault.delete(account) {
                tracing::debug!("Failed to delete vault entry {}: {}", account, e);
            }
        }

        config::remove_if_exists(&self.paths.metadata_file())?;
        config::remove_if_exists(&self.paths.token_file())?;
        Ok(())
    }

    /// Cheap login check: token file, then metadata file, then a vault probe.
    pub fn is_authenticated(&self) -> bool {
        if self.paths.token_file().exists() {
            tracing::debug!("Token file exists (file fallback mode)");
            return true;
        }

        if !self.paths.metadata_file().exists() {
            tracing::debug!("Metadata file does not exist");
            return false;
        }

        [OAUTH_ACCESS_ACCOUNT, CODING_ACCESS_ACCOUNT]
            .into_iter()
            .any(|account| matches!(self.vault.get(account), Ok(Some(s)) if !s.is_empty()))
    }
}

/// Write `value` to `account`, or drop the entry when there is nothing to store.
fn put_or_clear(
    vault: &dyn SecretVault,
    account: &str,
    value: Option<&str>,
) -> Result<(), VaultError> {
    match value {
        Some(secret) => vault.set(account, secret),
        None => {
            if let Err(e) = vault.delete(account) {
                tracing::debug!("Failed to clear vault entry {}: {}", account, e);
            }
            Ok(())
        }
    }
}
