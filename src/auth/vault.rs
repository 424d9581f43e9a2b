//! Native credential vault
//!
//! Secrets live in the platform vault (macOS Keychain, Windows Credential
//! Manager, Linux kernel keyring) under one service name with a fixed
//! account per field. The [`SecretVault`] trait is the seam the token store
//! talks to, so tests can swap in an in-memory vault.

use keyring::Entry;
#[cfg(test)]
use std::collections::HashMap;
#[cfg(test)]
use std::sync::Mutex;
use thiserror::Error;

/// Vault service name shared by every entry
pub const VAULT_SERVICE: &str = "costa-cli";

// Account labels, not credentials
pub const OAUTH_ACCESS_ACCOUNT: &str = "oauth-access-token";
pub const OAUTH_REFRESH_ACCOUNT: &str = "oauth-refresh-token";
pub const CODING_ACCESS_ACCOUNT: &str = "coding-access-token";

/// Every account the CLI may write.
pub const ALL_ACCOUNTS: [&str; 3] = [
    OAUTH_ACCESS_ACCOUNT,
    OAUTH_REFRESH_ACCOUNT,
    CODING_ACCESS_ACCOUNT,
];

#[derive(Debug, Error)]
pub enum VaultError {
    /// No usable vault on this host (no keychain daemon, headless session, ...)
    #[error("credential vault unavailable: {0}")]
    Unavailable(String),

    #[error("credential vault access failed for {account}: {message}")]
    Access { account: String, message: String },
}

/// Minimal secret storage keyed by account name.
pub trait SecretVault: Send + Sync {
    /// `Ok(None)` when the entry does not exist.
    fn get(&self, account: &str) -> Result<Option<String>, VaultError>;

    fn set(&self, account: &str, secret: &str) -> Result<(), VaultError>;

    /// Deleting a missing entry succeeds.
    fn delete(&self, account: &str) -> Result<(), VaultError>;
}

/// Vault backed by the `keyring` crate.
pub struct KeyringVault {
    service: String,
}

impl KeyringVault {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, account: &str) -> Result<Entry, VaultError> {
        Entry::new(&self.service, account).map_err(|e| map_error(account, e))
    }
}

impl Default for KeyringVault {
    fn default() -> Self {
        Self::new(VAULT_SERVICE)
    }
}

impl SecretVault for KeyringVault {
    fn get(&self, account: &str) -> Result<Option<String>, VaultError> {
        match self.entry(account)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(map_error(account, e)),
        }
    }

    fn set(&self, account: &str, secret: &str) -> Result<(), VaultError> {
        tracing::debug!(service = %self.service, account, "Writing vault entry");
        self.entry(account)?
            .set_password(secret)
            .map_err(|e| map_error(account, e))
    }

    fn delete(&self, account: &str) -> Result<(), VaultError> {
        match self.entry(account)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(map_error(account, e)),
        }
    }
}

fn map_error(account: &str, e: keyring::Error) -> VaultError {
    match e {
        keyring::Error::PlatformFailure(inner) | keyring::Error::NoStorageAccess(inner) => {
            VaultError::Unavailable(inner.to_string())
        }
        other => VaultError::Access {
            account: account.to_string(),
            message: other.to_string(),
        },
    }
}

/// Process-local vault for tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryVault {
    entries: Mutex<HashMap<String, String>>,
    fail_writes: bool,
}

#[cfg(test)]
impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// A vault whose writes always fail, as on a host without a keychain.
    pub fn failing_writes() -> Self {
        Self {
            entries: Mutex::default(),
            fail_writes: true,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
impl SecretVault for MemoryVault {
    fn get(&self, account: &str) -> Result<Option<String>, VaultError> {
        let guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(guard.get(account).cloned())
    }

    fn set(&self, account: &str, secret: &str) -> Result<(), VaultError> {
        if self.fail_writes {
            return Err(VaultError::Unavailable("writes disabled".to_string()));
        }
        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(account.to_string(), secret.to_string());
        Ok(())
    }

    fn delete(&self, account: &str) -> Result<(), VaultError> {
        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        guard.remove(account);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_vault_roundtrip() {
        let vault = MemoryVault::new();
        assert_eq!(vault.get(OAUTH_ACCESS_ACCOUNT).unwrap(), None);

        vault.set(OAUTH_ACCESS_ACCOUNT, "secret").unwrap();
        assert_eq!(
            vault.get(OAUTH_ACCESS_ACCOUNT).unwrap().as_deref(),
            Some("secret")
        );

        vault.delete(OAUTH_ACCESS_ACCOUNT).unwrap();
        vault.delete(OAUTH_ACCESS_ACCOUNT).unwrap();
        assert_eq!(vault.len(), 0);
    }

    #[test]
    fn test_failing_vault_rejects_writes() {
        let vault = MemoryVault::failing_writes();
        let err = vault.set(CODING_ACCESS_ACCOUNT, "x").unwrap_err();
        assert!(matches!(err, VaultError::Unavailable(_)));
        assert_eq!(vault.get(CODING_ACCESS_ACCOUNT).unwrap(), None);
    }
}
