use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use keyring::Entry;

/// Keychain service name for stored tokens
pub const SERVICE_NAME: &str = "travelpass";

/// The two opaque tokens kept in the credential store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKey {
    Access,
    Refresh,
}

impl TokenKey {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenKey::Access => "accessToken",
            TokenKey::Refresh => "refreshToken",
        }
    }
}

impl fmt::Display for TokenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Secure persistence for the access and refresh tokens.
///
/// `get` returns `Ok(None)` when nothing is stored. `delete` of a missing
/// key is not an error.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, key: TokenKey) -> Result<Option<String>>;
    async fn set(&self, key: TokenKey, value: &str) -> Result<()>;
    async fn delete(&self, key: TokenKey) -> Result<()>;
}

/// Tokens stored in the OS keychain.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, key: TokenKey) -> Result<Entry> {
        Entry::new(&self.service, key.as_str()).context("Failed to create keyring entry")
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for KeyringStore {
    async fn get(&self, key: TokenKey) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {} from keychain", key)),
        }
    }

    async fn set(&self, key: TokenKey, value: &str) -> Result<()> {
        self.entry(key)?
            .set_password(value)
            .with_context(|| format!("Failed to store {} in keychain", key))
    }

    async fn delete(&self, key: TokenKey) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {} from keychain", key)),
        }
    }
}

/// In-process store. Nothing survives the process; used for tests and
/// throwaway sessions.
#[derive(Default)]
pub struct MemoryStore {
    tokens: Mutex<HashMap<TokenKey, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with the given tokens
    pub fn with_tokens(access: Option<&str>, refresh: Option<&str>) -> Self {
        let mut tokens = HashMap::new();
        if let Some(access) = access {
            tokens.insert(TokenKey::Access, access.to_string());
        }
        if let Some(refresh) = refresh {
            tokens.insert(TokenKey::Refresh, refresh.to_string());
        }
        Self {
            tokens: Mutex::new(tokens),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.lock().map(|t| t.is_empty()).unwrap_or(true)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<TokenKey, String>>> {
        self.tokens
            .lock()
            .map_err(|_| anyhow::anyhow!("Memory credential store lock poisoned"))
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, key: TokenKey) -> Result<Option<String>> {
        Ok(self.lock()?.get(&key).cloned())
    }

    async fn set(&self, key: TokenKey, value: &str) -> Result<()> {
        self.lock()?.insert(key, value.to_string());
        Ok(())
    }

    async fn delete(&self, key: TokenKey) -> Result<()> {
        self.lock()?.remove(&key);
        Ok(())
    }
}
