//! Local persistence for "remember me".
//!
//! `CredentialVault` remembers one identifier + secret pair so the login
//! form can prefill itself. It sits on the `KeyValueStore` contract
//! (`get_item` / `set_item` / `remove_item`) and keeps the two halves in
//! separate stores: the identifier in ordinary preferences, the secret in a
//! secrets store (OS keychain by default, see `SecretBackend`).

pub mod encrypted;
pub mod file;
pub mod keychain;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::models::StoredCredentials;

pub use self::encrypted::EncryptedStore;
pub use self::file::FileStore;
pub use self::keychain::KeyringStore;

/// Preferences key for the remembered identifier
const IDENTIFIER_KEY: &str = "remembered_identifier";

/// Secrets key for the remembered secret
const SECRET_KEY: &str = "remembered_secret";

/// Async key-value persistence.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>>;
    async fn set_item(&self, key: &str, value: &str) -> Result<()>;
    /// Removing a missing key is not an error.
    async fn remove_item(&self, key: &str) -> Result<()>;
}

/// In-memory store; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }
}

#[derive(Clone)]
pub struct CredentialVault {
    prefs: Arc<dyn KeyValueStore>,
    secrets: Arc<dyn KeyValueStore>,
}

impl CredentialVault {
    pub fn new(prefs: Arc<dyn KeyValueStore>, secrets: Arc<dyn KeyValueStore>) -> Self {
        Self { prefs, secrets }
    }

    /// Vault backed entirely by memory.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    pub async fn save(&self, identifier: &str, secret: &str) -> Result<()> {
        self.prefs.set_item(IDENTIFIER_KEY, identifier).await?;
        self.secrets.set_item(SECRET_KEY, secret).await?;
        debug!("Remembered credentials saved");
        Ok(())
    }

    /// Both halves, or nothing.
    pub async fn load(&self) -> Result<Option<StoredCredentials>> {
        let Some(identifier) = self.prefs.get_item(IDENTIFIER_KEY).await? else {
            return Ok(None);
        };
        let Some(secret) = self.secrets.get_item(SECRET_KEY).await? else {
            debug!("Remembered identifier without secret, ignoring");
            return Ok(None);
        };
        Ok(Some(StoredCredentials { identifier, secret }))
    }

    pub async fn clear(&self) -> Result<()> {
        // Try both even if the first fails.
        let prefs = self.prefs.remove_item(IDENTIFIER_KEY).await;
        let secrets = self.secrets.remove_item(SECRET_KEY).await;
        prefs?;
        secrets?;
        debug!("Remembered credentials cleared");
        Ok(())
    }
}
