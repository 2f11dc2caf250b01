//! Application configuration management.
//!
//! Holds the identity provider endpoint, boot timing and where remembered
//! secrets are kept. Configuration is stored at `~/.config/tanod/config.json`;
//! the provider fields can be overridden from the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/data directory paths
const APP_NAME: &str = "tanod";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const ENV_PROVIDER_URL: &str = "TANOD_SUPABASE_URL";
pub const ENV_ANON_KEY: &str = "TANOD_SUPABASE_ANON_KEY";
/// Passphrase for the `encrypted-file` secret backend
pub const ENV_VAULT_PASSPHRASE: &str = "TANOD_VAULT_PASSPHRASE";

/// Where the remembered secret is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecretBackend {
    /// OS keychain
    #[default]
    Keyring,
    /// Passphrase-encrypted JSON file in the data directory
    EncryptedFile,
    /// Unencrypted JSON file; only for devices with neither of the above
    PlainFile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider_url: Option<String>,
    pub anon_key: Option<String>,
    pub splash_ms: u64,
    pub request_timeout_secs: u64,
    pub reset_redirect_url: Option<String>,
    pub secret_backend: SecretBackend,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider_url: None,
            anon_key: None,
            splash_ms: 2000,
            request_timeout_secs: 15,
            reset_redirect_url: None,
            secret_backend: SecretBackend::default(),
        }
    }
}

impl Config {
    /// Load from the default path, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_PROVIDER_URL).filter(|v| !v.is_empty()) {
            self.provider_url = Some(url);
        }
        if let Some(key) = lookup(ENV_ANON_KEY).filter(|v| !v.is_empty()) {
            self.anon_key = Some(key);
        }
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Session file, preferences and logs live here.
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir =
            dirs::data_dir().ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn splash_duration(&self) -> Duration {
        Duration::from_millis(self.splash_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Provider URL and anon key, or an error naming what is missing.
    pub fn provider_credentials(&self) -> Result<(&str, &str)> {
        let url = self.provider_url.as_deref().with_context(|| {
            format!("Identity provider URL not configured (set {ENV_PROVIDER_URL})")
        })?;
        let key = self
            .anon_key
            .as_deref()
            .with_context(|| format!("Identity provider key not configured (set {ENV_ANON_KEY})"))?;
        Ok((url, key))
    }
}

// ============================================================================
// Tests
// ============================================================================
