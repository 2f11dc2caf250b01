//! Application wiring: one place that builds the provider, identity client,
//! session store and credential vault from a `Config`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::config::{Config, SecretBackend, ENV_VAULT_PASSPHRASE};
use crate::gate::{BootstrapGate, GateHandle, Navigator};
use crate::identity::IdentityClient;
use crate::provider::{SessionFile, SupabaseProvider};
use crate::store::SessionStore;
use crate::subscription::Subscription;
use crate::vault::{CredentialVault, EncryptedStore, FileStore, KeyValueStore, KeyringStore};

/// Non-secret preferences (remembered identifier)
const PREFS_FILE: &str = "preferences.json";

/// Secrets for the file-based backends
const SECRETS_FILE: &str = "secrets.json";

pub struct AppContext {
    pub config: Config,
    pub data_dir: PathBuf,
    pub store: Arc<SessionStore>,
    pub vault: CredentialVault,
    provider: Arc<SupabaseProvider>,
    _auto_refresh: Subscription,
}

impl AppContext {
    /// Build everything from `config` using the default data directory.
    /// Must be called inside a tokio runtime.
    pub fn new(config: Config) -> Result<Self> {
        let data_dir = config.data_dir()?;
        let passphrase = std::env::var(ENV_VAULT_PASSPHRASE).ok();
        Self::with_data_dir(config, data_dir, passphrase)
    }

    pub fn with_data_dir(
        config: Config,
        data_dir: PathBuf,
        vault_passphrase: Option<String>,
    ) -> Result<Self> {
        debug!(?data_dir, backend = ?config.secret_backend, "AppContext starting");
        let (url, anon_key) = config.provider_credentials()?;

        let provider = Arc::new(SupabaseProvider::new(
            url,
            anon_key,
            Some(SessionFile::new(&data_dir)),
            config.request_timeout(),
        )?);
        let auto_refresh = provider.spawn_auto_refresh();

        let identity = IdentityClient::new(provider.clone())
            .with_timeout(config.request_timeout())
            .with_reset_redirect(config.reset_redirect_url.clone());
        let store = SessionStore::new(identity);
        store.init();

        let vault = build_vault(config.secret_backend, &data_dir, vault_passphrase)?;
        info!(provider = %url, "Session controller ready");

        Ok(Self {
            config,
            data_dir,
            store,
            vault,
            provider,
            _auto_refresh: auto_refresh,
        })
    }

    pub fn identity(&self) -> &IdentityClient {
        self.store.identity()
    }

    pub fn provider(&self) -> &Arc<SupabaseProvider> {
        &self.provider
    }

    /// Start the boot flow against `navigator`.
    pub fn start_gate(&self, navigator: Arc<dyn Navigator>) -> GateHandle {
        BootstrapGate::start(self.store.clone(), navigator, self.config.splash_duration())
    }

    /// Stop push delivery. Background refresh stops when the context drops.
    pub fn shutdown(&self) {
        self.store.teardown();
    }
}

/// Pick the secrets store for `backend`; preferences always go to a plain file.
pub fn build_vault(
    backend: SecretBackend,
    data_dir: &Path,
    passphrase: Option<String>,
) -> Result<CredentialVault> {
    let prefs: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(data_dir.join(PREFS_FILE)));
    let secrets: Arc<dyn KeyValueStore> = match backend {
        SecretBackend::Keyring => Arc::new(KeyringStore::new()),
        SecretBackend::EncryptedFile => {
            let passphrase = passphrase.filter(|p| !p.is_empty()).with_context(|| {
                format!("The encrypted-file backend needs {ENV_VAULT_PASSPHRASE}")
            })?;
            Arc::new(EncryptedStore::new(
                FileStore::new(data_dir.join(SECRETS_FILE)),
                passphrase,
            ))
        }
        SecretBackend::PlainFile => Arc::new(FileStore::new(data_dir.join(SECRETS_FILE))),
    };
    Ok(CredentialVault::new(prefs, secrets))
}

// ============================================================================
// Tests
// ============================================================================
