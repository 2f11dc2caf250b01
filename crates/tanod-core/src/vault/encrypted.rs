//! Encryption at rest for stores without OS protection.
//!
//! Values are sealed with ChaCha20-Poly1305 under a key derived from a
//! passphrase with Argon2id. The random salt lives in the wrapped store
//! next to the values. Stored format: `enc1:<base64(nonce || ciphertext)>`.

use anyhow::{anyhow, bail, Context, Result};
use argon2::Argon2;
use async_trait::async_trait;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::OnceCell;

use super::KeyValueStore;

/// Prefix marking a sealed value
const SEALED_PREFIX: &str = "enc1:";

/// Inner-store key holding the base64 KDF salt
const SALT_KEY: &str = "__kdf_salt";

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

pub struct EncryptedStore<S> {
    inner: S,
    passphrase: String,
    key: OnceCell<[u8; 32]>,
}

impl<S: KeyValueStore> EncryptedStore<S> {
    pub fn new(inner: S, passphrase: impl Into<String>) -> Self {
        Self {
            inner,
            passphrase: passphrase.into(),
            key: OnceCell::new(),
        }
    }

    /// Derive the key once, creating the salt on first use.
    async fn key(&self) -> Result<&[u8; 32]> {
        self.key
            .get_or_try_init(|| async {
                let salt = match self.inner.get_item(SALT_KEY).await? {
                    Some(encoded) => base64::engine::general_purpose::STANDARD
                        .decode(encoded)
                        .context("Corrupt KDF salt")?,
                    None => {
                        let mut salt = vec![0u8; SALT_LEN];
                        OsRng.fill_bytes(&mut salt);
                        let encoded = base64::engine::general_purpose::STANDARD.encode(&salt);
                        self.inner.set_item(SALT_KEY, &encoded).await?;
                        salt
                    }
                };

                let passphrase = self.passphrase.clone();
                // Argon2 is deliberately slow; keep it off the async workers.
                let key = tokio::task::spawn_blocking(move || {
                    let mut key = [0u8; 32];
                    Argon2::default()
                        .hash_password_into(passphrase.as_bytes(), &salt, &mut key)
                        .map_err(|e| anyhow!("Key derivation failed: {e}"))?;
                    Ok::<_, anyhow::Error>(key)
                })
                .await
                .context("Key derivation task failed")??;
                Ok::<_, anyhow::Error>(key)
            })
            .await
    }

    async fn seal(&self, plaintext: &str) -> Result<String> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(self.key().await?));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {e}"))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        let encoded = base64::engine::general_purpose::STANDARD.encode(&combined);
        Ok(format!("{SEALED_PREFIX}{encoded}"))
    }

    async fn open(&self, sealed: &str) -> Result<String> {
        let encoded = sealed
            .strip_prefix(SEALED_PREFIX)
            .ok_or_else(|| anyhow!("Value is not sealed"))?;
        let combined = base64::engine::general_purpose::STANDARD.decode(encoded)?;
        if combined.len() < NONCE_LEN {
            bail!("Ciphertext too short");
        }
        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(self.key().await?));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| anyhow!("Decryption failed (wrong passphrase or tampered value)"))?;
        String::from_utf8(plaintext).context("Invalid UTF-8 in plaintext")
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for EncryptedStore<S> {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        match self.inner.get_item(key).await? {
            Some(sealed) => Ok(Some(self.open(&sealed).await?)),
            None => Ok(None),
        }
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let sealed = self.seal(value).await?;
        self.inner.set_item(key, &sealed).await
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        self.inner.remove_item(key).await
    }
}

// ============================================================================
// Tests
// ============================================================================
