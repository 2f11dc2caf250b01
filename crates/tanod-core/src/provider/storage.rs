use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::models::Session;

/// Session file name in the data directory
pub const SESSION_FILE: &str = "session.json";

/// Provider-side session persistence.
///
/// The provider owns this file; the session store never reads it directly.
#[derive(Debug, Clone)]
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(SESSION_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load session from disk. An expired session is only kept if it can
    /// still be refreshed.
    pub async fn load(&self) -> Result<Option<Session>> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(None);
        }

        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .context("Failed to read session file")?;
        let session: Session =
            serde_json::from_str(&contents).context("Failed to parse session file")?;

        if session.is_expired() && session.refresh_token.is_none() {
            debug!("Stored session expired without refresh token");
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// Save session to disk
    pub async fn save(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let contents = serde_json::to_string_pretty(session)?;
        tokio::fs::write(&self.path, contents)
            .await
            .context("Failed to write session file")?;
        Ok(())
    }

    /// Clear session data
    pub async fn clear(&self) -> Result<()> {
        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            tokio::fs::remove_file(&self.path).await?;
        }
        Ok(())
    }
}
