//! Token file persistence.
//!
//! The token file is the only persistent state of the appliance. Writes
//! go to a sibling temp file first and are renamed into place, so readers
//! never observe a partial credential. Refreshes are serialized by a
//! single in-process lock.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::OAuthClient;
use crate::error::CredentialError;
use crate::models::Credential;

#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
    oauth: Arc<OAuthClient>,
    write_lock: Arc<Mutex<()>>,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>, oauth: Arc<OAuthClient>) -> Self {
        Self {
            path: path.into(),
            oauth,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn oauth(&self) -> &OAuthClient {
        &self.oauth
    }

    /// The stored credential, or `None` when there is no usable token file.
    pub async fn load(&self) -> Option<Credential> {
        match self.read().await {
            Ok(credential) => credential,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring unreadable token file");
                None
            }
        }
    }

    async fn read(&self) -> Result<Option<Credential>, CredentialError> {
        let json = match fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// Replaces the token file wholesale.
    pub async fn save(&self, credential: &Credential) -> Result<(), CredentialError> {
        let _guard = self.write_lock.lock().await;
        self.write(credential).await
    }

    async fn write(&self, credential: &Credential) -> Result<(), CredentialError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(credential)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json).await?;
        set_owner_only(&tmp_path).await?;
        fs::rename(&tmp_path, &self.path).await?;

        debug!(path = %self.path.display(), "stored credential");
        Ok(())
    }

    /// Returns a credential whose access token is usable, refreshing and
    /// persisting it first if it has expired. A failed refresh leaves the
    /// token file untouched.
    pub async fn ensure_valid(&self, credential: Credential) -> Result<Credential, CredentialError> {
        if credential.is_revoked() {
            return Err(CredentialError::Revoked);
        }
        if !credential.is_expired() {
            return Ok(credential);
        }

        let _guard = self.write_lock.lock().await;

        // Another request may have refreshed while we waited for the lock.
        let current = match self.read().await {
            Ok(Some(stored)) if stored.refresh_token == credential.refresh_token => stored,
            _ => credential,
        };
        if current.is_revoked() {
            return Err(CredentialError::Revoked);
        }
        if !current.is_expired() {
            return Ok(current);
        }

        let refreshed = self.oauth.refresh(&current).await?;
        self.write(&refreshed).await?;
        info!(expiry = %refreshed.expiry, "refreshed stored credential");
        Ok(refreshed)
    }

    /// Revokes the access token at the provider. The token file is kept but
    /// marked revoked.
    pub async fn revoke(&self, credential: &Credential) -> Result<(), CredentialError> {
        self.oauth.revoke(credential).await?;

        let mut revoked = credential.clone();
        revoked.revoked_at = Some(Utc::now());
        self.save(&revoked).await
    }
}

async fn set_owner_only(path: &Path) -> Result<(), CredentialError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }

    #[cfg(not(unix))]
    {
        let _ = path;
    }

    Ok(())
}
