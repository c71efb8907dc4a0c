//! Bearer credential storage.
//!
//! The Resource Client reads the token from exactly one [`CredentialStore`];
//! login writes it, logout and the session guard clear it.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use adminsync_core::Timestamp;

/// Name under which the admin token is stored.
pub const TOKEN_KEY: &str = "fg_admin_token";

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Source of the bearer token attached to every request.
pub trait CredentialStore: Send + Sync {
    fn token(&self) -> Option<String>;

    fn store(&self, token: &str) -> Result<(), CredentialError>;

    fn clear(&self) -> Result<(), CredentialError>;

    fn has_token(&self) -> bool {
        self.token().is_some()
    }
}

// ============================================================================
// IN-MEMORY
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    token: RwLock<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn token(&self) -> Option<String> {
        read_slot(&self.token)
    }

    fn store(&self, token: &str) -> Result<(), CredentialError> {
        write_slot(&self.token, Some(token.to_string()));
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        write_slot(&self.token, None);
        Ok(())
    }
}

// ============================================================================
// FILE-BACKED
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCredential {
    pub name: String,
    pub token: String,
    pub stored_at: Timestamp,
}

/// Token persisted as a small JSON document. The file exists exactly while a
/// credential is stored.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    cached: RwLock<Option<String>>,
}

impl FileCredentialStore {
    /// Open the store at `path`, loading a previously stored token.
    ///
    /// A file that does not parse is treated as no credential.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CredentialError> {
        let path = path.into();
        let cached = match load(&path) {
            Ok(stored) => stored.map(|c| c.token),
            Err(CredentialError::Serde(err)) => {
                tracing::warn!(path = %path.display(), error = %err, "Ignoring unreadable credential file");
                None
            }
            Err(err) => return Err(err),
        };
        Ok(Self {
            path,
            cached: RwLock::new(cached),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn token(&self) -> Option<String> {
        read_slot(&self.cached)
    }

    fn store(&self, token: &str) -> Result<(), CredentialError> {
        let stored = StoredCredential {
            name: TOKEN_KEY.to_string(),
            token: token.to_string(),
            stored_at: Utc::now(),
        };
        save(&self.path, &stored)?;
        write_slot(&self.cached, Some(stored.token));
        tracing::debug!(path = %self.path.display(), "Stored credential");
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        write_slot(&self.cached, None);
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "Removed credential file");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

pub fn load(path: &Path) -> Result<Option<StoredCredential>, CredentialError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)?;
    let stored = serde_json::from_str::<StoredCredential>(&contents)?;
    Ok(Some(stored))
}

pub fn save(path: &Path, stored: &StoredCredential) -> Result<(), CredentialError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let contents = serde_json::to_string_pretty(stored)?;
    std::fs::write(path, contents)?;
    Ok(())
}

fn read_slot(slot: &RwLock<Option<String>>) -> Option<String> {
    match slot.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

fn write_slot(slot: &RwLock<Option<String>>, value: Option<String>) {
    match slot.write() {
        Ok(mut guard) => *guard = value,
        Err(poisoned) => *poisoned.into_inner() = value,
    }
}
