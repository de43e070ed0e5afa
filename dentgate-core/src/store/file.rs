//! JSON file credential storage.
//!
//! Credentials are kept at `~/.local/share/dentgate/credentials.json` on Linux
//! (the platform data directory elsewhere). On unix the file is created with
//! owner-only permissions.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{CredentialPair, CredentialStore, Secret, StoreError};

/// On-disk format of the credentials file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CredentialFileData {
    /// Version of the file format (for future migrations).
    version: u32,

    /// The stored pair, absent when logged out.
    #[serde(default)]
    credentials: Option<CredentialPair>,
}

impl Default for CredentialFileData {
    fn default() -> Self {
        Self {
            version: 1,
            credentials: None,
        }
    }
}

/// Disk-backed credential store.
///
/// Reads are served from an in-memory copy; every mutation rewrites the file.
pub struct FileStore {
    path: PathBuf,
    data: RwLock<CredentialFileData>,
}

impl FileStore {
    /// Get the default path of the credentials file.
    pub fn default_path() -> Result<PathBuf, StoreError> {
        let dirs = directories::ProjectDirs::from("com", "dentgate", "dentgate")
            .ok_or(StoreError::DataDirUnavailable)?;
        Ok(dirs.data_dir().join("credentials.json"))
    }

    /// Load the store from a specific path.
    ///
    /// Creates parent directories if they don't exist. A missing file is an
    /// empty (logged out) store.
    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            if contents.trim().is_empty() {
                CredentialFileData::default()
            } else {
                serde_json::from_str(&contents)?
            }
        } else {
            CredentialFileData::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, data: &CredentialFileData) -> Result<(), StoreError> {
        let contents = serde_json::to_string_pretty(data)?;
        let mut file = open_private(&self.path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;

    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.path)
            .field("logged_in", &self.data.read().credentials.is_some())
            .finish()
    }
}

impl CredentialStore for FileStore {
    fn get_access_token(&self) -> Result<Option<Secret>, StoreError> {
        Ok(self
            .data
            .read()
            .credentials
            .as_ref()
            .map(|p| p.access_token.clone()))
    }

    fn get_refresh_token(&self) -> Result<Option<Secret>, StoreError> {
        Ok(self
            .data
            .read()
            .credentials
            .as_ref()
            .map(|p| p.refresh_token.clone()))
    }

    fn set_tokens(&self, pair: &CredentialPair) -> Result<(), StoreError> {
        let mut data = self.data.write();
        data.credentials = Some(pair.clone());
        self.save(&data)
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut data = self.data.write();
        if data.credentials.take().is_none() && !self.path.exists() {
            return Ok(());
        }
        self.save(&data)
    }

    fn issued_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.data.read().credentials.as_ref().map(|p| p.issued_at))
    }
}
