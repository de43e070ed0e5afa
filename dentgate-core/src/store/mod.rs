//! Credential storage abstraction.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`CredentialPair`] - The access/refresh token pair issued by the clinic API
//! - [`CredentialStore`] - Trait for credential storage backends
//! - [`MemoryStore`] - In-memory implementation for testing
//! - [`FileStore`] - JSON file implementation for headless machines
//! - [`KeyringStore`] - OS keyring implementation (with `keyring-store` feature)
//! - [`create_store`] - Helper to select a backend by name
//!
//! # Synchronous API
//!
//! The store is read and written from inside the refresh coordinator's
//! critical section, which must not yield. Every method is therefore a plain
//! blocking call.
//!
//! # Example
//!
//! ```rust
//! use dentgate_core::store::{CredentialPair, CredentialStore, MemoryStore};
//!
//! let store = MemoryStore::new();
//! store.set_tokens(&CredentialPair::new("access", "refresh")).unwrap();
//!
//! let access = store.get_access_token().unwrap();
//! assert_eq!(access.unwrap().expose(), "access");
//!
//! store.clear().unwrap();
//! assert!(store.get_refresh_token().unwrap().is_none());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

mod file;
mod memory;
#[cfg(feature = "keyring-store")]
mod keyring;

pub use file::FileStore;
pub use memory::MemoryStore;
#[cfg(feature = "keyring-store")]
pub use keyring::KeyringStore;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value,
/// and the buffer is zeroed when the secret is dropped.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the secret holds an empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// The access/refresh token pair issued by login or refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    /// Short-lived bearer token attached to every request.
    pub access_token: Secret,

    /// Long-lived token exchanged for a new pair at the refresh endpoint.
    pub refresh_token: Secret,

    /// When this pair was obtained.
    pub issued_at: DateTime<Utc>,
}

impl CredentialPair {
    /// Create a pair issued now.
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: Secret::new(access_token),
            refresh_token: Secret::new(refresh_token),
            issued_at: Utc::now(),
        }
    }

    /// Build a pair from secrets that are already wrapped.
    pub fn from_secrets(access_token: Secret, refresh_token: Secret) -> Self {
        Self {
            access_token,
            refresh_token,
            issued_at: Utc::now(),
        }
    }
}

/// Error type for credential store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Reading or writing the credentials file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The keyring backend is not available.
    #[error("keyring not available: {message}")]
    KeyringUnavailable { message: String },

    /// No platform directory could be determined for the credentials file.
    #[error("data directory not available")]
    DataDirUnavailable,

    /// The requested backend name is unknown.
    #[error("unknown store backend: {name}")]
    UnknownBackend { name: String },
}

/// Abstraction over the persisted holder of the current credential pair.
///
/// Implementations include:
/// - [`MemoryStore`] - In-memory storage for testing
/// - [`FileStore`] - JSON file in the platform data directory
/// - [`KeyringStore`] (with `keyring-store` feature) - OS keyring
pub trait CredentialStore: Send + Sync {
    /// Current access token, if logged in.
    fn get_access_token(&self) -> Result<Option<Secret>, StoreError>;

    /// Current refresh token, if logged in.
    fn get_refresh_token(&self) -> Result<Option<Secret>, StoreError>;

    /// Replace both tokens.
    fn set_tokens(&self, pair: &CredentialPair) -> Result<(), StoreError>;

    /// Remove all credentials.
    ///
    /// Returns `Ok(())` when the store is already empty.
    fn clear(&self) -> Result<(), StoreError>;

    /// When the stored pair was issued, if known.
    fn issued_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(None)
    }
}

/// Available credential store backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local, lost on exit.
    Memory,
    /// JSON file on disk.
    #[default]
    File,
    /// OS keyring.
    Keyring,
}

impl FromStr for StoreBackend {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            "keyring" => Ok(Self::Keyring),
            _ => Err(StoreError::UnknownBackend {
                name: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::File => write!(f, "file"),
            Self::Keyring => write!(f, "keyring"),
        }
    }
}

/// Create a credential store for the requested backend.
///
/// # Backend Selection Logic
///
/// - `File`: opens `path`, or [`FileStore::default_path`] when `None`
/// - `Keyring`: attempts a [`KeyringStore`]; falls back to [`MemoryStore`]
///   with a warning if the keyring is unavailable or the `keyring-store`
///   feature is disabled
/// - `Memory`: returns [`MemoryStore`]
///
/// # Example
///
/// ```rust,ignore
/// use dentgate_core::store::{create_store, StoreBackend};
///
/// let store = create_store(StoreBackend::Keyring, None)?;
/// ```
pub fn create_store(
    backend: StoreBackend,
    path: Option<PathBuf>,
) -> Result<Arc<dyn CredentialStore>, StoreError> {
    match backend {
        StoreBackend::File => {
            let path = match path {
                Some(path) => path,
                None => FileStore::default_path()?,
            };
            tracing::debug!("Using credentials file at {:?}", path);
            Ok(Arc::new(FileStore::load_from_path(path)?))
        }
        StoreBackend::Keyring => Ok(keyring_or_memory()),
        StoreBackend::Memory => {
            tracing::debug!("Using in-memory credential storage");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[cfg(feature = "keyring-store")]
fn keyring_or_memory() -> Arc<dyn CredentialStore> {
    match KeyringStore::try_new("dentgate", "default") {
        Ok(store) => {
            tracing::info!("Using OS keyring for credential storage");
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!(
                "Keyring unavailable ({}), falling back to memory store. \
                 Credentials will not persist across restarts.",
                e
            );
            Arc::new(MemoryStore::new())
        }
    }
}

#[cfg(not(feature = "keyring-store"))]
fn keyring_or_memory() -> Arc<dyn CredentialStore> {
    tracing::warn!(
        "Keyring storage requested but keyring-store feature not enabled. \
         Using memory store. Credentials will not persist across restarts."
    );
    Arc::new(MemoryStore::new())
}
