//! OS keyring-backed credential storage implementation.

use chrono::{DateTime, Utc};
use keyring::Entry;

use super::{CredentialPair, CredentialStore, Secret, StoreError};

const ACCESS_TOKEN: &str = "access_token";
const REFRESH_TOKEN: &str = "refresh_token";
const ISSUED_AT: &str = "issued_at";
const FIELDS: [&str; 3] = [ACCESS_TOKEN, REFRESH_TOKEN, ISSUED_AT];

/// OS keyring-backed credential store.
///
/// This store uses the platform's native keyring service:
/// - macOS: Keychain
/// - Linux: Secret Service API (via libsecret)
/// - Windows: Credential Manager
///
/// # Storage Key Format
///
/// Each credential is an entry named `{service_name}/{profile}/{field}`, so
/// several profiles (for example staging and production clinics) can coexist.
pub struct KeyringStore {
    service_name: String,
    profile: String,
}

impl KeyringStore {
    /// Try to create a new keyring store.
    ///
    /// Returns an error if the keyring backend is not available on this platform.
    pub fn try_new(service_name: &str, profile: &str) -> Result<Self, StoreError> {
        let test_key = format!("{}/__test__", service_name);
        match Entry::new(&test_key, "availability_check") {
            Ok(_) => Ok(Self {
                service_name: service_name.to_string(),
                profile: profile.to_string(),
            }),
            Err(e) => Err(StoreError::KeyringUnavailable {
                message: format!("keyring backend not available: {}", e),
            }),
        }
    }

    fn entry(&self, field: &str) -> Result<Entry, StoreError> {
        let service = format!("{}/{}/{}", self.service_name, self.profile, field);
        Entry::new(&service, "dentgate").map_err(|e| StoreError::BackendError {
            message: format!("failed to create keyring entry: {}", e),
        })
    }

    fn read(&self, field: &str) -> Result<Option<String>, StoreError> {
        match self.entry(field)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(keyring::Error::PlatformFailure(e)) => Err(StoreError::BackendError {
                message: format!("platform keyring failure: {}", e),
            }),
            Err(e) => Err(StoreError::BackendError {
                message: format!("keyring error reading {}: {}", field, e),
            }),
        }
    }

    fn write(&self, field: &str, value: &str) -> Result<(), StoreError> {
        self.entry(field)?
            .set_password(value)
            .map_err(|e| StoreError::BackendError {
                message: format!("failed to set keyring entry {}: {}", field, e),
            })
    }

    fn remove(&self, field: &str) -> Result<(), StoreError> {
        match self.entry(field)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StoreError::BackendError {
                message: format!("failed to delete keyring entry {}: {}", field, e),
            }),
        }
    }
}

impl std::fmt::Debug for KeyringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringStore")
            .field("service_name", &self.service_name)
            .field("profile", &self.profile)
            .finish()
    }
}

impl CredentialStore for KeyringStore {
    fn get_access_token(&self) -> Result<Option<Secret>, StoreError> {
        Ok(self.read(ACCESS_TOKEN)?.map(Secret::new))
    }

    fn get_refresh_token(&self) -> Result<Option<Secret>, StoreError> {
        Ok(self.read(REFRESH_TOKEN)?.map(Secret::new))
    }

    fn set_tokens(&self, pair: &CredentialPair) -> Result<(), StoreError> {
        let written = self
            .write(ACCESS_TOKEN, pair.access_token.expose())
            .and_then(|()| self.write(REFRESH_TOKEN, pair.refresh_token.expose()))
            .and_then(|()| self.write(ISSUED_AT, &pair.issued_at.timestamp().to_string()));

        // A half-written pair must not outlive the failure.
        if let Err(e) = written {
            if let Err(cleanup) = self.clear() {
                tracing::error!("Failed to remove partially written credentials: {}", cleanup);
            }
            return Err(e);
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        remove_all(|field| self.remove(field))
    }

    fn issued_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .read(ISSUED_AT)?
            .and_then(|raw| raw.parse::<i64>().ok())
            .and_then(|ts| DateTime::from_timestamp(ts, 0)))
    }
}

/// Remove every field, even after a failure, and report the first error.
fn remove_all(mut remove: impl FnMut(&str) -> Result<(), StoreError>) -> Result<(), StoreError> {
    let mut first_error = None;
    for field in FIELDS {
        if let Err(e) = remove(field) {
            tracing::warn!("Failed to remove keyring entry {}: {}", field, e);
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}
