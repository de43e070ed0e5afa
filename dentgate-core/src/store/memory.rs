//! In-memory credential storage implementation.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{CredentialPair, CredentialStore, Secret, StoreError};

/// In-memory credential store for testing and development.
///
/// This store is not persistent; credentials are lost when the process exits.
///
/// # Thread Safety
///
/// This implementation uses interior mutability via `RwLock` and is
/// safe to share across threads.
pub struct MemoryStore {
    pair: RwLock<Option<CredentialPair>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            pair: RwLock::new(None),
        }
    }

    /// Create a memory store that starts out logged in.
    pub fn with_pair(pair: CredentialPair) -> Self {
        Self {
            pair: RwLock::new(Some(pair)),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("logged_in", &self.pair.read().is_some())
            .finish()
    }
}

impl CredentialStore for MemoryStore {
    fn get_access_token(&self) -> Result<Option<Secret>, StoreError> {
        Ok(self.pair.read().as_ref().map(|p| p.access_token.clone()))
    }

    fn get_refresh_token(&self) -> Result<Option<Secret>, StoreError> {
        Ok(self.pair.read().as_ref().map(|p| p.refresh_token.clone()))
    }

    fn set_tokens(&self, pair: &CredentialPair) -> Result<(), StoreError> {
        *self.pair.write() = Some(pair.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.pair.write().take();
        Ok(())
    }

    fn issued_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.pair.read().as_ref().map(|p| p.issued_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_set_get() {
        let store = MemoryStore::new();
        store
            .set_tokens(&CredentialPair::new("access-1", "refresh-1"))
            .unwrap();

        assert_eq!(store.get_access_token().unwrap().unwrap().expose(), "access-1");
        assert_eq!(store.get_refresh_token().unwrap().unwrap().expose(), "refresh-1");
        assert!(store.issued_at().unwrap().is_some());
    }

    #[test]
    fn test_memory_store_empty() {
        let store = MemoryStore::new();
        assert!(store.get_access_token().unwrap().is_none());
        assert!(store.get_refresh_token().unwrap().is_none());
        assert!(store.issued_at().unwrap().is_none());
    }

    #[test]
    fn test_memory_store_overwrite() {
        let store = MemoryStore::with_pair(CredentialPair::new("old", "old-refresh"));
        store
            .set_tokens(&CredentialPair::new("new", "new-refresh"))
            .unwrap();

        assert_eq!(store.get_access_token().unwrap().unwrap().expose(), "new");
        assert_eq!(
            store.get_refresh_token().unwrap().unwrap().expose(),
            "new-refresh"
        );
    }

    #[test]
    fn test_memory_store_clear_is_idempotent() {
        let store = MemoryStore::with_pair(CredentialPair::new("a", "r"));

        store.clear().unwrap();
        store.clear().unwrap();

        assert!(store.get_access_token().unwrap().is_none());
        assert!(store.get_refresh_token().unwrap().is_none());
    }

    #[test]
    fn test_memory_store_debug_hides_tokens() {
        let store = MemoryStore::with_pair(CredentialPair::new("visible?", "r"));
        let debug = format!("{:?}", store);
        assert!(!debug.contains("visible?"));
        assert!(debug.contains("logged_in: true"));
    }
}
