//! Key-value storage backends.
//!
//! The snapshot store only needs string keys and string values, the same
//! contract a browser's local storage offers, including a size quota.

use std::collections::BTreeMap;

use thiserror::Error;

/// Backend failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("storage quota exceeded: need {needed} bytes, {available} available")]
    QuotaExceeded { needed: usize, available: usize },

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}

/// String key-value storage.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Removing a missing key is not an error.
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;

    fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Byte limit across all entries, if the backend has one.
    fn quota(&self) -> Option<usize> {
        None
    }
}

/// In-process store with an optional byte quota.
///
/// Usage counts key and value bytes, so a tight quota behaves like a full
/// browser storage area.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
    quota: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            quota: Some(quota),
        }
    }

    /// Bytes currently used.
    pub fn used(&self) -> usize {
        self.entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        if let Some(quota) = self.quota {
            let replaced = self.entries.get(key).map_or(0, |v| key.len() + v.len());
            let available = quota.saturating_sub(self.used() - replaced);
            let needed = key.len() + value.len();
            if needed > available {
                return Err(StoreError::QuotaExceeded { needed, available });
            }
        }
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.keys().cloned().collect())
    }

    fn quota(&self) -> Option<usize> {
        self.quota
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_basic() {
        let mut store = MemoryStore::new();
        assert!(store.is_empty());

        store.set("a", "1").unwrap();
        store.set("b", "22").unwrap();
        assert_eq!(store.get("a").unwrap(), Some("1".to_string()));
        assert_eq!(store.keys().unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.used(), 5);

        store.remove("a").unwrap();
        store.remove("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_memory_store_quota() {
        let mut store = MemoryStore::with_quota(10);

        store.set("k", "12345").unwrap();
        let err = store.set("j", "123456").unwrap_err();
        assert!(err.is_quota_exceeded());
        assert_eq!(
            err,
            StoreError::QuotaExceeded {
                needed: 7,
                available: 4
            }
        );

        // Overwriting frees the old value first
        store.set("k", "123456789").unwrap();
        assert_eq!(store.used(), 10);
        assert_eq!(store.quota(), Some(10));
    }
}
