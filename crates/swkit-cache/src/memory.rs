//! Process-local storage backend.

use async_trait::async_trait;
use hashbrown::HashMap;
use tokio::sync::RwLock;

use crate::{CacheEntry, CacheStorage, StorageError};

/// In-memory cache storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    caches: RwLock<HashMap<String, HashMap<String, CacheEntry>>>,
}

impl MemoryStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> Result<(), StorageError> {
        self.caches
            .write()
            .await
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.caches.write().await.remove(name).is_some())
    }

    async fn match_entry(&self, name: &str, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        Ok(self
            .caches
            .read()
            .await
            .get(name)
            .and_then(|cache| cache.get(key))
            .cloned())
    }

    async fn put_entry(&self, name: &str, entry: CacheEntry) -> Result<(), StorageError> {
        let mut caches = self.caches.write().await;
        let cache = caches
            .get_mut(name)
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
        cache.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn delete_entry(&self, name: &str, key: &str) -> Result<bool, StorageError> {
        Ok(self
            .caches
            .write()
            .await
            .get_mut(name)
            .map(|cache| cache.remove(key).is_some())
            .unwrap_or(false))
    }

    async fn entry_keys(&self, name: &str) -> Result<Vec<String>, StorageError> {
        let caches = self.caches.read().await;
        let cache = caches
            .get(name)
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
        let mut keys: Vec<String> = cache.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
