//! Storage backend trait and the per-generation cache handle.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use swkit_net::{Request, Response};

use crate::{CacheEntry, StorageError};

/// Backend holding every named cache generation.
///
/// Implementations must be safe for concurrent use: each `put_entry` replaces
/// the entry for its key atomically, and readers see either the old or the new
/// entry.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Create the cache `name` if it does not exist yet.
    async fn open(&self, name: &str) -> Result<(), StorageError>;

    /// Check if cache exists.
    async fn has(&self, name: &str) -> Result<bool, StorageError>;

    /// All cache names.
    async fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// Delete a cache and all of its entries. `Ok(false)` if it did not exist.
    async fn delete(&self, name: &str) -> Result<bool, StorageError>;

    /// Look up `key` in cache `name`. A missing cache is a miss.
    async fn match_entry(&self, name: &str, key: &str) -> Result<Option<CacheEntry>, StorageError>;

    /// Store `entry` in cache `name`, replacing any entry with the same key.
    async fn put_entry(&self, name: &str, entry: CacheEntry) -> Result<(), StorageError>;

    /// Remove `key` from cache `name`.
    async fn delete_entry(&self, name: &str, key: &str) -> Result<bool, StorageError>;

    /// All entry keys of cache `name`.
    async fn entry_keys(&self, name: &str) -> Result<Vec<String>, StorageError>;
}

/// A handle to one cache generation.
#[derive(Clone)]
pub struct Cache {
    name: String,
    storage: Arc<dyn CacheStorage>,
}

impl Cache {
    pub(crate) fn new(name: &str, storage: Arc<dyn CacheStorage>) -> Self {
        Self {
            name: name.to_string(),
            storage,
        }
    }

    /// Cache name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Match a request.
    pub async fn match_request(&self, request: &Request) -> Result<Option<Response>, StorageError> {
        match self.storage.match_entry(&self.name, &request.cache_key()).await? {
            Some(entry) => entry.to_response().map(Some),
            None => Ok(None),
        }
    }

    /// Check whether an entry exists for `request`.
    pub async fn contains(&self, request: &Request) -> Result<bool, StorageError> {
        Ok(self
            .storage
            .match_entry(&self.name, &request.cache_key())
            .await?
            .is_some())
    }

    /// Store `response` as the answer for `request`.
    pub async fn put(&self, request: &Request, response: &Response) -> Result<(), StorageError> {
        let entry = CacheEntry::from_response(request, response);
        self.storage.put_entry(&self.name, entry).await
    }

    /// Delete entry.
    pub async fn delete(&self, request: &Request) -> Result<bool, StorageError> {
        self.storage.delete_entry(&self.name, &request.cache_key()).await
    }

    /// All keys (`"GET <url>"`).
    pub async fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.storage.entry_keys(&self.name).await
    }
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache").field("name", &self.name).finish()
    }
}
