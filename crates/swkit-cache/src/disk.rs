//! Durable filesystem storage backend.
//!
//! Layout: one directory per cache generation under the root, one JSON file per
//! entry named by the SHA-256 of its key. Entries are written to a temporary
//! file and renamed into place, so a reader never observes a partial entry.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::{CacheEntry, CacheStorage, StorageError};

const ENTRY_EXT: &str = "json";

/// Filesystem-backed cache storage.
#[derive(Debug)]
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    /// Use `root` as the storage directory (created lazily).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn cache_dir(&self, name: &str) -> Result<PathBuf, StorageError> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    fn entry_path(dir: &Path, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        dir.join(format!("{}.{ENTRY_EXT}", hex::encode(digest)))
    }

    async fn read_entry(path: &Path) -> Result<Option<CacheEntry>, StorageError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Generation names become directory names; keep them to a portable charset.
fn validate_name(name: &str) -> Result<(), StorageError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidName(name.to_string()))
    }
}

fn temp_suffix() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, name: &str) -> Result<(), StorageError> {
        let dir = self.cache_dir(name)?;
        tokio::fs::create_dir_all(&dir).await?;
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool, StorageError> {
        let dir = self.cache_dir(name)?;
        match tokio::fs::metadata(&dir).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            if !item.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = item.file_name().to_str() {
                if validate_name(name).is_ok() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        let dir = self.cache_dir(name)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(cache = name, "Deleted cache directory");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn match_entry(&self, name: &str, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        let dir = self.cache_dir(name)?;
        let entry = Self::read_entry(&Self::entry_path(&dir, key)).await?;
        Ok(entry.filter(|e| e.key == key))
    }

    async fn put_entry(&self, name: &str, entry: CacheEntry) -> Result<(), StorageError> {
        let dir = self.cache_dir(name)?;
        if !self.has(name).await? {
            return Err(StorageError::NotFound(name.to_string()));
        }

        let path = Self::entry_path(&dir, &entry.key);
        let temp = path.with_extension(format!("tmp{}", temp_suffix()));
        let bytes = serde_json::to_vec(&entry)?;

        tokio::fs::write(&temp, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete_entry(&self, name: &str, key: &str) -> Result<bool, StorageError> {
        let dir = self.cache_dir(name)?;
        match tokio::fs::remove_file(Self::entry_path(&dir, key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn entry_keys(&self, name: &str) -> Result<Vec<String>, StorageError> {
        let path = self.cache_dir(name)?;
        let mut dir = match tokio::fs::read_dir(&path).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let file = item.path();
            if file.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
                continue;
            }
            match Self::read_entry(&file).await {
                Ok(Some(entry)) => keys.push(entry.key),
                Ok(None) => {}
                Err(e) => warn!(cache = name, file = %file.display(), error = %e, "Skipping unreadable entry"),
            }
        }
        keys.sort();
        Ok(keys)
    }
}
