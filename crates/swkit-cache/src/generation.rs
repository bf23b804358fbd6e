//! Versioned cache generations.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use swkit_net::{Request, Response};
use tracing::{debug, info, warn};

use crate::{Cache, CacheStorage, StorageError};

/// What a generation holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    /// Precached manifest assets.
    Static,
    /// Responses cached at runtime by the serving strategies.
    Dynamic,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Static => "static",
            Purpose::Dynamic => "dynamic",
        }
    }
}

/// Name of one generation: `{app}-{purpose}-v{version}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenerationTag {
    pub app: String,
    pub purpose: Purpose,
    pub version: u32,
}

impl GenerationTag {
    pub fn new(app: impl Into<String>, purpose: Purpose, version: u32) -> Self {
        Self {
            app: app.into(),
            purpose,
            version,
        }
    }

    /// Parse a cache name. Names not in tag form yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        let mut parts = name.rsplitn(3, '-');
        let version = parts.next()?.strip_prefix('v')?.parse().ok()?;
        let purpose = match parts.next()? {
            "static" => Purpose::Static,
            "dynamic" => Purpose::Dynamic,
            _ => return None,
        };
        let app = parts.next().filter(|a| !a.is_empty())?;
        Some(Self::new(app, purpose, version))
    }

    /// Cache name for this tag.
    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for GenerationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-v{}", self.app, self.purpose.as_str(), self.version)
    }
}

/// Outcome of [`GenerationManager::reconcile`].
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Stale generations that were removed.
    pub deleted: Vec<String>,
    /// Generations left in place (current tags and other apps' caches).
    pub retained: Vec<String>,
    /// Stale generations whose deletion failed.
    pub failed: Vec<(String, StorageError)>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Owns the named cache partitions of one application.
#[derive(Clone)]
pub struct GenerationManager {
    app: String,
    storage: Arc<dyn CacheStorage>,
}

impl GenerationManager {
    pub fn new(app: impl Into<String>, storage: Arc<dyn CacheStorage>) -> Self {
        Self {
            app: app.into(),
            storage,
        }
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    /// Return (creating if absent) the generation `name`.
    pub async fn open_generation(&self, name: &str) -> Result<Cache, StorageError> {
        self.storage.open(name).await?;
        Ok(Cache::new(name, Arc::clone(&self.storage)))
    }

    /// A read handle for `name` that does not create it.
    pub fn generation(&self, name: &str) -> Cache {
        Cache::new(name, Arc::clone(&self.storage))
    }

    /// All generation names currently present.
    pub async fn list_generations(&self) -> Result<Vec<String>, StorageError> {
        self.storage.keys().await
    }

    /// Remove a generation and its entries. Deleting an absent generation is a no-op.
    pub async fn delete_generation(&self, name: &str) -> Result<(), StorageError> {
        if self.storage.delete(name).await? {
            debug!(cache = name, "Generation deleted");
        }
        Ok(())
    }

    /// First match for `request` across `names`, in order.
    ///
    /// A read error in one generation is logged and treated as a miss there.
    pub async fn match_in(&self, names: &[&str], request: &Request) -> Option<Response> {
        for name in names {
            match self.generation(name).match_request(request).await {
                Ok(Some(response)) => return Some(response),
                Ok(None) => {}
                Err(e) => {
                    warn!(cache = %name, url = %request.url, error = %e, "Cache read failed, treating as miss");
                }
            }
        }
        None
    }

    /// Whether `name` is a generation tag of this application.
    pub fn owns(&self, name: &str) -> bool {
        GenerationTag::parse(name).is_some_and(|tag| tag.app == self.app)
    }

    /// Delete every generation of this app that is neither `current_static`
    /// nor `current_dynamic`.
    ///
    /// Best effort: a failed deletion is recorded and the rest still run. Only a
    /// failure to list generations aborts.
    pub async fn reconcile(
        &self,
        current_static: &str,
        current_dynamic: &str,
    ) -> Result<ReconcileReport, StorageError> {
        let mut report = ReconcileReport::default();

        for name in self.list_generations().await? {
            let stale = self.owns(&name) && name != current_static && name != current_dynamic;
            if !stale {
                report.retained.push(name);
                continue;
            }

            match self.storage.delete(&name).await {
                Ok(_) => {
                    info!(cache = %name, "Deleted stale generation");
                    report.deleted.push(name);
                }
                Err(e) => {
                    warn!(cache = %name, error = %e, "Failed to delete stale generation");
                    report.failed.push((name, e));
                }
            }
        }

        Ok(report)
    }
}

impl fmt::Debug for GenerationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationManager")
            .field("app", &self.app)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CacheEntry, MemoryStorage};
    use async_trait::async_trait;
    use http::StatusCode;

    /// Memory storage whose `delete` fails for one name.
    struct StubbornStorage {
        inner: MemoryStorage,
        stubborn: String,
    }

    #[async_trait]
    impl CacheStorage for StubbornStorage {
        async fn open(&self, name: &str) -> Result<(), StorageError> {
            self.inner.open(name).await
        }
        async fn has(&self, name: &str) -> Result<bool, StorageError> {
            self.inner.has(name).await
        }
        async fn keys(&self) -> Result<Vec<String>, StorageError> {
            self.inner.keys().await
        }
        async fn delete(&self, name: &str) -> Result<bool, StorageError> {
            if name == self.stubborn {
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "locked",
                )));
            }
            self.inner.delete(name).await
        }
        async fn match_entry(&self, name: &str, key: &str) -> Result<Option<CacheEntry>, StorageError> {
            self.inner.match_entry(name, key).await
        }
        async fn put_entry(&self, name: &str, entry: CacheEntry) -> Result<(), StorageError> {
            self.inner.put_entry(name, entry).await
        }
        async fn delete_entry(&self, name: &str, key: &str) -> Result<bool, StorageError> {
            self.inner.delete_entry(name, key).await
        }
        async fn entry_keys(&self, name: &str) -> Result<Vec<String>, StorageError> {
            self.inner.entry_keys(name).await
        }
    }

    fn manager() -> GenerationManager {
        GenerationManager::new("moneyballs", Arc::new(MemoryStorage::new()))
    }

    #[test]
    fn test_tag_display_and_parse() {
        let tag = GenerationTag::new("moneyballs", Purpose::Static, 3);
        assert_eq!(tag.name(), "moneyballs-static-v3");
        assert_eq!(GenerationTag::parse("moneyballs-static-v3"), Some(tag));
    }

    #[test]
    fn test_tag_parse_app_with_dashes() {
        let tag = GenerationTag::parse("money-balls-dynamic-v12").unwrap();
        assert_eq!(tag.app, "money-balls");
        assert_eq!(tag.purpose, Purpose::Dynamic);
        assert_eq!(tag.version, 12);
    }

    #[test]
    fn test_tag_parse_rejects_other_names() {
        assert_eq!(GenerationTag::parse("workbox-precache"), None);
        assert_eq!(GenerationTag::parse("moneyballs-images-v1"), None);
        assert_eq!(GenerationTag::parse("moneyballs-static-vX"), None);
        assert_eq!(GenerationTag::parse("-static-v1"), None);
    }

    #[tokio::test]
    async fn test_open_and_list() {
        let manager = manager();
        manager.open_generation("moneyballs-static-v1").await.unwrap();
        manager.open_generation("moneyballs-dynamic-v1").await.unwrap();

        assert_eq!(
            manager.list_generations().await.unwrap(),
            vec!["moneyballs-dynamic-v1", "moneyballs-static-v1"]
        );
    }

    #[tokio::test]
    async fn test_delete_generation_twice_is_ok() {
        let manager = manager();
        manager.open_generation("moneyballs-static-v1").await.unwrap();
        manager.delete_generation("moneyballs-static-v1").await.unwrap();
        manager.delete_generation("moneyballs-static-v1").await.unwrap();
        assert!(manager.list_generations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_keeps_only_current_and_foreign() {
        let manager = manager();
        for name in [
            "moneyballs-static-v1",
            "moneyballs-dynamic-v1",
            "moneyballs-static-v2",
            "moneyballs-dynamic-v2",
            "other-app-static-v1",
            "workbox-runtime",
        ] {
            manager.open_generation(name).await.unwrap();
        }

        let report = manager
            .reconcile("moneyballs-static-v2", "moneyballs-dynamic-v2")
            .await
            .unwrap();

        assert!(report.is_clean());
        assert_eq!(report.deleted, vec!["moneyballs-dynamic-v1", "moneyballs-static-v1"]);
        assert_eq!(
            manager.list_generations().await.unwrap(),
            vec![
                "moneyballs-dynamic-v2",
                "moneyballs-static-v2",
                "other-app-static-v1",
                "workbox-runtime"
            ]
        );
    }

    #[tokio::test]
    async fn test_reconcile_continues_past_failures() {
        let storage = Arc::new(StubbornStorage {
            inner: MemoryStorage::new(),
            stubborn: "moneyballs-static-v1".to_string(),
        });
        let manager = GenerationManager::new("moneyballs", storage);
        for name in [
            "moneyballs-static-v1",
            "moneyballs-dynamic-v1",
            "moneyballs-static-v2",
        ] {
            manager.open_generation(name).await.unwrap();
        }

        let report = manager
            .reconcile("moneyballs-static-v2", "moneyballs-dynamic-v2")
            .await
            .unwrap();

        assert!(!report.is_clean());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "moneyballs-static-v1");
        assert_eq!(report.deleted, vec!["moneyballs-dynamic-v1"]);
    }

    #[tokio::test]
    async fn test_match_in_order() {
        let manager = manager();
        let request = Request::parse("https://example.com/vite/app.js").unwrap();
        let statics = manager.open_generation("moneyballs-static-v1").await.unwrap();
        let dynamics = manager.open_generation("moneyballs-dynamic-v1").await.unwrap();

        let fresh = |body: &'static str| {
            Response::with_content_type(request.url.clone(), StatusCode::OK, "text/javascript", body)
        };
        dynamics.put(&request, &fresh("dynamic")).await.unwrap();
        assert_eq!(
            manager
                .match_in(&["moneyballs-static-v1", "moneyballs-dynamic-v1"], &request)
                .await
                .unwrap()
                .text()
                .unwrap(),
            "dynamic"
        );

        statics.put(&request, &fresh("static")).await.unwrap();
        let hit = manager
            .match_in(&["moneyballs-static-v1", "moneyballs-dynamic-v1"], &request)
            .await
            .unwrap();
        assert_eq!(hit.text().unwrap(), "static");
        assert!(hit.from_cache);

        assert!(manager.match_in(&["moneyballs-static-v9"], &request).await.is_none());
    }
}
