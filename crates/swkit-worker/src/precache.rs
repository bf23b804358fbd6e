//! Install-time asset precaching.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use swkit_cache::Cache;
use swkit_common::{retry_with_backoff, with_timeout};
use swkit_net::{Fetcher, Request, Response};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::PrecacheConfig;
use crate::error::{AssetFailure, PrecacheAssetError};

/// What a precache run did.
#[derive(Debug, Default)]
pub struct PrecacheReport {
    /// Entries fetched and stored.
    pub cached: Vec<Url>,
    /// Entries already present (refill only).
    pub skipped: Vec<Url>,
    /// Entries that could not be cached.
    pub failures: Vec<PrecacheAssetError>,
}

impl PrecacheReport {
    /// Every attempted entry made it into the cache.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.cached.len() + self.failures.len()
    }
}

/// Fetches manifest entries into a static generation.
///
/// Best effort: a failing entry is logged and reported, the rest still load.
pub struct PrecacheLoader {
    fetcher: Arc<dyn Fetcher>,
    config: PrecacheConfig,
}

impl PrecacheLoader {
    pub fn new(fetcher: Arc<dyn Fetcher>, config: PrecacheConfig) -> Self {
        Self { fetcher, config }
    }

    pub fn config(&self) -> &PrecacheConfig {
        &self.config
    }

    /// Fetch every entry of `manifest` into `cache`.
    ///
    /// Returns once each entry has been attempted.
    pub async fn precache(&self, manifest: &[Url], cache: &Cache) -> PrecacheReport {
        info!(
            cache = cache.name(),
            assets = manifest.len(),
            concurrency = self.config.concurrency,
            "Precaching static assets"
        );

        let results: Vec<_> = stream::iter(manifest)
            .map(|url| async move { (url, self.load(url, cache).await) })
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut report = PrecacheReport::default();
        for (url, result) in results {
            match result {
                Ok(()) => {
                    debug!(url = %url, "Cached");
                    report.cached.push(url.clone());
                }
                Err(e) => {
                    warn!(url = %url, error = %e.failure, "Failed to precache");
                    report.failures.push(e);
                }
            }
        }

        info!(
            cache = cache.name(),
            cached = report.cached.len(),
            failed = report.failures.len(),
            "Precache complete"
        );
        report
    }

    /// Precache only the entries of `manifest` missing from `cache`.
    pub async fn refill(&self, manifest: &[Url], cache: &Cache) -> PrecacheReport {
        let mut missing = Vec::new();
        let mut present = Vec::new();

        for url in manifest {
            match cache.contains(&Request::get(url.clone())).await {
                Ok(true) => present.push(url.clone()),
                Ok(false) => missing.push(url.clone()),
                Err(e) => {
                    debug!(url = %url, error = %e, "Cache read failed, refetching");
                    missing.push(url.clone());
                }
            }
        }

        if missing.is_empty() {
            debug!(cache = cache.name(), "Static generation complete, nothing to refill");
            return PrecacheReport {
                skipped: present,
                ..PrecacheReport::default()
            };
        }

        let mut report = self.precache(&missing, cache).await;
        report.skipped = present;
        report
    }

    async fn load(&self, url: &Url, cache: &Cache) -> Result<(), PrecacheAssetError> {
        let request = &Request::get(url.clone());
        let response = retry_with_backoff(&self.config.retry, move || self.download(request))
            .await
            .map_err(|failure| PrecacheAssetError::new(url.clone(), failure))?;

        cache
            .put(request, &response)
            .await
            .map_err(|e| PrecacheAssetError::new(url.clone(), e))
    }

    async fn download(&self, request: &Request) -> Result<Response, AssetFailure> {
        let response =
            with_timeout(self.config.asset_timeout(), self.fetcher.fetch(request)).await??;
        if !response.ok() {
            return Err(AssetFailure::Status(response.status));
        }
        Ok(response)
    }
}
