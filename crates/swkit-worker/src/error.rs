//! Worker error types.

use http::StatusCode;
use swkit_cache::StorageError;
use swkit_common::TimedOut;
use swkit_net::NetError;
use thiserror::Error;
use url::Url;

use crate::config::ConfigError;

/// Errors surfaced by the worker.
///
/// Only configuration and install errors are returned to callers as failures.
/// Everything on the fetch path is logged and turned into a fallback response.
#[derive(Error, Debug)]
pub enum OfflineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Network failure: {0}")]
    Network(#[from] NetError),

    #[error("Cache read failed: {0}")]
    CacheRead(#[source] StorageError),

    #[error("Cache write failed: {0}")]
    CacheWrite(#[source] StorageError),

    #[error("Failed to delete stale generation {generation}: {source}")]
    Reconciliation {
        generation: String,
        #[source]
        source: StorageError,
    },
}

/// Why one manifest entry could not be precached.
#[derive(Error, Debug)]
pub enum AssetFailure {
    #[error(transparent)]
    Network(#[from] NetError),

    #[error("unexpected status {0}")]
    Status(StatusCode),

    #[error(transparent)]
    TimedOut(#[from] TimedOut),

    #[error("cache write failed: {0}")]
    Storage(#[from] StorageError),
}

/// One manifest entry failed to precache. Never fatal to installation.
#[derive(Error, Debug)]
#[error("Precache of {url} failed: {failure}")]
pub struct PrecacheAssetError {
    pub url: Url,
    #[source]
    pub failure: AssetFailure,
}

impl PrecacheAssetError {
    pub fn new(url: Url, failure: impl Into<AssetFailure>) -> Self {
        Self {
            url,
            failure: failure.into(),
        }
    }
}
