//! Worker configuration.
//!
//! A worker is described by one JSON document; every field has a default, so a
//! file only needs to name what differs:
//!
//! ```json
//! {
//!   "app_name": "moneyballs",
//!   "version": 3,
//!   "origin": "https://moneyballs.example",
//!   "base_path": "/vite/",
//!   "manifest": ["/vite/", "/vite/index.html", "/vite/manifest.json"]
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use swkit_cache::{GenerationTag, Purpose};
use swkit_common::RetryConfig;
use swkit_net::LoaderConfig;
use thiserror::Error;
use url::Url;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid URL {value:?}: {reason}")]
    InvalidUrl { value: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Install-time precache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrecacheConfig {
    /// Manifest entries fetched at the same time.
    pub concurrency: usize,
    /// Upper bound for one asset, on top of the HTTP client timeout.
    pub asset_timeout_ms: u64,
    /// Retry policy per asset. Defaults to a single attempt.
    pub retry: RetryConfig,
}

impl Default for PrecacheConfig {
    fn default() -> Self {
        Self {
            concurrency: 6,
            asset_timeout_ms: 15_000,
            retry: RetryConfig::none(),
        }
    }
}

impl PrecacheConfig {
    pub fn asset_timeout(&self) -> Duration {
        Duration::from_millis(self.asset_timeout_ms)
    }
}

/// Everything one deployed worker version needs to know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Prefix of every cache generation name.
    pub app_name: String,

    /// Deployed version; bumping it retires the previous generations.
    pub version: u32,

    /// Origin that root-relative manifest entries resolve against.
    pub origin: String,

    /// Path prefix the app is served under. Starts and ends with `/`.
    pub base_path: String,

    /// Page shell served for offline navigations, relative to `base_path`.
    pub shell_document: String,

    /// Precache manifest, absolute or root-relative URLs.
    pub manifest: Vec<String>,

    /// Path segments that mark a request as a static asset.
    pub static_asset_dirs: Vec<String>,

    /// Body of the synthetic 503 response.
    pub offline_body: String,

    /// Content type of the synthetic 503 response.
    pub offline_content_type: String,

    /// Promote the new worker as soon as it has installed.
    pub skip_waiting_on_install: bool,

    pub precache: PrecacheConfig,

    pub loader: LoaderConfig,

    /// Root of the on-disk cache storage.
    pub storage_dir: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            app_name: "moneyballs".to_string(),
            version: 1,
            origin: "http://localhost:8080".to_string(),
            base_path: "/".to_string(),
            shell_document: "index.html".to_string(),
            manifest: Vec::new(),
            static_asset_dirs: vec!["/css/".to_string(), "/js/".to_string(), "/icons/".to_string()],
            offline_body: "Offline".to_string(),
            offline_content_type: "text/plain; charset=utf-8".to_string(),
            skip_waiting_on_install: true,
            precache: PrecacheConfig::default(),
            loader: LoaderConfig::default(),
            storage_dir: None,
        }
    }
}

impl WorkerConfig {
    /// Load and validate a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the worker relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_name.is_empty() {
            return Err(ConfigError::Invalid("app_name must not be empty".into()));
        }
        let usable = !self.app_name.starts_with('.')
            && self
                .app_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !usable {
            return Err(ConfigError::Invalid(format!(
                "app_name {:?} is not usable as a cache name",
                self.app_name
            )));
        }
        if !self.base_path.starts_with('/') || !self.base_path.ends_with('/') {
            return Err(ConfigError::Invalid(format!(
                "base_path {:?} must start and end with '/'",
                self.base_path
            )));
        }
        if self.shell_document.starts_with('/') {
            return Err(ConfigError::Invalid(
                "shell_document is relative to base_path".into(),
            ));
        }
        if self.precache.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "precache.concurrency must be at least 1".into(),
            ));
        }
        let multiplier = self.precache.retry.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "precache.retry.backoff_multiplier must be a non-negative number, got {multiplier}"
            )));
        }
        if let Err(e) = self.offline_content_type.parse::<mime::Mime>() {
            return Err(ConfigError::Invalid(format!(
                "offline_content_type {:?}: {e}",
                self.offline_content_type
            )));
        }

        self.origin_url()?;
        self.manifest_urls()?;
        Ok(())
    }

    pub fn static_tag(&self) -> GenerationTag {
        GenerationTag::new(&self.app_name, Purpose::Static, self.version)
    }

    pub fn dynamic_tag(&self) -> GenerationTag {
        GenerationTag::new(&self.app_name, Purpose::Dynamic, self.version)
    }

    /// `{app}-static-v{version}`
    pub fn static_cache_name(&self) -> String {
        self.static_tag().name()
    }

    /// `{app}-dynamic-v{version}`
    pub fn dynamic_cache_name(&self) -> String {
        self.dynamic_tag().name()
    }

    pub fn origin_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.origin).map_err(|e| ConfigError::InvalidUrl {
            value: self.origin.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                value: self.origin.clone(),
                reason: "origin must be http or https".into(),
            });
        }
        Ok(url)
    }

    /// Resolve a manifest entry or page path.
    ///
    /// Absolute URLs are kept, `/path` resolves against the origin and any other
    /// relative path resolves against `{origin}{base_path}`.
    pub fn resolve(&self, entry: &str) -> Result<Url, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidUrl {
            value: entry.to_string(),
            reason,
        };

        match Url::parse(entry) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let origin = self.origin_url()?;
                let base = if entry.starts_with('/') {
                    origin
                } else {
                    origin.join(&self.base_path).map_err(|e| invalid(e.to_string()))?
                };
                base.join(entry).map_err(|e| invalid(e.to_string()))
            }
            Err(e) => Err(invalid(e.to_string())),
        }
    }

    /// The manifest as absolute URLs, in order.
    pub fn manifest_urls(&self) -> Result<Vec<Url>, ConfigError> {
        self.manifest.iter().map(|entry| self.resolve(entry)).collect()
    }

    /// `{origin}{base_path}{shell_document}`
    pub fn shell_url(&self) -> Result<Url, ConfigError> {
        self.resolve(&format!("{}{}", self.base_path, self.shell_document))
    }

    /// Configured storage root, else the platform cache directory.
    pub fn storage_dir(&self) -> PathBuf {
        match &self.storage_dir {
            Some(dir) => dir.clone(),
            None => dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("swkit"),
        }
    }
}
