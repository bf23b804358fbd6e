//! The fetch seam and its HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::{NetError, Request, Response};

/// Anything that can turn a [`Request`] into a [`Response`] over the network.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}

/// HTTP loader configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Accept-Language header.
    pub accept_language: String,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("swkit/{}", env!("CARGO_PKG_VERSION")),
            accept_language: "en-US,en;q=0.9".to_string(),
            timeout_ms: 30_000,
            max_redirects: 10,
        }
    }
}

impl LoaderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// [`Fetcher`] backed by a shared `reqwest` client.
pub struct HttpFetcher {
    client: Client,
    config: LoaderConfig,
}

impl HttpFetcher {
    /// Create a new loader.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout())
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(timeout_ms = config.timeout_ms, "HttpFetcher initialized");

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        if !request.is_http() {
            return Err(NetError::UnsupportedScheme(request.url.scheme().to_string()));
        }

        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .header("Accept-Language", &self.config.accept_language);

        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name, value);
        }

        let timeout = self.config.timeout();
        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                NetError::Timeout(timeout)
            } else {
                NetError::HttpError(e)
            }
        };

        let response = req_builder.send().await.map_err(map_err)?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await.map_err(map_err)?;

        trace!(
            url = %url,
            status = %status,
            body_len = body.len(),
            "Response received"
        );

        Ok(Response::new(url, status, headers, body))
    }
}
