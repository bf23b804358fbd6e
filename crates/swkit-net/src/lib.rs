//! # swkit Net
//!
//! Request and response values, URL patterns and the fetch seam used by the
//! offline cache controller.
//!
//! ## Design Goals
//!
//! 1. **Plain values**: requests and responses are cheap to clone (`Bytes` bodies)
//!    so a response can be cached and returned at the same time
//! 2. **One fetch seam**: everything that touches the network goes through [`Fetcher`]
//! 3. **Swappable transports**: [`HttpFetcher`] for real traffic, [`StubFetcher`] for
//!    tests and simulated offline runs

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use thiserror::Error;
use url::Url;

pub mod loader;
pub mod pattern;
pub mod stub;

pub use loader::{Fetcher, HttpFetcher, LoaderConfig};
pub use pattern::{PatternType, UrlPattern};
pub use stub::StubFetcher;

/// Errors that can occur while fetching.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network unreachable")]
    Offline,

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl NetError {
    /// Whether retrying the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            NetError::Timeout(_) | NetError::Offline | NetError::RequestFailed(_) => true,
            NetError::HttpError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            NetError::InvalidUrl(_) | NetError::UnsupportedScheme(_) => false,
        }
    }
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// What the requesting page intends to do with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
    /// fetch()/XHR and anything unclassified.
    #[default]
    Empty,
    Document,
    Script,
    Style,
    Image,
    Font,
    Manifest,
}

impl Destination {
    /// Subresources that never change within one deployed version.
    pub fn is_static_asset(&self) -> bool {
        matches!(self, Destination::Script | Destination::Style | Destination::Image)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Destination::Empty => "",
            Destination::Document => "document",
            Destination::Script => "script",
            Destination::Style => "style",
            Destination::Image => "image",
            Destination::Font => "font",
            Destination::Manifest => "manifest",
        }
    }
}

impl FromStr for Destination {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "empty" => Ok(Destination::Empty),
            "document" => Ok(Destination::Document),
            "script" => Ok(Destination::Script),
            "style" => Ok(Destination::Style),
            "image" => Ok(Destination::Image),
            "font" => Ok(Destination::Font),
            "manifest" => Ok(Destination::Manifest),
            other => Err(format!("unknown request destination: {other}")),
        }
    }
}

/// Request mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level document load.
    Navigate,
    SameOrigin,
    NoCors,
    #[default]
    Cors,
}

/// An intercepted HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub destination: Destination,
    pub mode: RequestMode,
}

impl Request {
    /// Create a GET subresource request.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            destination: Destination::Empty,
            mode: RequestMode::Cors,
        }
    }

    /// Create a top-level navigation request.
    pub fn navigate(url: Url) -> Self {
        Self {
            destination: Destination::Document,
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    /// Parse `url` and create a GET request.
    pub fn parse(url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|e| NetError::InvalidUrl(format!("{url}: {e}")))?;
        Ok(Self::get(url))
    }

    /// Set the HTTP method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Set the destination.
    pub fn destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    /// Set the request mode.
    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Whether the URL uses `http` or `https`.
    pub fn is_http(&self) -> bool {
        matches!(self.url.scheme(), "http" | "https")
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// Cache identity: method plus absolute URL without fragment.
    pub fn cache_key(&self) -> String {
        cache_key(&self.method, &self.url)
    }
}

/// Cache identity for `method` + `url`; the fragment never reaches the server.
pub fn cache_key(method: &Method, url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    format!("{} {}", method, url)
}

/// An HTTP response, either fresh from the network, cached, or synthetic.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Served from a cache generation rather than the network.
    pub from_cache: bool,
}

impl Response {
    /// Create a network response.
    pub fn new(url: Url, status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            url,
            status,
            headers,
            body: body.into(),
            from_cache: false,
        }
    }

    /// Create a response with a single `content-type` header.
    pub fn with_content_type(
        url: Url,
        status: StatusCode,
        content_type: &str,
        body: impl Into<Bytes>,
    ) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(content_type) {
            headers.insert(http::header::CONTENT_TYPE, value);
        }
        Self::new(url, status, headers, body)
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Get a header value as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }

    /// Mark the response as served from cache.
    pub fn cached(mut self) -> Self {
        self.from_cache = true;
        self
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({} bytes{})",
            self.status.as_u16(),
            self.url,
            self.body.len(),
            if self.from_cache { ", cached" } else { "" }
        )
    }
}
