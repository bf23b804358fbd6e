//! Scripted in-process [`Fetcher`] for tests and simulated offline runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use tracing::trace;
use url::Url;

use crate::{Fetcher, NetError, Request, Response};

#[derive(Debug, Clone)]
enum StubReply {
    Respond {
        status: StatusCode,
        content_type: String,
        body: Bytes,
    },
    Fail,
}

#[derive(Debug, Clone)]
struct StubRoute {
    reply: StubReply,
    delay: Option<Duration>,
}

/// A fake network keyed by URL.
///
/// Unrouted URLs answer `404 Not Found`; [`StubFetcher::set_offline`] makes every
/// request fail with [`NetError::Offline`].
#[derive(Debug, Default)]
pub struct StubFetcher {
    routes: Mutex<HashMap<String, StubRoute>>,
    offline: AtomicBool,
    calls: Mutex<Vec<Url>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn route_key(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.into()
        }
        Err(_) => url.to_string(),
    }
}

impl StubFetcher {
    /// An online network with no routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// A network where every request fails.
    pub fn offline() -> Self {
        let stub = Self::default();
        stub.set_offline(true);
        stub
    }

    /// Answer `url` with `status` and a plain-text body.
    pub fn respond(&self, url: &str, status: u16, body: impl Into<Bytes>) -> &Self {
        self.respond_with_type(url, status, "text/plain; charset=utf-8", body)
    }

    /// Answer `url` with `status`, `content_type` and `body`.
    pub fn respond_with_type(
        &self,
        url: &str,
        status: u16,
        content_type: &str,
        body: impl Into<Bytes>,
    ) -> &Self {
        self.insert(url, Self::reply(status, content_type, body.into()), None)
    }

    /// Answer `url` after `delay`.
    pub fn respond_after(
        &self,
        url: &str,
        delay: Duration,
        status: u16,
        body: impl Into<Bytes>,
    ) -> &Self {
        let reply = Self::reply(status, "text/plain; charset=utf-8", body.into());
        self.insert(url, reply, Some(delay))
    }

    /// Fail every request for `url` with a network error.
    pub fn fail(&self, url: &str) -> &Self {
        self.insert(url, StubReply::Fail, None)
    }

    /// Toggle the whole network on or off.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Total number of fetches attempted.
    pub fn calls(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Number of fetches attempted for `url`.
    pub fn calls_for(&self, url: &str) -> usize {
        let key = route_key(url);
        lock(&self.calls)
            .iter()
            .filter(|u| route_key(u.as_str()) == key)
            .count()
    }

    fn reply(status: u16, content_type: &str, body: Bytes) -> StubReply {
        StubReply::Respond {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            content_type: content_type.to_string(),
            body,
        }
    }

    fn insert(&self, url: &str, reply: StubReply, delay: Option<Duration>) -> &Self {
        lock(&self.routes).insert(route_key(url), StubRoute { reply, delay });
        self
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        lock(&self.calls).push(request.url.clone());

        if self.is_offline() {
            trace!(url = %request.url, "Stub network offline");
            return Err(NetError::Offline);
        }

        let route = lock(&self.routes).get(&route_key(request.url.as_str())).cloned();
        let Some(route) = route else {
            return Ok(Response::with_content_type(
                request.url.clone(),
                StatusCode::NOT_FOUND,
                "text/plain; charset=utf-8",
                "Not Found",
            ));
        };

        if let Some(delay) = route.delay {
            tokio::time::sleep(delay).await;
        }

        match route.reply {
            StubReply::Respond {
                status,
                content_type,
                body,
            } => Ok(Response::with_content_type(
                request.url.clone(),
                status,
                &content_type,
                body,
            )),
            StubReply::Fail => Err(NetError::RequestFailed(format!(
                "connection refused: {}",
                request.url
            ))),
        }
    }
}
