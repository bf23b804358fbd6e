//! Serving strategies.
//!
//! Each strategy resolves to a [`StrategyOutcome`] and never fails: network
//! errors become fallbacks, cache read errors count as misses and cache write
//! errors are logged and dropped.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use bytes::Bytes;
use http::StatusCode;
use swkit_cache::GenerationManager;
use swkit_net::{Fetcher, NetError, Request, Response};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, trace, warn};

use crate::control::ConnectivityHint;
use crate::error::OfflineError;
use crate::lifecycle::WorkerEvent;

/// Result of running one strategy.
#[derive(Debug, Clone)]
pub enum StrategyOutcome {
    /// Served from a cache generation.
    Cached(Response),
    /// Served from the network (any status).
    Network(Response),
    /// Synthetic 503.
    Offline(Response),
    /// Nothing to serve; the caller picks a fallback.
    Miss,
}

impl StrategyOutcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            StrategyOutcome::Cached(r) | StrategyOutcome::Network(r) | StrategyOutcome::Offline(r) => {
                Some(r)
            }
            StrategyOutcome::Miss => None,
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            StrategyOutcome::Cached(r) | StrategyOutcome::Network(r) | StrategyOutcome::Offline(r) => {
                Some(r)
            }
            StrategyOutcome::Miss => None,
        }
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, StrategyOutcome::Miss)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StrategyOutcome::Cached(_) => "cached",
            StrategyOutcome::Network(_) => "network",
            StrategyOutcome::Offline(_) => "offline",
            StrategyOutcome::Miss => "miss",
        }
    }
}

/// Body and content type of the synthetic 503.
#[derive(Debug, Clone)]
pub struct OfflinePage {
    pub body: Bytes,
    pub content_type: String,
}

impl OfflinePage {
    pub fn new(body: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            content_type: content_type.into(),
        }
    }

    pub fn respond_to(&self, request: &Request) -> Response {
        Response::with_content_type(
            request.url.clone(),
            StatusCode::SERVICE_UNAVAILABLE,
            &self.content_type,
            self.body.clone(),
        )
    }
}

/// The pieces a background revalidation needs, detached from the task set.
#[derive(Clone)]
struct Store {
    generations: GenerationManager,
    fetcher: Arc<dyn Fetcher>,
    static_cache: String,
    dynamic_cache: String,
}

impl Store {
    async fn lookup(&self, request: &Request, names: &[&str]) -> Option<Response> {
        self.generations.match_in(names, request).await
    }

    /// Store a 2xx `response` in the dynamic generation. Returns whether it was written.
    ///
    /// The generation is never created here: once a newer version has
    /// reconciled it away, late writes from this one fail with `NotFound`.
    async fn remember(&self, request: &Request, response: &Response) -> bool {
        if !response.ok() {
            return false;
        }

        let written = self
            .generations
            .generation(&self.dynamic_cache)
            .put(request, response)
            .await;
        match written {
            Ok(()) => {
                trace!(url = %request.url, cache = %self.dynamic_cache, "Cached network response");
                true
            }
            Err(e) => {
                let e = OfflineError::CacheWrite(e);
                warn!(url = %request.url, error = %e, "Dropping cache write");
                false
            }
        }
    }

    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        self.fetcher.fetch(request).await
    }

    async fn revalidate(self, request: Request, events: Option<mpsc::UnboundedSender<WorkerEvent>>) {
        match self.fetch(&request).await {
            Ok(response) if response.ok() => {
                if self.remember(&request, &response).await {
                    debug!(url = %request.url, "Revalidated");
                    if let Some(events) = events {
                        let _ = events.send(WorkerEvent::CacheUpdated {
                            url: request.url.clone(),
                        });
                    }
                }
            }
            Ok(response) => {
                debug!(url = %request.url, status = %response.status, "Revalidation not cached");
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Revalidation failed");
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cache-first, network-first and stale-while-revalidate over the current
/// static and dynamic generations.
pub struct Strategies {
    store: Store,
    offline: OfflinePage,
    connectivity: Arc<ConnectivityHint>,
    revalidations: Mutex<JoinSet<()>>,
    events: OnceLock<mpsc::UnboundedSender<WorkerEvent>>,
}

impl Strategies {
    pub fn new(
        generations: GenerationManager,
        fetcher: Arc<dyn Fetcher>,
        static_cache: impl Into<String>,
        dynamic_cache: impl Into<String>,
        offline: OfflinePage,
        connectivity: Arc<ConnectivityHint>,
    ) -> Self {
        Self {
            store: Store {
                generations,
                fetcher,
                static_cache: static_cache.into(),
                dynamic_cache: dynamic_cache.into(),
            },
            offline,
            connectivity,
            revalidations: Mutex::new(JoinSet::new()),
            events: OnceLock::new(),
        }
    }

    /// Send [`WorkerEvent::CacheUpdated`] to `events` after each revalidation.
    /// Only the first sender set is kept.
    pub fn notify(&self, events: mpsc::UnboundedSender<WorkerEvent>) {
        let _ = self.events.set(events);
    }

    /// The synthetic 503 for `request`.
    pub fn offline_response(&self, request: &Request) -> Response {
        self.offline.respond_to(request)
    }

    /// Look `request` up in the given generations, in order.
    pub async fn lookup(&self, request: &Request, names: &[&str]) -> Option<Response> {
        self.store.lookup(request, names).await
    }

    /// Static then dynamic; on a miss go to the network.
    pub async fn cache_first(&self, request: &Request) -> StrategyOutcome {
        if let Some(cached) = self.lookup_current(request).await {
            trace!(url = %request.url, "Cache-first hit");
            return StrategyOutcome::Cached(cached);
        }

        match self.store.fetch(request).await {
            Ok(response) => {
                self.store.remember(request, &response).await;
                StrategyOutcome::Network(response)
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Cache-first miss while offline");
                StrategyOutcome::Offline(self.offline_response(request))
            }
        }
    }

    /// Network; on failure the cached copy, else [`StrategyOutcome::Miss`].
    pub async fn network_first(&self, request: &Request) -> StrategyOutcome {
        match self.store.fetch(request).await {
            Ok(response) => {
                self.store.remember(request, &response).await;
                StrategyOutcome::Network(response)
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network-first falling back to cache");
                let names = [self.store.dynamic_cache.as_str(), self.store.static_cache.as_str()];
                match self.store.lookup(request, &names).await {
                    Some(cached) => StrategyOutcome::Cached(cached),
                    None => StrategyOutcome::Miss,
                }
            }
        }
    }

    /// Cached copy now, refreshed in the background; the network on a miss.
    ///
    /// Looks in the dynamic generation first so a revalidated copy shadows the
    /// precached one.
    pub async fn stale_while_revalidate(&self, request: &Request) -> StrategyOutcome {
        let names = [self.store.dynamic_cache.as_str(), self.store.static_cache.as_str()];
        if let Some(cached) = self.store.lookup(request, &names).await {
            if self.connectivity.is_online() {
                self.spawn_revalidation(request.clone());
            } else {
                trace!(url = %request.url, "Page reported offline, skipping revalidation");
            }
            return StrategyOutcome::Cached(cached);
        }

        match self.store.fetch(request).await {
            Ok(response) => {
                self.store.remember(request, &response).await;
                StrategyOutcome::Network(response)
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Stale-while-revalidate miss while offline");
                StrategyOutcome::Offline(self.offline_response(request))
            }
        }
    }

    /// Wait for every background revalidation started so far, including ones
    /// started while waiting.
    pub async fn settle(&self) {
        loop {
            let mut pending = std::mem::take(&mut *lock(&self.revalidations));
            if pending.is_empty() {
                return;
            }
            while let Some(joined) = pending.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "Revalidation task failed");
                }
            }
        }
    }

    /// Background revalidations not yet finished.
    pub fn pending_revalidations(&self) -> usize {
        let mut set = lock(&self.revalidations);
        while set.try_join_next().is_some() {}
        set.len()
    }

    async fn lookup_current(&self, request: &Request) -> Option<Response> {
        let names = [self.store.static_cache.as_str(), self.store.dynamic_cache.as_str()];
        self.store.lookup(request, &names).await
    }

    fn spawn_revalidation(&self, request: Request) {
        let store = self.store.clone();
        let events = self.events.get().cloned();
        let mut set = lock(&self.revalidations);
        while set.try_join_next().is_some() {}
        set.spawn(store.revalidate(request, events));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swkit_cache::MemoryStorage;
    use swkit_net::StubFetcher;

    const URL: &str = "https://moneyballs.example/vite/manifest.json";

    struct Fixture {
        stub: Arc<StubFetcher>,
        generations: GenerationManager,
        hint: Arc<ConnectivityHint>,
        strategies: Strategies,
    }

    async fn fixture() -> Fixture {
        let stub = Arc::new(StubFetcher::new());
        let generations = GenerationManager::new("moneyballs", Arc::new(MemoryStorage::new()));
        let hint = Arc::new(ConnectivityHint::new());
        let strategies = Strategies::new(
            generations.clone(),
            stub.clone(),
            "moneyballs-static-v1",
            "moneyballs-dynamic-v1",
            OfflinePage::new("Offline", "text/plain; charset=utf-8"),
            hint.clone(),
        );
        generations.open_generation("moneyballs-static-v1").await.unwrap();
        generations.open_generation("moneyballs-dynamic-v1").await.unwrap();
        Fixture {
            stub,
            generations,
            hint,
            strategies,
        }
    }

    fn request() -> Request {
        Request::parse(URL).unwrap()
    }

    async fn seed(generations: &GenerationManager, name: &str, body: &'static str) {
        let request = request();
        let response = Response::with_content_type(
            request.url.clone(),
            StatusCode::OK,
            "application/json",
            body,
        );
        generations
            .open_generation(name)
            .await
            .unwrap()
            .put(&request, &response)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cache_first_stores_2xx_in_dynamic() {
        let f = fixture().await;
        f.stub.respond(URL, 200, "{}");

        let outcome = f.strategies.cache_first(&request()).await;
        assert!(matches!(outcome, StrategyOutcome::Network(_)));

        let dynamic = f.generations.generation("moneyballs-dynamic-v1");
        assert!(dynamic.contains(&request()).await.unwrap());
    }

    #[tokio::test]
    async fn test_cache_first_does_not_store_errors() {
        let f = fixture().await;
        f.stub.respond(URL, 500, "boom");

        let outcome = f.strategies.cache_first(&request()).await;
        assert_eq!(outcome.response().unwrap().status, StatusCode::INTERNAL_SERVER_ERROR);
        let dynamic = f.generations.generation("moneyballs-dynamic-v1");
        assert!(!dynamic.contains(&request()).await.unwrap());
    }

    #[tokio::test]
    async fn test_write_into_deleted_generation_is_dropped() {
        let f = fixture().await;
        f.generations.delete_generation("moneyballs-dynamic-v1").await.unwrap();
        f.stub.respond(URL, 200, "{}");

        let outcome = f.strategies.cache_first(&request()).await;

        assert_eq!(outcome.kind(), "network");
        assert_eq!(
            f.generations.list_generations().await.unwrap(),
            vec!["moneyballs-static-v1"]
        );
    }

    #[tokio::test]
    async fn test_cache_first_offline_is_503() {
        let f = fixture().await;
        f.stub.set_offline(true);

        let outcome = f.strategies.cache_first(&request()).await;
        let response = outcome.into_response().unwrap();
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.text().unwrap(), "Offline");
        assert_eq!(response.content_type(), Some("text/plain; charset=utf-8"));
    }

    #[tokio::test]
    async fn test_network_first_falls_back_to_cache() {
        let f = fixture().await;
        seed(&f.generations, "moneyballs-dynamic-v1", "{\"stale\":true}").await;
        f.stub.set_offline(true);

        let outcome = f.strategies.network_first(&request()).await;
        assert_eq!(outcome.kind(), "cached");
        assert_eq!(outcome.response().unwrap().text().unwrap(), "{\"stale\":true}");
    }

    #[tokio::test]
    async fn test_network_first_returns_non_2xx_as_is() {
        let f = fixture().await;
        seed(&f.generations, "moneyballs-dynamic-v1", "{}").await;
        f.stub.respond(URL, 404, "gone");

        let outcome = f.strategies.network_first(&request()).await;
        assert_eq!(outcome.kind(), "network");
        assert_eq!(outcome.response().unwrap().status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_swr_skips_revalidation_when_page_offline() {
        let f = fixture().await;
        seed(&f.generations, "moneyballs-dynamic-v1", "{}").await;
        f.stub.respond(URL, 200, "{\"fresh\":true}");
        f.hint.set(false);

        let outcome = f.strategies.stale_while_revalidate(&request()).await;
        f.strategies.settle().await;

        assert_eq!(outcome.kind(), "cached");
        assert_eq!(f.stub.calls(), 0);
    }

    #[tokio::test]
    async fn test_swr_emits_cache_updated() {
        let f = fixture().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        f.strategies.notify(tx);
        seed(&f.generations, "moneyballs-dynamic-v1", "{}").await;
        f.stub.respond(URL, 200, "{\"fresh\":true}");

        f.strategies.stale_while_revalidate(&request()).await;
        f.strategies.settle().await;

        match rx.try_recv().unwrap() {
            WorkerEvent::CacheUpdated { url } => assert_eq!(url.as_str(), URL),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(f.strategies.pending_revalidations(), 0);
    }

    #[tokio::test]
    async fn test_swr_keeps_cache_when_revalidation_fails() {
        let f = fixture().await;
        seed(&f.generations, "moneyballs-dynamic-v1", "{\"old\":true}").await;
        f.stub.fail(URL);

        f.strategies.stale_while_revalidate(&request()).await;
        f.strategies.settle().await;

        let again = f.strategies.stale_while_revalidate(&request()).await;
        assert_eq!(again.response().unwrap().text().unwrap(), "{\"old\":true}");
    }
}
