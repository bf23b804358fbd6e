//! The offline cache controller.

use std::sync::Arc;

use swkit_cache::{CacheStorage, GenerationManager};
use swkit_net::{Fetcher, Request, Response};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::WorkerConfig;
use crate::control::{ConnectivityHint, ControlMessage, ControlOutcome, ReplyPort, VersionReply};
use crate::error::OfflineError;
use crate::lifecycle::WorkerEvent;
use crate::precache::{PrecacheLoader, PrecacheReport};
use crate::router::{Router, StrategyChoice};
use crate::strategy::{OfflinePage, Strategies, StrategyOutcome};

/// Sync tags that refill the static generation.
pub const SYNC_TAGS: [&str; 2] = ["background-sync", "periodic-sync"];

/// What activation did to the cache generations.
#[derive(Debug, Default)]
pub struct ActivationReport {
    pub deleted: Vec<String>,
    pub retained: Vec<String>,
    /// Stale generations that could not be deleted, or a failed listing.
    pub failures: Vec<OfflineError>,
}

/// One deployed version of the offline cache controller.
///
/// Built from configuration, a storage backend and a fetcher. The host drives
/// it through the lifecycle hooks; see [`crate::Registration`].
pub struct OfflineWorker {
    config: WorkerConfig,
    manifest: Vec<Url>,
    shell: Url,
    static_cache: String,
    dynamic_cache: String,
    generations: GenerationManager,
    router: Router,
    precache: PrecacheLoader,
    strategies: Strategies,
    connectivity: Arc<ConnectivityHint>,
}

impl OfflineWorker {
    /// Validate `config` and build a worker over `storage` and `fetcher`.
    pub fn new(
        config: WorkerConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, OfflineError> {
        config.validate()?;

        let manifest = config.manifest_urls()?;
        let shell = config.shell_url()?;
        let static_cache = config.static_cache_name();
        let dynamic_cache = config.dynamic_cache_name();
        let generations = GenerationManager::new(&config.app_name, storage);
        let connectivity = Arc::new(ConnectivityHint::new());

        let strategies = Strategies::new(
            generations.clone(),
            Arc::clone(&fetcher),
            &static_cache,
            &dynamic_cache,
            OfflinePage::new(
                config.offline_body.clone(),
                config.offline_content_type.clone(),
            ),
            Arc::clone(&connectivity),
        );

        Ok(Self {
            router: Router::from_config(&config),
            precache: PrecacheLoader::new(fetcher, config.precache.clone()),
            manifest,
            shell,
            static_cache,
            dynamic_cache,
            generations,
            strategies,
            connectivity,
            config,
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn version(&self) -> u32 {
        self.config.version
    }

    pub fn static_cache_name(&self) -> &str {
        &self.static_cache
    }

    pub fn dynamic_cache_name(&self) -> &str {
        &self.dynamic_cache
    }

    pub fn manifest(&self) -> &[Url] {
        &self.manifest
    }

    pub fn shell_url(&self) -> &Url {
        &self.shell
    }

    pub fn generations(&self) -> &GenerationManager {
        &self.generations
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn strategies(&self) -> &Strategies {
        &self.strategies
    }

    /// The page's last reported connectivity.
    pub fn is_page_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Forward revalidation events to `events`.
    pub fn attach_events(&self, events: mpsc::UnboundedSender<WorkerEvent>) {
        self.strategies.notify(events);
    }

    pub fn version_reply(&self) -> VersionReply {
        VersionReply {
            version: self.config.version,
            static_cache: self.static_cache.clone(),
            dynamic_cache: self.dynamic_cache.clone(),
        }
    }

    /// Create the current generations and precache the manifest.
    ///
    /// Fails only if a generation cannot be created; asset failures are in the report.
    pub async fn on_install(&self) -> Result<PrecacheReport, OfflineError> {
        info!(version = self.config.version, "Installing worker");

        let statics = self
            .generations
            .open_generation(&self.static_cache)
            .await
            .map_err(OfflineError::CacheWrite)?;
        self.generations
            .open_generation(&self.dynamic_cache)
            .await
            .map_err(OfflineError::CacheWrite)?;

        let report = self.precache.precache(&self.manifest, &statics).await;
        if !report.is_complete() {
            warn!(
                failed = report.failures.len(),
                "Installed with a partial static generation"
            );
        }
        Ok(report)
    }

    /// Delete every stale generation of this app.
    pub async fn on_activate(&self) -> ActivationReport {
        info!(version = self.config.version, "Activating worker");

        match self
            .generations
            .reconcile(&self.static_cache, &self.dynamic_cache)
            .await
        {
            Ok(report) => ActivationReport {
                deleted: report.deleted,
                retained: report.retained,
                failures: report
                    .failed
                    .into_iter()
                    .map(|(generation, source)| OfflineError::Reconciliation { generation, source })
                    .collect(),
            },
            Err(e) => {
                let e = OfflineError::CacheRead(e);
                warn!(error = %e, "Could not list generations, keeping all");
                ActivationReport {
                    failures: vec![e],
                    ..ActivationReport::default()
                }
            }
        }
    }

    /// Serve an intercepted request.
    ///
    /// `None` leaves the request to the host's default network handling.
    pub async fn on_fetch(&self, request: &Request) -> Option<Response> {
        let choice = self.router.route(request);
        debug!(url = %request.url, strategy = %choice, "Fetch");

        let outcome = match choice {
            StrategyChoice::Bypass => return None,
            StrategyChoice::CacheFirst => self.strategies.cache_first(request).await,
            StrategyChoice::NetworkFirst => self.strategies.network_first(request).await,
            StrategyChoice::StaleWhileRevalidate => {
                self.strategies.stale_while_revalidate(request).await
            }
        };

        match outcome {
            StrategyOutcome::Miss => Some(self.fallback(request).await),
            outcome => outcome.into_response(),
        }
    }

    /// Handle a control message. `reply` is used by `CACHE_VERSION` only.
    pub fn on_message(&self, message: &ControlMessage, reply: Option<ReplyPort>) -> ControlOutcome {
        match message {
            ControlMessage::SkipWaiting => {
                debug!("Skip waiting requested");
                ControlOutcome::SkipWaiting
            }
            ControlMessage::CacheVersion => match reply {
                Some(port) => {
                    if port.send(self.version_reply()).is_err() {
                        debug!("Version reply port closed");
                    }
                    ControlOutcome::VersionSent
                }
                None => {
                    debug!("CACHE_VERSION without a reply port");
                    ControlOutcome::Ignored
                }
            },
            ControlMessage::StatusChange { online } => {
                if self.connectivity.set(*online) != *online {
                    info!(online, "Page connectivity changed");
                }
                ControlOutcome::ConnectivityChanged { online: *online }
            }
            ControlMessage::Unknown => {
                debug!("Ignoring unknown control message");
                ControlOutcome::Ignored
            }
        }
    }

    /// Handle a sync event. Known tags refill the static generation.
    pub async fn on_sync(&self, tag: &str) -> Result<Option<PrecacheReport>, OfflineError> {
        if !SYNC_TAGS.contains(&tag) {
            debug!(tag, "Ignoring unknown sync tag");
            return Ok(None);
        }

        let statics = self
            .generations
            .open_generation(&self.static_cache)
            .await
            .map_err(OfflineError::CacheWrite)?;
        let report = self.precache.refill(&self.manifest, &statics).await;
        info!(
            tag,
            refilled = report.cached.len(),
            failed = report.failures.len(),
            "Sync complete"
        );
        Ok(Some(report))
    }

    /// Wait for outstanding background revalidations.
    pub async fn settle(&self) {
        self.strategies.settle().await;
    }

    /// Shell for navigations, else the synthetic 503.
    async fn fallback(&self, request: &Request) -> Response {
        if request.is_navigation() {
            let shell = Request::get(self.shell.clone());
            if let Some(response) = self
                .strategies
                .lookup(&shell, &[self.static_cache.as_str(), self.dynamic_cache.as_str()])
                .await
            {
                debug!(url = %request.url, "Serving page shell");
                return response;
            }
            warn!(url = %request.url, shell = %self.shell, "Page shell not cached");
        }
        self.strategies.offline_response(request)
    }
}
