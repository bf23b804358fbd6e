//! # swkit Worker
//!
//! The offline cache controller: the logic a service worker runs to keep a web
//! app usable without a network.
//!
//! ## Features
//!
//! - **Install**: precache the manifest into the current static generation
//! - **Activate**: delete stale generations of this app, then claim clients
//! - **Fetch**: route each request to cache-first, network-first or
//!   stale-while-revalidate, with the page shell as the offline navigation fallback
//! - **Messages**: `SKIP_WAITING`, `CACHE_VERSION`, `STATUS_CHANGE`
//! - **Sync**: refill missing precache entries on `background-sync` / `periodic-sync`
//!
//! ## Architecture
//!
//! ```text
//! Registration
//!     ├── installing / waiting / active (ServiceWorker)
//!     │       └── OfflineWorker
//!     │               ├── Router ──► StrategyChoice
//!     │               ├── Strategies (cache-first, network-first, SWR)
//!     │               ├── PrecacheLoader
//!     │               └── GenerationManager ──► CacheStorage
//!     └── Clients
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use swkit_cache::MemoryStorage;
//! use swkit_net::{HttpFetcher, LoaderConfig, Request};
//! use swkit_worker::{OfflineWorker, Registration, WorkerConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = WorkerConfig::from_file("worker.json")?;
//! let fetcher = Arc::new(HttpFetcher::new(LoaderConfig::default())?);
//! let worker = OfflineWorker::new(config.clone(), Arc::new(MemoryStorage::new()), fetcher)?;
//!
//! let (registration, _events) = Registration::new(config.origin_url()?);
//! registration.install(worker).await?;
//!
//! let request = Request::parse("https://moneyballs.example/vite/manifest.json")?;
//! if let Some(response) = registration.fetch(&request).await {
//!     println!("{response}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod control;
pub mod error;
pub mod lifecycle;
pub mod precache;
pub mod router;
pub mod strategy;
pub mod worker;

pub use config::{ConfigError, PrecacheConfig, WorkerConfig};
pub use control::{ConnectivityHint, ControlMessage, ControlOutcome, ReplyPort, VersionReply};
pub use error::{AssetFailure, OfflineError, PrecacheAssetError};
pub use lifecycle::{Client, Clients, Registration, ServiceWorker, WorkerEvent, WorkerId, WorkerState};
pub use precache::{PrecacheLoader, PrecacheReport};
pub use router::{Router, StrategyChoice};
pub use strategy::{OfflinePage, Strategies, StrategyOutcome};
pub use worker::{ActivationReport, OfflineWorker, SYNC_TAGS};
