//! Command-line driver for the swkit offline cache controller.
//!
//! Loads a worker configuration, then installs it, routes requests through it,
//! posts control messages or inspects its cache generations.
//!
//! ## Usage
//!
//! ```bash
//! # Precache the manifest and activate (deletes stale generations)
//! swkit-probe --config moneyballs.json install
//!
//! # Serve a navigation with the network switched off
//! swkit-probe --config moneyballs.json --offline fetch https://moneyballs.example/vite/entries --navigate
//!
//! # Ask the worker for its cache version
//! swkit-probe --config moneyballs.json message '{"type":"CACHE_VERSION"}'
//!
//! # List cache generations
//! swkit-probe --config moneyballs.json generations
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use swkit_cache::{CacheStorage, DiskStorage, GenerationTag, MemoryStorage};
use swkit_common::{init_logging, LogConfig, LogFormat};
use swkit_net::{Destination, Fetcher, HttpFetcher, Request, StubFetcher};
use swkit_worker::{ControlMessage, OfflineWorker, StrategyChoice, WorkerConfig};
use tokio::sync::oneshot;
use tracing::{debug, Level};
use url::Url;

#[derive(Parser)]
#[command(name = "swkit-probe")]
#[command(about = "Drive the offline cache controller from the command line")]
struct Cli {
    /// Worker configuration file (JSON)
    #[arg(short, long, default_value = "worker.json")]
    config: PathBuf,

    /// Override the configured storage directory
    #[arg(long)]
    storage: Option<PathBuf>,

    /// Keep caches in memory only
    #[arg(long)]
    memory: bool,

    /// Simulate a network where every request fails
    #[arg(long)]
    offline: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: Level,

    /// Log format (pretty, compact, json)
    #[arg(long, default_value = "compact")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Precache the manifest, then activate
    Install,

    /// Route one request through the worker
    Fetch {
        /// Absolute URL, or a path resolved against the configured origin
        url: String,
        /// Treat as a top-level navigation
        #[arg(long)]
        navigate: bool,
        /// Request destination (script, style, image, font, manifest, document)
        #[arg(long, default_value = "")]
        destination: Destination,
        /// Wait for background revalidation before exiting
        #[arg(long)]
        settle: bool,
        /// Print the response body
        #[arg(long)]
        body: bool,
    },

    /// List cache generations
    Generations {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Post a control message (JSON object)
    Message {
        json: String,
    },

    /// Run a sync event
    Sync {
        #[arg(default_value = "background-sync")]
        tag: String,
    },
}

#[derive(Debug, Serialize)]
struct GenerationRow {
    name: String,
    status: &'static str,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(
        LogConfig::default()
            .with_level(cli.log_level)
            .with_format(cli.log_format),
    )
    .context("failed to initialize logging")?;

    let config = load_config(&cli.config, cli.storage.as_deref())?;
    let worker = build_worker(config, cli.memory, cli.offline)?;

    match cli.command {
        Commands::Install => install(&worker).await,
        Commands::Fetch {
            url,
            navigate,
            destination,
            settle,
            body,
        } => {
            let request = build_request(worker.config(), &url, navigate, destination)?;
            fetch(&worker, &request, settle, body).await
        }
        Commands::Generations { json } => generations(&worker, json).await,
        Commands::Message { json } => message(&worker, &json).await,
        Commands::Sync { tag } => sync(&worker, &tag).await,
    }
}

fn load_config(path: &Path, storage: Option<&Path>) -> Result<WorkerConfig> {
    let mut config = WorkerConfig::from_file(path)
        .with_context(|| format!("loading {}", path.display()))?;
    if let Some(dir) = storage {
        config.storage_dir = Some(dir.to_path_buf());
    }
    Ok(config)
}

fn build_worker(config: WorkerConfig, memory: bool, offline: bool) -> Result<OfflineWorker> {
    let storage: Arc<dyn CacheStorage> = if memory {
        Arc::new(MemoryStorage::new())
    } else {
        let dir = config.storage_dir();
        debug!(dir = %dir.display(), "Using disk storage");
        Arc::new(DiskStorage::new(dir))
    };

    let fetcher: Arc<dyn Fetcher> = if offline {
        Arc::new(StubFetcher::offline())
    } else {
        Arc::new(HttpFetcher::new(config.loader.clone()).context("building HTTP client")?)
    };

    Ok(OfflineWorker::new(config, storage, fetcher)?)
}

fn build_request(
    config: &WorkerConfig,
    url: &str,
    navigate: bool,
    destination: Destination,
) -> Result<Request> {
    let url: Url = config.resolve(url)?;
    let request = if navigate {
        Request::navigate(url)
    } else {
        Request::get(url).destination(destination)
    };
    Ok(request)
}

async fn install(worker: &OfflineWorker) -> Result<()> {
    let precache = worker.on_install().await?;
    println!(
        "Installed {} ({} cached, {} failed)",
        worker.static_cache_name(),
        precache.cached.len(),
        precache.failures.len()
    );
    for failure in &precache.failures {
        println!("  failed: {failure}");
    }

    let activation = worker.on_activate().await;
    println!("Activated v{}", worker.version());
    for name in &activation.deleted {
        println!("  deleted: {name}");
    }
    for failure in &activation.failures {
        println!("  cleanup failed: {failure}");
    }
    Ok(())
}

async fn fetch(worker: &OfflineWorker, request: &Request, settle: bool, body: bool) -> Result<()> {
    let choice = worker.router().route(request);
    if choice == StrategyChoice::Bypass {
        println!("{} {} bypassed (not intercepted)", request.method, request.url);
        return Ok(());
    }

    match worker.on_fetch(request).await {
        Some(response) => {
            println!("[{choice}] {response}");
            if body {
                println!("{}", String::from_utf8_lossy(&response.body));
            }
        }
        None => println!("[{choice}] no response"),
    }

    if settle {
        worker.settle().await;
    }
    Ok(())
}

async fn generations(worker: &OfflineWorker, json: bool) -> Result<()> {
    let rows: Vec<GenerationRow> = worker
        .generations()
        .list_generations()
        .await?
        .into_iter()
        .map(|name| {
            let status = generation_status(worker, &name);
            GenerationRow { name, status }
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    if rows.is_empty() {
        println!("No cache generations");
    }
    for row in &rows {
        println!("{:<40} {}", row.name, row.status);
    }
    Ok(())
}

fn generation_status(worker: &OfflineWorker, name: &str) -> &'static str {
    if name == worker.static_cache_name() || name == worker.dynamic_cache_name() {
        "current"
    } else if worker.generations().owns(name) {
        "stale"
    } else if GenerationTag::parse(name).is_some() {
        "other app"
    } else {
        "foreign"
    }
}

async fn message(worker: &OfflineWorker, json: &str) -> Result<()> {
    let message = ControlMessage::from_json(json);
    let (port, reply) = oneshot::channel();
    let outcome = worker.on_message(&message, Some(port));
    println!("{outcome:?}");

    if let Ok(reply) = reply.await {
        println!("{}", serde_json::to_string_pretty(&reply)?);
    }
    Ok(())
}

async fn sync(worker: &OfflineWorker, tag: &str) -> Result<()> {
    match worker.on_sync(tag).await? {
        Some(report) => println!(
            "Sync {tag}: {} refilled, {} already cached, {} failed",
            report.cached.len(),
            report.skipped.len(),
            report.failures.len()
        ),
        None => println!("Sync {tag}: ignored"),
    }
    Ok(())
}
