//! Registration lifecycle: install, waiting, activation, clients and messages.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use swkit_cache::{CacheEntry, CacheStorage, MemoryStorage, StorageError};
use swkit_net::{Request, StubFetcher};
use swkit_worker::{
    ControlMessage, ControlOutcome, OfflineError, OfflineWorker, Registration, WorkerConfig,
    WorkerEvent, WorkerState,
};
use tokio::sync::{mpsc, oneshot};
use url::Url;

const ORIGIN: &str = "https://moneyballs.example";

fn scope() -> Url {
    Url::parse(&format!("{ORIGIN}/vite/")).unwrap()
}

fn worker(version: u32, skip_waiting: bool, storage: Arc<dyn CacheStorage>) -> OfflineWorker {
    let stub = Arc::new(StubFetcher::new());
    stub.respond(&format!("{ORIGIN}/vite/index.html"), 200, "<html>");
    let config = WorkerConfig {
        version,
        origin: ORIGIN.into(),
        base_path: "/vite/".into(),
        manifest: vec!["/vite/index.html".into()],
        skip_waiting_on_install: skip_waiting,
        ..WorkerConfig::default()
    };
    OfflineWorker::new(config, storage, stub).unwrap()
}

fn drain(rx: &mut mpsc::UnboundedReceiver<WorkerEvent>) -> Vec<WorkerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn states(events: &[WorkerEvent]) -> Vec<WorkerState> {
    events
        .iter()
        .filter_map(|e| match e {
            WorkerEvent::StateChange { state, .. } => Some(*state),
            _ => None,
        })
        .collect()
}

/// Storage that cannot create caches.
struct ReadOnlyStorage;

#[async_trait]
impl CacheStorage for ReadOnlyStorage {
    async fn open(&self, name: &str) -> Result<(), StorageError> {
        Err(StorageError::InvalidName(name.to_string()))
    }
    async fn has(&self, _name: &str) -> Result<bool, StorageError> {
        Ok(false)
    }
    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(Vec::new())
    }
    async fn delete(&self, _name: &str) -> Result<bool, StorageError> {
        Ok(false)
    }
    async fn match_entry(&self, _name: &str, _key: &str) -> Result<Option<CacheEntry>, StorageError> {
        Ok(None)
    }
    async fn put_entry(&self, name: &str, _entry: CacheEntry) -> Result<(), StorageError> {
        Err(StorageError::NotFound(name.to_string()))
    }
    async fn delete_entry(&self, _name: &str, _key: &str) -> Result<bool, StorageError> {
        Ok(false)
    }
    async fn entry_keys(&self, name: &str) -> Result<Vec<String>, StorageError> {
        Err(StorageError::NotFound(name.to_string()))
    }
}

#[tokio::test]
async fn first_install_activates_immediately() {
    let (registration, mut rx) = Registration::new(scope());
    let storage: Arc<dyn CacheStorage> = Arc::new(MemoryStorage::new());

    let report = registration.install(worker(1, false, storage)).await.unwrap();
    assert!(report.is_complete());

    let active = registration.active().await.unwrap();
    assert!(active.is_active());
    assert_eq!(active.version(), 1);
    assert!(registration.waiting().await.is_none());
    assert!(registration.installing().await.is_none());

    let events = drain(&mut rx);
    assert!(matches!(events[0], WorkerEvent::UpdateFound { version: 1, .. }));
    assert_eq!(
        states(&events),
        vec![
            WorkerState::Installing,
            WorkerState::Installed,
            WorkerState::Activating,
            WorkerState::Activated,
        ]
    );
}

#[tokio::test]
async fn update_waits_for_clients_to_close() {
    let (registration, mut rx) = Registration::new(scope());
    let storage: Arc<dyn CacheStorage> = Arc::new(MemoryStorage::new());

    registration.install(worker(1, false, Arc::clone(&storage))).await.unwrap();
    let v1 = registration.active().await.unwrap().id;
    let client = registration.connect(scope()).await;
    assert_eq!(registration.controller_of(&client).await, Some(v1));

    registration.install(worker(2, false, Arc::clone(&storage))).await.unwrap();
    assert_eq!(registration.active().await.unwrap().version(), 1);
    assert_eq!(registration.waiting().await.unwrap().state, WorkerState::Installed);
    drain(&mut rx);

    let report = registration.disconnect(&client).await.unwrap();
    assert_eq!(report.deleted, vec!["moneyballs-dynamic-v1", "moneyballs-static-v1"]);
    assert_eq!(registration.active().await.unwrap().version(), 2);
    assert!(states(&drain(&mut rx)).contains(&WorkerState::Redundant));
}

#[tokio::test]
async fn skip_waiting_message_promotes_the_waiting_worker() {
    let (registration, _rx) = Registration::new(scope());
    let storage: Arc<dyn CacheStorage> = Arc::new(MemoryStorage::new());

    registration.install(worker(1, false, Arc::clone(&storage))).await.unwrap();
    let _client = registration.connect(scope()).await;
    registration.install(worker(2, false, Arc::clone(&storage))).await.unwrap();

    let outcome = registration
        .post_message(&ControlMessage::parse(&json!({"type": "SKIP_WAITING"})), None)
        .await;

    assert_eq!(outcome, ControlOutcome::SkipWaiting);
    assert_eq!(registration.active().await.unwrap().version(), 2);
    assert!(registration.waiting().await.is_none());
}

#[tokio::test]
async fn skip_waiting_on_install_claims_existing_clients() {
    let (registration, mut rx) = Registration::new(scope());
    let storage: Arc<dyn CacheStorage> = Arc::new(MemoryStorage::new());

    registration.install(worker(1, true, Arc::clone(&storage))).await.unwrap();
    let client = registration.connect(scope()).await;
    drain(&mut rx);

    registration.install(worker(2, true, Arc::clone(&storage))).await.unwrap();
    let v2 = registration.active().await.unwrap().id;

    assert_eq!(registration.controller_of(&client).await, Some(v2));
    let events = drain(&mut rx);
    assert!(events.contains(&WorkerEvent::ControllerChange {
        client_id: client.clone(),
        worker_id: v2,
    }));
}

#[tokio::test]
async fn cache_version_reaches_the_active_worker() {
    let (registration, _rx) = Registration::new(scope());
    registration
        .install(worker(5, true, Arc::new(MemoryStorage::new())))
        .await
        .unwrap();

    let (tx, reply) = oneshot::channel();
    let outcome = registration
        .post_message(&ControlMessage::from_json(r#"{"type":"CACHE_VERSION"}"#), Some(tx))
        .await;

    assert_eq!(outcome, ControlOutcome::VersionSent);
    let reply = reply.await.unwrap();
    assert_eq!(reply.version, 5);
    assert_eq!(reply.static_cache, "moneyballs-static-v5");
}

#[tokio::test]
async fn messages_without_a_worker_are_ignored() {
    let (registration, _rx) = Registration::new(scope());
    let outcome = registration.post_message(&ControlMessage::SkipWaiting, None).await;
    assert_eq!(outcome, ControlOutcome::Ignored);
}

#[tokio::test]
async fn fetch_without_active_worker_is_not_intercepted() {
    let (registration, _rx) = Registration::new(scope());
    let request = Request::parse(&format!("{ORIGIN}/vite/index.html")).unwrap();
    assert!(registration.fetch(&request).await.is_none());
}

#[tokio::test]
async fn fetch_goes_through_the_active_worker() {
    let (registration, _rx) = Registration::new(scope());
    registration
        .install(worker(1, true, Arc::new(MemoryStorage::new())))
        .await
        .unwrap();

    let request = Request::parse(&format!("{ORIGIN}/vite/index.html")).unwrap();
    let response = registration.fetch(&request).await.unwrap();
    assert!(response.from_cache);
    assert_eq!(response.text().unwrap(), "<html>");
}

#[tokio::test]
async fn failed_install_becomes_redundant() {
    let (registration, mut rx) = Registration::new(scope());

    let result = registration.install(worker(1, true, Arc::new(ReadOnlyStorage))).await;

    assert!(matches!(result, Err(OfflineError::CacheWrite(_))));
    assert!(registration.active().await.is_none());
    assert!(registration.waiting().await.is_none());
    assert_eq!(
        states(&drain(&mut rx)),
        vec![WorkerState::Installing, WorkerState::Redundant]
    );
}

#[tokio::test]
async fn revalidation_events_reach_the_registration() {
    let stub = Arc::new(StubFetcher::new());
    let url = format!("{ORIGIN}/api/balance.json");
    stub.respond(&url, 200, "1");
    let config = WorkerConfig {
        origin: ORIGIN.into(),
        base_path: "/vite/".into(),
        ..WorkerConfig::default()
    };
    let worker = OfflineWorker::new(config, Arc::new(MemoryStorage::new()), stub.clone()).unwrap();

    let (registration, mut rx) = Registration::new(scope());
    registration.install(worker).await.unwrap();

    let request = Request::parse(&url).unwrap();
    registration.fetch(&request).await.unwrap();
    stub.respond(&url, 200, "2");
    registration.fetch(&request).await.unwrap();
    registration.active().await.unwrap().worker().settle().await;

    let updated: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            WorkerEvent::CacheUpdated { url } => Some(url),
            _ => None,
        })
        .collect();
    assert_eq!(updated, vec![request.url]);
}
