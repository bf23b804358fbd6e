//! Worker lifecycle: registration, installing, waiting and active workers,
//! and the clients they control.
//!
//! ```text
//! Parsed ──install──► Installing ──ok──► Installed (waiting)
//!                         │                  │
//!                         └──err──► Redundant│ activate_waiting()
//!                                            ▼
//!                 Redundant ◄── old active ◄─ Activating ──► Activated
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use swkit_net::{Request, Response};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::control::{ControlMessage, ControlOutcome, ReplyPort};
use crate::error::OfflineError;
use crate::precache::PrecacheReport;
use crate::worker::{ActivationReport, OfflineWorker};

/// Unique identifier for a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorkerState {
    /// Created, not yet installing.
    #[default]
    Parsed,
    /// Running `on_install`.
    Installing,
    /// Installed and waiting for activation.
    Installed,
    /// Running `on_activate`.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Replaced, or install failed.
    Redundant,
}

/// A worker version together with its lifecycle state.
#[derive(Clone)]
pub struct ServiceWorker {
    pub id: WorkerId,
    pub state: WorkerState,
    pub state_changed_at: Instant,
    worker: Arc<OfflineWorker>,
}

impl ServiceWorker {
    pub fn new(worker: Arc<OfflineWorker>) -> Self {
        Self {
            id: WorkerId::new(),
            state: WorkerState::Parsed,
            state_changed_at: Instant::now(),
            worker,
        }
    }

    pub fn set_state(&mut self, state: WorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    pub fn worker(&self) -> &Arc<OfflineWorker> {
        &self.worker
    }

    pub fn version(&self) -> u32 {
        self.worker.version()
    }

    pub fn is_active(&self) -> bool {
        self.state == WorkerState::Activated
    }

    pub fn is_redundant(&self) -> bool {
        self.state == WorkerState::Redundant
    }
}

impl std::fmt::Debug for ServiceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("id", &self.id)
            .field("version", &self.version())
            .field("state", &self.state)
            .finish()
    }
}

/// Events emitted by a [`Registration`].
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// A new worker started installing.
    UpdateFound { worker_id: WorkerId, version: u32 },
    StateChange { worker_id: WorkerId, state: WorkerState },
    /// A client is now controlled by `worker_id`.
    ControllerChange { client_id: String, worker_id: WorkerId },
    /// A background revalidation refreshed `url`.
    CacheUpdated { url: Url },
}

/// A page controlled (or not yet controlled) by a worker.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: String,
    pub url: Url,
    pub controller: Option<WorkerId>,
}

/// Clients known to a registration.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Clients whose controller is `worker`.
    pub fn controlled_by(&self, worker: WorkerId) -> usize {
        self.clients
            .values()
            .filter(|c| c.controller == Some(worker))
            .count()
    }

    /// Make `worker` the controller of every client. Returns the ids that changed.
    pub fn claim(&mut self, worker: WorkerId) -> Vec<String> {
        let mut changed: Vec<String> = self
            .clients
            .values_mut()
            .filter(|c| c.controller != Some(worker))
            .map(|c| {
                c.controller = Some(worker);
                c.id.clone()
            })
            .collect();
        changed.sort();
        changed
    }
}

#[derive(Default)]
struct Slots {
    installing: Option<ServiceWorker>,
    waiting: Option<ServiceWorker>,
    active: Option<ServiceWorker>,
    clients: Clients,
}

/// Host side of the worker lifecycle for one scope.
///
/// At most one worker is installing, one waiting and one active. Fetches and
/// messages go to the active worker.
pub struct Registration {
    scope: Url,
    slots: RwLock<Slots>,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl Registration {
    /// Create a registration for `scope` and the receiver of its events.
    pub fn new(scope: Url) -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                scope,
                slots: RwLock::new(Slots::default()),
                events,
            },
            rx,
        )
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub async fn installing(&self) -> Option<ServiceWorker> {
        self.slots.read().await.installing.clone()
    }

    pub async fn waiting(&self) -> Option<ServiceWorker> {
        self.slots.read().await.waiting.clone()
    }

    pub async fn active(&self) -> Option<ServiceWorker> {
        self.slots.read().await.active.clone()
    }

    /// Controller of the client `id`, if any.
    pub async fn controller_of(&self, id: &str) -> Option<WorkerId> {
        self.slots.read().await.clients.get(id).and_then(|c| c.controller)
    }

    pub async fn client_count(&self) -> usize {
        self.slots.read().await.clients.len()
    }

    /// Install `worker`, then activate it if nothing else is active or it asks
    /// to skip waiting.
    ///
    /// On an install error the worker becomes redundant and the error is returned.
    pub async fn install(&self, worker: OfflineWorker) -> Result<PrecacheReport, OfflineError> {
        let worker = Arc::new(worker);
        worker.attach_events(self.events.clone());

        let mut handle = ServiceWorker::new(Arc::clone(&worker));
        {
            let mut slots = self.slots.write().await;
            if let Some(mut previous) = slots.installing.take() {
                previous.set_state(WorkerState::Redundant);
                self.emit_state(&previous);
            }
            handle.set_state(WorkerState::Installing);
            self.emit(WorkerEvent::UpdateFound {
                worker_id: handle.id,
                version: worker.version(),
            });
            self.emit_state(&handle);
            slots.installing = Some(handle.clone());
        }

        let result = worker.on_install().await;

        let activate_now = {
            let mut slots = self.slots.write().await;
            if slots.installing.as_ref().map(|w| w.id) != Some(handle.id) {
                debug!(worker = handle.id.raw(), "Install superseded");
                return result;
            }
            let Some(mut installed) = slots.installing.take() else {
                return result;
            };

            if let Err(e) = &result {
                warn!(version = worker.version(), error = %e, "Install failed");
                installed.set_state(WorkerState::Redundant);
                self.emit_state(&installed);
                return result;
            }

            installed.set_state(WorkerState::Installed);
            self.emit_state(&installed);
            if let Some(mut replaced) = slots.waiting.replace(installed) {
                replaced.set_state(WorkerState::Redundant);
                self.emit_state(&replaced);
            }
            worker.config().skip_waiting_on_install || slots.active.is_none()
        };

        if activate_now {
            self.activate_waiting().await;
        } else {
            info!(version = worker.version(), "Installed, waiting for clients to close");
        }
        result
    }

    /// Activate the waiting worker: reconcile generations, retire the old
    /// active worker, then claim every client.
    ///
    /// `None` if no worker is waiting or one is already activating.
    pub async fn activate_waiting(&self) -> Option<ActivationReport> {
        let (id, worker) = {
            let mut slots = self.slots.write().await;
            let waiting = slots.waiting.as_mut()?;
            if waiting.state == WorkerState::Activating {
                return None;
            }
            waiting.set_state(WorkerState::Activating);
            self.emit_state(waiting);
            (waiting.id, Arc::clone(waiting.worker()))
        };

        let report = worker.on_activate().await;
        for failure in &report.failures {
            warn!(error = %failure, "Activation cleanup incomplete");
        }

        let mut slots = self.slots.write().await;
        if slots.waiting.as_ref().map(|w| w.id) != Some(id) {
            debug!(worker = id.raw(), "Activation superseded by a newer install");
            return None;
        }
        let mut activated = slots.waiting.take()?;
        if let Some(mut old) = slots.active.take() {
            old.set_state(WorkerState::Redundant);
            self.emit_state(&old);
        }
        activated.set_state(WorkerState::Activated);
        self.emit_state(&activated);

        for client_id in slots.clients.claim(activated.id) {
            self.emit(WorkerEvent::ControllerChange {
                client_id,
                worker_id: activated.id,
            });
        }

        info!(
            version = activated.version(),
            deleted = report.deleted.len(),
            "Worker active"
        );
        slots.active = Some(activated);
        Some(report)
    }

    /// Register a page at `url`; it is controlled by the active worker, if any.
    pub async fn connect(&self, url: Url) -> String {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let id = format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed));

        let mut slots = self.slots.write().await;
        let controller = slots.active.as_ref().map(|w| w.id);
        slots.clients.add(Client {
            id: id.clone(),
            url,
            controller,
        });
        id
    }

    /// Remove a page. When the last page of the active worker goes away, a
    /// waiting worker is promoted.
    pub async fn disconnect(&self, id: &str) -> Option<ActivationReport> {
        let promote = {
            let mut slots = self.slots.write().await;
            slots.clients.remove(id)?;
            let active_in_use = slots
                .active
                .as_ref()
                .is_some_and(|w| slots.clients.controlled_by(w.id) > 0);
            slots.waiting.is_some() && !active_in_use
        };

        if promote {
            self.activate_waiting().await
        } else {
            None
        }
    }

    /// Route an intercepted request through the active worker.
    ///
    /// `None` means default network handling: no active worker, or the
    /// request is not intercepted.
    pub async fn fetch(&self, request: &Request) -> Option<Response> {
        let active = self.slots.read().await.active.clone()?;
        active.worker().on_fetch(request).await
    }

    /// Deliver a control message.
    ///
    /// `SKIP_WAITING` goes to the waiting worker and promotes it; everything
    /// else goes to the active worker, or the waiting one if none is active.
    pub async fn post_message(&self, message: &ControlMessage, reply: Option<ReplyPort>) -> ControlOutcome {
        let recipient = {
            let slots = self.slots.read().await;
            match message {
                ControlMessage::SkipWaiting => slots.waiting.clone(),
                _ => slots.active.clone().or_else(|| slots.waiting.clone()),
            }
        };
        let Some(recipient) = recipient else {
            debug!(?message, "No worker to receive message");
            return ControlOutcome::Ignored;
        };

        let outcome = recipient.worker().on_message(message, reply);
        if outcome == ControlOutcome::SkipWaiting {
            self.activate_waiting().await;
        }
        outcome
    }

    fn emit(&self, event: WorkerEvent) {
        let _ = self.events.send(event);
    }

    fn emit_state(&self, worker: &ServiceWorker) {
        self.emit(WorkerEvent::StateChange {
            worker_id: worker.id,
            state: worker.state,
        });
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("scope", &self.scope.as_str())
            .finish()
    }
}
