//! Registration: which agent is installing, waiting, and active for a scope.
//!
//! ```text
//! ServiceWorkerRegistration (scope)
//!     ├── installing (ServiceWorker)
//!     ├── waiting (ServiceWorker)
//!     └── active (ServiceWorker) ── serves fetches
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use drawparty_net::{Fetcher, HttpFetcher, Request};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};
use url::Url;

use crate::cache::CacheStorage;
use crate::clients::{ClientHandle, ClientType};
use crate::config::AgentConfig;
use crate::error::{SwError, SwResult};
use crate::events::{AgentEvent, EventOutcome, FetchOutcome, PassThroughReason, WaitUntil};
use crate::generation::Generation;
use crate::host::{AgentSignal, HostContext};
use crate::manager::{ActivateReport, CacheManager, InstallReport};
use crate::push::NotificationClick;

// ==================== Types ====================

/// Unique identifier for an agent instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Agent lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Created, not yet installing.
    #[default]
    Parsed,
    /// Install event running.
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activate event running.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Replaced or unregistered.
    Redundant,
}

// ==================== Service Worker ====================

/// An agent instance together with its lifecycle state.
#[derive(Debug)]
pub struct ServiceWorker {
    /// The caching agent.
    pub manager: Arc<CacheManager>,

    /// Current state.
    pub state: ServiceWorkerState,

    /// Time of last state change.
    pub state_changed_at: Instant,

    /// Agent asked to be activated without waiting.
    pub skip_waiting: bool,
}

impl ServiceWorker {
    fn new(manager: Arc<CacheManager>) -> Self {
        Self {
            manager,
            state: ServiceWorkerState::Parsed,
            state_changed_at: Instant::now(),
            skip_waiting: false,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.manager.id()
    }

    pub fn generation(&self) -> &Generation {
        self.manager.generation()
    }

    fn set_state(&mut self, state: ServiceWorkerState) {
        debug!(worker = %self.id(), from = ?self.state, to = ?state, "State change");
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }

    pub fn is_redundant(&self) -> bool {
        self.state == ServiceWorkerState::Redundant
    }
}

// ==================== Registration ====================

/// The host side of an agent scope: runs lifecycle transitions and routes
/// events to the right agent.
pub struct ServiceWorkerRegistration {
    /// Scope URL.
    pub scope: Url,

    host: HostContext,
    signals: mpsc::UnboundedReceiver<AgentSignal>,
    /// Cache fills started by fetches that have already been answered.
    fills: WaitUntil,
    installing: Option<ServiceWorker>,
    waiting: Option<ServiceWorker>,
    active: Option<ServiceWorker>,
}

impl ServiceWorkerRegistration {
    /// Create a registration with no agents.
    pub fn new(scope: Url, caches: Arc<dyn CacheStorage>, fetcher: Arc<dyn Fetcher>) -> Self {
        let (host, signals) = HostContext::new(caches, fetcher);
        Self {
            scope,
            host,
            signals,
            fills: WaitUntil::new(),
            installing: None,
            waiting: None,
            active: None,
        }
    }

    /// Create a registration that reaches the network over HTTP.
    pub fn with_http(config: &AgentConfig, caches: Arc<dyn CacheStorage>) -> SwResult<Self> {
        let fetcher = HttpFetcher::new(config.loader_config()?)?;
        Ok(Self::new(config.scope_url()?, caches, Arc::new(fetcher)))
    }

    pub fn host(&self) -> &HostContext {
        &self.host
    }

    pub fn installing(&self) -> Option<&ServiceWorker> {
        self.installing.as_ref()
    }

    pub fn waiting(&self) -> Option<&ServiceWorker> {
        self.waiting.as_ref()
    }

    pub fn active(&self) -> Option<&ServiceWorker> {
        self.active.as_ref()
    }

    /// The agent currently serving fetches.
    pub fn active_manager(&self) -> Option<Arc<CacheManager>> {
        self.active.as_ref().map(|w| Arc::clone(&w.manager))
    }

    /// Generation of the active agent.
    pub fn active_generation(&self) -> Option<&Generation> {
        self.active.as_ref().map(ServiceWorker::generation)
    }

    // ==================== Lifecycle ====================

    /// Install a new agent built from `config`, then activate it if nothing
    /// holds it back.
    pub async fn install(&mut self, config: AgentConfig) -> SwResult<InstallReport> {
        let scope = config.scope_url()?;
        if scope != self.scope {
            return Err(SwError::config(format!(
                "agent scope {scope} does not match registration scope {}",
                self.scope
            )));
        }

        let manager = Arc::new(CacheManager::new(config, self.host.clone())?);
        let mut worker = ServiceWorker::new(Arc::clone(&manager));
        worker.set_state(ServiceWorkerState::Installing);
        if let Some(mut previous) = self.installing.replace(worker) {
            previous.set_state(ServiceWorkerState::Redundant);
        }

        let report = match run(&manager, AgentEvent::Install).await? {
            EventOutcome::Installed(report) => report,
            other => return Err(SwError::state(format!("unexpected install outcome: {other:?}"))),
        };

        if let Some(mut worker) = self.installing.take() {
            worker.set_state(ServiceWorkerState::Installed);
            if let Some(mut previous) = self.waiting.replace(worker) {
                previous.set_state(ServiceWorkerState::Redundant);
            }
        }

        self.process_signals().await;
        self.try_activate().await?;
        Ok(report)
    }

    /// Activate the waiting agent if it asked to skip waiting, if nothing is
    /// active, or if the active agent controls no clients.
    pub async fn try_activate(&mut self) -> SwResult<Option<ActivateReport>> {
        let Some(waiting) = self.waiting.as_ref() else {
            return Ok(None);
        };

        let ready = waiting.skip_waiting
            || match self.active.as_ref() {
                None => true,
                Some(active) => self.host.clients.read().await.controlled_by(active.id()) == 0,
            };
        if !ready {
            debug!(worker = %waiting.id(), "Waiting for clients of the active agent to close");
            return Ok(None);
        }

        self.activate().await.map(Some)
    }

    async fn activate(&mut self) -> SwResult<ActivateReport> {
        let mut worker = self
            .waiting
            .take()
            .ok_or_else(|| SwError::state("no waiting agent"))?;
        worker.set_state(ServiceWorkerState::Activating);

        if let Some(mut old) = self.active.take() {
            info!(worker = %old.id(), cache = %old.generation(), "Retiring agent");
            old.set_state(ServiceWorkerState::Redundant);
        }

        let manager = Arc::clone(&worker.manager);
        self.active = Some(worker);

        let report = match run(&manager, AgentEvent::Activate).await? {
            EventOutcome::Activated(report) => report,
            other => return Err(SwError::state(format!("unexpected activate outcome: {other:?}"))),
        };

        if let Some(active) = self.active.as_mut() {
            active.set_state(ServiceWorkerState::Activated);
            info!(worker = %active.id(), cache = %active.generation(), "Agent active");
        }

        self.process_signals().await;
        Ok(report)
    }

    /// Apply every signal agents have sent since the last call.
    async fn process_signals(&mut self) {
        while let Ok(signal) = self.signals.try_recv() {
            match signal {
                AgentSignal::SkipWaiting(id) => {
                    for worker in [&mut self.installing, &mut self.waiting]
                        .into_iter()
                        .flatten()
                        .filter(|w| w.id() == id)
                    {
                        worker.skip_waiting = true;
                    }
                }
                AgentSignal::Claim(id) => {
                    if self.active.as_ref().is_some_and(|w| w.id() == id) {
                        let claimed = self.host.clients.write().await.claim(id);
                        info!(worker = %id, claimed, "Claimed clients");
                    }
                }
            }
        }
    }

    /// Mark every agent redundant and forget them.
    pub fn unregister(&mut self) {
        for mut worker in [self.installing.take(), self.waiting.take(), self.active.take()]
            .into_iter()
            .flatten()
        {
            worker.set_state(ServiceWorkerState::Redundant);
        }
    }

    // ==================== Clients ====================

    /// Open a foreground instance; it is controlled by the active agent.
    pub async fn connect_client(&self, url: Url) -> ClientHandle {
        let controller = self.active.as_ref().map(ServiceWorker::id);
        self.host
            .clients
            .write()
            .await
            .connect(url, ClientType::Window, controller)
    }

    /// Close a foreground instance; a waiting agent may activate as a result.
    pub async fn disconnect_client(&mut self, id: &str) -> SwResult<bool> {
        let removed = self.host.clients.write().await.remove(id).is_some();
        if removed {
            self.try_activate().await?;
        }
        Ok(removed)
    }

    // ==================== Events ====================

    /// Route an intercepted request to the active agent.
    ///
    /// Returns as soon as the agent has a response; any cache fill it started
    /// keeps running until [`settle`](Self::settle).
    pub async fn fetch(&self, request: Request) -> SwResult<FetchOutcome> {
        let Some(manager) = self.active_manager() else {
            return Ok(FetchOutcome::PassThrough(PassThroughReason::NoActiveWorker));
        };
        self.fills.reap();
        match manager.dispatch(AgentEvent::Fetch(request), &self.fills).await? {
            EventOutcome::Fetch(outcome) => Ok(outcome),
            other => Err(SwError::state(format!("unexpected fetch outcome: {other:?}"))),
        }
    }

    /// Deliver a foreground message to the waiting agent (or the active one).
    pub async fn post_message(&mut self, message: Value) -> SwResult<()> {
        let manager = self
            .waiting
            .as_ref()
            .or(self.active.as_ref())
            .map(|w| Arc::clone(&w.manager))
            .ok_or_else(|| SwError::state("no agent to receive the message"))?;
        run(&manager, AgentEvent::Message(message)).await?;
        self.process_signals().await;
        self.try_activate().await?;
        Ok(())
    }

    /// Deliver a background sync to the active agent.
    pub async fn sync(&self, tag: impl Into<String>) -> SwResult<()> {
        run(&*self.require_active()?, AgentEvent::Sync { tag: tag.into() })
            .await
            .map(|_| ())
    }

    /// Deliver a push to the active agent.
    pub async fn push(&self, data: Option<Bytes>) -> SwResult<()> {
        run(&*self.require_active()?, AgentEvent::Push { data })
            .await
            .map(|_| ())
    }

    /// Deliver a notification click; returns the window it opened, if any.
    pub async fn notification_click(
        &self,
        click: NotificationClick,
    ) -> SwResult<Option<ClientHandle>> {
        match run(&*self.require_active()?, AgentEvent::NotificationClick(click)).await? {
            EventOutcome::OpenedWindow(window) => Ok(Some(window)),
            _ => Ok(None),
        }
    }

    /// Wait for every cache fill started by earlier fetches. Returns how many
    /// were joined.
    pub async fn settle(&self) -> usize {
        self.fills.settle().await
    }

    fn require_active(&self) -> SwResult<Arc<CacheManager>> {
        self.active_manager()
            .ok_or_else(|| SwError::state("no active agent"))
    }
}

/// Dispatch `event` and wait for all work it registered.
async fn run(manager: &CacheManager, event: AgentEvent) -> SwResult<EventOutcome> {
    let lifetime = WaitUntil::new();
    let outcome = manager.dispatch(event, &lifetime).await;
    lifetime.settle().await;
    outcome
}

impl fmt::Debug for ServiceWorkerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceWorkerRegistration")
            .field("scope", &self.scope.as_str())
            .field("installing", &self.installing.as_ref().map(ServiceWorker::id))
            .field("waiting", &self.waiting.as_ref().map(ServiceWorker::id))
            .field("active", &self.active.as_ref().map(ServiceWorker::id))
            .finish()
    }
}
