//! Agent events and their lifetimes.

use std::future::Future;
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use drawparty_net::{Request, Response};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{error, trace};

use crate::clients::ClientHandle;
use crate::manager::{ActivateReport, InstallReport};
use crate::push::NotificationClick;

/// Events the host delivers to the agent.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Pre-populate the current generation.
    Install,
    /// Prune stale generations and claim clients.
    Activate,
    /// Intercepted outgoing request.
    Fetch(Request),
    /// Message posted by a foreground instance.
    Message(Value),
    /// Background sync opportunity.
    Sync { tag: String },
    /// Push delivery; `None` when the push had no data.
    Push { data: Option<Bytes> },
    /// User clicked a notification or one of its actions.
    NotificationClick(NotificationClick),
}

impl AgentEvent {
    /// Short event name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::Install => "install",
            AgentEvent::Activate => "activate",
            AgentEvent::Fetch(_) => "fetch",
            AgentEvent::Message(_) => "message",
            AgentEvent::Sync { .. } => "sync",
            AgentEvent::Push { .. } => "push",
            AgentEvent::NotificationClick(_) => "notificationclick",
        }
    }
}

/// Why a request was left to default network handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassThroughReason {
    /// Only GET requests are intercepted.
    NonGetMethod,
    /// URL matches the real-time relay denylist.
    Denylisted,
    /// No agent is active for the scope.
    NoActiveWorker,
}

/// Result of a fetch intercept.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The agent did not intercept; the host performs the request itself.
    PassThrough(PassThroughReason),
    /// The agent answered the request.
    Respond(Response),
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Respond(response) => Some(response),
            FetchOutcome::PassThrough(_) => None,
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            FetchOutcome::Respond(response) => Some(response),
            FetchOutcome::PassThrough(_) => None,
        }
    }

    pub fn is_pass_through(&self) -> bool {
        matches!(self, FetchOutcome::PassThrough(_))
    }
}

/// Result of a settled event.
#[derive(Debug)]
pub enum EventOutcome {
    /// Handled; nothing to hand back.
    Done,
    /// Install finished.
    Installed(InstallReport),
    /// Activation finished.
    Activated(ActivateReport),
    /// Outcome of a fetch intercept.
    Fetch(FetchOutcome),
    /// A notification click opened a window.
    OpenedWindow(ClientHandle),
}

/// Asynchronous work that must finish before an event is settled.
///
/// Handlers register background branches (such as an opportunistic cache
/// write) with [`WaitUntil::wait_until`]; the dispatcher calls
/// [`WaitUntil::settle`] before reporting the event as processed.
#[derive(Debug, Default)]
pub struct WaitUntil {
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl WaitUntil {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `work` and keep the event alive until it completes.
    pub fn wait_until<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(work);
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Number of registered branches not yet joined.
    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drop branches that already finished.
    pub fn reap(&self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|handle| !handle.is_finished());
    }

    /// Join every registered branch, including ones registered while joining.
    /// Returns how many were joined.
    pub async fn settle(&self) -> usize {
        let mut joined = 0;
        loop {
            let batch: Vec<_> = std::mem::take(
                &mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner),
            );
            if batch.is_empty() {
                break;
            }
            for handle in batch {
                if let Err(e) = handle.await {
                    error!(error = %e, "Extended event work panicked or was cancelled");
                }
                joined += 1;
            }
        }
        trace!(joined, "Event settled");
        joined
    }
}
