//! Collaborators the host runtime lends to every agent it starts.

use std::sync::Arc;

use drawparty_net::Fetcher;
use tokio::sync::{mpsc, RwLock};
use tracing::warn;

use crate::cache::CacheStorage;
use crate::clients::Clients;
use crate::push::NotificationCenter;
use crate::registration::WorkerId;

/// Requests an agent makes of its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentSignal {
    /// Promote this agent without waiting for the old one to lose its clients.
    SkipWaiting(WorkerId),
    /// Take control of every open client.
    Claim(WorkerId),
}

/// Shared host resources.
#[derive(Clone)]
pub struct HostContext {
    /// Cache storage shared by every agent of the origin.
    pub caches: Arc<dyn CacheStorage>,

    /// Network access.
    pub fetcher: Arc<dyn Fetcher>,

    /// Open foreground instances.
    pub clients: Arc<RwLock<Clients>>,

    /// Notifications shown on behalf of agents.
    pub notifications: Arc<RwLock<NotificationCenter>>,

    signals: mpsc::UnboundedSender<AgentSignal>,
}

impl HostContext {
    /// Create a context and the receiver the host drains signals from.
    pub fn new(
        caches: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> (Self, mpsc::UnboundedReceiver<AgentSignal>) {
        let (signals, rx) = mpsc::unbounded_channel();
        (
            Self {
                caches,
                fetcher,
                clients: Arc::new(RwLock::new(Clients::new())),
                notifications: Arc::new(RwLock::new(NotificationCenter::new())),
                signals,
            },
            rx,
        )
    }

    /// Send a signal to the host.
    pub fn signal(&self, signal: AgentSignal) {
        if self.signals.send(signal).is_err() {
            warn!(?signal, "Host is no longer listening for agent signals");
        }
    }
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext").finish_non_exhaustive()
    }
}
