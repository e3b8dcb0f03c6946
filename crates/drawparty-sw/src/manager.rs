//! The caching policy: one cache generation between the app and the network.

use std::sync::Arc;

use drawparty_net::{Request, Response, ResponseType};
use futures::future::join_all;
use http::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{CacheEntry, RequestKey};
use crate::clients::{ClientHandle, ClientMatchOptions};
use crate::config::AgentConfig;
use crate::error::{SwError, SwResult};
use crate::events::{AgentEvent, EventOutcome, FetchOutcome, PassThroughReason, WaitUntil};
use crate::generation::Generation;
use crate::host::{AgentSignal, HostContext};
use crate::messages::{ClientMessage, ControlMessage};
use crate::push::{NotificationClick, NotificationOptions, PushPayload, ACTION_JOIN};
use crate::registration::WorkerId;

/// Outcome of pre-caching the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    /// Cache the manifest was written to.
    pub cache: String,
    /// Whether the cache could be opened at all.
    pub opened: bool,
    /// Manifest URLs now cached.
    pub cached: Vec<Url>,
    /// Manifest URLs that could not be cached, with the reason.
    pub failed: Vec<(Url, String)>,
}

/// Outcome of pruning stale generations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
    /// Stale caches removed.
    pub deleted: Vec<String>,
    /// Stale caches that could not be removed.
    pub failed: Vec<String>,
}

/// Owns one cache generation and mediates every intercepted request between
/// that cache and the network.
#[derive(Debug)]
pub struct CacheManager {
    id: WorkerId,
    config: AgentConfig,
    scope: Url,
    generation: Generation,
    manifest: Vec<Url>,
    fallback: Url,
    host: HostContext,
}

impl CacheManager {
    /// Create an agent for the generation named by `config`.
    pub fn new(config: AgentConfig, host: HostContext) -> SwResult<Self> {
        config.validate()?;
        let scope = config.scope_url()?;
        let manifest = config.manifest_urls()?;
        let fallback = config.fallback_url()?;
        let generation = config.generation();

        Ok(Self {
            id: WorkerId::new(),
            config,
            scope,
            generation,
            manifest,
            fallback,
            host,
        })
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn generation(&self) -> &Generation {
        &self.generation
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    /// Handle one event.
    ///
    /// Background work the handler starts is registered on `lifetime` and is
    /// still running when the outcome is returned; the caller settles it.
    pub async fn dispatch(
        &self,
        event: AgentEvent,
        lifetime: &WaitUntil,
    ) -> SwResult<EventOutcome> {
        debug!(worker = %self.id, event = event.kind(), "Dispatching event");

        match event {
            AgentEvent::Install => Ok(EventOutcome::Installed(self.install_manifest().await)),
            AgentEvent::Activate => Ok(EventOutcome::Activated(self.activate_and_prune().await)),
            AgentEvent::Fetch(request) => self
                .handle_fetch(&request, lifetime)
                .await
                .map(EventOutcome::Fetch),
            AgentEvent::Message(message) => {
                self.handle_control_message(&message);
                Ok(EventOutcome::Done)
            }
            AgentEvent::Sync { tag } => {
                self.handle_reconnect_signal(&tag).await;
                Ok(EventOutcome::Done)
            }
            AgentEvent::Push { data } => {
                self.handle_push(data.as_deref()).await;
                Ok(EventOutcome::Done)
            }
            AgentEvent::NotificationClick(click) => {
                Ok(match self.handle_notification_click(&click).await? {
                    Some(window) => EventOutcome::OpenedWindow(window),
                    None => EventOutcome::Done,
                })
            }
        }
    }

    // ==================== Install ====================

    /// Pre-cache the manifest into the current generation.
    ///
    /// Never fails: unreachable entries and an unopenable store are logged and
    /// reported. Asks the host to skip waiting when configured to.
    pub async fn install_manifest(&self) -> InstallReport {
        let name = self.generation.name();
        info!(worker = %self.id, cache = %name, "Installing");

        let mut report = InstallReport {
            cache: name.to_string(),
            ..Default::default()
        };

        match self.host.caches.open(name).await {
            Ok(()) => {
                report.opened = true;
                let results = join_all(self.manifest.iter().map(|url| self.precache(url))).await;
                for (url, result) in self.manifest.iter().zip(results) {
                    match result {
                        Ok(()) => report.cached.push(url.clone()),
                        Err(e) => report.failed.push((url.clone(), e.to_string())),
                    }
                }
                if report.failed.is_empty() {
                    info!(cache = %name, cached = report.cached.len(), "Manifest cached");
                } else {
                    warn!(
                        cache = %name,
                        cached = report.cached.len(),
                        failed = report.failed.len(),
                        "Some manifest entries failed to cache"
                    );
                }
            }
            Err(e) => error!(cache = %name, error = %e, "Cache open failed"),
        }

        if self.config.skip_waiting_on_install {
            self.host.signal(AgentSignal::SkipWaiting(self.id));
        }
        report
    }

    async fn precache(&self, url: &Url) -> SwResult<()> {
        let request = Request::get(url.clone());
        let response = self.host.fetcher.fetch(&request).await?;
        if !response.ok() {
            return Err(SwError::cache(format!("{url} returned {}", response.status)));
        }
        let entry = CacheEntry::from_response(RequestKey::for_request(&request), &response);
        self.host.caches.put(self.generation.name(), entry).await
    }

    // ==================== Activate ====================

    /// Delete every owned generation except the current one, then ask the
    /// host to hand this agent every open client.
    pub async fn activate_and_prune(&self) -> ActivateReport {
        info!(worker = %self.id, cache = %self.generation, "Activating");
        let mut report = ActivateReport::default();

        match self.host.caches.keys().await {
            Ok(names) => {
                for name in names.into_iter().filter(|n| self.generation.is_stale(n)) {
                    info!(cache = %name, "Deleting old cache");
                    match self.host.caches.delete(&name).await {
                        Ok(_) => report.deleted.push(name),
                        Err(e) => {
                            warn!(cache = %name, error = %e, "Failed to delete old cache");
                            report.failed.push(name);
                        }
                    }
                }
            }
            Err(e) => error!(error = %e, "Failed to list caches"),
        }

        if self.config.claim_on_activate {
            self.host.signal(AgentSignal::Claim(self.id));
        }
        report
    }

    // ==================== Fetch ====================

    /// Cache-first, network-fallback, opportunistic fill.
    ///
    /// The cache write for a qualifying network response is registered on
    /// `lifetime` and runs after the response is handed back.
    pub async fn handle_fetch(
        &self,
        request: &Request,
        lifetime: &WaitUntil,
    ) -> SwResult<FetchOutcome> {
        if request.method != Method::GET {
            return Ok(FetchOutcome::PassThrough(PassThroughReason::NonGetMethod));
        }
        if self.config.denylist.matches(&request.url) {
            debug!(url = %request.url, "Leaving relay request to the network");
            return Ok(FetchOutcome::PassThrough(PassThroughReason::Denylisted));
        }

        let key = RequestKey::for_request(request);
        if let Some(response) = self.lookup(&key).await {
            debug!(url = %request.url, "Serving from cache");
            return Ok(FetchOutcome::Respond(response));
        }

        match self.host.fetcher.fetch(request).await {
            Ok(response) => {
                if Self::is_cacheable(&response) {
                    let entry = CacheEntry::from_response(key, &response);
                    let caches = Arc::clone(&self.host.caches);
                    let name = self.generation.name().to_string();
                    lifetime.wait_until(async move {
                        match caches.put(&name, entry).await {
                            Ok(()) => debug!(cache = %name, "Cached network response"),
                            Err(e) => warn!(cache = %name, error = %e, "Failed to cache response"),
                        }
                    });
                }
                Ok(FetchOutcome::Respond(response))
            }
            Err(e) => {
                error!(url = %request.url, error = %e, "Fetch failed");
                if request.is_navigation() {
                    if let Some(fallback) = self.lookup(&RequestKey::get(&self.fallback)).await {
                        info!(url = %request.url, "Serving offline fallback");
                        return Ok(FetchOutcome::Respond(fallback));
                    }
                }
                Err(e.into())
            }
        }
    }

    /// Same-origin, status 200, non-opaque.
    pub fn is_cacheable(response: &Response) -> bool {
        response.status == StatusCode::OK && response.response_type == ResponseType::Basic
    }

    /// Look up `key` in the current generation. Store errors count as a miss.
    async fn lookup(&self, key: &RequestKey) -> Option<Response> {
        match self.host.caches.match_request(self.generation.name(), key).await {
            Ok(Some(entry)) => match entry.to_response() {
                Ok(response) => Some(response),
                Err(e) => {
                    warn!(key = %key, error = %e, "Unreadable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache lookup failed; using network");
                None
            }
        }
    }

    // ==================== Messages ====================

    /// Act on a control message. Returns whether it was recognised.
    pub fn handle_control_message(&self, message: &Value) -> bool {
        match ControlMessage::parse(message) {
            Some(ControlMessage::SkipWaiting) => {
                info!(worker = %self.id, "Skip waiting requested");
                self.host.signal(AgentSignal::SkipWaiting(self.id));
                true
            }
            None => false,
        }
    }

    /// Relay a reconnect request to every controlled window. Returns how many
    /// clients were told.
    pub async fn handle_reconnect_signal(&self, tag: &str) -> usize {
        if tag != self.config.reconnect_tag {
            debug!(tag, "Ignoring sync tag");
            return 0;
        }
        let notified = self.host.clients.read().await.broadcast(
            self.id,
            &ClientMatchOptions::default(),
            ClientMessage::ReconnectGame,
        );
        info!(notified, "Asked clients to reconnect");
        notified
    }

    // ==================== Push ====================

    /// Show a notification for a push. Returns its id, or `None` when the
    /// payload was absent or malformed.
    pub async fn handle_push(&self, data: Option<&[u8]>) -> Option<u64> {
        let payload = PushPayload::parse(data)?;
        let options = NotificationOptions::for_push(&payload, &self.config.notification);
        let id = self
            .host
            .notifications
            .write()
            .await
            .show(payload.title, options);
        debug!(notification = id, "Notification shown");
        Some(id)
    }

    /// Close the clicked notification; "join" also opens the game.
    pub async fn handle_notification_click(
        &self,
        click: &NotificationClick,
    ) -> SwResult<Option<ClientHandle>> {
        self.host
            .notifications
            .write()
            .await
            .close(click.notification_id);

        if click.action.as_deref() != Some(ACTION_JOIN) {
            return Ok(None);
        }

        let url = self.scope.join(&self.config.notification.open_url)?;
        info!(url = %url, "Opening window from notification");
        let window = self
            .host
            .clients
            .write()
            .await
            .open_window(url, Some(self.id));
        Ok(Some(window))
    }
}
