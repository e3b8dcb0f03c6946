//! Foreground instances (windows) the agent can control and message.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use crate::error::{SwError, SwResult};
use crate::messages::ClientMessage;
use crate::registration::WorkerId;

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    All,
}

/// A client (controlled page).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Whether focused.
    pub focused: bool,

    /// Agent currently controlling this client.
    pub controller: Option<WorkerId>,

    sender: mpsc::UnboundedSender<ClientMessage>,
}

impl Client {
    /// Post message to client.
    pub fn post_message(&self, message: ClientMessage) -> SwResult<()> {
        self.sender
            .send(message)
            .map_err(|_| SwError::state(format!("client {} is gone", self.id)))
    }
}

/// A connected client plus the receiving end of its message channel.
#[derive(Debug)]
pub struct ClientHandle {
    pub client: Client,
    pub messages: mpsc::UnboundedReceiver<ClientMessage>,
}

/// Options for [`Clients::match_all`].
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a foreground instance.
    pub fn connect(
        &mut self,
        url: Url,
        client_type: ClientType,
        controller: Option<WorkerId>,
    ) -> ClientHandle {
        let (sender, messages) = mpsc::unbounded_channel();
        let client = Client {
            id: next_client_id(),
            url,
            client_type,
            focused: false,
            controller,
            sender,
        };
        debug!(client = %client.id, url = %client.url, "Client connected");
        self.clients.insert(client.id.clone(), client.clone());
        ClientHandle { client, messages }
    }

    /// Open a focused window.
    pub fn open_window(&mut self, url: Url, controller: Option<WorkerId>) -> ClientHandle {
        let mut handle = self.connect(url, ClientType::Window, controller);
        handle.client.focused = true;
        if let Some(stored) = self.clients.get_mut(&handle.client.id) {
            stored.focused = true;
        }
        handle
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Clients controlled by `controller` (or all, if uncontrolled are included).
    pub fn match_all(&self, controller: WorkerId, options: &ClientMatchOptions) -> Vec<&Client> {
        let mut matched: Vec<_> = self
            .clients
            .values()
            .filter(|c| options.include_uncontrolled || c.controller == Some(controller))
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        matched
    }

    /// Number of clients controlled by `controller`.
    pub fn controlled_by(&self, controller: WorkerId) -> usize {
        self.clients
            .values()
            .filter(|c| c.controller == Some(controller))
            .count()
    }

    /// Make `controller` the controller of every client. Returns how many changed.
    pub fn claim(&mut self, controller: WorkerId) -> usize {
        let mut changed = 0;
        for client in self.clients.values_mut() {
            if client.controller != Some(controller) {
                client.controller = Some(controller);
                changed += 1;
            }
        }
        changed
    }

    /// Post a message to every matching client; returns how many received it.
    pub fn broadcast(
        &self,
        controller: WorkerId,
        options: &ClientMatchOptions,
        message: ClientMessage,
    ) -> usize {
        self.match_all(controller, options)
            .into_iter()
            .filter(|client| match client.post_message(message) {
                Ok(()) => true,
                Err(e) => {
                    warn!(client = %client.id, error = %e, "Failed to post message");
                    false
                }
            })
            .count()
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{:06}", COUNTER.fetch_add(1, Ordering::Relaxed))
}
