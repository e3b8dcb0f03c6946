//! # Draw Party Offline Agent
//!
//! Service worker for the Draw Party web app: serves cached responses when
//! offline and keeps the cache fresh from successful network fetches.
//!
//! ## Features
//!
//! - **Install**: pre-cache a fixed manifest into the current generation
//! - **Activate**: delete stale generations, claim open clients
//! - **Fetch interception**: cache first, network fallback, opportunistic fill,
//!   offline fallback page for navigations
//! - **Messages**: `SKIP_WAITING` from the app, `RECONNECT_GAME` to the app
//! - **Push**: game notifications with "join" and "dismiss" actions
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerRegistration (host side, one per scope)
//!     ├── installing / waiting / active (ServiceWorker)
//!     │       └── CacheManager ── dispatch(AgentEvent) ── WaitUntil
//!     └── HostContext
//!             ├── CacheStorage (memory or disk)
//!             ├── Fetcher (HTTP or canned)
//!             ├── Clients
//!             └── NotificationCenter
//! ```

pub mod cache;
pub mod clients;
pub mod config;
pub mod error;
pub mod events;
pub mod generation;
pub mod host;
pub mod manager;
pub mod messages;
pub mod push;
pub mod registration;

pub use cache::{CacheEntry, CacheStorage, DiskCacheStorage, MemoryCacheStorage, RequestKey};
pub use clients::{Client, ClientHandle, ClientMatchOptions, ClientType, Clients};
pub use config::{AgentConfig, LoggingConfig, NetworkConfig, NotificationConfig};
pub use error::{SwError, SwResult};
pub use events::{AgentEvent, EventOutcome, FetchOutcome, PassThroughReason, WaitUntil};
pub use generation::Generation;
pub use host::{AgentSignal, HostContext};
pub use manager::{ActivateReport, CacheManager, InstallReport};
pub use messages::{ClientMessage, ControlMessage};
pub use push::{Notification, NotificationCenter, NotificationClick, NotificationOptions, PushPayload};
pub use registration::{ServiceWorker, ServiceWorkerRegistration, ServiceWorkerState, WorkerId};
