//! Structured messages exchanged with foreground instances.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Foreground → agent control message (`{"type": "SKIP_WAITING"}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Activate the waiting agent now.
    SkipWaiting,
}

impl ControlMessage {
    /// Parse a posted value. Anything unrecognised yields `None`.
    pub fn parse(value: &Value) -> Option<Self> {
        match serde_json::from_value(value.clone()) {
            Ok(message) => Some(message),
            Err(e) => {
                debug!(error = %e, "Ignoring unrecognised control message");
                None
            }
        }
    }
}

/// Agent → foreground notification (`{"type": "RECONNECT_GAME"}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Retry the connection to the previous game session.
    ReconnectGame,
}
