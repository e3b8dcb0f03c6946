//! Push delivery and notification interaction.
//!
//! Pushes carry `{title, body, data}` JSON and are shown as notifications with
//! a "join" and a "dismiss" action. Missing or malformed payloads are dropped.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::NotificationConfig;

/// Action id that opens the game.
pub const ACTION_JOIN: &str = "join";
/// Action id that only closes the notification.
pub const ACTION_DISMISS: &str = "dismiss";

/// Push message payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl PushPayload {
    /// Parse raw push data. Absent or malformed data yields `None`.
    pub fn parse(data: Option<&[u8]>) -> Option<Self> {
        let data = data?;
        match serde_json::from_slice(data) {
            Ok(payload) => Some(payload),
            Err(e) => {
                debug!(error = %e, "Ignoring malformed push payload");
                None
            }
        }
    }
}

/// A button on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Rendering options for a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationOptions {
    pub body: Option<String>,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: Value,
    pub actions: Vec<NotificationAction>,
}

impl NotificationOptions {
    /// Options for a game push.
    pub fn for_push(payload: &PushPayload, config: &NotificationConfig) -> Self {
        Self {
            body: payload.body.clone(),
            icon: config.icon.clone(),
            badge: config.badge.clone(),
            vibrate: config.vibrate.clone(),
            data: payload.data.clone(),
            actions: vec![
                NotificationAction {
                    action: ACTION_JOIN.to_string(),
                    title: config.join_title.clone(),
                    icon: Some(config.icon.clone()),
                },
                NotificationAction {
                    action: ACTION_DISMISS.to_string(),
                    title: config.dismiss_title.clone(),
                    icon: None,
                },
            ],
        }
    }
}

/// A notification currently shown by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: u64,
    pub title: String,
    pub options: NotificationOptions,
}

/// User interaction with a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationClick {
    pub notification_id: u64,
    /// Action button pressed; `None` for a click on the body.
    pub action: Option<String>,
}

/// Notifications shown on behalf of the agent.
#[derive(Debug, Default)]
pub struct NotificationCenter {
    shown: Vec<Notification>,
    next_id: u64,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Show a notification; returns its id.
    pub fn show(&mut self, title: impl Into<String>, options: NotificationOptions) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.shown.push(Notification {
            id,
            title: title.into(),
            options,
        });
        id
    }

    /// Close a notification. Returns whether it was shown.
    pub fn close(&mut self, id: u64) -> bool {
        let before = self.shown.len();
        self.shown.retain(|n| n.id != id);
        self.shown.len() != before
    }

    pub fn get(&self, id: u64) -> Option<&Notification> {
        self.shown.iter().find(|n| n.id == id)
    }

    /// Currently shown notifications, oldest first.
    pub fn active(&self) -> &[Notification] {
        &self.shown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_payload() {
        let raw = br#"{"title":"Your turn","body":"Alice is waiting","data":{"room":"abc"}}"#;
        let payload = PushPayload::parse(Some(raw)).unwrap();
        assert_eq!(payload.title, "Your turn");
        assert_eq!(payload.body.as_deref(), Some("Alice is waiting"));
        assert_eq!(payload.data, json!({"room": "abc"}));
    }

    #[test]
    fn test_parse_absent_or_malformed() {
        assert!(PushPayload::parse(None).is_none());
        assert!(PushPayload::parse(Some(b"not json")).is_none());
        assert!(PushPayload::parse(Some(br#"{"body":"no title"}"#)).is_none());
    }

    #[test]
    fn test_options_for_push() {
        let payload = PushPayload {
            title: "Game starting".to_string(),
            body: None,
            data: json!({"room": "xyz"}),
        };
        let options = NotificationOptions::for_push(&payload, &NotificationConfig::default());

        assert_eq!(options.icon, "/icon-192.png");
        assert_eq!(options.vibrate, vec![200, 100, 200]);
        assert_eq!(options.actions.len(), 2);
        assert_eq!(options.actions[0].action, ACTION_JOIN);
        assert_eq!(options.actions[0].title, "Join Game");
        assert_eq!(options.actions[1].action, ACTION_DISMISS);
        assert!(options.actions[1].icon.is_none());
    }

    #[test]
    fn test_notification_center() {
        let payload = PushPayload {
            title: "t".to_string(),
            body: None,
            data: Value::Null,
        };
        let options = NotificationOptions::for_push(&payload, &NotificationConfig::default());

        let mut center = NotificationCenter::new();
        let first = center.show("one", options.clone());
        let second = center.show("two", options);
        assert_ne!(first, second);
        assert_eq!(center.active().len(), 2);

        assert!(center.close(first));
        assert!(!center.close(first));
        assert_eq!(center.get(second).unwrap().title, "two");
    }
}
