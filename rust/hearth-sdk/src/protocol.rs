//! Serde models for the hub's WebSocket message shapes.
//!
//! The event feed speaks a small JSON protocol: the hub opens with
//! `auth_required`, the client answers with `auth`, the hub settles the
//! handshake with `auth_ok` or `auth_invalid`, and from then on traffic is
//! `subscribe_events` registrations outbound and `event` notifications
//! inbound. Unknown message types are skipped by callers, never fatal.

use crate::entity::EntityState;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The only event type this SDK registers for.
pub const STATE_CHANGED: &str = "state_changed";

/// Messages the hub sends over the event feed.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthRequired {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthOk {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthInvalid {
        #[serde(default)]
        message: Option<String>,
    },
    /// Ack for an outbound registration. Logged, otherwise ignored.
    Result {
        #[serde(default)]
        id: Option<u64>,
        #[serde(default)]
        success: bool,
    },
    Event {
        #[serde(default)]
        id: Option<u64>,
        event: EventEnvelope,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventEnvelope {
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

impl EventEnvelope {
    /// Decode the payload of a `state_changed` event. `None` for other event
    /// types or malformed payloads.
    pub fn into_state_change(self) -> Option<StateChange> {
        if self.event_type != STATE_CHANGED {
            tracing::debug!(event_type = %self.event_type, "ignoring event");
            return None;
        }
        match serde_json::from_value(self.data) {
            Ok(change) => Some(change),
            Err(err) => {
                tracing::warn!(%err, "skipping malformed state_changed payload");
                None
            }
        }
    }
}

/// Payload of a `state_changed` event.
///
/// `new_state` is `None` when the hub removed the entity; the store keeps the
/// last-known-good record in that case (entities are never deleted locally).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChange {
    pub entity_id: String,
    pub new_state: Option<EntityState>,
    #[serde(default)]
    pub old_state: Option<EntityState>,
}

/// Messages the client sends to the hub.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Auth { access_token: String },
    SubscribeEvents { id: u64, event_type: String },
}

pub fn parse_server_message(text: &str) -> Result<ServerMessage, serde_json::Error> {
    serde_json::from_str(text)
}
