//! Outbound event envelopes and the emitter that ships them to the
//! application peer.
//!
//! Wire shape: `{"event": <name>, "data": {...}, "timestamp": <ISO-8601>}`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::peer::{APP_PEER, PeerLink};

// ─── Event catalogue ──────────────────────────────────────────────

pub const CONTAINER_DETECTED: &str = "container_detected";
pub const CONTAINER_RECOGNIZED: &str = "container_recognized";
pub const CONTAINER_NOT_RECOGNIZED: &str = "container_not_recognized";
pub const CONTAINER_ACCEPTED: &str = "container_accepted";
pub const CONTAINER_DUMPED: &str = "container_dumped";
pub const CONTAINER_UNLOADED_ACK: &str = "container_unloaded_ack";
pub const HARDWARE_ERROR: &str = "hardware_error";
pub const DEVICE_INFO: &str = "device_info";
pub const PHOTO_READY: &str = "photo_ready";
pub const RECEIVER_NOT_EMPTY: &str = "receiver_not_empty";
pub const RECEIVER_EMPTY: &str = "receiver_empty";
pub const RESTORE_DEVICE_ACK: &str = "restore_device_ack";

// ─── Envelope ─────────────────────────────────────────────────────

/// Immutable once built; not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: String,
    pub data: Map<String, Value>,
    pub timestamp: String,
}

impl EventEnvelope {
    /// Build an envelope. Non-object `data` is wrapped as `{"value": data}`.
    pub fn new(event: impl Into<String>, data: Value, at: DateTime<Utc>) -> Self {
        let data = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_owned(), other);
                map
            }
        };
        Self {
            event: event.into(),
            data,
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    pub fn to_json(&self) -> String {
        // Map<String, Value> always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ─── Emitter ──────────────────────────────────────────────────────

/// Builds envelopes and sends them to the application peer.
/// Sends are fire-and-forget; an absent peer just drops the event.
pub struct EventEmitter<P: PeerLink> {
    link: P,
    target: String,
}

impl<P: PeerLink> EventEmitter<P> {
    pub fn new(link: P) -> Self {
        Self {
            link,
            target: APP_PEER.to_owned(),
        }
    }

    pub fn emit(&self, event: &str, data: Value) -> EventEnvelope {
        let envelope = EventEnvelope::new(event, data, Utc::now());
        tracing::debug!(event = %envelope.event, peer = %self.target, "emitting event");
        self.link.send(&self.target, &envelope.to_json());
        envelope
    }

    pub fn link(&self) -> &P {
        &self.link
    }
}
