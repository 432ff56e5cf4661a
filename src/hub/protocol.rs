//! Messages pushed to hub subscribers, one JSON document per message.
//!
//! ```text
//! {"status":"connected","filter":"all"}
//! {"event":"ingest","reading":{"device_id":"arduino-01","sensor":"pressure",...}}
//! {"type":"keepalive"}
//! ```
use crate::error::AppResult;
use crate::reading::Reading;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// `"event"` tag of an ingest message.
pub enum EventKind {
    /// `"ingest"`
    Ingest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// `"status"` tag of the subscription ack.
pub enum ConnectionStatus {
    /// `"connected"`
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// `"type"` tag of a keepalive.
pub enum KeepaliveKind {
    /// `"keepalive"`
    Keepalive,
}

/// Every message a subscriber can receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// A new conditioned reading.
    Ingest {
        /// Always `"ingest"`.
        event: EventKind,
        /// The reading itself, flattened field names included.
        reading: Reading,
    },
    /// Sent once, right after subscribing.
    Connected {
        /// Always `"connected"`.
        status: ConnectionStatus,
        /// `"all"` or the comma-separated device ids
        filter: String,
    },
    /// Idle-connection heartbeat.
    Keepalive {
        /// Always `"keepalive"`.
        #[serde(rename = "type")]
        kind: KeepaliveKind,
    },
}

impl ServerMessage {
    /// Wraps one conditioned reading.
    pub fn ingest(reading: Reading) -> Self {
        ServerMessage::Ingest {
            event: EventKind::Ingest,
            reading,
        }
    }

    /// Ack sent once on subscribe; `filter` echoes the requested device list.
    pub fn connected(filter: impl Into<String>) -> Self {
        ServerMessage::Connected {
            status: ConnectionStatus::Connected,
            filter: filter.into(),
        }
    }

    /// Idle heartbeat.
    pub fn keepalive() -> Self {
        ServerMessage::Keepalive {
            kind: KeepaliveKind::Keepalive,
        }
    }

    /// Single-line JSON, as written to the wire.
    pub fn to_json(&self) -> AppResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode one line; used by clients and tests.
    pub fn from_json(text: &str) -> AppResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
