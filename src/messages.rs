//! Wire types for the WebSocket protocol
//!
//! Inbound frames are text JSON tagged by `type`. Unknown tags fail the
//! decode and the frame is dropped by the reader.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// Item on a connection's outbound queue, drained by its forward task.
#[derive(Debug)]
pub enum Outbound {
    /// A serialized JSON text frame.
    Frame(String),
    /// A protocol-level ping.
    Ping,
}

/// Decoded inbound frame.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "key-exchange")]
    KeyExchange {
        #[serde(rename = "publicKey")]
        public_key: String,
        curve: String,
    },
    #[serde(rename = "encrypted")]
    Encrypted {
        ciphertext: String,
        iv: String,
        #[serde(default)]
        tag: Option<String>,
        #[serde(default)]
        salt: Option<String>,
        #[serde(default)]
        alg: Option<String>,
        #[serde(default, rename = "recipientId")]
        recipient_id: Option<String>,
        #[serde(default, deserialize_with = "lenient_ts")]
        ts: Option<u64>,
    },
    #[serde(rename = "system")]
    System {
        text: String,
        #[serde(default, deserialize_with = "lenient_ts")]
        ts: Option<u64>,
        #[serde(default)]
        url: Option<String>,
    },
    #[serde(rename = "episode-changed")]
    EpisodeChanged {
        url: String,
        #[serde(default, deserialize_with = "lenient_ts")]
        ts: Option<u64>,
        #[serde(default)]
        seq: Option<u64>,
        #[serde(default)]
        title: Option<String>,
    },
    #[serde(rename = "sync-request")]
    SyncRequest {
        #[serde(default, deserialize_with = "lenient_ts")]
        ts: Option<u64>,
    },
    #[serde(rename = "sync-state")]
    SyncState {
        time: f64,
        paused: bool,
        url: String,
        #[serde(default, deserialize_with = "lenient_ts")]
        ts: Option<u64>,
    },
    #[serde(rename = "state")]
    State { payload: Value },
    #[serde(rename = "chat")]
    Chat {
        text: String,
        #[serde(default, deserialize_with = "lenient_ts")]
        ts: Option<u64>,
    },
    #[serde(rename = "typing")]
    Typing {
        active: bool,
        #[serde(default, deserialize_with = "lenient_ts")]
        ts: Option<u64>,
    },
}

/// Accept any JSON for `ts`; non-numeric values become `None` so the relay
/// substitutes server wall time instead of dropping the frame.
fn lenient_ts<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f as u64))))
}

/// Server wall time in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
