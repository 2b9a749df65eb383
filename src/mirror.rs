//! Shared room-metadata mirror
//!
//! Durable room metadata is mirrored to Redis so it survives restart and is
//! visible across server instances. The mirror is never authoritative for
//! live connection state and every call is best-effort: time-bounded, logged
//! on failure, never surfaced to clients.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

use crate::rooms::RoomInfo;

/// Mirrored entries expire on their own; occupied rooms refresh the TTL on
/// every advertised-state write.
const MIRROR_TTL_SECONDS: u64 = 86_400;

/// Upper bound per cache round-trip. On expiry the caller falls back to the
/// in-memory registry.
const MIRROR_CALL_TIMEOUT: Duration = Duration::from_secs(5);

fn room_key(room_id: &str) -> String {
    format!("watchparty:room:{room_id}")
}

#[derive(Clone)]
pub struct MetadataMirror {
    client: Arc<redis::Client>,
}

impl MetadataMirror {
    pub fn connect(url: &str) -> Result<Self> {
        Ok(Self {
            client: Arc::new(redis::Client::open(url)?),
        })
    }

    /// Write a room's metadata. Failures are logged and swallowed.
    pub async fn store(&self, info: &RoomInfo) {
        match timeout(MIRROR_CALL_TIMEOUT, self.store_inner(info)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(room = %info.room_id, error = %err, "metadata mirror write failed"),
            Err(_) => warn!(room = %info.room_id, "metadata mirror write timed out"),
        }
    }

    async fn store_inner(&self, info: &RoomInfo) -> Result<()> {
        let mut conn = self.client.get_async_connection().await?;
        let payload = serde_json::to_string(info)?;
        redis::cmd("SETEX")
            .arg(room_key(&info.room_id))
            .arg(MIRROR_TTL_SECONDS)
            .arg(payload)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Look up a room's mirrored metadata. Any failure reads as a miss.
    pub async fn fetch(&self, room_id: &str) -> Option<RoomInfo> {
        match timeout(MIRROR_CALL_TIMEOUT, self.fetch_inner(room_id)).await {
            Ok(Ok(found)) => found,
            Ok(Err(err)) => {
                warn!(room = %room_id, error = %err, "metadata mirror read failed");
                None
            }
            Err(_) => {
                warn!(room = %room_id, "metadata mirror read timed out");
                None
            }
        }
    }

    async fn fetch_inner(&self, room_id: &str) -> Result<Option<RoomInfo>> {
        let mut conn = self.client.get_async_connection().await?;
        let payload: Option<String> = redis::cmd("GET")
            .arg(room_key(room_id))
            .query_async(&mut conn)
            .await?;
        match payload {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Drop a room's mirrored metadata after expiry. Best-effort; the TTL
    /// reaps anything this misses.
    pub async fn delete(&self, room_id: &str) {
        let result = timeout(MIRROR_CALL_TIMEOUT, async {
            let mut conn = self.client.get_async_connection().await?;
            redis::cmd("DEL")
                .arg(room_key(room_id))
                .query_async::<_, ()>(&mut conn)
                .await?;
            Ok::<_, anyhow::Error>(())
        })
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(room = %room_id, error = %err, "metadata mirror delete failed"),
            Err(_) => warn!(room = %room_id, "metadata mirror delete timed out"),
        }
    }
}
