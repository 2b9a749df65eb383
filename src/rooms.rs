//! Room registry: membership, presence and empty-room lifecycle
//!
//! The registry is the single source of truth for room membership. Every
//! mutation happens under the room's map entry, presence is emitted under the
//! same entry, and deletion timers are epoch-guarded so a late-firing timer
//! can never race a rejoin.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::messages::Outbound;
use crate::mirror::MetadataMirror;

/// Outbound queue depth per connection. Broadcasts use `try_send`, so a
/// member that stops draining misses frames instead of stalling the room.
pub const OUTBOUND_QUEUE: usize = 64;

/// One live connection of one user. A user with two tabs open is two members.
#[derive(Debug, Clone)]
pub struct Member {
    pub conn_id: Uuid,
    pub user_id: String,
    pub name: String,
    pub picture: Option<String>,
    pub tx: mpsc::Sender<Outbound>,
}

/// Advertised room metadata, as returned by lookups and stored in the mirror.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomInfo {
    pub room_id: String,
    pub encryption_required: bool,
    pub video_url: Option<String>,
    pub title_id: Option<String>,
    pub initial_time: Option<f64>,
    pub created_at: u64,
}

struct Room {
    encryption_required: bool,
    video_url: Option<String>,
    title_id: Option<String>,
    initial_time: Option<f64>,
    created_at: u64,
    members: Vec<Member>,
    timer_epoch: u64,
    deletion: Option<JoinHandle<()>>,
}

impl Room {
    fn cancel_timer(&mut self) {
        if let Some(handle) = self.deletion.take() {
            handle.abort();
        }
        self.timer_epoch += 1;
    }

    fn info(&self, room_id: &str) -> RoomInfo {
        RoomInfo {
            room_id: room_id.to_string(),
            encryption_required: self.encryption_required,
            video_url: self.video_url.clone(),
            title_id: self.title_id.clone(),
            initial_time: self.initial_time,
            created_at: self.created_at,
        }
    }
}

/// Optional fields applied by `ensure`. `encryption_required` is only
/// honored at creation; everything else overwrites when provided.
#[derive(Debug, Clone, Default)]
pub struct EnsureOptions {
    pub encryption_required: Option<bool>,
    pub video_url: Option<String>,
    pub title_id: Option<String>,
    pub initial_time: Option<f64>,
}

impl EnsureOptions {
    pub fn from_info(info: RoomInfo) -> Self {
        Self {
            encryption_required: Some(info.encryption_required),
            video_url: info.video_url,
            title_id: info.title_id,
            initial_time: info.initial_time,
        }
    }
}

#[derive(Clone)]
pub struct RoomRegistry {
    rooms: Arc<DashMap<String, Room>>,
    empty_grace: Duration,
    default_encryption: bool,
    mirror: Option<MetadataMirror>,
}

impl RoomRegistry {
    pub fn new(
        empty_grace: Duration,
        default_encryption: bool,
        mirror: Option<MetadataMirror>,
    ) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            empty_grace,
            default_encryption,
            mirror,
        }
    }

    // -----------------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------------

    /// Return the existing record or create one. Cancels any pending deletion
    /// timer; an unoccupied room leaves with a fresh grace window instead.
    pub fn ensure(&self, room_id: &str, opts: EnsureOptions) -> RoomInfo {
        let mut entry = self
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Room {
                encryption_required: opts
                    .encryption_required
                    .unwrap_or(self.default_encryption),
                video_url: None,
                title_id: None,
                initial_time: None,
                created_at: unix_now(),
                members: Vec::new(),
                timer_epoch: 0,
                deletion: None,
            });
        let room = entry.value_mut();
        room.cancel_timer();
        if let Some(url) = opts.video_url {
            room.video_url = Some(url);
        }
        if let Some(title) = opts.title_id {
            room.title_id = Some(title);
        }
        if let Some(time) = opts.initial_time {
            room.initial_time = Some(time);
        }
        let info = room.info(room_id);
        if room.members.is_empty() {
            self.arm_deletion(room_id, room);
        }
        info
    }

    pub fn lookup(&self, room_id: &str) -> Option<RoomInfo> {
        self.rooms.get(room_id).map(|room| room.info(room_id))
    }

    pub fn encryption_required(&self, room_id: &str) -> Option<bool> {
        self.rooms.get(room_id).map(|room| room.encryption_required)
    }

    /// Unconditionally remove the record.
    pub fn remove(&self, room_id: &str) {
        if let Some((_, room)) = self.rooms.remove(room_id) {
            if let Some(handle) = room.deletion {
                handle.abort();
            }
        }
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    /// Attach a member to an existing room, cancel its deletion timer and
    /// emit presence to everyone. Returns false when the room is gone.
    pub fn attach(&self, room_id: &str, member: Member) -> bool {
        let Some(mut room) = self.rooms.get_mut(room_id) else {
            return false;
        };
        room.members.push(member);
        room.cancel_timer();
        let payload = presence_payload(&room);
        broadcast_to(&room.members, None, &payload);
        true
    }

    /// Detach a member, emit presence to the remaining members and arm the
    /// deletion timer when the room empties. Idempotent.
    pub fn detach(&self, room_id: &str, conn_id: Uuid) {
        let Some(mut room) = self.rooms.get_mut(room_id) else {
            return;
        };
        let before = room.members.len();
        room.members.retain(|m| m.conn_id != conn_id);
        if room.members.len() == before {
            return;
        }
        let payload = presence_payload(&room);
        broadcast_to(&room.members, None, &payload);
        if room.members.is_empty() {
            self.arm_deletion(room_id, &mut room);
        }
    }

    pub fn member_count(&self, room_id: &str) -> usize {
        self.rooms
            .get(room_id)
            .map(|room| room.members.len())
            .unwrap_or(0)
    }

    /// Whether the room currently has a pending deletion timer.
    pub fn has_deletion_timer(&self, room_id: &str) -> Option<bool> {
        self.rooms.get(room_id).map(|room| room.deletion.is_some())
    }

    /// Send a serialized frame to every member, optionally skipping one
    /// connection (the sender).
    pub fn broadcast(&self, room_id: &str, exclude: Option<Uuid>, frame: &str) {
        if let Some(room) = self.rooms.get(room_id) {
            broadcast_to(&room.members, exclude, frame);
        }
    }

    // -----------------------------------------------------------------------
    // Advertised metadata
    // -----------------------------------------------------------------------

    /// Record the latest advertised playback state for new-joiner hydration.
    /// The server never arbitrates between peers.
    pub fn update_video_state(&self, room_id: &str, url: &str, time: f64) -> Option<RoomInfo> {
        let mut room = self.rooms.get_mut(room_id)?;
        room.video_url = Some(url.to_string());
        room.title_id = extract_title_id(url);
        room.initial_time = Some(time);
        Some(room.info(room_id))
    }

    /// An episode change points the room at a new URL starting from zero.
    pub fn set_episode(&self, room_id: &str, url: &str) -> Option<RoomInfo> {
        let mut room = self.rooms.get_mut(room_id)?;
        room.video_url = Some(url.to_string());
        room.title_id = extract_title_id(url);
        room.initial_time = Some(0.0);
        Some(room.info(room_id))
    }

    // -----------------------------------------------------------------------
    // Empty-grace lifecycle
    // -----------------------------------------------------------------------

    fn arm_deletion(&self, room_id: &str, room: &mut Room) {
        if let Some(handle) = room.deletion.take() {
            handle.abort();
        }
        room.timer_epoch += 1;
        let epoch = room.timer_epoch;
        let registry = self.clone();
        let id = room_id.to_string();
        let grace = self.empty_grace;
        room.deletion = Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            registry.expire(&id, epoch).await;
        }));
    }

    /// Fired by a grace timer. Re-checks under the map entry: the room must
    /// still exist, still be empty, and the timer epoch must match.
    async fn expire(&self, room_id: &str, epoch: u64) {
        let removed = self
            .rooms
            .remove_if(room_id, |_, room| {
                room.members.is_empty() && room.timer_epoch == epoch
            })
            .is_some();
        if removed {
            info!(room = %room_id, "empty room deleted after grace period");
            if let Some(mirror) = &self.mirror {
                mirror.delete(room_id).await;
            }
        }
    }
}

fn broadcast_to(members: &[Member], exclude: Option<Uuid>, frame: &str) {
    for member in members {
        if Some(member.conn_id) == exclude {
            continue;
        }
        let _ = member.tx.try_send(Outbound::Frame(frame.to_string()));
    }
}

/// Membership snapshot sent to every member after each join/leave. Carries
/// no sender attribution. Duplicate users (multiple connections) are allowed.
fn presence_payload(room: &Room) -> String {
    let participants: Vec<Value> = room
        .members
        .iter()
        .map(|m| {
            let mut p = json!({"id": m.user_id, "name": m.name});
            if let Some(picture) = &m.picture {
                p["picture"] = json!(picture);
            }
            p
        })
        .collect();
    let users: Vec<&str> = room.members.iter().map(|m| m.name.as_str()).collect();
    let mut avatars = Map::new();
    for member in &room.members {
        if let Some(picture) = &member.picture {
            avatars.insert(member.user_id.clone(), json!(picture));
        }
    }
    json!({
        "type": "presence",
        "participants": participants,
        "users": users,
        "avatars": avatars,
        "encryption_required": room.encryption_required,
    })
    .to_string()
}

/// Room ids are short opaque strings: 3 to 64 chars of `[A-Za-z0-9_-]`.
pub fn valid_room_id(room_id: &str) -> bool {
    (3..=64).contains(&room_id.len())
        && room_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

pub fn generate_room_id() -> String {
    use rand::distributions::Alphanumeric;
    use rand::Rng;
    rand::rngs::OsRng
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect()
}

/// Pull the title id out of a player watch URL, e.g.
/// `https://example.com/watch/81029385?trackId=1` yields `81029385`.
/// Absence is not an error.
pub fn extract_title_id(url: &str) -> Option<String> {
    let path = url.split(|c| c == '?' || c == '#').next().unwrap_or(url);
    let mut segments = path.split('/');
    while let Some(segment) = segments.next() {
        if segment == "watch" {
            let id: String = segments
                .next()?
                .chars()
                .take_while(char::is_ascii_alphanumeric)
                .collect();
            return if id.is_empty() { None } else { Some(id) };
        }
    }
    None
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
