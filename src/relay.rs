//! Per-room message policy and fan-out
//!
//! The server is a blind relay for the E2EE substrate: `key-exchange` and
//! `encrypted` bodies are forwarded byte-identical and never stored. Control
//! metadata (system notices, episode changes, the sync handshake) flows even
//! in encrypted rooms so delivery survives key-exchange races. Plaintext
//! `state`/`chat`/`typing` are refused in encrypted rooms.
//!
//! Policy violations drop silently: surfacing them would aid probing and
//! confuse clients mid key-exchange.

use serde_json::json;
use tracing::{debug, warn};

use crate::messages::{now_ms, ClientFrame, Outbound};
use crate::rooms::{Member, RoomInfo};
use crate::AppState;

fn blank(s: &str) -> bool {
    s.trim().is_empty()
}

/// Route one decoded inbound frame. Sender attribution (`from`/`fromId`,
/// chat `avatar`) always comes from the verified session, never the frame.
///
/// Returns false when the connection must be terminated: a member whose room
/// is gone from the registry violates the membership invariant, and that is
/// fatal for the connection (the hub itself keeps serving).
pub fn handle_frame(state: &AppState, room_id: &str, sender: &Member, frame: ClientFrame) -> bool {
    let Some(encrypted_room) = state.rooms.encryption_required(room_id) else {
        warn!(room = %room_id, user = %sender.user_id, "member attached to a room missing from the registry, closing connection");
        return false;
    };

    match frame {
        ClientFrame::Ping => {
            let pong = json!({"type": "pong", "ts": now_ms()}).to_string();
            let _ = sender.tx.try_send(Outbound::Frame(pong));
        }
        ClientFrame::Pong => {}
        ClientFrame::KeyExchange { public_key, curve } => {
            if blank(&public_key) || blank(&curve) {
                return true;
            }
            let envelope = json!({
                "type": "key-exchange",
                "publicKey": public_key,
                "curve": curve,
                "from": sender.name,
                "fromId": sender.user_id,
            });
            state
                .rooms
                .broadcast(room_id, Some(sender.conn_id), &envelope.to_string());
        }
        ClientFrame::Encrypted {
            ciphertext,
            iv,
            tag,
            salt,
            alg,
            recipient_id,
            ts,
        } => {
            if blank(&ciphertext) || blank(&iv) {
                return true;
            }
            // recipientId passes through unenforced: every member receives
            // the envelope, only the named recipient can decrypt it.
            let mut envelope = json!({
                "type": "encrypted",
                "ciphertext": ciphertext,
                "iv": iv,
                "from": sender.name,
                "fromId": sender.user_id,
                "ts": ts.unwrap_or_else(now_ms),
            });
            if let Some(tag) = tag {
                envelope["tag"] = json!(tag);
            }
            if let Some(salt) = salt {
                envelope["salt"] = json!(salt);
            }
            if let Some(alg) = alg {
                envelope["alg"] = json!(alg);
            }
            if let Some(recipient) = recipient_id {
                envelope["recipientId"] = json!(recipient);
            }
            state
                .rooms
                .broadcast(room_id, Some(sender.conn_id), &envelope.to_string());
        }
        ClientFrame::System { text, ts, url } => {
            if blank(&text) {
                return true;
            }
            let mut envelope = json!({
                "type": "system",
                "text": text,
                "ts": ts.unwrap_or_else(now_ms),
            });
            if let Some(url) = url {
                envelope["url"] = json!(url);
            }
            state
                .rooms
                .broadcast(room_id, Some(sender.conn_id), &envelope.to_string());
        }
        ClientFrame::EpisodeChanged {
            url,
            ts,
            seq,
            title,
        } => {
            if blank(&url) {
                return true;
            }
            if let Some(info) = state.rooms.set_episode(room_id, &url) {
                mirror_rewrite(state, info);
            }
            let mut envelope = json!({
                "type": "episode-changed",
                "url": url,
                "ts": ts.unwrap_or_else(now_ms),
                "from": sender.name,
                "fromId": sender.user_id,
            });
            // seq forwarded verbatim; dedupe is a client concern
            if let Some(seq) = seq {
                envelope["seq"] = json!(seq);
            }
            if let Some(title) = title {
                envelope["title"] = json!(title);
            }
            state
                .rooms
                .broadcast(room_id, Some(sender.conn_id), &envelope.to_string());
        }
        ClientFrame::SyncRequest { ts } => {
            let envelope = json!({
                "type": "sync-request",
                "from": sender.name,
                "fromId": sender.user_id,
                "ts": ts.unwrap_or_else(now_ms),
            });
            state
                .rooms
                .broadcast(room_id, Some(sender.conn_id), &envelope.to_string());
        }
        ClientFrame::SyncState {
            time,
            paused,
            url,
            ts,
        } => {
            if blank(&url) {
                return true;
            }
            if let Some(info) = state.rooms.update_video_state(room_id, &url, time) {
                mirror_rewrite(state, info);
            }
            let envelope = json!({
                "type": "sync-state",
                "time": time,
                "paused": paused,
                "url": url,
                "from": sender.name,
                "fromId": sender.user_id,
                "ts": ts.unwrap_or_else(now_ms),
            });
            state
                .rooms
                .broadcast(room_id, Some(sender.conn_id), &envelope.to_string());
        }
        ClientFrame::State { payload } => {
            if encrypted_room {
                debug!(room = %room_id, from = %sender.user_id, "plaintext state refused in encrypted room");
                return true;
            }
            let envelope = json!({"type": "state", "payload": payload});
            state
                .rooms
                .broadcast(room_id, Some(sender.conn_id), &envelope.to_string());
        }
        ClientFrame::Chat { text, ts } => {
            if encrypted_room {
                debug!(room = %room_id, from = %sender.user_id, "plaintext chat refused in encrypted room");
                return true;
            }
            if blank(&text) {
                return true;
            }
            let mut envelope = json!({
                "type": "chat",
                "text": text,
                "from": sender.name,
                "fromId": sender.user_id,
                "ts": ts.unwrap_or_else(now_ms),
            });
            if let Some(picture) = &sender.picture {
                envelope["avatar"] = json!(picture);
            }
            // the sender gets the echo too: the server copy is the delivery
            // confirmation
            state.rooms.broadcast(room_id, None, &envelope.to_string());
        }
        ClientFrame::Typing { active, ts } => {
            if encrypted_room {
                debug!(room = %room_id, from = %sender.user_id, "plaintext typing refused in encrypted room");
                return true;
            }
            let envelope = json!({
                "type": "typing",
                "from": sender.name,
                "fromId": sender.user_id,
                "active": active,
                "ts": ts.unwrap_or_else(now_ms),
            });
            state
                .rooms
                .broadcast(room_id, Some(sender.conn_id), &envelope.to_string());
        }
    }
    true
}

/// Opportunistic mirror rewrite after advertised metadata changed. Failure
/// never blocks the broadcast.
fn mirror_rewrite(state: &AppState, info: RoomInfo) {
    if let Some(mirror) = state.mirror.clone() {
        tokio::spawn(async move { mirror.store(&info).await });
    }
}
