//! WebSocket connection handling
//!
//! One socket task per connection multiplexes the reader and the heartbeat
//! tick; a forward task drains the bounded outbound queue so concurrent
//! senders never interleave frame bytes on the wire.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::SessionClaims;
use crate::messages::{now_ms, ClientFrame, Outbound};
use crate::relay;
use crate::rooms::{self, EnsureOptions, Member, OUTBOUND_QUEUE};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(rename = "roomId")]
    pub room_id: String,
    pub token: String,
}

// ---------------------------------------------------------------------------
// Upgrade handler
// ---------------------------------------------------------------------------

/// Handle the `/ws` upgrade. Missing or invalid inputs reject the handshake
/// with an empty body; the streaming endpoint never explains itself.
pub async fn handle_websocket(
    ws: WebSocketUpgrade,
    query: Option<Query<WsQuery>>,
    State(state): State<Arc<AppState>>,
) -> Response {
    // extracted as Option so a missing roomId/token gets the same empty-body
    // rejection as a bad one, not axum's explanatory 400
    let Some(Query(query)) = query else {
        debug!("websocket upgrade rejected: missing query parameters");
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let claims = match state.verifier.verify(&query.token) {
        Ok(claims) => claims,
        Err(_) => {
            debug!("websocket upgrade rejected: invalid token");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };
    if !rooms::valid_room_id(&query.room_id) {
        debug!("websocket upgrade rejected: bad room id");
        return StatusCode::NOT_FOUND.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.room_id, claims))
        .into_response()
}

// ---------------------------------------------------------------------------
// Socket lifecycle
// ---------------------------------------------------------------------------

async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    room_id: String,
    claims: SessionClaims,
) {
    // A room known only to the mirror (other instance, or created before a
    // restart) is hydrated locally so `encryption_required` survives.
    if state.rooms.lookup(&room_id).is_none() {
        if let Some(mirror) = &state.mirror {
            if let Some(meta) = mirror.fetch(&room_id).await {
                state.rooms.ensure(&room_id, EnsureOptions::from_info(meta));
            }
        }
    }
    state.rooms.ensure(&room_id, EnsureOptions::default());

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE);

    let conn_id = Uuid::new_v4();
    let member = Member {
        conn_id,
        user_id: claims.sub.clone(),
        name: claims.name.clone(),
        picture: claims.picture.clone(),
        tx: tx.clone(),
    };
    if !state.rooms.attach(&room_id, member.clone()) {
        return;
    }
    info!(room = %room_id, user = %member.user_id, "connection attached");

    // Writes to this connection are serialized here; everyone else only ever
    // holds the queue sender.
    let forward_task = tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            let msg = match out {
                Outbound::Frame(text) => Message::Text(text),
                Outbound::Ping => Message::Ping(Vec::new()),
            };
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let ping_interval = Duration::from_secs(state.config.ping_interval);
    let activity_timeout = Duration::from_secs(state.config.activity_timeout);
    let max_frame_bytes = state.config.max_frame_bytes;

    let mut ticker = tokio::time::interval(ping_interval);
    ticker.tick().await; // skip first immediate tick

    let mut last_activity = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            incoming = ws_receiver.next() => {
                match incoming {
                    Some(Ok(msg)) => {
                        // any inbound activity counts, decodable or not
                        last_activity = Instant::now();
                        awaiting_pong = false;
                        match msg {
                            Message::Text(text) => {
                                if text.len() > max_frame_bytes {
                                    debug!(room = %room_id, bytes = text.len(), "dropping oversize frame");
                                    continue;
                                }
                                match serde_json::from_str::<ClientFrame>(&text) {
                                    Ok(frame) => {
                                        if !relay::handle_frame(&state, &room_id, &member, frame) {
                                            break;
                                        }
                                    }
                                    Err(err) => {
                                        debug!(room = %room_id, error = %err, "dropping undecodable frame");
                                    }
                                }
                            }
                            Message::Binary(_) => {
                                debug!(room = %room_id, "dropping binary frame");
                            }
                            Message::Ping(_) | Message::Pong(_) => {}
                            Message::Close(_) => break,
                        }
                    }
                    Some(Err(err)) => {
                        debug!(room = %room_id, error = %err, "websocket error");
                        break;
                    }
                    None => break,
                }
            }
            _ = ticker.tick() => {
                if last_activity.elapsed() > activity_timeout {
                    info!(room = %room_id, user = %member.user_id, "activity timeout, closing connection");
                    break;
                }
                if awaiting_pong {
                    info!(room = %room_id, user = %member.user_id, "ping unanswered, closing connection");
                    break;
                }
                awaiting_pong = true;
                // both a protocol ping and a JSON ping: proxies that strip
                // control frames still let the text frame through
                let ping = json!({"type": "ping", "ts": now_ms()}).to_string();
                if tx.try_send(Outbound::Ping).is_err()
                    || tx.try_send(Outbound::Frame(ping)).is_err()
                {
                    break;
                }
            }
        }
    }

    // Teardown is idempotent: detach emits presence to the remaining members
    // and arms the grace timer when the room empties. Aborting the forward
    // task drops the sink without a graceful close.
    state.rooms.detach(&room_id, conn_id);
    forward_task.abort();
    info!(room = %room_id, user = %member.user_id, "connection closed");
}
