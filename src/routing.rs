//! HTTP routing and the room control plane

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::auth::SessionClaims;
use crate::rooms::{self, EnsureOptions, RoomInfo};
use crate::AppState;

type ApiError = (StatusCode, Json<Value>);

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = build_cors_layer(&state);

    Router::new()
        .route("/ws", get(crate::websocket::handle_websocket))
        .route("/health", get(health_check))
        .route("/rooms", post(create_room))
        .route("/rooms/:id/join", post(join_preflight))
        .route("/rooms/:id/preview", get(preview_room))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Build the CORS layer from config. No configured origins means deny in
/// production and allow-all in development.
fn build_cors_layer(state: &AppState) -> CorsLayer {
    match &state.config.cors_origins {
        Some(list) if !list.is_empty() => {
            let parsed: Vec<_> = list
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            CorsLayer::new().allow_origin(AllowOrigin::list(parsed))
        }
        _ if state.config.is_production() => CorsLayer::new(),
        _ => CorsLayer::permissive(),
    }
}

/// Liveness probe: static status plus an uptime counter
async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime": state.started.elapsed().as_secs(),
    }))
}

// ---------------------------------------------------------------------------
// Room control plane
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct CreateRoomRequest {
    encryption_required: Option<bool>,
    video_url: Option<String>,
    video_time: Option<f64>,
}

async fn create_room(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<CreateRoomRequest>>,
) -> Result<Json<Value>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    let req = body.map(|Json(b)| b).unwrap_or_default();

    let room_id = rooms::generate_room_id();
    let title_id = req.video_url.as_deref().and_then(rooms::extract_title_id);
    let info = state.rooms.ensure(
        &room_id,
        EnsureOptions {
            encryption_required: req.encryption_required,
            video_url: req.video_url,
            title_id,
            initial_time: req.video_time,
        },
    );
    if let Some(mirror) = &state.mirror {
        mirror.store(&info).await;
    }

    Ok(Json(room_response(&info, &claims)))
}

/// Join preflight: confirm the room still exists before the client opens a
/// streaming connection. Not a state transition; nobody is attached here.
async fn join_preflight(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    let info = resolve_room(&state, &room_id).await?;
    Ok(Json(room_response(&info, &claims)))
}

/// Preview: same shape as preflight, so a UI can render a "join this room?"
/// prompt without implying membership.
async fn preview_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    let info = resolve_room(&state, &room_id).await?;
    Ok(Json(room_response(&info, &claims)))
}

/// Registry first, then the mirror. Malformed ids take the not-found path so
/// nothing about id validity leaks.
async fn resolve_room(state: &AppState, room_id: &str) -> Result<RoomInfo, ApiError> {
    if !rooms::valid_room_id(room_id) {
        return Err(not_found());
    }
    if let Some(info) = state.rooms.lookup(room_id) {
        return Ok(info);
    }
    if let Some(mirror) = &state.mirror {
        if let Some(info) = mirror.fetch(room_id).await {
            return Ok(info);
        }
    }
    Err(not_found())
}

fn room_response(info: &RoomInfo, claims: &SessionClaims) -> Value {
    json!({
        "room_id": info.room_id,
        "encryption_required": info.encryption_required,
        "video_url": info.video_url,
        "title_id": info.title_id,
        "initial_time": info.initial_time,
        "user": {
            "id": claims.sub,
            "name": claims.name,
            "picture": claims.picture,
        },
    })
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<SessionClaims, ApiError> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(auth_required)?;
    state.verifier.verify(token).map_err(|_| auth_required())
}

fn auth_required() -> ApiError {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "authentication required"})),
    )
}

fn not_found() -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "room not found"})),
    )
}
