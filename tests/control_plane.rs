//! Control-plane tests driven through the router

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tower::ServiceExt;
use watchparty_server::config::ServerConfig;
use watchparty_server::rooms::{valid_room_id, EnsureOptions};
use watchparty_server::{routing, AppState};

const SECRET: &str = "test-secret";
const AUDIENCE: &str = "watchparty";

#[derive(Serialize)]
struct MintClaims<'a> {
    sub: &'a str,
    name: &'a str,
    aud: &'a str,
    exp: u64,
}

fn token(sub: &str, name: &str) -> String {
    let exp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
        + 3600;
    encode(
        &Header::default(),
        &MintClaims {
            sub,
            name,
            aud: AUDIENCE,
            exp,
        },
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        environment: "development".to_string(),
        session_secret: Some(SECRET.to_string()),
        token_audience: AUDIENCE.to_string(),
        cors_origins: None,
        default_encryption: false,
        cache_url: None,
        room_empty_grace: 86_400,
        ping_interval: 15,
        activity_timeout: 7_200,
        max_frame_bytes: 65_536,
    }
}

fn setup() -> (Router, Arc<AppState>) {
    let state = Arc::new(AppState::new(test_config()).unwrap());
    (routing::create_router(state.clone()), state)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post(uri: &str, bearer: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn health_reports_status_and_uptime() {
    let (router, _state) = setup();
    let response = router.oneshot(get("/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert!(body["uptime"].is_u64());
}

#[tokio::test]
async fn create_room_returns_metadata_and_identity() {
    let (router, state) = setup();
    let token = token("alice-sub", "Alice");

    let response = router
        .oneshot(post("/rooms", Some(&token), "{}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let room_id = body["room_id"].as_str().unwrap();
    assert!(valid_room_id(room_id));
    assert_eq!(body["encryption_required"], false);
    assert_eq!(body["video_url"], Value::Null);
    assert_eq!(body["user"]["id"], "alice-sub");
    assert_eq!(body["user"]["name"], "Alice");

    // the record exists and, being unoccupied, already has its grace timer
    assert!(state.rooms.lookup(room_id).is_some());
    assert_eq!(state.rooms.has_deletion_timer(room_id), Some(true));
}

#[tokio::test]
async fn create_room_honors_options() {
    let (router, _state) = setup();
    let token = token("alice-sub", "Alice");

    let body = r#"{
        "encryption_required": true,
        "video_url": "https://www.example.com/watch/81029385?trackId=155",
        "video_time": 42.5
    }"#;
    let response = router
        .oneshot(post("/rooms", Some(&token), body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["encryption_required"], true);
    assert_eq!(
        body["video_url"],
        "https://www.example.com/watch/81029385?trackId=155"
    );
    assert_eq!(body["title_id"], "81029385");
    assert_eq!(body["initial_time"], 42.5);
}

#[tokio::test]
async fn control_plane_requires_a_bearer_token() {
    let (router, _state) = setup();

    let response = router
        .clone()
        .oneshot(post("/rooms", None, "{}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "authentication required");

    let response = router
        .clone()
        .oneshot(post("/rooms", Some("garbage"), "{}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = router
        .oneshot(get("/rooms/movie-night/preview", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn preflight_returns_existing_room_metadata() {
    let (router, state) = setup();
    let token = token("bob-sub", "Bob");

    state.rooms.ensure(
        "movie-night",
        EnsureOptions {
            encryption_required: Some(true),
            video_url: Some("https://www.example.com/watch/81029385".to_string()),
            title_id: Some("81029385".to_string()),
            initial_time: Some(12.0),
        },
    );

    let response = router
        .oneshot(post("/rooms/movie-night/join", Some(&token), ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["room_id"], "movie-night");
    assert_eq!(body["encryption_required"], true);
    assert_eq!(body["title_id"], "81029385");
    assert_eq!(body["user"]["id"], "bob-sub");

    // preflight is not a state transition
    assert_eq!(state.rooms.member_count("movie-night"), 0);
    assert_eq!(state.rooms.has_deletion_timer("movie-night"), Some(true));
}

#[tokio::test]
async fn preview_has_the_same_shape_as_preflight() {
    let (router, state) = setup();
    let token = token("bob-sub", "Bob");

    state.rooms.ensure("movie-night", EnsureOptions::default());

    let response = router
        .oneshot(get("/rooms/movie-night/preview", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["room_id"], "movie-night");
    assert_eq!(body["encryption_required"], false);
    assert_eq!(state.rooms.member_count("movie-night"), 0);
}

#[tokio::test]
async fn unknown_and_malformed_room_ids_are_not_found() {
    let (router, _state) = setup();
    let token = token("bob-sub", "Bob");

    let response = router
        .clone()
        .oneshot(post("/rooms/no-such-room/join", Some(&token), ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"], "room not found");

    // too short for a room id; same response as unknown
    let response = router
        .clone()
        .oneshot(post("/rooms/ab/join", Some(&token), ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = router
        .oneshot(get("/rooms/ab/preview", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
