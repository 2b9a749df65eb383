//! WatchParty room hub: authenticated WebSocket relay with per-room message
//! policy, presence, liveness enforcement and an HTTP control plane.

pub mod auth;
pub mod config;
pub mod messages;
pub mod mirror;
pub mod relay;
pub mod rooms;
pub mod routing;
pub mod websocket;

use std::time::{Duration, Instant};

use anyhow::Result;

use crate::auth::TokenVerifier;
use crate::config::ServerConfig;
use crate::mirror::MetadataMirror;
use crate::rooms::RoomRegistry;

/// Server state shared across connections and the control plane.
pub struct AppState {
    pub config: ServerConfig,
    pub verifier: TokenVerifier,
    pub rooms: RoomRegistry,
    /// Shared room-metadata cache; `None` runs in-memory only.
    pub mirror: Option<MetadataMirror>,
    pub started: Instant,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Result<Self> {
        let verifier = TokenVerifier::from_config(&config)?;
        let mirror = match &config.cache_url {
            Some(url) => Some(MetadataMirror::connect(url)?),
            None => None,
        };
        let rooms = RoomRegistry::new(
            Duration::from_secs(config.room_empty_grace),
            config.default_encryption,
            mirror.clone(),
        );
        Ok(Self {
            config,
            verifier,
            rooms,
            mirror,
            started: Instant::now(),
        })
    }
}
