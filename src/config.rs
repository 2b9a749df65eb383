//! Server configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Deployment environment ("development" or "production")
    pub environment: String,
    /// HS256 session signing secret; required in production
    pub session_secret: Option<String>,
    /// Expected token audience; empty enables dev-mode acceptance
    pub token_audience: String,
    /// Comma-separated list of allowed CORS origins
    pub cors_origins: Option<String>,
    /// `encryption_required` for rooms created without an explicit value
    pub default_encryption: bool,
    /// Redis URL for the shared room-metadata mirror
    pub cache_url: Option<String>,
    /// Seconds an empty room survives before deletion
    pub room_empty_grace: u64,
    /// Heartbeat ping interval in seconds
    pub ping_interval: u64,
    /// Seconds without inbound activity before a connection is dropped
    pub activity_timeout: u64,
    /// Maximum inbound text frame size in bytes
    pub max_frame_bytes: usize,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = ServerConfig {
            host: env::var("WP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("WP_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("Invalid WP_PORT")?,
            environment: env::var("WP_ENV").unwrap_or_else(|_| "development".to_string()),
            session_secret: env::var("WP_SESSION_SECRET").ok().filter(|s| !s.is_empty()),
            token_audience: env::var("WP_TOKEN_AUDIENCE").unwrap_or_default(),
            cors_origins: env::var("WP_CORS_ORIGINS").ok(),
            default_encryption: env::var("WP_DEFAULT_ENCRYPTION")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .context("Invalid WP_DEFAULT_ENCRYPTION")?,
            cache_url: env::var("WP_CACHE_URL").ok().filter(|s| !s.is_empty()),
            room_empty_grace: env::var("WP_ROOM_EMPTY_GRACE")
                .unwrap_or_else(|_| "86400".to_string()) // 1 day
                .parse()
                .context("Invalid WP_ROOM_EMPTY_GRACE")?,
            ping_interval: env::var("WP_PING_INTERVAL")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .context("Invalid WP_PING_INTERVAL")?,
            activity_timeout: env::var("WP_ACTIVITY_TIMEOUT")
                .unwrap_or_else(|_| "7200".to_string()) // 2 hours
                .parse()
                .context("Invalid WP_ACTIVITY_TIMEOUT")?,
            max_frame_bytes: env::var("WP_MAX_FRAME_BYTES")
                .unwrap_or_else(|_| "65536".to_string()) // 64 KiB
                .parse()
                .context("Invalid WP_MAX_FRAME_BYTES")?,
        };

        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}
