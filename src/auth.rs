//! Session token verification

use anyhow::Result;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::config::ServerConfig;

/// Claims carried by a verified session token.
///
/// Outbound message attribution always uses these values; nothing a client
/// puts inside a frame can override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    pub exp: u64,
}

/// Single opaque verification failure. Callers must not learn (or leak)
/// whether a token was malformed, badly signed or expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidToken;

impl fmt::Display for InvalidToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid token")
    }
}

impl std::error::Error for InvalidToken {}

pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    /// Build the verifier from server configuration.
    ///
    /// Production refuses to start without a signing secret. Development
    /// without a secret, or with an empty audience, accepts unsigned claims
    /// and says so loudly at startup.
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let insecure = !config.is_production()
            && (config.session_secret.is_none() || config.token_audience.is_empty());

        if config.is_production() && config.session_secret.is_none() {
            anyhow::bail!("WP_SESSION_SECRET must be set in production");
        }

        if insecure {
            warn!("session token verification is DISABLED (dev mode): set WP_SESSION_SECRET and WP_TOKEN_AUDIENCE to enforce signatures");
            let mut validation = Validation::new(Algorithm::HS256);
            validation.insecure_disable_signature_validation();
            validation.validate_exp = false;
            validation.validate_aud = false;
            validation.required_spec_claims.clear();
            return Ok(Self {
                key: DecodingKey::from_secret(&[]),
                validation,
            });
        }

        let secret = config
            .session_secret
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("WP_SESSION_SECRET must be set"))?;

        let mut validation = Validation::new(Algorithm::HS256);
        if config.token_audience.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&[&config.token_audience]);
        }

        Ok(Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    /// Verify a compact session token and return its claims.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, InvalidToken> {
        decode::<SessionClaims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|_| InvalidToken)
    }
}
