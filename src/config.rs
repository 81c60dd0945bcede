use std::fmt;

use anyhow::Context;
use serde::Deserialize;

/// Tokens never live longer than a day.
pub const MAX_TOKEN_TTL_MINUTES: i64 = 60 * 24;

/// Parses `JWT_TTL_MINUTES`, falling back to the maximum and clamping into
/// `1..=MAX_TOKEN_TTL_MINUTES`.
pub fn ttl_minutes_from(raw: Option<&str>) -> i64 {
    raw.and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(MAX_TOKEN_TTL_MINUTES)
        .clamp(1, MAX_TOKEN_TTL_MINUTES)
}

#[derive(Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

// Keeps the signing secret out of logs and panic messages.
impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("ttl_minutes", &self.ttl_minutes)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub jwt: JwtConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let secret = std::env::var("JWT_SECRET").context("JWT_SECRET is not set")?;
        if secret.trim().is_empty() {
            anyhow::bail!("JWT_SECRET must not be empty");
        }
        let jwt = JwtConfig {
            secret,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "fieldgate".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "fieldgate-users".into()),
            ttl_minutes: ttl_minutes_from(std::env::var("JWT_TTL_MINUTES").ok().as_deref()),
        };
        let db_max_connections = std::env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(10);
        Ok(Self {
            database_url,
            db_max_connections,
            jwt,
        })
    }
}
