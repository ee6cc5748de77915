//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use parley_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_RELAY_QUEUE_CAPACITY};

use crate::presence::PresencePolicy;

/// Development-only signing secret, used when `JWT_SECRET` is unset.
const DEV_JWT_SECRET: &str = "parley-dev-secret-change-me";

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API and the relay WebSocket.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:3000`
    pub http_addr: SocketAddr,

    /// SQLite database file. `:memory:` keeps everything in RAM.
    /// Env: `DATABASE_PATH`
    /// Default: `./parley.db`
    pub database_path: PathBuf,

    /// HS256 secret used to verify bearer tokens.
    /// Env: `JWT_SECRET`
    /// Default: a fixed development secret (logged as a warning).
    pub jwt_secret: String,

    /// What happens when a user registers a second live connection.
    /// Env: `PRESENCE_POLICY` (`latest` / `first`)
    /// Default: `latest`
    pub presence_policy: PresencePolicy,

    /// Capacity of each connection's outbound relay queue.
    /// Env: `RELAY_QUEUE_CAPACITY`
    pub relay_queue_capacity: usize,

    /// Maximum number of concurrent WebSocket connections (0 = unlimited).
    /// Env: `MAX_CONNECTIONS`
    /// Default: `0`
    pub max_connections: usize,

    /// Refuse relay sockets opened without `?token=`.
    /// Env: `REQUIRE_WS_TOKEN` (`true` / `false`)
    /// Default: `true`
    pub require_ws_token: bool,

    /// Sustained REST requests per second allowed per caller (token
    /// subject, or peer address for anonymous calls).
    /// Env: `RATE_LIMIT_PER_SEC`
    pub rate_limit_per_sec: f64,

    /// Burst size of the per-caller REST bucket.
    /// Env: `RATE_LIMIT_BURST`
    pub rate_limit_burst: f64,

    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`.
    /// Only enable behind a reverse proxy that overwrites those headers.
    /// Env: `TRUST_FORWARDED_FOR`
    /// Default: `false`
    pub trust_forwarded_for: bool,

    /// Sustained `sendMessage` frames per second allowed per relay socket.
    /// Env: `WS_MESSAGES_PER_SEC`
    pub ws_messages_per_sec: f64,

    /// Burst size of the per-socket `sendMessage` bucket.
    /// Env: `WS_MESSAGE_BURST`
    pub ws_message_burst: f64,

    /// Admin API bearer token. Required to access /api/admin/* endpoints.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (admin API disabled).
    pub admin_token: Option<String>,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    pub instance_name: String,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("jwt_secret", &"<redacted>")
            .field("presence_policy", &self.presence_policy)
            .field("relay_queue_capacity", &self.relay_queue_capacity)
            .field("max_connections", &self.max_connections)
            .field("require_ws_token", &self.require_ws_token)
            .field("rate_limit_per_sec", &self.rate_limit_per_sec)
            .field("rate_limit_burst", &self.rate_limit_burst)
            .field("trust_forwarded_for", &self.trust_forwarded_for)
            .field("ws_messages_per_sec", &self.ws_messages_per_sec)
            .field("ws_message_burst", &self.ws_message_burst)
            .field("admin_enabled", &self.admin_token.is_some())
            .field("instance_name", &self.instance_name)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./parley.db"),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            presence_policy: PresencePolicy::LatestWins,
            relay_queue_capacity: DEFAULT_RELAY_QUEUE_CAPACITY,
            max_connections: 0,
            require_ws_token: true,
            rate_limit_per_sec: 10.0,
            rate_limit_burst: 30.0,
            trust_forwarded_for: false,
            ws_messages_per_sec: 5.0,
            ws_message_burst: 20.0,
            admin_token: None,
            instance_name: "Parley".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = get("HTTP_ADDR") {
            parse_into(&mut config.http_addr, "HTTP_ADDR", &addr);
        }

        if let Some(path) = get("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        match get("JWT_SECRET") {
            Some(secret) if !secret.is_empty() => config.jwt_secret = secret,
            _ => tracing::warn!("JWT_SECRET not set, using the development secret"),
        }

        if let Some(val) = get("PRESENCE_POLICY") {
            parse_into(&mut config.presence_policy, "PRESENCE_POLICY", &val);
        }

        if let Some(val) = get("RELAY_QUEUE_CAPACITY") {
            parse_into(&mut config.relay_queue_capacity, "RELAY_QUEUE_CAPACITY", &val);
            config.relay_queue_capacity = config.relay_queue_capacity.max(1);
        }

        if let Some(val) = get("MAX_CONNECTIONS") {
            parse_into(&mut config.max_connections, "MAX_CONNECTIONS", &val);
        }

        if let Some(val) = get("REQUIRE_WS_TOKEN") {
            parse_into(&mut config.require_ws_token, "REQUIRE_WS_TOKEN", &val);
        }

        if let Some(val) = get("RATE_LIMIT_PER_SEC") {
            parse_into(&mut config.rate_limit_per_sec, "RATE_LIMIT_PER_SEC", &val);
        }

        if let Some(val) = get("RATE_LIMIT_BURST") {
            parse_into(&mut config.rate_limit_burst, "RATE_LIMIT_BURST", &val);
        }

        if let Some(val) = get("TRUST_FORWARDED_FOR") {
            parse_into(&mut config.trust_forwarded_for, "TRUST_FORWARDED_FOR", &val);
        }

        if let Some(val) = get("WS_MESSAGES_PER_SEC") {
            parse_into(&mut config.ws_messages_per_sec, "WS_MESSAGES_PER_SEC", &val);
        }

        if let Some(val) = get("WS_MESSAGE_BURST") {
            parse_into(&mut config.ws_message_burst, "WS_MESSAGE_BURST", &val);
        }

        if let Some(token) = get("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        if let Some(name) = get("INSTANCE_NAME") {
            config.instance_name = name;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    pub fn in_memory_database(&self) -> bool {
        self.database_path.as_os_str() == ":memory:"
    }
}

/// Overwrite `slot` with the parsed value, or keep the default and warn.
fn parse_into<T: FromStr>(slot: &mut T, key: &str, raw: &str) {
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "Invalid value, using default"),
    }
}
