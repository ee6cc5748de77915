/// Protocol version reported by the health endpoint and the CLI.
pub const PROTOCOL_VERSION: &str = "parley/1";

/// Application name
pub const APP_NAME: &str = "Parley";

/// Prefix of every REST route.
pub const API_PREFIX: &str = "/api";

/// Path of the relay WebSocket endpoint.
pub const WS_PATH: &str = "/ws";

/// Maximum message body length, in characters.
pub const MAX_MESSAGE_CHARS: usize = 4_000;

/// Maximum username length, in characters.
pub const MAX_USERNAME_CHARS: usize = 64;

/// Default HTTP port (REST API and relay share one listener).
pub const DEFAULT_HTTP_PORT: u16 = 3000;

/// Capacity of each connection's outbound relay queue.
pub const DEFAULT_RELAY_QUEUE_CAPACITY: usize = 64;

/// Relay reconnect backoff bounds, in seconds.
pub const RECONNECT_MIN_BACKOFF_SECS: u64 = 2;
pub const RECONNECT_MAX_BACKOFF_SECS: u64 = 60;
