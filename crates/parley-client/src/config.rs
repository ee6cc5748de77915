//! Client configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use parley_shared::constants::{API_PREFIX, DEFAULT_HTTP_PORT, WS_PATH};
use parley_shared::UserId;

#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL of the REST API, including the `/api` prefix.
    /// Env: `PARLEY_API_URL`
    /// Default: `http://127.0.0.1:3000/api`
    pub api_url: String,

    /// Relay WebSocket URL.
    /// Env: `PARLEY_WS_URL`
    /// Default: derived from the API URL (`ws://host/ws`).
    pub ws_url: String,

    /// Timeout applied to every REST call.
    /// Env: `PARLEY_TIMEOUT_SECS`
    /// Default: 10 seconds.
    pub request_timeout: Duration,

    /// Bearer token issued by the auth service.
    /// Env: `PARLEY_TOKEN`
    pub token: Option<String>,

    /// Id of the signed-in user (the token's subject).
    /// Env: `PARLEY_USER_ID`
    pub user_id: Option<UserId>,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_url", &self.api_url)
            .field("ws_url", &self.ws_url)
            .field("request_timeout", &self.request_timeout)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("user_id", &self.user_id)
            .finish()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        let api_url = format!("http://127.0.0.1:{DEFAULT_HTTP_PORT}{API_PREFIX}");
        Self {
            ws_url: ws_url_for(&api_url),
            api_url,
            request_timeout: Duration::from_secs(10),
            token: None,
            user_id: None,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = get("PARLEY_API_URL").filter(|u| !u.is_empty()) {
            config.api_url = url.trim_end_matches('/').to_string();
            config.ws_url = ws_url_for(&config.api_url);
        }

        if let Some(url) = get("PARLEY_WS_URL").filter(|u| !u.is_empty()) {
            config.ws_url = url;
        }

        if let Some(raw) = get("PARLEY_TIMEOUT_SECS") {
            match u64::from_str(raw.trim()) {
                Ok(secs) if secs > 0 => config.request_timeout = Duration::from_secs(secs),
                _ => tracing::warn!(value = %raw, "Invalid PARLEY_TIMEOUT_SECS, using default"),
            }
        }

        config.token = get("PARLEY_TOKEN").filter(|t| !t.is_empty());
        config.user_id = get("PARLEY_USER_ID")
            .filter(|u| !u.is_empty())
            .map(UserId);

        config
    }
}

/// `http://host:port/api` -> `ws://host:port/ws`.
fn ws_url_for(api_url: &str) -> String {
    let (scheme, rest) = match api_url.split_once("://") {
        Some(("https", rest)) => ("wss", rest),
        Some((_, rest)) => ("ws", rest),
        None => ("ws", api_url),
    };
    let host = rest.split('/').next().unwrap_or(rest);
    format!("{scheme}://{host}{WS_PATH}")
}
