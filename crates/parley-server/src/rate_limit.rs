//! Token-bucket throttling for REST callers and relay sockets.
//!
//! REST requests are charged to the verified token subject when the caller
//! sends one, and to the peer address otherwise. `X-Forwarded-For` and
//! `X-Real-IP` are only read when `TRUST_FORWARDED_FOR` is on. Relay sockets
//! are charged per connection through their own [`TokenBucket`].

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, State},
    http::{header::AUTHORIZATION, Request},
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;
use tracing::warn;

use parley_shared::UserId;

use crate::api::AppState;
use crate::auth::bearer_token;
use crate::config::ServerConfig;
use crate::error::ServerError;

/// A refilling budget of `capacity` tokens gaining `rate` tokens a second.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    rate: f64,
    capacity: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate: f64, capacity: f64) -> Self {
        let capacity = capacity.max(1.0);
        Self {
            tokens: capacity,
            rate: rate.max(0.0),
            capacity,
            last_refill: Instant::now(),
        }
    }

    /// Spend one token if there is one.
    pub fn try_take(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.duration_since(self.last_refill)
    }
}

/// Who a REST request is charged to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CallerKey {
    User(UserId),
    Addr(IpAddr),
}

impl fmt::Display for CallerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(user) => write!(f, "user:{user}"),
            Self::Addr(ip) => write!(f, "addr:{ip}"),
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<CallerKey, TokenBucket>>>,
    rate: f64,
    capacity: f64,
}

impl RateLimiter {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            rate,
            capacity,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.rate_limit_per_sec, config.rate_limit_burst)
    }

    pub async fn check(&self, key: &CallerKey) -> bool {
        let mut buckets = self.buckets.lock().await;
        if let Some(bucket) = buckets.get_mut(key) {
            return bucket.try_take();
        }
        let mut bucket = TokenBucket::new(self.rate, self.capacity);
        let allowed = bucket.try_take();
        buckets.insert(key.clone(), bucket);
        allowed
    }

    /// Forget callers that have been quiet for at least `max_idle`.
    pub async fn purge_stale(&self, max_idle: Duration) {
        let now = Instant::now();
        self.buckets
            .lock()
            .await
            .retain(|_, bucket| bucket.idle_for(now) < max_idle);
    }

    pub async fn tracked_clients(&self) -> usize {
        self.buckets.lock().await.len()
    }
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ServerError> {
    if let Some(key) = caller_key(&state, &req) {
        if !state.rate_limiter.check(&key).await {
            warn!(caller = %key, path = %req.uri().path(), "Rate limit exceeded");
            return Err(ServerError::RateLimited);
        }
    }

    Ok(next.run(req).await)
}

/// A valid bearer token wins; an invalid one is charged to the address so
/// garbage tokens cannot mint fresh buckets.
fn caller_key<B>(state: &AppState, req: &Request<B>) -> Option<CallerKey> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if let Some(token) = bearer_token(header) {
        if let Ok(claims) = state.auth.verify(token) {
            return Some(CallerKey::User(UserId(claims.sub)));
        }
    }
    client_addr(req, state.config.trust_forwarded_for).map(CallerKey::Addr)
}

fn client_addr<B>(req: &Request<B>, trust_forwarded: bool) -> Option<IpAddr> {
    if trust_forwarded {
        if let Some(ip) = forwarded_addr(req) {
            return Some(ip);
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

fn forwarded_addr<B>(req: &Request<B>) -> Option<IpAddr> {
    let header = |name: &str| req.headers().get(name).and_then(|v| v.to_str().ok());

    header("x-forwarded-for")
        .and_then(|value| value.split(',').next())
        .or_else(|| header("x-real-ip"))
        .and_then(|raw| raw.trim().parse().ok())
}
