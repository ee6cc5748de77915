//! Presence registry: which users currently hold a live relay connection.
//!
//! The registry sits behind the [`PresenceStore`] trait so a multi-process
//! deployment can swap the in-process map for a shared keyed store.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use parley_shared::protocol::ServerEvent;
use parley_shared::UserId;

/// Identifier of one WebSocket connection, unique per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Handle used to push events to a live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub tx: mpsc::Sender<ServerEvent>,
    /// The socket was opened with a valid token for the user it serves.
    pub verified: bool,
}

/// What `register` does when the user already has a live entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresencePolicy {
    /// Keep the existing entry; the new registration is a no-op. A user who
    /// reconnects before the old socket is closed keeps stale routing until
    /// that old socket's disconnect fires.
    FirstWins,
    /// The newest connection replaces the old entry.
    LatestWins,
}

impl FromStr for PresencePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "first" | "first-wins" | "first_wins" => Ok(Self::FirstWins),
            "latest" | "latest-wins" | "latest_wins" => Ok(Self::LatestWins),
            other => Err(format!("unknown presence policy: {other}")),
        }
    }
}

impl std::fmt::Display for PresencePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::FirstWins => "first",
            Self::LatestWins => "latest",
        })
    }
}

/// Outcome of a `register` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// No previous entry for the user.
    Inserted,
    /// The same connection was already registered for the user.
    Unchanged,
    /// `LatestWins`: the previous connection lost its entry.
    Replaced { previous: ConnectionId },
    /// `FirstWins`: the previous connection kept its entry.
    KeptExisting { existing: ConnectionId },
}

#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn register(&self, user: UserId, conn: ConnectionHandle) -> Registration;

    /// Remove whatever entry points at `conn`. Idempotent.
    async fn unregister(&self, conn: ConnectionId) -> Option<UserId>;

    async fn lookup(&self, user: &UserId) -> Option<ConnectionHandle>;

    async fn online_count(&self) -> usize;
}

#[derive(Default)]
struct Tables {
    by_user: HashMap<UserId, ConnectionHandle>,
    by_conn: HashMap<ConnectionId, UserId>,
}

/// Single-process presence table, indexed both ways.
#[derive(Clone)]
pub struct InMemoryPresence {
    policy: PresencePolicy,
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryPresence {
    pub fn new(policy: PresencePolicy) -> Self {
        Self {
            policy,
            tables: Arc::new(RwLock::new(Tables::default())),
        }
    }
}

#[async_trait]
impl PresenceStore for InMemoryPresence {
    async fn register(&self, user: UserId, conn: ConnectionHandle) -> Registration {
        let mut tables = self.tables.write().await;

        // A connection carries one identity at a time.
        if let Some(previous_user) = tables.by_conn.get(&conn.id).cloned() {
            if previous_user == user {
                return Registration::Unchanged;
            }
            tables.by_conn.remove(&conn.id);
            tables.by_user.remove(&previous_user);
            debug!(conn = %conn.id, user = %previous_user, "Connection switched identity");
        }

        let existing = tables.by_user.get(&user).map(|h| h.id);
        match (existing, self.policy) {
            (None, _) => {
                tables.by_conn.insert(conn.id, user.clone());
                tables.by_user.insert(user, conn);
                Registration::Inserted
            }
            (Some(existing), PresencePolicy::FirstWins) => {
                debug!(user = %user, %existing, ignored = %conn.id, "User already registered");
                Registration::KeptExisting { existing }
            }
            (Some(previous), PresencePolicy::LatestWins) => {
                tables.by_conn.remove(&previous);
                tables.by_conn.insert(conn.id, user.clone());
                tables.by_user.insert(user, conn);
                Registration::Replaced { previous }
            }
        }
    }

    async fn unregister(&self, conn: ConnectionId) -> Option<UserId> {
        let mut tables = self.tables.write().await;
        let user = tables.by_conn.remove(&conn)?;
        if tables.by_user.get(&user).is_some_and(|h| h.id == conn) {
            tables.by_user.remove(&user);
        }
        Some(user)
    }

    async fn lookup(&self, user: &UserId) -> Option<ConnectionHandle> {
        self.tables.read().await.by_user.get(user).cloned()
    }

    async fn online_count(&self) -> usize {
        self.tables.read().await.by_user.len()
    }
}
