//! Domain model structs persisted in the SQLite database.
//!
//! Chats and messages are the shared wire types from `parley-shared`; only
//! the user row carries store-specific bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use parley_shared::types::{Chat, ChatId, Message, MessageId, UserId, UserProfile};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A known user. The primary key is the auth layer's subject id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    /// Optional human-readable display name.
    pub username: Option<String>,
    /// Optional avatar URL.
    pub avatar: Option<String>,
    /// When this user was first seen by the server.
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id.clone(),
            username: self.username.clone(),
            avatar: self.avatar.clone(),
        }
    }
}
