use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// User identity = opaque id issued by the auth layer (JWT `sub`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        let end = self.0.char_indices().nth(8).map(|(i, _)| i).unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ChatId(pub Uuid);

impl ChatId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for ChatId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A two-party conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: ChatId,
    /// Exactly two distinct users, initiator first.
    pub participant_refs: Vec<UserId>,
    /// Users who have acknowledged the latest state of the thread.
    pub seen_by: BTreeSet<UserId>,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Chat {
    pub fn is_participant(&self, user: &UserId) -> bool {
        self.participant_refs.contains(user)
    }

    pub fn is_seen_by(&self, user: &UserId) -> bool {
        self.seen_by.contains(user)
    }

    /// The participant that is not `me`, from `me`'s point of view.
    pub fn other_participant(&self, me: &UserId) -> Option<&UserId> {
        self.participant_refs.iter().find(|u| *u != me)
    }
}

/// A single chat utterance. Immutable once persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_ref: UserId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Public profile of a user, as joined into chat summaries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub id: UserId,
    pub username: Option<String>,
    pub avatar: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(a: &str, b: &str) -> Chat {
        Chat {
            id: ChatId::new(),
            participant_refs: vec![UserId::from(a), UserId::from(b)],
            seen_by: BTreeSet::from([UserId::from(a)]),
            last_message: None,
            last_message_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn other_participant_is_symmetric() {
        let c = chat("alice", "bob");
        assert_eq!(c.other_participant(&"alice".into()), Some(&UserId::from("bob")));
        assert_eq!(c.other_participant(&"bob".into()), Some(&UserId::from("alice")));
    }

    #[test]
    fn chat_serializes_camel_case() {
        let c = chat("alice", "bob");
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["participantRefs"][1], "bob");
        assert_eq!(json["seenBy"][0], "alice");
        assert!(json["lastMessage"].is_null());
    }

    #[test]
    fn short_user_id_handles_short_and_multibyte_ids() {
        assert_eq!(UserId::from("abc").short(), "abc");
        assert_eq!(UserId::from("0123456789").short(), "01234567");
        assert_eq!(UserId::from("ééééééééé").short(), "éééééééé");
    }
}
