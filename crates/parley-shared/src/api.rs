//! REST request and response bodies.
//!
//! Field names follow the camelCase JSON shape the web client consumes.

use serde::{Deserialize, Serialize};

use crate::types::{Chat, Message, UserId, UserProfile};

/// Entry of `GET /api/chats`: the chat plus the other participant's profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatSummary {
    #[serde(flatten)]
    pub chat: Chat,
    pub receiver: Option<UserProfile>,
}

/// Body of `GET /api/chats/{id}`.
///
/// Fetching a chat acknowledges it: `chat.seen_by` already contains the
/// caller, and `newly_seen` tells whether this fetch was the transition
/// from unseen to seen.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatDetail {
    #[serde(flatten)]
    pub chat: Chat,
    pub receiver: Option<UserProfile>,
    pub messages: Vec<Message>,
    pub newly_seen: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatRequest {
    pub receiver_id: UserId,
}

/// Body returned by the find-or-create variant (`PUT /api/chats`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindOrCreateResponse {
    pub chat: Chat,
    pub created: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadChatRequest {
    #[serde(default = "default_seen")]
    pub seen: bool,
}

fn default_seen() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostMessageRequest {
    pub text: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationCount {
    pub count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub avatar: Option<String>,
}

/// Uniform error body: `{"error": "..."}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
