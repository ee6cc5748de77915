//! Chat persistence operations with their access rules.
//!
//! Every operation takes the database lock once, so a check and the write
//! it guards never interleave with another request.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use parley_shared::api::{ChatDetail, ChatSummary};
use parley_shared::error::{validate_message_text, validate_username};
use parley_shared::{Chat, ChatId, Message, UserId, UserProfile, ValidationError};
use parley_store::Database;

use crate::error::ServerError;

#[derive(Clone)]
pub struct ChatService {
    db: Arc<Mutex<Database>>,
}

impl ChatService {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    fn db(&self) -> Result<MutexGuard<'_, Database>, ServerError> {
        self.db
            .lock()
            .map_err(|_| ServerError::Internal("database lock poisoned".into()))
    }

    pub fn ensure_user(&self, user: &UserId, username: Option<&str>) -> Result<(), ServerError> {
        self.db()?.ensure_user(user, username)?;
        Ok(())
    }

    pub fn update_profile(
        &self,
        user: &UserId,
        username: Option<&str>,
        avatar: Option<&str>,
    ) -> Result<UserProfile, ServerError> {
        if let Some(name) = username {
            validate_username(name)?;
        }
        let updated = self
            .db()?
            .update_profile(user, username.map(str::trim), avatar)?;
        Ok(updated.profile())
    }

    /// Chats containing `user`, most recently active first, each with the
    /// other participant's profile.
    pub fn list_chats(&self, user: &UserId) -> Result<Vec<ChatSummary>, ServerError> {
        let db = self.db()?;
        let chats = db.list_chats_for_user(user)?;
        let mut summaries = Vec::with_capacity(chats.len());
        for chat in chats {
            let receiver = match chat.other_participant(user) {
                Some(other) => db.get_profile(other)?,
                None => None,
            };
            summaries.push(ChatSummary { chat, receiver });
        }
        Ok(summaries)
    }

    /// Fetch a chat and acknowledge it for `user`.
    pub fn get_chat(&self, chat_id: ChatId, user: &UserId) -> Result<ChatDetail, ServerError> {
        let db = self.db()?;
        if !db.is_participant(chat_id, user)? {
            // Unknown and foreign chats look the same to the caller.
            return Err(ServerError::NotFound(format!("chat {chat_id}")));
        }

        let newly_seen = db.mark_seen(chat_id, user)?;
        let chat = db.get_chat(chat_id)?;
        let messages = db.messages_for_chat(chat_id)?;
        let receiver = match chat.other_participant(user) {
            Some(other) => db.get_profile(other)?,
            None => None,
        };

        if newly_seen {
            debug!(chat = %chat_id, user = %user, "Chat acknowledged");
        }

        Ok(ChatDetail {
            chat,
            receiver,
            messages,
            newly_seen,
        })
    }

    /// Create a new chat. Never deduplicates.
    pub fn create_chat(&self, initiator: &UserId, receiver: &UserId) -> Result<Chat, ServerError> {
        let mut db = self.db()?;
        check_pair(&db, initiator, receiver)?;
        let chat = db.create_chat(initiator, receiver)?;
        info!(chat = %chat.id, initiator = %initiator, receiver = %receiver, "Chat created");
        Ok(chat)
    }

    /// Return the oldest chat between the pair, creating one if none exists.
    pub fn find_or_create_chat(
        &self,
        initiator: &UserId,
        receiver: &UserId,
    ) -> Result<(Chat, bool), ServerError> {
        let mut db = self.db()?;
        check_pair(&db, initiator, receiver)?;
        let (chat, created) = db.find_or_create_chat(initiator, receiver)?;
        if created {
            info!(chat = %chat.id, initiator = %initiator, receiver = %receiver, "Chat created");
        }
        Ok((chat, created))
    }

    /// Append a message. The text is validated before anything is touched.
    pub fn post_message(
        &self,
        chat_id: ChatId,
        sender: &UserId,
        text: &str,
    ) -> Result<(Message, Chat), ServerError> {
        validate_message_text(text)?;

        let mut db = self.db()?;
        let chat = db.get_chat(chat_id)?;
        if !chat.is_participant(sender) {
            return Err(ServerError::Forbidden(format!(
                "user {sender} is not a participant of chat {chat_id}"
            )));
        }

        let (message, chat) = db.append_message(chat_id, sender, text)?;
        debug!(chat = %chat_id, sender = %sender, msg = %message.id, "Message stored");
        Ok((message, chat))
    }

    /// Idempotently add `user` to the chat's `seen_by`.
    pub fn mark_seen(&self, chat_id: ChatId, user: &UserId) -> Result<Chat, ServerError> {
        let db = self.db()?;
        if !db.is_participant(chat_id, user)? {
            return Err(ServerError::NotFound(format!("chat {chat_id}")));
        }
        db.mark_seen(chat_id, user)?;
        Ok(db.get_chat(chat_id)?)
    }

    /// The chat as it is, after the same participant check as `mark_seen`.
    pub fn chat_for_participant(&self, chat_id: ChatId, user: &UserId) -> Result<Chat, ServerError> {
        let db = self.db()?;
        if !db.is_participant(chat_id, user)? {
            return Err(ServerError::NotFound(format!("chat {chat_id}")));
        }
        Ok(db.get_chat(chat_id)?)
    }

    /// Number of chats containing `user` that `user` has not seen.
    pub fn unread_count(&self, user: &UserId) -> Result<u64, ServerError> {
        Ok(self.db()?.count_unseen_chats(user)?)
    }
}

fn check_pair(db: &Database, initiator: &UserId, receiver: &UserId) -> Result<(), ServerError> {
    if initiator == receiver {
        return Err(ValidationError::SelfChat.into());
    }
    if db.find_user(receiver)?.is_none() {
        return Err(ServerError::NotFound(format!("user {receiver}")));
    }
    Ok(())
}
