//! In-memory stand-ins for the server and the relay.

use std::collections::{BTreeSet, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use parley_shared::api::{ChatDetail, ChatSummary, FindOrCreateResponse, ProfileUpdate};
use parley_shared::{Chat, ChatId, Message, MessageId, UserId, UserProfile};

use crate::api::ChatBackend;
use crate::error::ClientError;
use crate::relay::RelaySink;

#[derive(Default)]
struct State {
    chats: Vec<Chat>,
    messages: Vec<Message>,
    unread_override: Option<u64>,
    failing: HashSet<&'static str>,
    calls: Vec<&'static str>,
}

/// Mirrors the server's rules for one signed-in user.
pub struct FakeBackend {
    me: UserId,
    state: Mutex<State>,
}

impl FakeBackend {
    pub fn new(me: &str) -> Self {
        Self {
            me: me.into(),
            state: Mutex::new(State::default()),
        }
    }

    pub fn set_unread(&self, count: u64) {
        self.state.lock().unwrap().unread_override = Some(count);
    }

    pub fn fail_next(&self, op: &'static str) {
        self.state.lock().unwrap().failing.insert(op);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn chat(&self, id: ChatId) -> Chat {
        let state = self.state.lock().unwrap();
        state.chats.iter().find(|c| c.id == id).cloned().unwrap()
    }

    pub fn message_count(&self, id: ChatId) -> usize {
        let state = self.state.lock().unwrap();
        state.messages.iter().filter(|m| m.chat_id == id).count()
    }

    /// A chat between `me` and `other`, started by `other`.
    pub fn seed_chat(&self, other: &str) -> ChatId {
        let chat = Chat {
            id: ChatId::new(),
            participant_refs: vec![other.into(), self.me.clone()],
            seen_by: BTreeSet::from([UserId::from(other)]),
            last_message: None,
            last_message_at: None,
            created_at: Utc::now(),
        };
        let id = chat.id;
        self.state.lock().unwrap().chats.push(chat);
        id
    }

    /// `from` posts into `chat_id` through the server.
    pub fn incoming(&self, chat_id: ChatId, from: &str, text: &str) -> Message {
        let mut state = self.state.lock().unwrap();
        let message = Message {
            id: MessageId::new(),
            chat_id,
            sender_ref: from.into(),
            text: text.into(),
            created_at: Utc::now(),
        };
        let chat = state.chats.iter_mut().find(|c| c.id == chat_id).unwrap();
        chat.seen_by = BTreeSet::from([UserId::from(from)]);
        chat.last_message = Some(text.into());
        chat.last_message_at = Some(message.created_at);
        state.messages.push(message.clone());
        message
    }

    fn enter(&self, op: &'static str) -> Result<std::sync::MutexGuard<'_, State>, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(op);
        if state.failing.remove(op) {
            return Err(ClientError::Server {
                status: 500,
                message: format!("{op} failed"),
            });
        }
        Ok(state)
    }

    fn profile(id: &UserId) -> UserProfile {
        UserProfile {
            id: id.clone(),
            username: Some(id.to_string()),
            avatar: None,
        }
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn list_chats(&self) -> Result<Vec<ChatSummary>, ClientError> {
        let state = self.enter("list_chats")?;
        Ok(state
            .chats
            .iter()
            .filter(|c| c.is_participant(&self.me))
            .map(|c| ChatSummary {
                chat: c.clone(),
                receiver: c.other_participant(&self.me).map(Self::profile),
            })
            .collect())
    }

    async fn get_chat(&self, chat_id: ChatId) -> Result<ChatDetail, ClientError> {
        let mut state = self.enter("get_chat")?;
        let me = self.me.clone();
        let chat = state
            .chats
            .iter_mut()
            .find(|c| c.id == chat_id && c.is_participant(&me))
            .ok_or_else(|| ClientError::NotFound(format!("chat {chat_id}")))?;
        let newly_seen = chat.seen_by.insert(me.clone());
        let chat = chat.clone();
        let messages = state
            .messages
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect();
        Ok(ChatDetail {
            receiver: chat.other_participant(&me).map(Self::profile),
            chat,
            messages,
            newly_seen,
        })
    }

    async fn create_chat(&self, receiver: &UserId) -> Result<Chat, ClientError> {
        let mut state = self.enter("create_chat")?;
        let chat = Chat {
            id: ChatId::new(),
            participant_refs: vec![self.me.clone(), receiver.clone()],
            seen_by: BTreeSet::from([self.me.clone()]),
            last_message: None,
            last_message_at: None,
            created_at: Utc::now(),
        };
        state.chats.push(chat.clone());
        Ok(chat)
    }

    async fn find_or_create_chat(
        &self,
        receiver: &UserId,
    ) -> Result<FindOrCreateResponse, ClientError> {
        let existing = {
            let state = self.enter("find_or_create_chat")?;
            state
                .chats
                .iter()
                .find(|c| c.is_participant(&self.me) && c.is_participant(receiver))
                .cloned()
        };
        match existing {
            Some(chat) => Ok(FindOrCreateResponse {
                chat,
                created: false,
            }),
            None => Ok(FindOrCreateResponse {
                chat: self.create_chat(receiver).await?,
                created: true,
            }),
        }
    }

    async fn mark_seen(&self, chat_id: ChatId) -> Result<Chat, ClientError> {
        let mut state = self.enter("mark_seen")?;
        let chat = state
            .chats
            .iter_mut()
            .find(|c| c.id == chat_id && c.is_participant(&self.me))
            .ok_or_else(|| ClientError::NotFound(format!("chat {chat_id}")))?;
        chat.seen_by.insert(self.me.clone());
        Ok(chat.clone())
    }

    async fn post_message(&self, chat_id: ChatId, text: &str) -> Result<Message, ClientError> {
        {
            let state = self.enter("post_message")?;
            let chat = state
                .chats
                .iter()
                .find(|c| c.id == chat_id)
                .ok_or_else(|| ClientError::NotFound(format!("chat {chat_id}")))?;
            if !chat.is_participant(&self.me) {
                return Err(ClientError::Forbidden("not a participant".into()));
            }
        }
        Ok(self.incoming(chat_id, self.me.as_str(), text))
    }

    async fn unread_count(&self) -> Result<u64, ClientError> {
        let state = self.enter("unread_count")?;
        if let Some(count) = state.unread_override {
            return Ok(count);
        }
        Ok(state
            .chats
            .iter()
            .filter(|c| c.is_participant(&self.me) && !c.is_seen_by(&self.me))
            .count() as u64)
    }

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile, ClientError> {
        let _state = self.enter("update_profile")?;
        Ok(UserProfile {
            id: self.me.clone(),
            username: update.username.clone(),
            avatar: update.avatar.clone(),
        })
    }
}

#[derive(Default)]
pub struct FakeRelay {
    sent: Mutex<Vec<(UserId, Message)>>,
    down: Mutex<bool>,
}

impl FakeRelay {
    pub fn sent(&self) -> Vec<(UserId, Message)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn set_down(&self, down: bool) {
        *self.down.lock().unwrap() = down;
    }
}

#[async_trait]
impl RelaySink for FakeRelay {
    async fn send_message(&self, receiver: &UserId, message: &Message) -> Result<(), ClientError> {
        if *self.down.lock().unwrap() {
            return Err(ClientError::RelayUnavailable);
        }
        self.sent
            .lock()
            .unwrap()
            .push((receiver.clone(), message.clone()));
        Ok(())
    }
}
