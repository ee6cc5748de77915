//! Chat panel state machine.
//!
//! ```text
//! Closed -> Opening -> Open -> (Sending | Receiving) -> Open -> Closed
//! ```
//!
//! REST calls always come first; the relay push happens only after the
//! server has stored the message. Relay problems are logged and never
//! fail an operation.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use parley_shared::api::ChatSummary;
use parley_shared::error::validate_message_text;
use parley_shared::protocol::ServerEvent;
use parley_shared::{Chat, ChatId, Message, UserId, UserProfile};

use crate::api::ChatBackend;
use crate::error::ClientError;
use crate::notification::NotificationCounter;
use crate::relay::RelaySink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelState {
    Closed,
    Opening,
    Open,
    Sending,
    Receiving,
}

/// The chat currently shown in the panel.
#[derive(Debug, Clone)]
pub struct OpenChat {
    pub chat: Chat,
    pub receiver: Option<UserProfile>,
    pub messages: Vec<Message>,
}

impl OpenChat {
    /// Append unless a message with the same id is already there.
    fn push(&mut self, message: Message) -> bool {
        if self.messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }
}

pub struct ChatController<B: ?Sized, R: ?Sized> {
    me: UserId,
    backend: Arc<B>,
    relay: Arc<R>,
    counter: NotificationCounter,
    state: PanelState,
    chats: Vec<ChatSummary>,
    open: Option<OpenChat>,
    draft: String,
    last_error: Option<String>,
}

impl<B, R> ChatController<B, R>
where
    B: ChatBackend + ?Sized,
    R: RelaySink + ?Sized,
{
    pub fn new(me: UserId, backend: Arc<B>, relay: Arc<R>, counter: NotificationCounter) -> Self {
        Self {
            me,
            backend,
            relay,
            counter,
            state: PanelState::Closed,
            chats: Vec::new(),
            open: None,
            draft: String::new(),
            last_error: None,
        }
    }

    pub fn state(&self) -> PanelState {
        self.state
    }

    pub fn chats(&self) -> &[ChatSummary] {
        &self.chats
    }

    pub fn open_chat(&self) -> Option<&OpenChat> {
        self.open.as_ref()
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Hand the pending error to the UI once.
    pub fn take_error(&mut self) -> Option<String> {
        self.last_error.take()
    }

    pub fn counter(&self) -> &NotificationCounter {
        &self.counter
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Whether `chat_id` is unseen by the signed-in user, per the list.
    pub fn is_unread(&self, chat_id: ChatId) -> bool {
        self.chats
            .iter()
            .find(|s| s.chat.id == chat_id)
            .is_some_and(|s| !s.chat.is_seen_by(&self.me))
    }

    pub async fn refresh_list(&mut self) -> Result<(), ClientError> {
        match self.backend.list_chats().await {
            Ok(chats) => {
                debug!(count = chats.len(), "Chat list loaded");
                self.chats = chats;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Start a chat with `receiver`, reusing an existing one, and open it.
    pub async fn start_chat(&mut self, receiver: &UserId) -> Result<ChatId, ClientError> {
        let found = match self.backend.find_or_create_chat(receiver).await {
            Ok(found) => found,
            Err(e) => return Err(self.fail(e)),
        };
        if found.created {
            info!(chat = %found.chat.id, receiver = %receiver, "Started new chat");
            self.refresh_list().await?;
        }
        self.open(found.chat.id).await?;
        Ok(found.chat.id)
    }

    /// Fetch `chat_id` and show it. The fetch acknowledges the chat, so the
    /// badge drops by one when this was the unseen-to-seen transition.
    pub async fn open(&mut self, chat_id: ChatId) -> Result<(), ClientError> {
        self.state = PanelState::Opening;
        self.last_error = None;

        let detail = match self.backend.get_chat(chat_id).await {
            Ok(detail) => detail,
            Err(e) => {
                self.state = PanelState::Closed;
                self.open = None;
                return Err(self.fail(e));
            }
        };

        if detail.newly_seen {
            self.counter.decrease();
        }
        self.update_entry(&detail.chat);
        self.open = Some(OpenChat {
            chat: detail.chat,
            receiver: detail.receiver,
            messages: detail.messages,
        });
        self.draft.clear();
        self.state = PanelState::Open;
        Ok(())
    }

    /// Post the draft, then push it to the other participant.
    ///
    /// An empty draft is refused locally. On failure the draft is kept and
    /// the panel goes back to `Open`.
    pub async fn send(&mut self) -> Result<Message, ClientError> {
        let Some(chat_id) = self.open.as_ref().map(|o| o.chat.id) else {
            return Err(ClientError::NoOpenChat);
        };
        if self.state != PanelState::Open {
            debug!(state = ?self.state, "Send ignored while busy");
            return Err(ClientError::NoOpenChat);
        }
        if let Err(e) = validate_message_text(&self.draft) {
            return Err(self.fail(e.into()));
        }

        self.state = PanelState::Sending;
        let message = match self.backend.post_message(chat_id, &self.draft).await {
            Ok(message) => message,
            Err(e) => {
                self.state = PanelState::Open;
                return Err(self.fail(e));
            }
        };

        self.draft.clear();
        let receiver = self.apply_local_message(&message);
        if let Some(receiver) = receiver {
            if let Err(e) = self.relay.send_message(&receiver, &message).await {
                warn!(chat = %chat_id, receiver = %receiver, error = %e, "Relay push failed");
            }
        }

        self.state = PanelState::Open;
        Ok(message)
    }

    /// React to a relay event.
    pub async fn on_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::GetMessage { data } => self.receive(data).await,
            ServerEvent::Error { message } => {
                debug!(%message, "Relay reported an error");
                self.last_error = Some(message);
            }
        }
    }

    pub fn close(&mut self) {
        self.open = None;
        self.draft.clear();
        self.state = PanelState::Closed;
    }

    async fn receive(&mut self, message: Message) {
        let chat_id = message.chat_id;
        let is_open = self.open.as_ref().is_some_and(|o| o.chat.id == chat_id);

        if is_open {
            let previous = self.state;
            self.state = PanelState::Receiving;
            if let Some(open) = self.open.as_mut() {
                open.push(message.clone());
                open.chat.last_message = Some(message.text.clone());
                open.chat.last_message_at = Some(message.created_at);
            }
            match self.backend.mark_seen(chat_id).await {
                Ok(chat) => {
                    self.update_entry(&chat);
                    if let Some(open) = self.open.as_mut() {
                        open.chat.seen_by = chat.seen_by;
                    }
                }
                Err(e) => warn!(chat = %chat_id, error = %e, "Failed to mark chat seen"),
            }
            self.state = if previous == PanelState::Sending {
                PanelState::Sending
            } else {
                PanelState::Open
            };
            return;
        }

        let known = self.chats.iter_mut().find(|s| s.chat.id == chat_id);
        match known {
            Some(entry) => {
                entry.chat.last_message = Some(message.text.clone());
                entry.chat.last_message_at = Some(message.created_at);
                entry.chat.seen_by = BTreeSet::from([message.sender_ref.clone()]);
                self.move_to_top(chat_id);
            }
            None => {
                debug!(chat = %chat_id, "Message for unknown chat, reloading list");
                if let Err(e) = self.refresh_list().await {
                    warn!(error = %e, "Failed to reload chat list");
                }
            }
        }
        self.counter.refresh(self.backend.as_ref()).await;
    }

    /// Reflect our own stored message in the open chat and the list.
    /// Returns the user to push the message to.
    fn apply_local_message(&mut self, message: &Message) -> Option<UserId> {
        let open = self.open.as_mut()?;
        open.push(message.clone());
        open.chat.last_message = Some(message.text.clone());
        open.chat.last_message_at = Some(message.created_at);
        open.chat.seen_by = BTreeSet::from([self.me.clone()]);
        let receiver = open.chat.other_participant(&self.me).cloned();
        let chat = open.chat.clone();
        self.update_entry(&chat);
        receiver
    }

    fn update_entry(&mut self, chat: &Chat) {
        if let Some(entry) = self.chats.iter_mut().find(|s| s.chat.id == chat.id) {
            entry.chat = chat.clone();
            self.move_to_top(chat.id);
        }
    }

    fn move_to_top(&mut self, chat_id: ChatId) {
        if let Some(pos) = self.chats.iter().position(|s| s.chat.id == chat_id) {
            let entry = self.chats.remove(pos);
            self.chats.insert(0, entry);
        }
    }

    fn fail(&mut self, err: ClientError) -> ClientError {
        self.last_error = Some(err.to_string());
        err
    }
}
