//! Relay WebSocket protocol.
//!
//! Every frame is a JSON text frame tagged by `"type"`. The relay only
//! forwards what the REST API has already persisted, so a pushed
//! [`Message`] is a notification, not the source of truth.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{Message, UserId};

/// Events sent by a client to the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Identify this connection as `user_id`.
    #[serde(rename_all = "camelCase")]
    NewUser { user_id: UserId },

    /// Push a freshly persisted message to `receiver_id`.
    #[serde(rename_all = "camelCase")]
    SendMessage { receiver_id: UserId, data: Message },
}

/// Events pushed by the relay to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    /// A message addressed to this connection's user.
    GetMessage { data: Message },

    /// Informational error (receiver offline, malformed frame, ...).
    Error { message: String },
}

impl ClientEvent {
    pub fn to_text(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn to_text(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChatId, MessageId};
    use chrono::Utc;

    #[test]
    fn new_user_wire_shape() {
        let json = ClientEvent::NewUser {
            user_id: "alice".into(),
        }
        .to_text()
        .unwrap();
        assert_eq!(json, r#"{"type":"newUser","userId":"alice"}"#);
    }

    #[test]
    fn send_message_carries_persisted_shape() {
        let msg = Message {
            id: MessageId::new(),
            chat_id: ChatId::new(),
            sender_ref: "alice".into(),
            text: "hello".into(),
            created_at: Utc::now(),
        };
        let event = ClientEvent::SendMessage {
            receiver_id: "bob".into(),
            data: msg.clone(),
        };
        let value: serde_json::Value = serde_json::from_str(&event.to_text().unwrap()).unwrap();
        assert_eq!(value["type"], "sendMessage");
        assert_eq!(value["receiverId"], "bob");
        assert_eq!(value["data"]["senderRef"], "alice");
        assert_eq!(value["data"]["chatId"], msg.chat_id.to_string());
    }

    #[test]
    fn unknown_event_type_is_a_decode_error() {
        let err = ClientEvent::from_text(r#"{"type":"joinRoom","room":"x"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }

    #[test]
    fn server_error_event_parses() {
        let event = ServerEvent::from_text(r#"{"type":"error","message":"Receiver not found"}"#)
            .unwrap();
        assert_eq!(event, ServerEvent::error("Receiver not found"));
    }
}
