//! # parley-shared
//!
//! Types shared by the Parley server, store and client: identifiers, the
//! chat/message domain model, REST request/response bodies, the relay
//! WebSocket protocol and the message validation rule.

pub mod api;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::{ProtocolError, ValidationError};
pub use types::{Chat, ChatId, Message, MessageId, UserId, UserProfile};
