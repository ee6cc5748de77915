//! # parley-client
//!
//! Client side of Parley: a REST client for the chat API, the relay
//! WebSocket with automatic reconnect, the unread badge and the chat panel
//! state machine that ties them together.

pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod notification;
pub mod relay;
pub mod session;

#[cfg(test)]
mod testing;

pub use api::{ApiClient, ChatBackend};
pub use config::ClientConfig;
pub use controller::{ChatController, PanelState};
pub use error::ClientError;
pub use notification::NotificationCounter;
pub use session::Session;
