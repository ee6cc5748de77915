//! # parley-store
//!
//! Durable storage for chats, messages, seen-by sets and user profiles,
//! backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for every domain
//! operation. Multi-statement writes (creating a chat, appending a
//! message) run inside a transaction.

pub mod chats;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
