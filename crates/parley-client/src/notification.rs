//! Unread-chat badge.
//!
//! The value is the number of chats the user has not seen. It is seeded
//! and refreshed from the server; local arithmetic is limited to the
//! decrement after opening a newly seen chat.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::api::ChatBackend;
use crate::error::ClientError;

#[derive(Clone)]
pub struct NotificationCounter {
    tx: Arc<watch::Sender<u64>>,
}

impl Default for NotificationCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationCounter {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> u64 {
        *self.tx.borrow()
    }

    /// Observe every change, e.g. to redraw a header badge.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }

    /// Replace the cached value with the server's count.
    pub async fn fetch<B: ChatBackend + ?Sized>(&self, backend: &B) -> Result<u64, ClientError> {
        let count = backend.unread_count().await?;
        self.tx.send_replace(count);
        debug!(count, "Unread count fetched");
        Ok(count)
    }

    /// Like [`fetch`](Self::fetch), but a failure only logs and keeps the
    /// cached value.
    pub async fn refresh<B: ChatBackend + ?Sized>(&self, backend: &B) {
        if let Err(e) = self.fetch(backend).await {
            warn!(error = %e, "Failed to refresh unread count");
        }
    }

    /// One chat went from unseen to seen. Never goes below zero.
    pub fn decrease(&self) {
        self.tx.send_modify(|count| *count = count.saturating_sub(1));
    }

    /// Back to zero, on logout.
    pub fn reset(&self) {
        self.tx.send_replace(0);
    }
}
