//! Best-effort push of persisted messages to online receivers.
//!
//! Persistence always happens first (through the REST API); the relay only
//! notifies. A receiver that is offline, or too slow to drain its queue,
//! simply misses the push and sees the message on its next fetch.

use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use parley_shared::protocol::ServerEvent;
use parley_shared::{Message, UserId};

use crate::presence::PresenceStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No presence entry for the receiver.
    Offline,
    /// The receiver's outbound queue is full.
    QueueFull,
    /// The receiver's connection task is gone.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Delivered,
    NotDelivered(DropReason),
}

#[derive(Clone)]
pub struct Relay {
    presence: Arc<dyn PresenceStore>,
}

impl Relay {
    pub fn new(presence: Arc<dyn PresenceStore>) -> Self {
        Self { presence }
    }

    pub fn presence(&self) -> &Arc<dyn PresenceStore> {
        &self.presence
    }

    /// Push `message` to `receiver`'s live connection, if any.
    pub async fn relay(&self, receiver: &UserId, message: Message) -> RelayOutcome {
        let Some(handle) = self.presence.lookup(receiver).await else {
            return RelayOutcome::NotDelivered(DropReason::Offline);
        };

        let msg_id = message.id;
        match handle.tx.try_send(ServerEvent::GetMessage { data: message }) {
            Ok(()) => {
                debug!(receiver = %receiver, conn = %handle.id, msg = %msg_id, "Message relayed");
                RelayOutcome::Delivered
            }
            Err(TrySendError::Full(_)) => {
                debug!(receiver = %receiver, conn = %handle.id, "Dropping relay for slow receiver");
                RelayOutcome::NotDelivered(DropReason::QueueFull)
            }
            Err(TrySendError::Closed(_)) => RelayOutcome::NotDelivered(DropReason::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::{ConnectionHandle, ConnectionId, InMemoryPresence, PresencePolicy};
    use chrono::Utc;
    use parley_shared::{ChatId, MessageId};
    use tokio::sync::mpsc;

    fn message(text: &str) -> Message {
        Message {
            id: MessageId::new(),
            chat_id: ChatId::new(),
            sender_ref: "alice".into(),
            text: text.into(),
            created_at: Utc::now(),
        }
    }

    async fn relay_with(
        capacity: usize,
    ) -> (Relay, ConnectionHandle, mpsc::Receiver<ServerEvent>) {
        let presence = Arc::new(InMemoryPresence::new(PresencePolicy::LatestWins));
        let (tx, rx) = mpsc::channel(capacity);
        let handle = ConnectionHandle {
            id: ConnectionId::next(),
            tx,
            verified: true,
        };
        presence.register("bob".into(), handle.clone()).await;
        (Relay::new(presence), handle, rx)
    }

    #[tokio::test]
    async fn delivers_to_online_receiver() {
        let (relay, _handle, mut rx) = relay_with(4).await;
        let msg = message("hello");

        assert_eq!(relay.relay(&"bob".into(), msg.clone()).await, RelayOutcome::Delivered);
        assert_eq!(rx.recv().await, Some(ServerEvent::GetMessage { data: msg }));
    }

    #[tokio::test]
    async fn offline_receiver_is_not_delivered() {
        let (relay, _handle, _rx) = relay_with(4).await;
        assert_eq!(
            relay.relay(&"carol".into(), message("hi")).await,
            RelayOutcome::NotDelivered(DropReason::Offline)
        );
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let (relay, _handle, _rx) = relay_with(1).await;
        assert_eq!(relay.relay(&"bob".into(), message("1")).await, RelayOutcome::Delivered);
        assert_eq!(
            relay.relay(&"bob".into(), message("2")).await,
            RelayOutcome::NotDelivered(DropReason::QueueFull)
        );
    }

    #[tokio::test]
    async fn closed_connection_is_reported() {
        let (relay, _handle, rx) = relay_with(4).await;
        drop(rx);
        assert_eq!(
            relay.relay(&"bob".into(), message("x")).await,
            RelayOutcome::NotDelivered(DropReason::Closed)
        );
    }

    #[tokio::test]
    async fn per_connection_order_is_fifo() {
        let (relay, _handle, mut rx) = relay_with(8).await;
        for i in 0..5 {
            relay.relay(&"bob".into(), message(&i.to_string())).await;
        }
        for i in 0..5 {
            match rx.recv().await {
                Some(ServerEvent::GetMessage { data }) => assert_eq!(data.text, i.to_string()),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }
}
