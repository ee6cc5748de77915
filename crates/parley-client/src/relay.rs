//! Relay WebSocket connection.
//!
//! A background task keeps one socket open, announces the user with
//! `newUser` after every (re)connect, forwards inbound events to the
//! application and writes outbound `sendMessage` frames. Pushes are best
//! effort: anything queued while the socket is down is dropped.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use parley_shared::constants::{RECONNECT_MAX_BACKOFF_SECS, RECONNECT_MIN_BACKOFF_SECS};
use parley_shared::protocol::{ClientEvent, ServerEvent};
use parley_shared::{Message, UserId};

use crate::error::ClientError;

/// Where the controller pushes a freshly stored message.
#[async_trait]
pub trait RelaySink: Send + Sync {
    async fn send_message(&self, receiver: &UserId, message: &Message) -> Result<(), ClientError>;
}

/// Outbound queue depth between the application and the socket task.
const OUTBOUND_CAPACITY: usize = 64;

enum Command {
    Send(ClientEvent),
    Shutdown,
}

pub struct RelayHandle {
    cmd_tx: mpsc::Sender<Command>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RelayHandle {
    /// Start the connection task. `token` is presented on every connect.
    /// Inbound events arrive on the returned receiver until
    /// [`shutdown`](Self::shutdown).
    pub fn spawn(
        ws_url: String,
        token: Option<&str>,
        user: UserId,
    ) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let endpoint = Endpoint {
            connect_url: connect_url(&ws_url, token),
            display: ws_url,
        };
        let task = tokio::spawn(run(endpoint, user, cmd_rx, event_tx));
        let handle = Self {
            cmd_tx,
            task: Mutex::new(Some(task)),
        };
        (handle, event_rx)
    }

    /// Close the socket and wait for the task. Later calls are no-ops.
    pub async fn shutdown(&self) {
        let task = self.task.lock().ok().and_then(|mut t| t.take());
        let Some(task) = task else {
            return;
        };
        let _ = self.cmd_tx.send(Command::Shutdown).await;
        if let Err(e) = task.await {
            warn!(error = %e, "Relay task ended abnormally");
        }
    }
}

#[async_trait]
impl RelaySink for RelayHandle {
    async fn send_message(&self, receiver: &UserId, message: &Message) -> Result<(), ClientError> {
        let event = ClientEvent::SendMessage {
            receiver_id: receiver.clone(),
            data: message.clone(),
        };
        self.cmd_tx
            .try_send(Command::Send(event))
            .map_err(|_| ClientError::RelayUnavailable)
    }
}

/// Relay URL with the bearer token in the `token` query parameter.
pub fn connect_url(ws_url: &str, token: Option<&str>) -> String {
    match token {
        Some(token) => {
            let sep = if ws_url.contains('?') { '&' } else { '?' };
            format!("{ws_url}{sep}token={token}")
        }
        None => ws_url.to_string(),
    }
}

/// Where to connect, and what to log instead of the token-bearing URL.
struct Endpoint {
    connect_url: String,
    display: String,
}

/// Doubling backoff, capped.
pub fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(Duration::from_secs(RECONNECT_MAX_BACKOFF_SECS))
}

enum Exit {
    Reconnect,
    Shutdown,
}

async fn run(
    endpoint: Endpoint,
    user: UserId,
    mut cmd_rx: mpsc::Receiver<Command>,
    event_tx: mpsc::Sender<ServerEvent>,
) {
    let min_backoff = Duration::from_secs(RECONNECT_MIN_BACKOFF_SECS);
    let mut backoff = min_backoff;

    loop {
        match connect_async(endpoint.connect_url.as_str()).await {
            Ok((stream, _response)) => {
                backoff = min_backoff;
                info!(url = %endpoint.display, user = %user, "Relay connected");
                match session(stream, &user, &mut cmd_rx, &event_tx).await {
                    Exit::Shutdown => break,
                    Exit::Reconnect => {
                        info!(retry_in = ?backoff, "Relay disconnected, reconnecting");
                    }
                }
            }
            Err(e) => {
                warn!(url = %endpoint.display, error = %e, retry_in = ?backoff, "Relay connection failed");
            }
        }

        // Wait out the backoff, dropping pushes that arrive meanwhile.
        let sleep = tokio::time::sleep(backoff);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Send(_)) => debug!("Relay offline, dropping push"),
                    Some(Command::Shutdown) | None => return,
                },
            }
        }
        backoff = next_backoff(backoff);
    }

    debug!("Relay task stopped");
}

async fn session<S>(
    stream: S,
    user: &UserId,
    cmd_rx: &mut mpsc::Receiver<Command>,
    event_tx: &mpsc::Sender<ServerEvent>,
) -> Exit
where
    S: futures::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut write, mut read) = stream.split();

    let hello = ClientEvent::NewUser {
        user_id: user.clone(),
    };
    match hello.to_text() {
        Ok(text) => {
            if write.send(WsMessage::Text(text)).await.is_err() {
                return Exit::Reconnect;
            }
        }
        Err(e) => warn!(error = %e, "Failed to encode newUser"),
    }

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Send(event)) => {
                    let text = match event.to_text() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, "Failed to encode relay event");
                            continue;
                        }
                    };
                    if write.send(WsMessage::Text(text)).await.is_err() {
                        return Exit::Reconnect;
                    }
                }
                Some(Command::Shutdown) | None => {
                    let _ = write.send(WsMessage::Close(None)).await;
                    return Exit::Shutdown;
                }
            },
            frame = read.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => match ServerEvent::from_text(&text) {
                    Ok(event) => {
                        if event_tx.send(event).await.is_err() {
                            // Nobody is listening any more.
                            return Exit::Shutdown;
                        }
                    }
                    Err(e) => debug!(error = %e, "Ignoring undecodable relay frame"),
                },
                Some(Ok(WsMessage::Close(_))) | None => return Exit::Reconnect,
                Some(Err(e)) => {
                    debug!(error = %e, "Relay read failed");
                    return Exit::Reconnect;
                }
                Some(Ok(_)) => {}
            },
        }
    }
}
