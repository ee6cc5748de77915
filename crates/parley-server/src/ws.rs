//! Relay WebSocket: presence registration and best-effort message push.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use parley_shared::protocol::{ClientEvent, ServerEvent};
use parley_shared::{Message, UserId};

use crate::api::AppState;
use crate::error::ServerError;
use crate::presence::{ConnectionHandle, ConnectionId, Registration};
use crate::rate_limit::TokenBucket;
use crate::relay::{DropReason, RelayOutcome};

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
) -> Result<Response, ServerError> {
    let token_user = match params.token.as_deref() {
        Some(token) => Some(UserId(state.auth.verify(token)?.sub)),
        None if state.config.require_ws_token => {
            return Err(ServerError::Unauthenticated("missing token".into()));
        }
        None => None,
    };

    let max = state.config.max_connections;
    let Some(slot) = ConnectionSlot::acquire(&state.ws_connections, max) else {
        warn!(max, "Rejecting WebSocket, connection limit reached");
        return Err(ServerError::Overloaded);
    };

    Ok(ws.on_upgrade(move |socket| ws_connection(socket, state, token_user, slot)))
}

/// One reserved place under `MAX_CONNECTIONS`, released on drop. It is
/// taken before the upgrade so concurrent handshakes cannot overshoot.
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    /// `max == 0` means unlimited.
    fn acquire(counter: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |open| {
                (max == 0 || open < max).then_some(open + 1)
            })
            .ok()?;
        Some(Self(counter.clone()))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Per-connection state owned by the connection task.
struct Connection {
    handle: ConnectionHandle,
    /// Subject of the token the socket was opened with, if any.
    token_user: Option<UserId>,
    /// User announced with `newUser`.
    user: Option<UserId>,
    send_budget: TokenBucket,
}

enum Inbound {
    Client(ClientEvent),
    Malformed(String),
    Disconnect,
}

async fn ws_connection(
    mut socket: WebSocket,
    state: AppState,
    token_user: Option<UserId>,
    _slot: ConnectionSlot,
) {
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(state.config.relay_queue_capacity);
    let mut conn = Connection {
        handle: ConnectionHandle {
            id: ConnectionId::next(),
            tx,
            verified: token_user.is_some(),
        },
        token_user,
        user: None,
        send_budget: TokenBucket::new(
            state.config.ws_messages_per_sec,
            state.config.ws_message_burst,
        ),
    };
    debug!(conn = %conn.handle.id, verified = conn.handle.verified, "WebSocket connected");

    loop {
        let inbound = tokio::select! {
            // The connection holds its own sender, so this never yields None.
            Some(event) = rx.recv() => {
                if send_event(&mut socket, &event).await.is_err() {
                    Inbound::Disconnect
                } else {
                    continue;
                }
            }
            msg = socket.recv() => match msg {
                Some(Ok(WsMessage::Text(text))) => match ClientEvent::from_text(text.as_str()) {
                    Ok(event) => Inbound::Client(event),
                    Err(e) => Inbound::Malformed(e.to_string()),
                },
                Some(Ok(WsMessage::Ping(data))) => {
                    let _ = socket.send(WsMessage::Pong(data)).await;
                    continue;
                }
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => Inbound::Disconnect,
                Some(Ok(_)) => continue,
            },
        };

        match dispatch(&state, &mut conn, inbound).await {
            ControlFlow::Continue(Some(reply)) => {
                if send_event(&mut socket, &reply).await.is_err() {
                    dispatch(&state, &mut conn, Inbound::Disconnect).await;
                    break;
                }
            }
            ControlFlow::Continue(None) => {}
            ControlFlow::Break(()) => break,
        }
    }
}

async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), ()> {
    let text = match event.to_text() {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "Dropping unencodable event");
            return Ok(());
        }
    };
    socket.send(WsMessage::Text(text.into())).await.map_err(|_| ())
}

/// Handle one inbound event. `Continue` carries an optional reply for this
/// connection; `Break` ends the connection.
async fn dispatch(
    state: &AppState,
    conn: &mut Connection,
    inbound: Inbound,
) -> ControlFlow<(), Option<ServerEvent>> {
    match inbound {
        Inbound::Client(ClientEvent::NewUser { user_id }) => {
            ControlFlow::Continue(identify(state, conn, user_id).await)
        }
        Inbound::Client(ClientEvent::SendMessage { receiver_id, data }) => {
            if !conn.send_budget.try_take() {
                debug!(conn = %conn.handle.id, "sendMessage over budget");
                return ControlFlow::Continue(Some(ServerEvent::error(
                    "Sending too fast, message not pushed",
                )));
            }
            ControlFlow::Continue(forward(state, conn, receiver_id, data).await)
        }
        Inbound::Malformed(reason) => {
            debug!(conn = %conn.handle.id, %reason, "Malformed frame");
            ControlFlow::Continue(Some(ServerEvent::error(format!("Malformed frame: {reason}"))))
        }
        Inbound::Disconnect => {
            if let Some(user) = state.relay.presence().unregister(conn.handle.id).await {
                info!(conn = %conn.handle.id, user = %user, "User went offline");
            }
            ControlFlow::Break(())
        }
    }
}

async fn identify(state: &AppState, conn: &mut Connection, user: UserId) -> Option<ServerEvent> {
    match &conn.token_user {
        Some(expected) if *expected != user => {
            warn!(conn = %conn.handle.id, claimed = %user, token = %expected, "newUser does not match token");
            return Some(ServerEvent::error("userId does not match token"));
        }
        Some(_) => {}
        // Anonymous sockets only exist with REQUIRE_WS_TOKEN off, and they
        // never displace a verified one.
        None => {
            let held = state.relay.presence().lookup(&user).await;
            if held.is_some_and(|h| h.verified && h.id != conn.handle.id) {
                warn!(conn = %conn.handle.id, claimed = %user, "Anonymous newUser for a verified user");
                return Some(ServerEvent::error("userId is held by an authenticated connection"));
            }
        }
    }

    let outcome = state
        .relay
        .presence()
        .register(user.clone(), conn.handle.clone())
        .await;
    match outcome {
        Registration::Inserted | Registration::Unchanged => {
            info!(conn = %conn.handle.id, user = %user, "User online");
        }
        Registration::Replaced { previous } => {
            info!(conn = %conn.handle.id, user = %user, %previous, "User online, replaced older connection");
        }
        Registration::KeptExisting { existing } => {
            debug!(conn = %conn.handle.id, user = %user, %existing, "User already online elsewhere");
        }
    }
    conn.user = Some(user);
    None
}

async fn forward(
    state: &AppState,
    conn: &Connection,
    receiver: UserId,
    message: Message,
) -> Option<ServerEvent> {
    let Some(sender) = &conn.user else {
        return Some(ServerEvent::error("Identify with newUser before sending"));
    };
    if message.sender_ref != *sender {
        return Some(ServerEvent::error("Message sender does not match connection user"));
    }

    match state.relay.relay(&receiver, message).await {
        RelayOutcome::Delivered => None,
        RelayOutcome::NotDelivered(reason) => {
            debug!(sender = %sender, receiver = %receiver, ?reason, "Relay not delivered");
            let text = match reason {
                DropReason::Offline | DropReason::Closed => "Receiver not found",
                DropReason::QueueFull => "Receiver is not keeping up, message not pushed",
            };
            Some(ServerEvent::error(text))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use chrono::Utc;
    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message as TMessage;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    use parley_shared::{ChatId, MessageId};
    use parley_store::Database;

    use super::*;
    use crate::api::build_router;
    use crate::config::ServerConfig;

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn start(config: ServerConfig) -> (SocketAddr, AppState) {
        let state = AppState::new(config, Database::open_in_memory().unwrap());
        let app = build_router(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });
        (addr, state)
    }

    async fn connect(addr: SocketAddr, token: Option<&str>) -> Client {
        let url = match token {
            Some(t) => format!("ws://{addr}/ws?token={t}"),
            None => format!("ws://{addr}/ws"),
        };
        connect_async(url).await.unwrap().0
    }

    /// Open a socket with a token for `user` and announce it.
    async fn connect_as(addr: SocketAddr, state: &AppState, user: &str) -> Client {
        let token = state
            .auth
            .issue(&user.into(), None, chrono::Duration::hours(1))
            .unwrap();
        let mut client = connect(addr, Some(&token)).await;
        send(&mut client, ClientEvent::NewUser { user_id: user.into() }).await;
        client
    }

    async fn send(client: &mut Client, event: ClientEvent) {
        client
            .send(TMessage::Text(event.to_text().unwrap()))
            .await
            .unwrap();
    }

    async fn next_event(client: &mut Client) -> ServerEvent {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
                .await
                .expect("timed out waiting for frame")
                .unwrap()
                .unwrap();
            if let TMessage::Text(text) = frame {
                return ServerEvent::from_text(&text).unwrap();
            }
        }
    }

    async fn assert_silent(client: &mut Client) {
        let frame = tokio::time::timeout(Duration::from_millis(200), client.next()).await;
        assert!(frame.is_err(), "unexpected frame: {frame:?}");
    }

    async fn wait_online(state: &AppState, count: usize) {
        for _ in 0..100 {
            if state.relay.presence().online_count().await == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("presence never reached {count}");
    }

    fn message_from(sender: &str, text: &str) -> Message {
        Message {
            id: MessageId::new(),
            chat_id: ChatId::new(),
            sender_ref: sender.into(),
            text: text.into(),
            created_at: Utc::now(),
        }
    }

    fn send_to(receiver: &str, data: Message) -> ClientEvent {
        ClientEvent::SendMessage {
            receiver_id: receiver.into(),
            data,
        }
    }

    #[tokio::test]
    async fn message_reaches_online_receiver() {
        let (addr, state) = start(ServerConfig::default()).await;
        let mut alice = connect_as(addr, &state, "alice").await;
        let mut bob = connect_as(addr, &state, "bob").await;
        wait_online(&state, 2).await;

        let msg = message_from("alice", "hi bob");
        send(&mut alice, send_to("bob", msg.clone())).await;

        assert_eq!(next_event(&mut bob).await, ServerEvent::GetMessage { data: msg });
    }

    #[tokio::test]
    async fn offline_receiver_is_reported_to_sender() {
        let (addr, state) = start(ServerConfig::default()).await;
        let mut alice = connect_as(addr, &state, "alice").await;
        wait_online(&state, 1).await;

        send(&mut alice, send_to("carol", message_from("alice", "anyone?"))).await;

        assert_eq!(next_event(&mut alice).await, ServerEvent::error("Receiver not found"));
    }

    #[tokio::test]
    async fn spoofed_sender_and_unidentified_send_are_refused() {
        let (addr, state) = start(ServerConfig::default()).await;
        let token = state
            .auth
            .issue(&"mallory".into(), None, chrono::Duration::hours(1))
            .unwrap();
        let mut mallory = connect(addr, Some(&token)).await;

        send(&mut mallory, send_to("bob", message_from("alice", "x"))).await;
        assert!(matches!(next_event(&mut mallory).await, ServerEvent::Error { .. }));

        send(&mut mallory, ClientEvent::NewUser { user_id: "mallory".into() }).await;
        wait_online(&state, 1).await;
        send(&mut mallory, send_to("bob", message_from("alice", "x"))).await;
        assert_eq!(
            next_event(&mut mallory).await,
            ServerEvent::error("Message sender does not match connection user")
        );
    }

    #[tokio::test]
    async fn token_subject_must_match_new_user() {
        let (addr, state) = start(ServerConfig::default()).await;
        let token = state
            .auth
            .issue(&"alice".into(), None, chrono::Duration::hours(1))
            .unwrap();
        let mut client = connect(addr, Some(&token)).await;

        send(&mut client, ClientEvent::NewUser { user_id: "bob".into() }).await;
        assert_eq!(
            next_event(&mut client).await,
            ServerEvent::error("userId does not match token")
        );
        assert_eq!(state.relay.presence().online_count().await, 0);

        send(&mut client, ClientEvent::NewUser { user_id: "alice".into() }).await;
        wait_online(&state, 1).await;
    }

    #[tokio::test]
    async fn malformed_frame_gets_error_reply() {
        let (addr, state) = start(ServerConfig::default()).await;
        let mut client = connect_as(addr, &state, "alice").await;
        client.send(TMessage::Text("{not json".into())).await.unwrap();
        assert!(matches!(next_event(&mut client).await, ServerEvent::Error { .. }));
    }

    #[tokio::test]
    async fn disconnect_removes_presence() {
        let (addr, state) = start(ServerConfig::default()).await;
        let mut alice = connect_as(addr, &state, "alice").await;
        wait_online(&state, 1).await;

        alice.close(None).await.unwrap();
        wait_online(&state, 0).await;
    }

    #[tokio::test]
    async fn invalid_token_is_rejected_before_upgrade() {
        let (addr, _state) = start(ServerConfig::default()).await;
        assert!(connect_async(format!("ws://{addr}/ws?token=garbage")).await.is_err());
    }

    #[tokio::test]
    async fn anonymous_socket_is_refused_by_default() {
        let (addr, state) = start(ServerConfig::default()).await;
        assert!(connect_async(format!("ws://{addr}/ws")).await.is_err());
        assert_eq!(state.ws_connections.load(Ordering::Acquire), 0);
    }

    #[tokio::test]
    async fn anonymous_new_user_cannot_take_over_verified_user() {
        let config = ServerConfig {
            require_ws_token: false,
            ..ServerConfig::default()
        };
        let (addr, state) = start(config).await;
        let mut bob = connect_as(addr, &state, "bob").await;
        wait_online(&state, 1).await;

        let mut mallory = connect(addr, None).await;
        send(&mut mallory, ClientEvent::NewUser { user_id: "bob".into() }).await;
        assert_eq!(
            next_event(&mut mallory).await,
            ServerEvent::error("userId is held by an authenticated connection")
        );

        let mut alice = connect_as(addr, &state, "alice").await;
        wait_online(&state, 2).await;
        let secret = message_from("alice", "secret for bob");
        send(&mut alice, send_to("bob", secret.clone())).await;

        assert_eq!(next_event(&mut bob).await, ServerEvent::GetMessage { data: secret });
        assert_silent(&mut mallory).await;
    }

    #[tokio::test]
    async fn send_budget_limits_relay_frames() {
        let config = ServerConfig {
            ws_messages_per_sec: 0.0,
            ws_message_burst: 2.0,
            ..ServerConfig::default()
        };
        let (addr, state) = start(config).await;
        let mut alice = connect_as(addr, &state, "alice").await;
        let mut bob = connect_as(addr, &state, "bob").await;
        wait_online(&state, 2).await;

        for i in 0..3 {
            send(&mut alice, send_to("bob", message_from("alice", &format!("m{i}")))).await;
        }

        assert_eq!(
            next_event(&mut alice).await,
            ServerEvent::error("Sending too fast, message not pushed")
        );
        for i in 0..2 {
            match next_event(&mut bob).await {
                ServerEvent::GetMessage { data } => assert_eq!(data.text, format!("m{i}")),
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_silent(&mut bob).await;
    }

    #[test]
    fn connection_slots_respect_the_cap() {
        let open = Arc::new(AtomicUsize::new(0));
        let first = ConnectionSlot::acquire(&open, 2).unwrap();
        let _second = ConnectionSlot::acquire(&open, 2).unwrap();
        assert!(ConnectionSlot::acquire(&open, 2).is_none());
        assert_eq!(open.load(Ordering::Acquire), 2);

        drop(first);
        assert_eq!(open.load(Ordering::Acquire), 1);
        assert!(ConnectionSlot::acquire(&open, 2).is_some());
        assert_eq!(open.load(Ordering::Acquire), 1);

        let unlimited: Vec<_> = (0..5).filter_map(|_| ConnectionSlot::acquire(&open, 0)).collect();
        assert_eq!(unlimited.len(), 5);
    }

    #[tokio::test]
    async fn connection_limit_refuses_extra_sockets() {
        let config = ServerConfig {
            max_connections: 1,
            ..ServerConfig::default()
        };
        let (addr, state) = start(config).await;
        let _alice = connect_as(addr, &state, "alice").await;
        wait_online(&state, 1).await;

        let token = state
            .auth
            .issue(&"bob".into(), None, chrono::Duration::hours(1))
            .unwrap();
        assert!(connect_async(format!("ws://{addr}/ws?token={token}")).await.is_err());
    }
}
