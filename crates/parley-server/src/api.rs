use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, Method},
    middleware,
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_shared::api::{
    ChatDetail, ChatSummary, CreateChatRequest, FindOrCreateResponse, NotificationCount,
    PostMessageRequest, ProfileUpdate, ReadChatRequest,
};
use parley_shared::constants::{API_PREFIX, WS_PATH};
use parley_shared::{Chat, ChatId, Message, UserProfile, ValidationError};
use parley_store::Database;

use crate::auth::{bearer_token, AuthUser, JwtAuth};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::presence::{InMemoryPresence, PresenceStore};
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::relay::Relay;
use crate::service::ChatService;
use crate::ws::ws_handler;

#[derive(Clone)]
pub struct AppState {
    pub chats: ChatService,
    pub auth: Arc<JwtAuth>,
    pub relay: Relay,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
    pub ws_connections: Arc<AtomicUsize>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: ServerConfig, db: Database) -> Self {
        let presence: Arc<dyn PresenceStore> =
            Arc::new(InMemoryPresence::new(config.presence_policy));
        Self {
            chats: ChatService::new(db),
            auth: Arc::new(JwtAuth::new(&config.jwt_secret)),
            relay: Relay::new(presence),
            rate_limiter: RateLimiter::from_config(&config),
            config: Arc::new(config),
            ws_connections: Arc::new(AtomicUsize::new(0)),
            started_at: Instant::now(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any);

    let api = Router::new()
        .route("/health", get(health_check))
        .route("/chats", get(list_chats).post(create_chat).put(find_or_create_chat))
        .route("/chats/{id}", get(get_chat))
        .route("/chats/read/{id}", put(read_chat))
        .route("/messages/{chat_id}", post(post_message))
        .route("/user/notification", get(notification_count))
        .route("/user/profile", put(update_profile))
        .route("/admin/status", get(admin_status));

    Router::new()
        .nest(API_PREFIX, api)
        .route(WS_PATH, get(ws_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AdminStatusResponse {
    name: String,
    version: &'static str,
    uptime_secs: u64,
    presence_policy: String,
    online_users: usize,
    ws_connections: usize,
    rate_limited_clients: usize,
}

fn parse_chat_id(raw: &str) -> Result<ChatId, ServerError> {
    ChatId::parse(raw).map_err(|_| ValidationError::InvalidId(raw.to_string()).into())
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ServerError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| ServerError::BadRequest(e.body_text()))
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn list_chats(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<ChatSummary>>, ServerError> {
    Ok(Json(state.chats.list_chats(&user)?))
}

async fn get_chat(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ChatDetail>, ServerError> {
    let chat_id = parse_chat_id(&id)?;
    Ok(Json(state.chats.get_chat(chat_id, &user)?))
}

async fn create_chat(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<CreateChatRequest>, JsonRejection>,
) -> Result<Json<Chat>, ServerError> {
    let req = json_body(payload)?;
    Ok(Json(state.chats.create_chat(&user, &req.receiver_id)?))
}

async fn find_or_create_chat(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<CreateChatRequest>, JsonRejection>,
) -> Result<Json<FindOrCreateResponse>, ServerError> {
    let req = json_body(payload)?;
    let (chat, created) = state.chats.find_or_create_chat(&user, &req.receiver_id)?;
    Ok(Json(FindOrCreateResponse { chat, created }))
}

async fn read_chat(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    payload: Result<Json<ReadChatRequest>, JsonRejection>,
) -> Result<Json<Chat>, ServerError> {
    let chat_id = parse_chat_id(&id)?;
    let req = json_body(payload)?;
    let chat = if req.seen {
        state.chats.mark_seen(chat_id, &user)?
    } else {
        state.chats.chat_for_participant(chat_id, &user)?
    };
    Ok(Json(chat))
}

async fn post_message(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(chat_id): Path<String>,
    payload: Result<Json<PostMessageRequest>, JsonRejection>,
) -> Result<Json<Message>, ServerError> {
    let chat_id = parse_chat_id(&chat_id)?;
    let req = json_body(payload)?;
    let (message, _chat) = state.chats.post_message(chat_id, &user, &req.text)?;
    Ok(Json(message))
}

async fn notification_count(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<NotificationCount>, ServerError> {
    let count = state.chats.unread_count(&user)?;
    Ok(Json(NotificationCount { count }))
}

async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<ProfileUpdate>, JsonRejection>,
) -> Result<Json<UserProfile>, ServerError> {
    let req = json_body(payload)?;
    let profile =
        state
            .chats
            .update_profile(&user, req.username.as_deref(), req.avatar.as_deref())?;
    info!(user = %user, "Profile updated");
    Ok(Json(profile))
}

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let token = bearer_token(header).unwrap_or("");

    // Constant-time comparison to prevent timing attacks on admin token.
    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

async fn admin_status(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<AdminStatusResponse>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    Ok(Json(AdminStatusResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        presence_policy: state.config.presence_policy.to_string(),
        online_users: state.relay.presence().online_count().await,
        ws_connections: state.ws_connections.load(Ordering::Relaxed),
        rate_limited_clients: state.rate_limiter.tracked_clients().await,
    }))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
