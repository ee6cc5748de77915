//! # parley-server
//!
//! Chat backend for Parley.
//!
//! This binary provides:
//! - **REST API** (axum) under `/api` for chats, messages, unread counts
//!   and profiles, authenticated with HS256 bearer tokens
//! - **Relay WebSocket** at `/ws` that tracks who is online and pushes
//!   freshly stored messages to their receiver
//! - **SQLite persistence** through `parley-store`
//! - **Per-IP rate limiting** to protect against abuse
//!
//! `parley-server mint-token <user-id> [username]` prints a token signed
//! with the configured secret, for local development.

mod api;
mod auth;
mod config;
mod error;
mod presence;
mod rate_limit;
mod relay;
mod service;
mod ws;

use tracing::info;
use tracing_subscriber::EnvFilter;

use parley_store::Database;

use crate::api::AppState;
use crate::auth::JwtAuth;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug")),
        )
        .init();

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("mint-token") {
        return mint_token(&config, &args[1..]);
    }

    info!("Starting Parley server v{}", env!("CARGO_PKG_VERSION"));
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the database and build shared state
    // -----------------------------------------------------------------------
    let db = if config.in_memory_database() {
        info!("Using an in-memory database, nothing will be persisted");
        Database::open_in_memory()?
    } else {
        Database::open_at(&config.database_path)?
    };

    let http_addr = config.http_addr;
    let app_state = AppState::new(config, db);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let rl = app_state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_stale(std::time::Duration::from_secs(600)).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP + WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

fn mint_token(config: &ServerConfig, args: &[String]) -> anyhow::Result<()> {
    let Some(user) = args.first() else {
        anyhow::bail!("usage: parley-server mint-token <user-id> [username]");
    };
    let auth = JwtAuth::new(&config.jwt_secret);
    let token = auth.issue(
        &user.as_str().into(),
        args.get(1).map(String::as_str),
        chrono::Duration::days(30),
    )?;
    println!("{token}");
    Ok(())
}
