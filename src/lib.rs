// src/lib.rs
pub mod auth;
pub mod config;
pub mod error;
pub mod http_handlers;
pub mod memory_store;
pub mod presence;
pub mod registry;
pub mod relay;
pub mod socket_handlers;
pub mod sqlite_store;
pub mod store;
pub mod types;

use anyhow::Context;
use auth::TokenVerifier;
use axum::{http::StatusCode, routing::get, Router};
use config::Config;
use memory_store::MemoryStore;
use registry::ConnectionRegistry;
use relay::Relay;
use sqlite_store::SqliteStore;
use std::sync::Arc;
use std::time::Duration;
use store::Store;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DB_CONNECT_ATTEMPTS: usize = 5;

#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub verifier: Arc<TokenVerifier>,
    pub relay: Relay,
}

impl ServerState {
    pub fn new(config: Arc<Config>, store: Arc<dyn Store>) -> Self {
        let verifier = Arc::new(TokenVerifier::new(&config.jwt_secret));
        let relay = Relay::new(ConnectionRegistry::new(), store);
        Self {
            config,
            verifier,
            relay,
        }
    }
}

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "canvas_relay=info,tower_http=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Opens the configured store and builds the shared state. An unreachable
/// database after the retry budget is a startup failure.
pub async fn setup_shared_state(config: Arc<Config>) -> anyhow::Result<ServerState> {
    let store: Arc<dyn Store> = if config.uses_memory_store() {
        warn!("🧪 [STORE] Using in-memory store, nothing will be persisted across restarts");
        Arc::new(MemoryStore::new())
    } else {
        let url = config.database_url.clone();
        let max_connections = config.db_max_connections;
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(100)
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(DB_CONNECT_ATTEMPTS - 1);

        let sqlite = Retry::start(strategy, move || {
            let url = url.clone();
            async move {
                SqliteStore::connect(&url, max_connections)
                    .await
                    .inspect_err(|e| warn!("⚠️ [STORE] Connect to {} failed: {}", url, e))
            }
        })
        .await
        .with_context(|| format!("failed to open database {}", config.database_url))?;
        info!("🗃️ [STORE] Connected to {}", config.database_url);
        Arc::new(sqlite)
    };

    Ok(ServerState::new(config, store))
}

pub fn router(state: ServerState) -> Router {
    let handshake_timeout = state.config.handshake_timeout;
    Router::new()
        .route("/", get(socket_handlers::ws_handler))
        .route("/ws", get(socket_handlers::ws_handler))
        .route("/health", get(http_handlers::health_handler))
        .with_state(state)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            handshake_timeout,
        ))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
}
