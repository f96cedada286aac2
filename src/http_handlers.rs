// src/http_handlers.rs
use super::ServerState;
use axum::{extract::State, response::Json as AxumJson};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connections: usize,
    pub rooms: usize,
}

/// Liveness plus a rough load picture.
pub async fn health_handler(State(state): State<ServerState>) -> AxumJson<HealthResponse> {
    let registry = state.relay.registry();
    AxumJson(HealthResponse {
        status: "ok",
        connections: registry.connection_count().await,
        rooms: registry.room_count().await,
    })
}
