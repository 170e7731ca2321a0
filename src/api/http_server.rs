// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use axum::{
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::websocket::{handle_websocket, ChatSessionManager};

#[derive(Clone)]
struct AppState {
    manager: Arc<ChatSessionManager>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Version number, build date and feature list
    pub build: serde_json::Value,
    /// `None` until the index has been loaded
    pub index_entries: Option<usize>,
    pub active_sessions: usize,
}

pub fn router(manager: Arc<ChatSessionManager>) -> Router {
    let state = AppState { manager };

    Router::new()
        // Health check
        .route("/health", get(health_handler))
        // Chat sessions
        .route("/v1/ws", get(websocket_handler))
        // Pick up a freshly ingested index
        .route("/v1/index/reload", post(reload_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(
    manager: Arc<ChatSessionManager>,
    bind_address: &str,
) -> anyhow::Result<()> {
    let app = router(manager);
    let listener = tokio::net::TcpListener::bind(bind_address).await?;

    tracing::info!("Chat server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Chat server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: crate::version::VERSION,
        build: crate::version::get_version_info(),
        index_entries: state.manager.index().loaded_entries().await,
        active_sessions: state.manager.active_sessions().await,
    })
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_websocket(socket, state.manager))
}

async fn reload_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.manager.index().reload().await {
        Ok(index) => (
            StatusCode::OK,
            Json(json!({
                "status": "reloaded",
                "entries": index.len(),
                "embedding_model": index.embedding_model(),
            })),
        ),
        Err(e) => {
            tracing::error!(code = e.error_code(), "Index reload failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "error",
                    "code": e.error_code(),
                })),
            )
        }
    }
}
