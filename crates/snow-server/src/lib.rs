// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
//!
//! `snow-server` — the SSE transport.
//!
//! Binds session ids to connections, streams engine events as
//! `text/event-stream` frames (one JSON object per `data:` line), and
//! resolves interactive requests (tool confirmations, user questions) from
//! response POSTs carrying the original `requestId`.

mod interaction;
mod routes;
mod state;
mod wire;

pub use interaction::SseInteraction;
pub use state::{AppState, ConnectionRegistry, PendingRequests};
pub use wire::{map_engine_event, WireEvent};

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;

/// Build the router with every endpoint mounted and permissive CORS.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/events", get(routes::events))
        .route("/session/create", post(routes::create_session))
        .route("/session/load", post(routes::load_session))
        .route("/session/list", get(routes::list_sessions))
        .route("/session/rollback-points", get(routes::rollback_points))
        .route("/session/:id", delete(routes::delete_session))
        .route("/message", post(routes::message))
        .route("/context/compress", post(routes::compress))
        .route("/health", get(routes::health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until the listener fails or the process is stopped.
pub async fn serve(state: Arc<AppState>, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "snow SSE server listening");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
