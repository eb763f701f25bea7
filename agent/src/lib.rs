//! Moi Sync Agent - offline-first write synchronisation for the Moi app.
//!
//! The agent runs next to the UI. Domain components submit record writes
//! through it; while the remote store is unreachable (or the user forced
//! offline mode) the writes are applied locally and queued, and the queue is
//! flushed on reconnect, on a timer or on request.
//!
//! The state machine lives in [`moi_engine`]. This crate adds the async
//! host around it: connectivity monitoring, the remote store client, SQLite
//! persistence and a small HTTP/WebSocket surface on the loopback.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod network;
pub mod remote;
pub mod routes;
pub mod websocket;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::engine::SyncEngine;
use crate::websocket::ConnectionManager;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: SyncEngine,
    pub conn_manager: Arc<ConnectionManager>,
}

/// Build the router with tracing and CORS layers.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
