//! HTTP route definitions.

mod collections;
mod health;
mod session;
mod status;
mod ws;

use crate::AppState;
use axum::Router;

/// Create all application routes.
pub fn create_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(status::routes())
        .merge(collections::routes())
        .merge(session::routes())
        .merge(ws::routes())
}
