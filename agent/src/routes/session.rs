//! Session lifecycle.

use axum::{extract::State, http::StatusCode, routing::post, Router};

use crate::error::Result;
use crate::AppState;

/// Create session routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/session/reset", post(reset_handler))
}

/// POST /session/reset - Discard everything tied to the session (logout).
async fn reset_handler(State(state): State<AppState>) -> Result<StatusCode> {
    state.engine.reset().await?;
    Ok(StatusCode::NO_CONTENT)
}
