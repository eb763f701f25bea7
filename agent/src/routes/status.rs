//! Status, manual sync and the offline toggle.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use moi_engine::{FlushReport, SyncStatus};
use serde::Serialize;

use crate::error::Result;
use crate::AppState;

/// Response to a manual sync.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub status: SyncStatus,
    /// Absent when there was nothing to flush or a flush was already running.
    pub report: Option<FlushReport>,
}

/// Response to the offline toggle.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleResponse {
    pub manual_offline: bool,
    pub status: SyncStatus,
}

/// Create status routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(status_handler))
        .route("/sync", post(sync_handler))
        .route("/offline/toggle", post(toggle_handler))
}

/// GET /status - Current sync status.
async fn status_handler(State(state): State<AppState>) -> Json<SyncStatus> {
    Json(state.engine.current_status())
}

/// POST /sync - Flush the queue now.
async fn sync_handler(State(state): State<AppState>) -> Result<Json<SyncResponse>> {
    let report = state.engine.manual_sync().await?;
    Ok(Json(SyncResponse {
        status: state.engine.current_status(),
        report,
    }))
}

/// POST /offline/toggle - Flip manual offline mode.
async fn toggle_handler(State(state): State<AppState>) -> Result<Json<ToggleResponse>> {
    let result = state.engine.toggle_manual_offline().await?;
    Ok(Json(ToggleResponse {
        manual_offline: result.manual_offline,
        status: state.engine.current_status(),
    }))
}
