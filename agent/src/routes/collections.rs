//! Record writes and local reads.
//!
//! Ids in paths starting with `local_` address records that only exist
//! locally so far; anything else is a remote record id.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use moi_engine::{LocalRecord, RecordRef};

use crate::engine::Submitted;
use crate::error::Result;
use crate::AppState;

/// Create collection routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/collections/{collection}",
            get(list_handler).post(create_handler),
        )
        .route(
            "/collections/{collection}/{id}",
            put(update_handler).delete(delete_handler),
        )
}

/// `201` once the remote store has the write, `202` while it is queued.
fn accepted(submitted: Submitted) -> (StatusCode, Json<Submitted>) {
    let code = if submitted.state.is_pending() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::CREATED
    };
    (code, Json(submitted))
}

/// POST /collections/{collection} - Create a record.
async fn create_handler(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<Submitted>)> {
    let submitted = state.engine.enqueue_if_offline(&collection, payload).await?;
    Ok(accepted(submitted))
}

/// PUT /collections/{collection}/{id} - Replace a record.
async fn update_handler(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Json(payload): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<Submitted>)> {
    let submitted = state
        .engine
        .update(&collection, RecordRef::parse(&id), payload)
        .await?;
    Ok(accepted(submitted))
}

/// DELETE /collections/{collection}/{id} - Delete a record.
async fn delete_handler(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
) -> Result<(StatusCode, Json<Submitted>)> {
    let submitted = state.engine.delete(&collection, RecordRef::parse(&id)).await?;
    Ok(accepted(submitted))
}

/// GET /collections/{collection} - Local copies, oldest first.
async fn list_handler(
    State(state): State<AppState>,
    Path(collection): Path<String>,
) -> Json<Vec<LocalRecord>> {
    Json(state.engine.records(&collection))
}
