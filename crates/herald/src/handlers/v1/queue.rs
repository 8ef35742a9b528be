//! Delivery queue HTTP handlers.

use axum::Json;
use axum::extract::State;

use crate::api::{ClearQueueResponse, QueueStatsResponse};
use crate::server::AppState;

/// GET /api/v1/queue
pub async fn queue_stats(State(state): State<AppState>) -> Json<QueueStatsResponse> {
    Json(state.services.queue.stats().into())
}

/// DELETE /api/v1/queue
///
/// Drops messages that have not been handed to the session yet.
pub async fn clear_queue(State(state): State<AppState>) -> Json<ClearQueueResponse> {
    Json(ClearQueueResponse {
        cleared: state.services.queue.clear(),
    })
}
