//! Offline queue endpoints.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use beacon_core::{FlushSummary, OfflineQueueEntry};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the offline queue router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_offline_queue))
        .route("/flush", post(flush_offline_queue))
}

/// Queued detections.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OfflineQueueResponse {
    /// Entries, oldest first.
    pub entries: Vec<OfflineQueueEntry>,
}

/// List queued detections.
#[utoipa::path(
    get,
    path = "/api/offline-queue",
    tag = "offline",
    operation_id = "getOfflineQueue",
    summary = "List queued detections",
    description = "Returns detections captured while offline, oldest first.",
    responses(
        (status = 200, description = "Queue retrieved", body = OfflineQueueResponse)
    )
)]
pub async fn get_offline_queue(State(state): State<SharedState>) -> Json<OfflineQueueResponse> {
    Json(OfflineQueueResponse {
        entries: state.engine.offline_queue().await,
    })
}

/// Replay queued detections.
#[utoipa::path(
    post,
    path = "/api/offline-queue/flush",
    tag = "offline",
    operation_id = "flushOfflineQueue",
    summary = "Replay queued detections",
    description = "Reports every queued detection to the gateway as a non-initial \
        detection. Entries the gateway rejects stay queued.",
    responses(
        (status = 200, description = "Flush finished", body = FlushSummary),
        (status = 409, description = "Engine not configured", body = crate::api::ErrorResponse),
        (status = 502, description = "Offline", body = crate::api::ErrorResponse)
    )
)]
pub async fn flush_offline_queue(
    State(state): State<SharedState>,
) -> ApiResult<Json<FlushSummary>> {
    Ok(Json(state.engine.flush_offline_queue().await?))
}
