//! Monitoring lifecycle endpoints.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use beacon_core::{BeaconError, MonitoringState};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the monitoring router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/start", post(start_monitoring))
        .route("/stop", post(stop_monitoring))
}

/// Lifecycle state after a start/stop request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({
    "state": "RUNNING",
    "targetCount": 3
}))]
pub struct MonitoringResponse {
    /// Engine state after the call.
    pub state: MonitoringState,

    /// Registered targets. Zero after start means scanning waits for the
    /// target refresh.
    pub target_count: usize,
}

async fn respond(state: &SharedState) -> Json<MonitoringResponse> {
    Json(MonitoringResponse {
        state: state.engine.state().await,
        target_count: state.engine.status().await.target_count,
    })
}

/// Start monitoring.
#[utoipa::path(
    post,
    path = "/api/monitoring/start",
    tag = "monitoring",
    operation_id = "startMonitoring",
    summary = "Start monitoring",
    description = "Subscribes to the regions of every registered target and arms the \
        scan watchdog. With no targets yet, schedules a refresh and starts once \
        targets arrive. Idempotent while running.",
    responses(
        (status = 200, description = "Monitoring started or scheduled", body = MonitoringResponse),
        (status = 409, description = "Engine not configured", body = crate::api::ErrorResponse),
        (status = 503, description = "Scanner refused to start", body = crate::api::ErrorResponse)
    )
)]
pub async fn start_monitoring(
    State(state): State<SharedState>,
) -> ApiResult<Json<MonitoringResponse>> {
    match state.engine.start().await {
        Ok(()) => Ok(respond(&state).await),
        Err(err @ BeaconError::MonitoringNotStarted(_)) => Err(ApiError::Conflict {
            error_code: err.error_code().to_string(),
            message: err.to_string(),
            state: Some(state.engine.state().await.to_string()),
        }),
        Err(err) => Err(err.into()),
    }
}

/// Stop monitoring.
#[utoipa::path(
    post,
    path = "/api/monitoring/stop",
    tag = "monitoring",
    operation_id = "stopMonitoring",
    summary = "Stop monitoring",
    description = "Stops scanning, the watchdog and ranging, and clears per-target \
        detection state. Idempotent.",
    responses(
        (status = 200, description = "Monitoring stopped", body = MonitoringResponse)
    )
)]
pub async fn stop_monitoring(
    State(state): State<SharedState>,
) -> ApiResult<Json<MonitoringResponse>> {
    state.engine.stop().await?;
    Ok(respond(&state).await)
}
