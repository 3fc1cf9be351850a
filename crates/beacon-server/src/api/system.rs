//! Status and diagnostics endpoints.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use beacon_core::{DiagnosticSnapshot, EngineStatus};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::SharedState;

/// Creates the system router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/status", get(get_status))
        .route("/diagnostics", get(get_diagnostics))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Engine status plus server uptime.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({
    "version": "0.1.0",
    "uptimeSecs": 3600,
    "isMonitoring": true,
    "targetCount": 4,
    "isForeground": true,
    "userId": "staff-42",
    "isOnline": true
}))]
pub struct StatusResponse {
    /// Server version.
    pub version: String,

    /// Server uptime in seconds.
    pub uptime_secs: u64,

    /// Engine summary.
    #[serde(flatten)]
    pub engine: EngineStatus,

    /// Connectivity flag as last set by the host.
    pub is_online: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get engine status.
#[utoipa::path(
    get,
    path = "/api/status",
    tag = "system",
    operation_id = "getStatus",
    summary = "Get engine status",
    description = "Returns whether monitoring is active, the number of registered \
        targets, the foreground flag and the configured user.",
    responses(
        (status = 200, description = "Status retrieved", body = StatusResponse)
    )
)]
pub async fn get_status(State(state): State<SharedState>) -> Json<StatusResponse> {
    use beacon_core::Connectivity;

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        engine: state.engine.status().await,
        is_online: state.connectivity.is_online(),
    })
}

/// Get the diagnostic snapshot.
#[utoipa::path(
    get,
    path = "/api/diagnostics",
    tag = "system",
    operation_id = "getDiagnostics",
    summary = "Get diagnostic snapshot",
    description = "Returns the lifecycle state, the last operation performed and the \
        last recorded error with its numeric code. Reading it changes nothing.",
    responses(
        (status = 200, description = "Snapshot retrieved", body = DiagnosticSnapshot)
    )
)]
pub async fn get_diagnostics(State(state): State<SharedState>) -> Json<DiagnosticSnapshot> {
    Json(state.engine.diagnostics().await)
}
