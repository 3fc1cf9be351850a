//! Host device context: foreground and connectivity flags.

use axum::extract::State;
use axum::routing::put;
use axum::{Json, Router};
use beacon_core::Connectivity;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::state::SharedState;

/// Creates the device router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/foreground", put(set_foreground))
        .route("/connectivity", put(set_connectivity))
}

/// Foreground flag update.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ForegroundRequest {
    /// Whether the host app is in the foreground.
    pub foreground: bool,
}

/// Connectivity flag update.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConnectivityRequest {
    /// Whether the gateway is reachable.
    pub online: bool,
}

/// Set the foreground flag.
#[utoipa::path(
    put,
    path = "/api/device/foreground",
    tag = "device",
    operation_id = "setForeground",
    summary = "Set foreground state",
    description = "Samples ingested afterwards are tagged as background when false.",
    request_body = ForegroundRequest,
    responses(
        (status = 200, description = "Flag updated", body = ForegroundRequest)
    )
)]
pub async fn set_foreground(
    State(state): State<SharedState>,
    Json(request): Json<ForegroundRequest>,
) -> Json<ForegroundRequest> {
    state.engine.set_foreground(request.foreground).await;
    Json(request)
}

/// Set the connectivity flag.
#[utoipa::path(
    put,
    path = "/api/device/connectivity",
    tag = "device",
    operation_id = "setConnectivity",
    summary = "Set connectivity state",
    description = "While offline, in-shift detections are queued instead of reported. \
        Going online does not flush the queue; call the flush endpoint.",
    request_body = ConnectivityRequest,
    responses(
        (status = 200, description = "Flag updated", body = ConnectivityRequest)
    )
)]
pub async fn set_connectivity(
    State(state): State<SharedState>,
    Json(request): Json<ConnectivityRequest>,
) -> Json<ConnectivityRequest> {
    state.connectivity.set_online(request.online);
    info!(online = request.online, "Connectivity updated");
    Json(ConnectivityRequest {
        online: state.connectivity.is_online(),
    })
}
