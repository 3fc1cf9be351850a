//! Target registry endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use beacon_core::{RefreshSummary, Target, TargetId};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the targets router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_targets).post(add_target).delete(clear_targets))
        .route("/refresh", post(refresh_targets))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Registered targets.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TargetsResponse {
    /// Targets ordered by id.
    pub targets: Vec<Target>,
}

/// Request to register one target.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": "aa:bb:cc:dd:ee:ff",
    "name": "Main Entrance"
}))]
pub struct AddTargetRequest {
    /// Beacon identifier; normalized to upper case.
    pub id: String,

    /// Display name.
    pub name: String,
}

/// Response after registering a target.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AddTargetResponse {
    /// Normalized id as stored.
    pub id: TargetId,

    /// Display name as stored.
    pub name: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// List registered targets.
#[utoipa::path(
    get,
    path = "/api/targets",
    tag = "targets",
    operation_id = "listTargets",
    summary = "List targets",
    description = "Returns every registered target ordered by id.",
    responses(
        (status = 200, description = "Targets retrieved", body = TargetsResponse)
    )
)]
pub async fn list_targets(State(state): State<SharedState>) -> Json<TargetsResponse> {
    Json(TargetsResponse {
        targets: state.engine.targets().await,
    })
}

/// Register or rename a target.
#[utoipa::path(
    post,
    path = "/api/targets",
    tag = "targets",
    operation_id = "addTarget",
    summary = "Register a target",
    description = "Adds a target, or renames it if already registered. While scanning, \
        region subscriptions are refreshed to include it.",
    request_body = AddTargetRequest,
    responses(
        (status = 201, description = "Target registered", body = AddTargetResponse),
        (status = 400, description = "Malformed id or name", body = crate::api::ErrorResponse)
    )
)]
pub async fn add_target(
    State(state): State<SharedState>,
    Json(request): Json<AddTargetRequest>,
) -> ApiResult<(StatusCode, Json<AddTargetResponse>)> {
    let id = state.engine.add_target(&request.id, &request.name).await?;
    Ok((
        StatusCode::CREATED,
        Json(AddTargetResponse {
            id,
            name: request.name.trim().to_string(),
        }),
    ))
}

/// Remove every target.
#[utoipa::path(
    delete,
    path = "/api/targets",
    tag = "targets",
    operation_id = "clearTargets",
    summary = "Clear targets",
    description = "Stops monitoring and removes every registered target.",
    responses(
        (status = 204, description = "Targets cleared"),
        (status = 500, description = "Storage failure", body = crate::api::ErrorResponse)
    )
)]
pub async fn clear_targets(State(state): State<SharedState>) -> ApiResult<StatusCode> {
    state.engine.clear_targets().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Refresh targets from the gateway.
#[utoipa::path(
    post,
    path = "/api/targets/refresh",
    tag = "targets",
    operation_id = "refreshTargets",
    summary = "Refresh targets from the gateway",
    description = "Fetches the authoritative target list with bounded retry. On success \
        the registry is replaced; on exhaustion the cached targets are kept. \
        This call waits for the retries to finish.",
    responses(
        (status = 200, description = "Refresh finished", body = RefreshSummary),
        (status = 409, description = "Engine not configured", body = crate::api::ErrorResponse)
    )
)]
pub async fn refresh_targets(State(state): State<SharedState>) -> ApiResult<Json<RefreshSummary>> {
    Ok(Json(state.engine.refresh_targets().await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_target_request_deserialization() {
        let json = r#"{"id": "aa:bb", "name": "Lobby"}"#;
        let request: AddTargetRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.id, "aa:bb");
        assert_eq!(request.name, "Lobby");
    }
}
