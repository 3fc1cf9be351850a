//! Engine configuration endpoints.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use beacon_core::{EngineConfig, MonitoringState};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the config router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(get_config).put(update_config))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Result of applying a configuration.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({
    "success": true,
    "state": "CONFIGURED"
}))]
pub struct UpdateConfigResponse {
    /// Whether the configuration was applied.
    pub success: bool,

    /// Engine state after applying it. Monitoring starts on its own once the
    /// target refresh completes.
    pub state: MonitoringState,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the applied engine configuration.
#[utoipa::path(
    get,
    path = "/api/config",
    tag = "config",
    operation_id = "getConfig",
    summary = "Get engine configuration",
    description = "Returns the configuration currently applied to the engine.",
    responses(
        (status = 200, description = "Configuration retrieved", body = EngineConfig),
        (status = 404, description = "Engine has not been configured", body = crate::api::ErrorResponse)
    )
)]
pub async fn get_config(State(state): State<SharedState>) -> ApiResult<Json<EngineConfig>> {
    state
        .engine
        .config()
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound {
            error_code: "NOT_CONFIGURED".to_string(),
            message: "The engine has not been configured".to_string(),
        })
}

/// Configure the engine.
#[utoipa::path(
    put,
    path = "/api/config",
    tag = "config",
    operation_id = "updateConfig",
    summary = "Configure the engine",
    description = "Validates and applies the configuration, persists it, and starts \
        a target refresh. Monitoring begins automatically once targets are known.",
    request_body = EngineConfig,
    responses(
        (status = 200, description = "Configuration applied", body = UpdateConfigResponse),
        (status = 422, description = "Configuration invalid", body = crate::api::ErrorResponse),
        (status = 500, description = "Initialization or storage failure", body = crate::api::ErrorResponse)
    )
)]
pub async fn update_config(
    State(state): State<SharedState>,
    Json(config): Json<EngineConfig>,
) -> ApiResult<Json<UpdateConfigResponse>> {
    let user_id = config.user_id.clone();
    state.engine.configure(config).await?;
    info!(user_id = %user_id, "Engine configured via API");

    Ok(Json(UpdateConfigResponse {
        success: true,
        state: state.engine.state().await,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_config_response_serialization() {
        let response = UpdateConfigResponse {
            success: true,
            state: MonitoringState::Configured,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"state\":\"CONFIGURED\""));
    }
}
