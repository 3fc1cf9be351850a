//! Region endpoints.
//!
//! The external radio polls `GET /api/regions` for what to watch and reports
//! transitions back through the enter/exit/state routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::api::error::ApiResult;
use crate::host::RadioPlan;
use crate::state::SharedState;

/// Creates the regions router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_regions))
        .route("/{id}/enter", post(enter_region))
        .route("/{id}/exit", post(exit_region))
        .route("/{id}/state", post(region_state))
}

/// Initial inside/outside state reported by the platform.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RegionStateRequest {
    /// Whether the device is inside the region.
    pub inside: bool,
}

/// Get the radio plan.
#[utoipa::path(
    get,
    path = "/api/regions",
    tag = "regions",
    operation_id = "getRegions",
    summary = "Get the radio plan",
    description = "Returns the regions the radio should watch, the regions it should \
        range inside, and the scan cadence.",
    responses(
        (status = 200, description = "Plan retrieved", body = RadioPlan)
    )
)]
pub async fn get_regions(State(state): State<SharedState>) -> Json<RadioPlan> {
    let mut plan = state.scanner.plan();
    if !plan.scanning {
        plan.regions = state.engine.regions().await;
    }
    Json(plan)
}

/// Report entering a region.
#[utoipa::path(
    post,
    path = "/api/regions/{id}/enter",
    tag = "regions",
    operation_id = "enterRegion",
    summary = "Report region entry",
    description = "Emits a regionEnter event and starts ranging inside the region.",
    params(("id" = String, Path, description = "Region identifier")),
    responses(
        (status = 204, description = "Transition handled"),
        (status = 503, description = "Scanner refused to range", body = crate::api::ErrorResponse)
    )
)]
pub async fn enter_region(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.engine.region_entered(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Report leaving a region.
#[utoipa::path(
    post,
    path = "/api/regions/{id}/exit",
    tag = "regions",
    operation_id = "exitRegion",
    summary = "Report region exit",
    description = "Emits a regionExit event and stops ranging inside the region.",
    params(("id" = String, Path, description = "Region identifier")),
    responses(
        (status = 204, description = "Transition handled"),
        (status = 503, description = "Scanner refused to stop ranging", body = crate::api::ErrorResponse)
    )
)]
pub async fn exit_region(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.engine.region_exited(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Report the initial region state.
#[utoipa::path(
    post,
    path = "/api/regions/{id}/state",
    tag = "regions",
    operation_id = "regionState",
    summary = "Report initial region state",
    description = "Adjusts ranging to match the platform's initial determination \
        without emitting a transition event.",
    params(("id" = String, Path, description = "Region identifier")),
    request_body = RegionStateRequest,
    responses(
        (status = 204, description = "State applied")
    )
)]
pub async fn region_state(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(request): Json<RegionStateRequest>,
) -> ApiResult<StatusCode> {
    state
        .engine
        .region_state_determined(&id, request.inside)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
