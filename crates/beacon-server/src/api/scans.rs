//! Scan ingestion endpoints: sighting batches, battery readings, shift checks.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use beacon_core::{BatchSummary, ShiftWindow, Sighting};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the scans router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/scans", post(submit_scans))
        .route("/battery", post(update_battery))
        .route("/shift/check", post(check_shift))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// One scan batch from the radio.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ScanBatchRequest {
    /// Sightings in arrival order.
    pub sightings: Vec<Sighting>,
}

/// Battery reading from a raw advertisement.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": "AA:BB:CC:DD:EE:FF",
    "percent": 87
}))]
pub struct BatteryRequest {
    /// Beacon identifier.
    pub id: String,

    /// Battery percentage, 0-100.
    #[schema(minimum = 0, maximum = 100)]
    pub percent: u8,
}

/// Whether the battery reading was cached.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BatteryResponse {
    /// `false` when the id is not a registered target.
    pub cached: bool,
}

/// Shift window to evaluate.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShiftCheckRequest {
    /// Window bounds and buffers.
    #[serde(flatten)]
    pub window: ShiftWindow,

    /// Instant to test, in the window's unit.
    pub timestamp: i64,
}

/// Shift evaluation result.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShiftCheckResponse {
    /// Whether detections are currently in-shift.
    pub within_shift: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// Submit a scan batch.
#[utoipa::path(
    post,
    path = "/api/scans",
    tag = "scans",
    operation_id = "submitScans",
    summary = "Submit a scan batch",
    description = "Feeds one batch of sightings to the detection engine. Unknown ids are \
        ignored and implausible samples are rejected without aborting the batch. \
        Also feeds the scan watchdog.",
    request_body = ScanBatchRequest,
    responses(
        (status = 200, description = "Batch processed", body = BatchSummary),
        (status = 409, description = "Monitoring not running", body = crate::api::ErrorResponse)
    )
)]
pub async fn submit_scans(
    State(state): State<SharedState>,
    Json(request): Json<ScanBatchRequest>,
) -> ApiResult<Json<BatchSummary>> {
    Ok(Json(state.engine.process_batch(request.sightings).await?))
}

/// Record a battery reading.
#[utoipa::path(
    post,
    path = "/api/battery",
    tag = "scans",
    operation_id = "updateBattery",
    summary = "Record a battery reading",
    description = "Caches the battery level for a registered target. Later sightings \
        without a battery value use the cached one.",
    request_body = BatteryRequest,
    responses(
        (status = 200, description = "Reading handled", body = BatteryResponse),
        (status = 400, description = "Percentage above 100", body = crate::api::ErrorResponse)
    )
)]
pub async fn update_battery(
    State(state): State<SharedState>,
    Json(request): Json<BatteryRequest>,
) -> ApiResult<Json<BatteryResponse>> {
    let cached = state
        .engine
        .update_battery(&request.id, request.percent)
        .await?;
    Ok(Json(BatteryResponse { cached }))
}

/// Evaluate the shift window.
#[utoipa::path(
    post,
    path = "/api/shift/check",
    tag = "scans",
    operation_id = "checkShift",
    summary = "Evaluate the shift window",
    description = "Tests the timestamp against the check-in and check-out windows and \
        remembers the answer. Detections outside the shift are surfaced as \
        outsideShiftDetection events and never reported to the gateway.",
    request_body = ShiftCheckRequest,
    responses(
        (status = 200, description = "Shift evaluated", body = ShiftCheckResponse)
    )
)]
pub async fn check_shift(
    State(state): State<SharedState>,
    Json(request): Json<ShiftCheckRequest>,
) -> Json<ShiftCheckResponse> {
    let within_shift = state
        .engine
        .check_shift(&request.window, request.timestamp)
        .await;
    Json(ShiftCheckResponse { within_shift })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shift_request_is_flat() {
        let json = r#"{
            "shiftStart": 100, "shiftEnd": 200,
            "bufferEarlyCheckIn": 10, "bufferLateCheckIn": 10,
            "bufferEarlyCheckOut": 10, "bufferLateCheckOut": 10,
            "timestamp": 95
        }"#;
        let request: ShiftCheckRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.window.shift_start, 100);
        assert_eq!(request.timestamp, 95);
    }

    #[test]
    fn test_scan_batch_request_deserialization() {
        let json = r#"{"sightings": [{"id": "aa", "rssi": -70, "timestamp": 5}]}"#;
        let request: ScanBatchRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.sightings.len(), 1);
        assert_eq!(request.sightings[0].battery, None);
    }
}
