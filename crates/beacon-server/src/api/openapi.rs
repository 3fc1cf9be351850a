//! OpenAPI specification generation for the beacon API.
//!
//! The generated document is served at `/api/openapi.json`, rendered by
//! Swagger UI at `/swagger-ui`, and written to `openapi.json` by the
//! `gen-openapi` binary for client generation.

use beacon_core::{
    BatchSummary, DetectionPayload, DiagnosticSnapshot, EngineConfig, EngineEvent, EngineStatus,
    FlushSummary, MonitoringState, OfflineQueueEntry, RefreshSummary, Region, ShiftWindow,
    Sighting, Target, TargetId,
};
use utoipa::OpenApi;

use super::config::UpdateConfigResponse;
use super::device::{ConnectivityRequest, ForegroundRequest};
use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::monitoring::MonitoringResponse;
use super::offline::OfflineQueueResponse;
use super::regions::RegionStateRequest;
use super::scans::{
    BatteryRequest, BatteryResponse, ScanBatchRequest, ShiftCheckRequest, ShiftCheckResponse,
};
use super::system::StatusResponse;
use super::targets::{AddTargetRequest, AddTargetResponse, TargetsResponse};
use crate::host::RadioPlan;

/// Returns the OpenAPI specification as pretty JSON.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "beacon API",
        version = "0.1.0",
        description = r#"
# beacon API

Host shell for the beacon presence engine. The engine turns noisy radio
sightings into confirmed arrivals, gated by a work-shift window, and reports
them to a remote gateway.

## Integration loop

1. `PUT /api/config` once. Targets are fetched from the gateway and monitoring
   starts by itself.
2. The radio polls `GET /api/regions` for what to watch and range.
3. The radio posts sightings to `POST /api/scans` and region transitions to
   `/api/regions/{id}/enter|exit`.
4. `POST /api/shift/check` whenever the shift context changes.
5. Consume `GET /api/events` for detections.

A sighting counts toward a detection only while its smoothed strength stays
at or above the RSSI threshold for the configured dwell time.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local beacon server")
    ),
    tags(
        (name = "system", description = "Health, status and diagnostics"),
        (name = "config", description = "Engine configuration"),
        (name = "monitoring", description = "Monitoring lifecycle"),
        (name = "targets", description = "Target registry and gateway refresh"),
        (name = "scans", description = "Sighting ingestion, battery readings and shift checks"),
        (name = "regions", description = "Region watch plan and transitions"),
        (name = "device", description = "Host foreground and connectivity flags"),
        (name = "offline", description = "Detections queued while offline"),
        (name = "events", description = "Engine event stream")
    ),
    paths(
        super::health::health_check,
        super::system::get_status,
        super::system::get_diagnostics,
        super::config::get_config,
        super::config::update_config,
        super::monitoring::start_monitoring,
        super::monitoring::stop_monitoring,
        super::targets::list_targets,
        super::targets::add_target,
        super::targets::clear_targets,
        super::targets::refresh_targets,
        super::scans::submit_scans,
        super::scans::update_battery,
        super::scans::check_shift,
        super::regions::get_regions,
        super::regions::enter_region,
        super::regions::exit_region,
        super::regions::region_state,
        super::device::set_foreground,
        super::device::set_connectivity,
        super::offline::get_offline_queue,
        super::offline::flush_offline_queue,
        super::events::stream_events,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            StatusResponse,
            EngineStatus,
            DiagnosticSnapshot,
            MonitoringState,
            EngineConfig,
            UpdateConfigResponse,
            MonitoringResponse,
            Target,
            TargetId,
            TargetsResponse,
            AddTargetRequest,
            AddTargetResponse,
            RefreshSummary,
            Sighting,
            ScanBatchRequest,
            BatchSummary,
            BatteryRequest,
            BatteryResponse,
            ShiftWindow,
            ShiftCheckRequest,
            ShiftCheckResponse,
            Region,
            RadioPlan,
            RegionStateRequest,
            ForegroundRequest,
            ConnectivityRequest,
            OfflineQueueEntry,
            OfflineQueueResponse,
            FlushSummary,
            EngineEvent,
            DetectionPayload,
        )
    )
)]
pub struct ApiDoc;
