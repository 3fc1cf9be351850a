//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `config` - Engine configuration
//! - `device` - Host foreground and connectivity flags
//! - `events` - Server-Sent Events stream of engine events
//! - `health` - Service health checks
//! - `monitoring` - Start/stop
//! - `offline` - Offline detection queue
//! - `regions` - Region plan and transitions for the radio
//! - `scans` - Scan batches, battery readings, shift checks
//! - `system` - Status and diagnostics
//! - `targets` - Target registry
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::SharedState;

pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod health;
pub mod monitoring;
pub mod offline;
pub mod openapi;
pub mod regions;
pub mod scans;
pub mod system;
pub mod targets;

pub use error::{ApiError, ApiResult, ErrorResponse};

// Re-export OpenAPI utilities for the gen-openapi binary
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                    - Health check
/// /swagger-ui                - Swagger UI
/// /api
/// ├── /config                - Engine configuration
/// ├── /monitoring            - Start/stop
/// ├── /targets               - Target registry and refresh
/// ├── /scans                 - Scan batch ingestion
/// ├── /battery               - Battery readings
/// ├── /shift/check           - Shift window evaluation
/// ├── /regions               - Radio plan and region transitions
/// ├── /device                - Foreground and connectivity flags
/// ├── /offline-queue         - Queued detections and flush
/// ├── /status                - Engine status
/// ├── /diagnostics           - Diagnostic snapshot
/// ├── /events                - Event stream (SSE)
/// └── /openapi.json          - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    let api = Router::new()
        .nest("/config", config::router())
        .nest("/monitoring", monitoring::router())
        .nest("/targets", targets::router())
        .nest("/regions", regions::router())
        .nest("/device", device::router())
        .nest("/offline-queue", offline::router())
        .merge(scans::router())
        .merge(system::router())
        .route("/events", get(events::stream_events));

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .nest("/health", health::router())
        .nest("/api", api)
        .merge(SwaggerUi::new("/swagger-ui").url("/api/openapi.json", openapi::ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
