//! Last-step / last-error tracker.
//!
//! Every public engine operation records its name as the last step; failures
//! record a numeric code and message. The snapshot is readable at any time
//! and never mutates anything.

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::error::BeaconError;
use crate::types::MonitoringState;

/// Point-in-time view of the engine's health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({
    "state": "RUNNING",
    "isInitialized": true,
    "isMonitoring": true,
    "lastStep": "engine.start",
    "lastErrorCode": null,
    "lastErrorMessage": null,
    "timestamp": 1_736_900_000_000_i64
}))]
pub struct DiagnosticSnapshot {
    /// Lifecycle state name.
    pub state: MonitoringState,
    /// Whether initialization has completed.
    pub is_initialized: bool,
    /// Whether the engine is in the running state.
    pub is_monitoring: bool,
    /// Name of the most recent operation.
    pub last_step: Option<String>,
    /// Code of the most recent failure.
    pub last_error_code: Option<u16>,
    /// Message of the most recent failure.
    pub last_error_message: Option<String>,
    /// Snapshot time in milliseconds.
    pub timestamp: i64,
}

#[derive(Debug, Default)]
struct TrackerState {
    last_step: Option<String>,
    last_error_code: Option<u16>,
    last_error_message: Option<String>,
}

/// Records steps and errors for [`DiagnosticSnapshot`].
#[derive(Debug, Default)]
pub struct DiagnosticsTracker {
    state: Mutex<TrackerState>,
}

impl DiagnosticsTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the operation being performed.
    pub fn step(&self, step: &str) {
        debug!(step, "Diagnostic step");
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_step = Some(step.to_string());
    }

    /// Record a failure with an explicit code.
    pub fn error(&self, code: u16, message: impl Into<String>) {
        let message = message.into();
        warn!(code, message = %message, "Diagnostic error recorded");
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.last_error_code = Some(code);
        state.last_error_message = Some(message);
    }

    /// Record a [`BeaconError`] under its diagnostic code.
    pub fn record(&self, err: &BeaconError) {
        self.error(err.diagnostic_code(), err.to_string());
    }

    /// Build a snapshot for `state` at `now_ms`.
    pub fn snapshot(&self, state: MonitoringState, now_ms: i64) -> DiagnosticSnapshot {
        let tracked = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        DiagnosticSnapshot {
            state,
            is_initialized: state >= MonitoringState::Initialized,
            is_monitoring: state == MonitoringState::Running,
            last_step: tracked.last_step.clone(),
            last_error_code: tracked.last_error_code,
            last_error_message: tracked.last_error_message.clone(),
            timestamp: now_ms,
        }
    }
}
