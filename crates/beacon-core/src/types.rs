//! Shared types and OpenAPI schemas.
//!
//! Types in this module cross module boundaries (registry, detection, engine)
//! or are exposed by the host shell, so they carry `ToSchema` derives.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Case-normalized beacon identifier.
///
/// Identifiers are opaque keys (a MAC address, an iBeacon `UUID:major:minor`
/// key, or anything else the data source hands out). They are trimmed and
/// upper-cased on construction so lookups never depend on caller casing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(from = "String", into = "String")]
#[schema(value_type = String, example = "AA:BB:CC:DD:EE:FF")]
pub struct TargetId(String);

impl TargetId {
    /// Normalize a raw identifier.
    #[must_use]
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_uppercase())
    }

    /// The normalized identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TargetId {
    fn from(raw: String) -> Self {
        Self::new(&raw)
    }
}

impl From<&str> for TargetId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<TargetId> for String {
    fn from(id: TargetId) -> Self {
        id.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A beacon the engine recognizes and reports on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Target {
    /// Normalized identifier.
    pub id: TargetId,

    /// Human-readable location name shown in notifications.
    #[schema(example = "Main Entrance")]
    pub name: String,
}

/// One raw sighting delivered by the platform scanner in a scan batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({
    "id": "AA:BB:CC:DD:EE:FF",
    "rssi": -72,
    "timestamp": 1_736_900_000_000_i64,
    "battery": 87
}))]
pub struct Sighting {
    /// Raw identifier as reported by the radio.
    pub id: String,

    /// Signal strength (dBm-like scale).
    pub rssi: i32,

    /// Milliseconds on the engine clock's epoch.
    #[serde(rename = "timestamp")]
    pub timestamp_ms: i64,

    /// Battery percentage, when the advertisement carries one.
    #[serde(default)]
    pub battery: Option<u8>,
}

/// A sighting after registry filtering, ready for the detection engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalSample {
    /// Target the sample belongs to.
    pub target: TargetId,
    /// Raw strength.
    pub rssi: i32,
    /// Sample time in milliseconds.
    pub timestamp_ms: i64,
    /// Whether the host app was in the background when sampled.
    pub is_background: bool,
    /// Optional battery percentage.
    pub battery: Option<u8>,
}

/// Engine lifecycle state.
///
/// Ordered: a state compares greater than every state it can only be
/// reached after. The only backwards transition is `Running -> Configured`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitoringState {
    /// Instance constructed, nothing acquired.
    Created,
    /// Platform resources acquired.
    Initialized,
    /// Configuration applied.
    Configured,
    /// Monitoring requested.
    Running,
}

impl MonitoringState {
    /// Upper-case name used in diagnostics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Initialized => "INITIALIZED",
            Self::Configured => "CONFIGURED",
            Self::Running => "RUNNING",
        }
    }
}

impl fmt::Display for MonitoringState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A work-shift window with asymmetric check-in/check-out buffers.
///
/// All values share one unit (seconds-of-day, epoch millis, ...); the
/// predicate only compares them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({
    "shiftStart": 28800,
    "shiftEnd": 61200,
    "bufferEarlyCheckIn": 1800,
    "bufferLateCheckIn": 600,
    "bufferEarlyCheckOut": 600,
    "bufferLateCheckOut": 1800
}))]
pub struct ShiftWindow {
    /// Shift start.
    pub shift_start: i64,
    /// Shift end.
    pub shift_end: i64,
    /// How early before the start a check-in counts.
    pub buffer_early_check_in: i64,
    /// How late after the start a check-in counts.
    pub buffer_late_check_in: i64,
    /// How early before the end a check-out counts.
    pub buffer_early_check_out: i64,
    /// How late after the end a check-out counts.
    pub buffer_late_check_out: i64,
}

/// Host device description attached to gateway events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DeviceInfo {
    /// Hardware model.
    #[schema(example = "raspberrypi-4b")]
    pub device_model: String,

    /// Operating system version.
    #[schema(example = "linux")]
    pub os_version: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            device_model: std::env::consts::ARCH.to_string(),
            os_version: std::env::consts::OS.to_string(),
        }
    }
}

/// Lightweight status summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    /// Whether the scan pipeline is actively watching targets.
    pub is_monitoring: bool,

    /// Number of targets in the registry.
    pub target_count: usize,

    /// Whether the host reports itself as foreground.
    pub is_foreground: bool,

    /// Configured user id, or `"none"`.
    pub user_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_id_normalizes_case_and_whitespace() {
        let id = TargetId::new("  aa:bb:cc:dd:ee:ff ");
        assert_eq!(id.as_str(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(id, TargetId::from("AA:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn test_target_id_deserializes_normalized() {
        let id: TargetId = serde_json::from_str("\"fda50693-a4e2:1:2\"").unwrap();
        assert_eq!(id.as_str(), "FDA50693-A4E2:1:2");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"FDA50693-A4E2:1:2\"");
    }

    #[test]
    fn test_monitoring_state_ordering() {
        assert!(MonitoringState::Created < MonitoringState::Initialized);
        assert!(MonitoringState::Initialized < MonitoringState::Configured);
        assert!(MonitoringState::Configured < MonitoringState::Running);
        assert_eq!(MonitoringState::Running.to_string(), "RUNNING");
    }

    #[test]
    fn test_sighting_wire_format() {
        let json = r#"{"id":"aa:bb","rssi":-70,"timestamp":1000}"#;
        let sighting: Sighting = serde_json::from_str(json).unwrap();
        assert_eq!(sighting.timestamp_ms, 1000);
        assert_eq!(sighting.battery, None);
    }
}
