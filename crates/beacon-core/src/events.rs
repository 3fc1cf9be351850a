//! Outbound events and the single-subscriber dispatcher.
//!
//! Every event serializes as a flat JSON object with an `event`
//! discriminator, e.g. `{"event":"beaconLost","id":"AA:BB"}`.

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use utoipa::ToSchema;

use crate::types::TargetId;

/// Payload shared by the three detection-shaped events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DetectionPayload {
    /// Target id.
    pub id: TargetId,
    /// Display name from the registry.
    pub name: String,
    /// Smoothed strength at confirmation.
    pub avg_rssi: i32,
    /// Confirmation time in milliseconds.
    pub timestamp: i64,
    /// Last known battery percentage.
    pub battery: Option<u8>,
}

/// Everything the engine tells its host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum EngineEvent {
    /// Live telemetry for every accepted sample.
    #[serde(rename_all = "camelCase")]
    BeaconRanged {
        /// Target id.
        id: TargetId,
        /// Display name from the registry.
        name: String,
        /// Raw strength.
        rssi: i32,
        /// Smoothed strength.
        avg_rssi: i32,
        /// Sample time in milliseconds.
        timestamp: i64,
        /// Whether the host was in the background.
        is_background: bool,
        /// Last known battery percentage.
        battery: Option<u8>,
    },
    /// Confirmed in-shift detection that the gateway asked to surface.
    BeaconDetected(DetectionPayload),
    /// Confirmed detection outside the current shift window.
    OutsideShiftDetection(DetectionPayload),
    /// Confirmed detection queued because the gateway was unreachable.
    OfflineDetection(DetectionPayload),
    /// Target not seen within the lost timeout.
    BeaconLost {
        /// Target id.
        id: TargetId,
    },
    /// Platform reported entering a region.
    #[serde(rename_all = "camelCase")]
    RegionEnter {
        /// Region identifier.
        region_id: String,
    },
    /// Platform reported leaving a region.
    #[serde(rename_all = "camelCase")]
    RegionExit {
        /// Region identifier.
        region_id: String,
    },
    /// Scanning began.
    #[serde(rename_all = "camelCase")]
    MonitoringStarted {
        /// Targets being watched.
        target_count: usize,
    },
    /// Scanning ended.
    MonitoringStopped {},
}

impl EngineEvent {
    /// The `event` discriminator string.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::BeaconRanged { .. } => "beaconRanged",
            Self::BeaconDetected(_) => "beaconDetected",
            Self::OutsideShiftDetection(_) => "outsideShiftDetection",
            Self::OfflineDetection(_) => "offlineDetection",
            Self::BeaconLost { .. } => "beaconLost",
            Self::RegionEnter { .. } => "regionEnter",
            Self::RegionExit { .. } => "regionExit",
            Self::MonitoringStarted { .. } => "monitoringStarted",
            Self::MonitoringStopped {} => "monitoringStopped",
        }
    }
}

/// Receiving half handed to the host.
pub type EventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

/// Single-subscriber event fan-out.
///
/// Sending never fails: with no subscriber, or a subscriber that went away,
/// the event is logged and dropped.
#[derive(Debug, Default)]
pub struct EventDispatcher {
    subscriber: Mutex<Option<mpsc::UnboundedSender<EngineEvent>>>,
}

impl EventDispatcher {
    /// Create a dispatcher with no subscriber.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new subscriber, replacing (and closing) any previous one.
    pub fn subscribe(&self) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        let previous = self
            .subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(tx);
        if previous.is_some() {
            debug!("Event subscriber replaced");
        }
        rx
    }

    /// Whether a live subscriber is attached.
    pub fn has_subscriber(&self) -> bool {
        self.subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Deliver an event to the current subscriber.
    pub fn send(&self, event: EngineEvent) {
        let mut guard = self
            .subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            trace!(event = event.name(), "No subscriber, event dropped");
            return;
        };
        if let Err(err) = tx.send(event) {
            debug!(event = err.0.name(), "Subscriber gone, event dropped");
            guard.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_format_is_flat() {
        let event = EngineEvent::BeaconDetected(DetectionPayload {
            id: TargetId::new("aa:bb"),
            name: "Lobby".into(),
            avg_rssi: -80,
            timestamp: 2_000,
            battery: None,
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event": "beaconDetected",
                "id": "AA:BB",
                "name": "Lobby",
                "avgRssi": -80,
                "timestamp": 2000,
                "battery": null
            })
        );

        let started = EngineEvent::MonitoringStarted { target_count: 3 };
        assert_eq!(
            serde_json::to_value(&started).unwrap(),
            json!({"event": "monitoringStarted", "targetCount": 3})
        );
        assert_eq!(
            serde_json::to_value(EngineEvent::MonitoringStopped {}).unwrap(),
            json!({"event": "monitoringStopped"})
        );
        assert_eq!(
            serde_json::to_value(EngineEvent::RegionEnter { region_id: "r1".into() }).unwrap(),
            json!({"event": "regionEnter", "regionId": "r1"})
        );
    }

    #[test]
    fn test_send_without_subscriber_is_silent() {
        let dispatcher = EventDispatcher::new();
        dispatcher.send(EngineEvent::MonitoringStopped {});
        assert!(!dispatcher.has_subscriber());
    }

    #[tokio::test]
    async fn test_new_subscriber_replaces_previous() {
        let dispatcher = EventDispatcher::new();
        let mut first = dispatcher.subscribe();
        let mut second = dispatcher.subscribe();

        dispatcher.send(EngineEvent::BeaconLost { id: TargetId::new("x") });

        assert_eq!(
            second.recv().await,
            Some(EngineEvent::BeaconLost { id: TargetId::new("x") })
        );
        // The replaced sender was dropped, closing the first channel.
        assert_eq!(first.recv().await, None);
    }

    #[test]
    fn test_dropped_receiver_is_detached() {
        let dispatcher = EventDispatcher::new();
        let rx = dispatcher.subscribe();
        drop(rx);
        dispatcher.send(EngineEvent::MonitoringStopped {});
        assert!(!dispatcher.has_subscriber());
    }
}
