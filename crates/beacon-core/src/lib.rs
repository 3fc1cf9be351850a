//! # beacon-core
//!
//! Core logic for the beacon presence monitoring engine.
//!
//! This crate provides:
//! - RSSI smoothing and dwell-time detection for registered radio beacons
//! - Region subscription and ranging control over a host scanner
//! - Notification cooldown, daily caps and an offline replay queue
//! - Remote target refresh and detection reporting over HTTP
//! - A scan-stall watchdog and a diagnostics snapshot
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`engine`] - The owned engine instance and its lifecycle
//! - [`detection`] - Per-target smoothing, dwell confirmation, lost eviction
//! - [`registry`] - Target registry and region controller
//! - [`gate`] - Notification gate and offline queue
//! - [`gateway`] - Remote gateway client
//! - [`sync`] - Target refresh with bounded retry
//! - [`watchdog`] - Scan-liveness watchdog
//! - [`events`] - Outbound events and the subscriber channel
//! - [`platform`] - Host scanner, connectivity and notifier traits
//! - [`storage`] - Key-value persistence
//! - [`diagnostics`] - Last-step / last-error tracking
//! - [`config`] - Engine configuration loading and validation
//! - [`clock`] - Injectable time source
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared types and OpenAPI schemas
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use beacon_core::{BeaconEngine, EngineConfig, MockScanner};
//!
//! # async fn run() -> beacon_core::Result<()> {
//! let engine = BeaconEngine::builder(Arc::new(MockScanner::new())).build();
//! let mut events = engine.subscribe_events();
//! engine
//!     .configure(EngineConfig::new(
//!         "https://gw.example.com/presence",
//!         "https://gw.example.com/beacons",
//!         "staff-42",
//!     ))
//!     .await?;
//! while let Some(event) = events.recv().await {
//!     println!("{}", event.name());
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod clock;
pub mod config;
pub mod detection;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod events;
pub mod gate;
pub mod gateway;
pub mod platform;
pub mod registry;
pub mod storage;
pub mod sync;
pub mod types;
pub mod watchdog;

// Re-export primary types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{is_valid_http_url, ConfigError, ConfigResult, EngineConfig, ScanPeriods};
pub use detection::{is_within_shift, Detection, DetectionEngine, DetectionError};
pub use diagnostics::{DiagnosticSnapshot, DiagnosticsTracker};
pub use engine::{BatchSummary, BeaconEngine, EngineBuilder, FlushSummary, RefreshSummary};
pub use error::{BeaconError, Result};
pub use events::{DetectionPayload, EngineEvent, EventReceiver};
pub use gate::{GateDecision, NotificationGate, OfflineQueueEntry};
pub use gateway::{Gateway, GatewayError, GatewayFactory, HttpGateway, HttpGatewayFactory};
#[cfg(any(test, feature = "mock-platform"))]
pub use platform::{MockScanner, RecordingNotifier};
pub use platform::{
    Connectivity, NoopNotifier, Notification, Notifier, PlatformError, PlatformScanner, Region,
    StaticConnectivity,
};
pub use registry::{RegionController, TargetRegistry, SHARED_REGION_ID};
pub use storage::{default_data_dir, preferences_path, FileStore, MemoryStore, PreferenceStore};
pub use types::{
    DeviceInfo, EngineStatus, MonitoringState, ShiftWindow, Sighting, Target, TargetId,
};
