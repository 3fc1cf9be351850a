//! Host platform collaborators.
//!
//! The engine never talks to a radio, a notification centre or the network
//! stack directly. Hosts implement these traits:
//!
//! - [`PlatformScanner`] - region subscription, ranging, wake lock
//! - [`Connectivity`] - current online/offline state
//! - [`Notifier`] - surfaces a local notification
//!
//! Calls are synchronous and expected to return quickly; the engine may
//! invoke them while holding its state lock.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::config::ScanPeriods;
use crate::types::TargetId;

/// Errors reported by a [`PlatformScanner`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// A required platform resource (radio service, wake lock) is missing.
    #[error("Platform resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// The scan service rejected or aborted a request.
    #[error("Scan failed: {0}")]
    ScanFailed(String),

    /// The host lacks the permission needed to scan.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

/// Result alias for platform operations.
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// A coarse platform subscription covering one or more targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    /// Region identifier, reported back in enter/exit notifications.
    #[schema(example = "FDA50693-A4E2-4FB1-AFCF-C6EB07647825")]
    pub id: String,

    /// Proximity UUID for iBeacon-style regions; `None` for the shared
    /// catch-all region.
    pub uuid: Option<String>,

    /// Targets the region covers.
    pub target_ids: Vec<TargetId>,
}

/// Native radio-scanning and region-subscription service.
pub trait PlatformScanner: Send + Sync {
    /// Acquire whatever the scanner needs before first use.
    ///
    /// # Errors
    ///
    /// [`PlatformError::ResourceUnavailable`] when setup fails.
    fn initialize(&self) -> PlatformResult<()>;

    /// Apply foreground/background scan cadence.
    ///
    /// # Errors
    ///
    /// Scanner-specific failures.
    fn configure_scan_periods(&self, periods: ScanPeriods) -> PlatformResult<()>;

    /// Begin coarse monitoring of `regions`, replacing any previous set.
    ///
    /// # Errors
    ///
    /// Scanner-specific failures.
    fn start_watching(&self, regions: &[Region]) -> PlatformResult<()>;

    /// Stop all monitoring and ranging.
    ///
    /// # Errors
    ///
    /// Scanner-specific failures.
    fn stop_watching(&self) -> PlatformResult<()>;

    /// Begin fine-grained ranging inside `region_id`.
    ///
    /// # Errors
    ///
    /// Scanner-specific failures.
    fn start_ranging(&self, region_id: &str) -> PlatformResult<()>;

    /// Stop ranging inside `region_id`.
    ///
    /// # Errors
    ///
    /// Scanner-specific failures.
    fn stop_ranging(&self, region_id: &str) -> PlatformResult<()>;

    /// Keep the device awake while scanning.
    ///
    /// # Errors
    ///
    /// [`PlatformError::ResourceUnavailable`] when the lock cannot be taken.
    fn acquire_wake_lock(&self) -> PlatformResult<()>;

    /// Release the wake lock. Releasing an unheld lock is a no-op.
    fn release_wake_lock(&self);
}

/// Current reachability of the remote gateway.
pub trait Connectivity: Send + Sync {
    /// `true` when reports can be sent now.
    fn is_online(&self) -> bool;
}

/// A connectivity flag the host flips by hand.
#[derive(Debug)]
pub struct StaticConnectivity {
    online: AtomicBool,
}

impl StaticConnectivity {
    /// Start in the given state.
    #[must_use]
    pub const fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    /// Update the state.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Default for StaticConnectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for StaticConnectivity {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// A local notification the host should surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Notification {
    /// Target that triggered it.
    pub target: TargetId,
    /// Target display name.
    pub name: String,
    /// Gateway-supplied parameters (shift, location, deep-link data).
    #[schema(value_type = Object)]
    pub params: serde_json::Value,
}

/// Local notification delivery.
pub trait Notifier: Send + Sync {
    /// Show `notification`. Must not block.
    fn notify(&self, notification: &Notification);
}

/// Notifier that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _notification: &Notification) {}
}

// ============================================================================
// Mock scanner (testing without radio hardware)
// ============================================================================

#[cfg(any(test, feature = "mock-platform"))]
pub use mock::{MockScanner, RecordingNotifier};

#[cfg(any(test, feature = "mock-platform"))]
mod mock {
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Mutex, PoisonError};

    use super::{
        Notification, Notifier, PlatformError, PlatformResult, PlatformScanner, Region,
        ScanPeriods,
    };

    #[derive(Debug, Default)]
    struct MockState {
        initialized: bool,
        periods: Option<ScanPeriods>,
        watching: Vec<Region>,
        ranging: BTreeSet<String>,
        wake_lock_held: bool,
        start_count: usize,
        stop_count: usize,
    }

    /// In-memory scanner that records every call.
    #[derive(Debug, Default)]
    pub struct MockScanner {
        state: Mutex<MockState>,
        fail_initialize: AtomicBool,
        fail_start: AtomicBool,
    }

    impl MockScanner {
        /// Create a scanner where every call succeeds.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make `initialize` fail.
        pub fn fail_initialize(&self, fail: bool) {
            self.fail_initialize.store(fail, Ordering::SeqCst);
        }

        /// Make `start_watching` fail.
        pub fn fail_start(&self, fail: bool) {
            self.fail_start.store(fail, Ordering::SeqCst);
        }

        fn with_state<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
            f(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner))
        }

        /// Whether `initialize` succeeded.
        pub fn is_initialized(&self) -> bool {
            self.with_state(|s| s.initialized)
        }

        /// Regions currently watched.
        pub fn watching(&self) -> Vec<Region> {
            self.with_state(|s| s.watching.clone())
        }

        /// Regions currently ranged.
        pub fn ranging(&self) -> BTreeSet<String> {
            self.with_state(|s| s.ranging.clone())
        }

        /// Last applied scan periods.
        pub fn periods(&self) -> Option<ScanPeriods> {
            self.with_state(|s| s.periods)
        }

        /// Whether the wake lock is held.
        pub fn wake_lock_held(&self) -> bool {
            self.with_state(|s| s.wake_lock_held)
        }

        /// Successful `start_watching` calls so far.
        pub fn start_count(&self) -> usize {
            self.with_state(|s| s.start_count)
        }

        /// `stop_watching` calls so far.
        pub fn stop_count(&self) -> usize {
            self.with_state(|s| s.stop_count)
        }
    }

    impl PlatformScanner for MockScanner {
        fn initialize(&self) -> PlatformResult<()> {
            if self.fail_initialize.load(Ordering::SeqCst) {
                return Err(PlatformError::ResourceUnavailable(
                    "mock radio service unavailable".into(),
                ));
            }
            self.with_state(|s| s.initialized = true);
            Ok(())
        }

        fn configure_scan_periods(&self, periods: ScanPeriods) -> PlatformResult<()> {
            self.with_state(|s| s.periods = Some(periods));
            Ok(())
        }

        fn start_watching(&self, regions: &[Region]) -> PlatformResult<()> {
            if self.fail_start.load(Ordering::SeqCst) {
                return Err(PlatformError::ScanFailed("mock scan refused".into()));
            }
            self.with_state(|s| {
                s.watching = regions.to_vec();
                s.start_count += 1;
            });
            Ok(())
        }

        fn stop_watching(&self) -> PlatformResult<()> {
            self.with_state(|s| {
                s.watching.clear();
                s.ranging.clear();
                s.stop_count += 1;
            });
            Ok(())
        }

        fn start_ranging(&self, region_id: &str) -> PlatformResult<()> {
            self.with_state(|s| s.ranging.insert(region_id.to_string()));
            Ok(())
        }

        fn stop_ranging(&self, region_id: &str) -> PlatformResult<()> {
            self.with_state(|s| s.ranging.remove(region_id));
            Ok(())
        }

        fn acquire_wake_lock(&self) -> PlatformResult<()> {
            self.with_state(|s| s.wake_lock_held = true);
            Ok(())
        }

        fn release_wake_lock(&self) {
            self.with_state(|s| s.wake_lock_held = false);
        }
    }

    /// Notifier that keeps every notification for inspection.
    #[derive(Debug, Default)]
    pub struct RecordingNotifier {
        shown: Mutex<Vec<Notification>>,
    }

    impl RecordingNotifier {
        /// Create an empty recorder.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Notifications shown so far.
        pub fn shown(&self) -> Vec<Notification> {
            self.shown
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notification: &Notification) {
            self.shown
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(notification.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_connectivity_toggles() {
        let connectivity = StaticConnectivity::default();
        assert!(connectivity.is_online());
        connectivity.set_online(false);
        assert!(!connectivity.is_online());
    }

    #[test]
    fn test_mock_scanner_tracks_watch_and_ranging() {
        let scanner = MockScanner::new();
        let region = Region {
            id: "all-beacons-region".into(),
            uuid: None,
            target_ids: vec![TargetId::new("aa")],
        };
        scanner.start_watching(std::slice::from_ref(&region)).unwrap();
        scanner.start_ranging(&region.id).unwrap();
        assert_eq!(scanner.watching(), vec![region]);
        assert!(scanner.ranging().contains("all-beacons-region"));

        scanner.stop_watching().unwrap();
        assert!(scanner.watching().is_empty());
        assert!(scanner.ranging().is_empty());
        assert_eq!(scanner.stop_count(), 1);
    }

    #[test]
    fn test_mock_scanner_failure_injection() {
        let scanner = MockScanner::new();
        scanner.fail_initialize(true);
        assert!(matches!(
            scanner.initialize(),
            Err(PlatformError::ResourceUnavailable(_))
        ));
        scanner.fail_start(true);
        assert!(scanner.start_watching(&[]).is_err());
    }
}
