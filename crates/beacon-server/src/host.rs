//! Host-side platform collaborators.
//!
//! The server has no radio of its own. [`HostScanner`] records what the
//! engine asks the platform to do so an external radio process can poll it
//! via `GET /api/regions` and push sightings back via `POST /api/scans`.

use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};

use beacon_core::platform::PlatformResult;
use beacon_core::{Notification, Notifier, PlatformScanner, Region, ScanPeriods};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use utoipa::ToSchema;

/// What the external radio should currently be doing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({
    "scanning": true,
    "wakeLockHeld": true,
    "regions": [{
        "id": "all-beacons-region",
        "uuid": null,
        "targetIds": ["AA:BB:CC:DD:EE:FF"]
    }],
    "ranging": ["all-beacons-region"],
    "scanPeriodMs": 1100,
    "betweenScanPeriodMs": 5000
}))]
pub struct RadioPlan {
    /// Whether any region is being watched.
    pub scanning: bool,
    /// Whether the engine holds the wake lock.
    pub wake_lock_held: bool,
    /// Regions to watch.
    pub regions: Vec<Region>,
    /// Regions to range inside.
    pub ranging: Vec<String>,
    /// Foreground scan window.
    pub scan_period_ms: Option<u64>,
    /// Foreground pause between scans.
    pub between_scan_period_ms: Option<u64>,
}

#[derive(Debug, Default)]
struct ScannerState {
    periods: Option<ScanPeriods>,
    watching: Vec<Region>,
    ranging: BTreeSet<String>,
    wake_lock_held: bool,
}

/// Platform scanner that only records requests.
#[derive(Debug, Default)]
pub struct HostScanner {
    state: Mutex<ScannerState>,
}

impl HostScanner {
    /// Create an idle scanner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ScannerState) -> T) -> T {
        f(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Current plan for the radio.
    pub fn plan(&self) -> RadioPlan {
        self.with_state(|s| RadioPlan {
            scanning: !s.watching.is_empty(),
            wake_lock_held: s.wake_lock_held,
            regions: s.watching.clone(),
            ranging: s.ranging.iter().cloned().collect(),
            scan_period_ms: s.periods.map(|p| duration_ms(p.foreground_scan)),
            between_scan_period_ms: s.periods.map(|p| duration_ms(p.foreground_between_scan)),
        })
    }
}

fn duration_ms(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl PlatformScanner for HostScanner {
    fn initialize(&self) -> PlatformResult<()> {
        info!("Host scanner ready");
        Ok(())
    }

    fn configure_scan_periods(&self, periods: ScanPeriods) -> PlatformResult<()> {
        debug!(?periods, "Scan periods updated");
        self.with_state(|s| s.periods = Some(periods));
        Ok(())
    }

    fn start_watching(&self, regions: &[Region]) -> PlatformResult<()> {
        info!(regions = regions.len(), "Radio asked to watch regions");
        self.with_state(|s| s.watching = regions.to_vec());
        Ok(())
    }

    fn stop_watching(&self) -> PlatformResult<()> {
        info!("Radio asked to stop watching");
        self.with_state(|s| {
            s.watching.clear();
            s.ranging.clear();
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

/// Notifier that writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) {
        info!(
            beacon = %notification.target,
            name = %notification.name,
            params = %notification.params,
            "Notification"
        );
    }
}
