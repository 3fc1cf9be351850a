//! Target registry and region controller.
//!
//! [`TargetRegistry`] owns the id-to-name map and persists it after every
//! mutation. [`RegionController`] turns the registry into platform regions
//! and drives the two-phase scan: coarse region monitoring first, ranging
//! only while inside a region.
//!
//! Region grouping:
//!
//! | Target id                         | Region                  |
//! |-----------------------------------|-------------------------|
//! | `UUID` or `UUID:major:minor`      | one region per `UUID`   |
//! | anything else (MAC address, ...)  | `all-beacons-region`    |

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{BeaconError, Result};
use crate::platform::{PlatformResult, PlatformScanner, Region};
use crate::storage::PreferenceStore;
use crate::types::{Target, TargetId};

/// Region shared by every target without an iBeacon-style id.
pub const SHARED_REGION_ID: &str = "all-beacons-region";

/// Longest accepted target id.
pub const MAX_TARGET_ID_LEN: usize = 64;

/// Longest accepted display name.
pub const MAX_TARGET_NAME_LEN: usize = 128;

static TARGET_ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Z0-9:_\-]+$").expect("TARGET_ID_PATTERN should compile - this is a bug")
});

static IBEACON_KEY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^([0-9A-F]{8}-[0-9A-F]{4}-[0-9A-F]{4}-[0-9A-F]{4}-[0-9A-F]{12})(?::(\d{1,5}):(\d{1,5}))?$",
    )
    .expect("IBEACON_KEY_PATTERN should compile - this is a bug")
});

/// Proximity UUID of an iBeacon-style id, if `id` is one.
#[must_use]
pub fn ibeacon_uuid(id: &TargetId) -> Option<&str> {
    IBEACON_KEY_PATTERN
        .captures(id.as_str())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Region a target belongs to.
#[must_use]
pub fn region_id_for(id: &TargetId) -> String {
    ibeacon_uuid(id).map_or_else(|| SHARED_REGION_ID.to_string(), str::to_string)
}

/// Validate and normalize caller-supplied target input.
///
/// # Errors
///
/// [`BeaconError::InvalidInput`] for a blank, oversized or malformed id, or a
/// blank or oversized name.
pub fn validate_target(id: &str, name: &str) -> Result<(TargetId, String)> {
    let id = TargetId::new(id);
    if id.as_str().is_empty() {
        return Err(BeaconError::InvalidInput("target id must not be blank".into()));
    }
    if id.as_str().len() > MAX_TARGET_ID_LEN {
        return Err(BeaconError::InvalidInput(format!(
            "target id longer than {MAX_TARGET_ID_LEN} characters"
        )));
    }
    if !TARGET_ID_PATTERN.is_match(id.as_str()) {
        return Err(BeaconError::InvalidInput(format!(
            "target id '{id}' may only contain letters, digits, ':', '-' and '_'"
        )));
    }
    let name = name.trim();
    if name.is_empty() {
        return Err(BeaconError::InvalidInput("target name must not be blank".into()));
    }
    if name.chars().count() > MAX_TARGET_NAME_LEN {
        return Err(BeaconError::InvalidInput(format!(
            "target name longer than {MAX_TARGET_NAME_LEN} characters"
        )));
    }
    Ok((id, name.to_string()))
}

// ============================================================================
// Registry
// ============================================================================

/// Persisted id-to-name map of watched targets.
#[derive(Debug)]
pub struct TargetRegistry {
    targets: BTreeMap<TargetId, String>,
    prefs: PreferenceStore,
}

impl TargetRegistry {
    /// Load the persisted map. An unreadable map starts empty.
    pub fn load(prefs: PreferenceStore) -> Self {
        let targets = prefs.load_targets().unwrap_or_else(|e| {
            warn!(error = %e, "Persisted targets unreadable, starting empty");
            BTreeMap::new()
        });
        debug!(count = targets.len(), "Target registry loaded");
        Self { targets, prefs }
    }

    /// Insert or rename a target and persist.
    ///
    /// # Errors
    ///
    /// [`BeaconError::InvalidInput`] for bad arguments, [`BeaconError::Storage`]
    /// when persisting fails (the in-memory map is still updated).
    pub fn add(&mut self, id: &str, name: &str) -> Result<TargetId> {
        let (id, name) = validate_target(id, name)?;
        info!(beacon = %id, name = %name, "Target added");
        self.targets.insert(id.clone(), name);
        self.prefs.save_targets(&self.targets)?;
        Ok(id)
    }

    /// Replace every target with `targets` and persist.
    ///
    /// # Errors
    ///
    /// [`BeaconError::Storage`] when persisting fails.
    pub fn replace_all(&mut self, targets: Vec<Target>) -> Result<()> {
        self.targets = targets.into_iter().map(|t| (t.id, t.name)).collect();
        info!(count = self.targets.len(), "Target registry replaced");
        self.prefs.save_targets(&self.targets)?;
        Ok(())
    }

    /// Remove every target, in memory and on disk.
    ///
    /// # Errors
    ///
    /// [`BeaconError::Storage`] when the persisted map cannot be removed.
    pub fn clear(&mut self) -> Result<()> {
        self.targets.clear();
        self.prefs.clear_targets()?;
        info!("All targets cleared");
        Ok(())
    }

    /// Number of targets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether no target is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Match a raw sighting id to a registered target.
    ///
    /// Exact ids win; an iBeacon `UUID:major:minor` sighting also matches a
    /// target registered by bare `UUID`. Returns the sighting's own
    /// normalized id together with the matched name.
    #[must_use]
    pub fn resolve(&self, raw_id: &str) -> Option<(TargetId, String)> {
        let id = TargetId::new(raw_id);
        if let Some(name) = self.targets.get(&id) {
            return Some((id, name.clone()));
        }
        let name = ibeacon_uuid(&id)
            .and_then(|uuid| self.targets.get(&TargetId::new(uuid)))
            .cloned()?;
        Some((id, name))
    }

    /// Every target, ordered by id.
    #[must_use]
    pub fn list(&self) -> Vec<Target> {
        self.targets
            .iter()
            .map(|(id, name)| Target {
                id: id.clone(),
                name: name.clone(),
            })
            .collect()
    }

    /// Group targets into platform regions, ordered by region id.
    #[must_use]
    pub fn regions(&self) -> Vec<Region> {
        let mut grouped: BTreeMap<String, Vec<TargetId>> = BTreeMap::new();
        for id in self.targets.keys() {
            grouped.entry(region_id_for(id)).or_default().push(id.clone());
        }
        grouped
            .into_iter()
            .map(|(region_id, target_ids)| Region {
                uuid: (region_id != SHARED_REGION_ID).then(|| region_id.clone()),
                id: region_id,
                target_ids,
            })
            .collect()
    }
}

// ============================================================================
// Region controller
// ============================================================================

/// Drives platform region monitoring and ranging.
pub struct RegionController {
    scanner: Arc<dyn PlatformScanner>,
    regions: Vec<Region>,
    inside: BTreeSet<String>,
    scanning: bool,
}

impl std::fmt::Debug for RegionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionController")
            .field("regions", &self.regions)
            .field("inside", &self.inside)
            .field("scanning", &self.scanning)
            .finish_non_exhaustive()
    }
}

impl RegionController {
    /// Create an idle controller.
    pub fn new(scanner: Arc<dyn PlatformScanner>) -> Self {
        Self {
            scanner,
            regions: Vec::new(),
            inside: BTreeSet::new(),
            scanning: false,
        }
    }

    /// The underlying scanner.
    #[must_use]
    pub fn scanner(&self) -> &Arc<dyn PlatformScanner> {
        &self.scanner
    }

    /// Take the wake lock and begin watching every region of `registry`.
    ///
    /// On failure the wake lock is released again and nothing is watched.
    ///
    /// # Errors
    ///
    /// Any [`crate::platform::PlatformError`] from the scanner.
    pub fn start(&mut self, registry: &TargetRegistry) -> PlatformResult<()> {
        let regions = registry.regions();
        self.scanner.acquire_wake_lock()?;
        if let Err(e) = self.scanner.start_watching(&regions) {
            self.scanner.release_wake_lock();
            return Err(e);
        }
        info!(regions = regions.len(), targets = registry.len(), "Region monitoring started");
        self.regions = regions;
        self.inside.clear();
        self.scanning = true;
        Ok(())
    }

    /// Stop watching and release the wake lock. Idempotent.
    pub fn stop(&mut self) {
        if !self.scanning {
            return;
        }
        if let Err(e) = self.scanner.stop_watching() {
            warn!(error = %e, "Platform refused to stop watching");
        }
        self.scanner.release_wake_lock();
        self.regions.clear();
        self.inside.clear();
        self.scanning = false;
        info!("Region monitoring stopped");
    }

    /// Re-subscribe to pick up a changed registry, keeping the wake lock.
    ///
    /// # Errors
    ///
    /// Any [`crate::platform::PlatformError`] from the scanner. The
    /// controller is left stopped.
    pub fn resubscribe(&mut self, registry: &TargetRegistry) -> PlatformResult<()> {
        if !self.scanning {
            return self.start(registry);
        }
        if let Err(e) = self.scanner.stop_watching() {
            warn!(error = %e, "Platform refused to stop watching");
        }
        self.inside.clear();
        let regions = registry.regions();
        if let Err(e) = self.scanner.start_watching(&regions) {
            self.scanner.release_wake_lock();
            self.regions.clear();
            self.scanning = false;
            return Err(e);
        }
        info!(regions = regions.len(), "Region subscriptions refreshed");
        self.regions = regions;
        Ok(())
    }

    /// Platform reported entering `region_id`; begin ranging there.
    ///
    /// # Errors
    ///
    /// Any [`crate::platform::PlatformError`] from the scanner.
    pub fn region_entered(&mut self, region_id: &str) -> PlatformResult<()> {
        if self.inside.insert(region_id.to_string()) {
            debug!(region = region_id, "Ranging started");
            self.scanner.start_ranging(region_id)?;
        }
        Ok(())
    }

    /// Platform reported leaving `region_id`; stop ranging there.
    ///
    /// # Errors
    ///
    /// Any [`crate::platform::PlatformError`] from the scanner.
    pub fn region_exited(&mut self, region_id: &str) -> PlatformResult<()> {
        if self.inside.remove(region_id) {
            debug!(region = region_id, "Ranging stopped");
            self.scanner.stop_ranging(region_id)?;
        }
        Ok(())
    }

    /// Whether scanning is active.
    #[must_use]
    pub const fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// Regions currently watched.
    #[must_use]
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Whether `region_id` is currently watched.
    #[must_use]
    pub fn is_watched(&self, region_id: &str) -> bool {
        self.regions.iter().any(|r| r.id == region_id)
    }

    /// Regions currently being ranged.
    #[must_use]
    pub const fn ranging(&self) -> &BTreeSet<String> {
        &self.inside
    }
}
