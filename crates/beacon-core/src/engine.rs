//! The owned engine instance.
//!
//! [`BeaconEngine`] wires the detection engine, target registry, region
//! controller, notification gate, watchdog and gateway together. The host
//! constructs exactly one with [`EngineBuilder`] and passes clones around;
//! clones share state.
//!
//! All mutable state sits behind one async lock, held for the duration of a
//! scan batch, a lifecycle call or the apply step of a refresh. Gateway I/O
//! always runs with the lock released. Completions that come back after a
//! configure or stop carry a stale generation number and are discarded.
//!
//! Lifecycle:
//!
//! ```text
//! Created --initialize--> Initialized --configure--> Configured --start--> Running
//!                                                        ^                    |
//!                                                        +-------stop---------+
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};
use utoipa::ToSchema;

use crate::clock::{Clock, SystemClock};
use crate::config::{
    EngineConfig, DEFAULT_LOST_TIMEOUT_MS, DEFAULT_MAX_NOTIFICATIONS,
    DEFAULT_NOTIFICATION_COOLDOWN_MS, DEFAULT_RSSI_THRESHOLD, DEFAULT_TIMEZONE,
    DEFAULT_TIME_THRESHOLD_SECS,
};
use crate::detection::{is_within_shift, Detection, DetectionEngine};
use crate::diagnostics::{DiagnosticSnapshot, DiagnosticsTracker};
use crate::error::{BeaconError, Result};
use crate::events::{DetectionPayload, EngineEvent, EventDispatcher, EventReceiver};
use crate::gate::{GateDecision, NotificationGate, OfflineQueue, OfflineQueueEntry};
use crate::gateway::{
    device_details, DetectionReport, Gateway, GatewayEventKind, GatewayFactory,
    HttpGatewayFactory,
};
use crate::platform::{
    Connectivity, NoopNotifier, Notification, Notifier, PlatformScanner, Region,
    StaticConnectivity,
};
use crate::registry::{RegionController, TargetRegistry};
use crate::storage::{KeyValueStore, MemoryStore, PreferenceStore};
use crate::sync::{fetch_with_retry, RefreshOutcome, RefreshPolicy};
use crate::types::{
    DeviceInfo, EngineStatus, MonitoringState, ShiftWindow, Sighting, SignalSample, Target,
    TargetId,
};
use crate::watchdog::Watchdog;

// ============================================================================
// Operation summaries
// ============================================================================

/// What happened to one scan batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    /// Sightings fed to the detection engine.
    pub processed: usize,
    /// Sightings for ids not in the registry.
    pub ignored: usize,
    /// Sightings rejected as implausible.
    pub rejected: usize,
    /// Dwells confirmed by this batch.
    pub detections: usize,
    /// Targets evicted as lost after this batch.
    pub lost: usize,
}

/// Result of a target refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSummary {
    /// Whether the fetched list replaced the registry.
    pub applied: bool,
    /// Fetch attempts made.
    pub attempts: u32,
    /// Registry size afterwards.
    pub target_count: usize,
}

/// Result of replaying the offline queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FlushSummary {
    /// Entries the gateway accepted.
    pub sent: usize,
    /// Entries still queued.
    pub remaining: usize,
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles a [`BeaconEngine`] from its collaborators.
///
/// Only the scanner is mandatory. Defaults: wall clock, in-memory storage,
/// always-online connectivity, no-op notifier, HTTP gateway.
pub struct EngineBuilder {
    scanner: Arc<dyn PlatformScanner>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    connectivity: Arc<dyn Connectivity>,
    notifier: Arc<dyn Notifier>,
    gateway_factory: Arc<dyn GatewayFactory>,
    device: DeviceInfo,
}

impl EngineBuilder {
    /// Start from `scanner` and defaults for everything else.
    pub fn new(scanner: Arc<dyn PlatformScanner>) -> Self {
        Self {
            scanner,
            store: Arc::new(MemoryStore::new()),
            clock: Arc::new(SystemClock),
            connectivity: Arc::new(StaticConnectivity::default()),
            notifier: Arc::new(NoopNotifier),
            gateway_factory: Arc::new(HttpGatewayFactory),
            device: DeviceInfo::default(),
        }
    }

    /// Persistence backend.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = store;
        self
    }

    /// Time source.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Online/offline source.
    #[must_use]
    pub fn connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// Local notification sink.
    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Gateway constructor used on every configure.
    #[must_use]
    pub fn gateway_factory(mut self, factory: Arc<dyn GatewayFactory>) -> Self {
        self.gateway_factory = factory;
        self
    }

    /// Device description attached to gateway events.
    #[must_use]
    pub fn device(mut self, device: DeviceInfo) -> Self {
        self.device = device;
        self
    }

    /// Load persisted targets, notification history and offline queue, and
    /// return an engine in [`MonitoringState::Created`].
    ///
    /// Call [`BeaconEngine::restore`] afterwards to resume a previous session.
    pub fn build(self) -> BeaconEngine {
        let prefs = PreferenceStore::new(self.store);
        let core = Core {
            state: MonitoringState::Created,
            config: None,
            gateway: None,
            detection: DetectionEngine::new(
                DEFAULT_RSSI_THRESHOLD,
                i64::from(DEFAULT_TIME_THRESHOLD_SECS) * 1_000,
            ),
            registry: TargetRegistry::load(prefs.clone()),
            controller: RegionController::new(self.scanner),
            gate: NotificationGate::load(
                prefs.clone(),
                DEFAULT_NOTIFICATION_COOLDOWN_MS,
                DEFAULT_MAX_NOTIFICATIONS,
                DEFAULT_TIMEZONE.parse().unwrap_or(chrono_tz::UTC),
            ),
            offline: OfflineQueue::load(prefs.clone()),
            watchdog: None,
            battery: HashMap::new(),
            within_shift: false,
            is_foreground: true,
            monitoring_requested: false,
            generation: 0,
        };

        BeaconEngine {
            inner: Arc::new(Inner {
                clock: self.clock,
                prefs,
                connectivity: self.connectivity,
                notifier: self.notifier,
                gateway_factory: self.gateway_factory,
                device: self.device,
                events: EventDispatcher::new(),
                diagnostics: DiagnosticsTracker::new(),
                core: Mutex::new(core),
            }),
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

struct Inner {
    clock: Arc<dyn Clock>,
    prefs: PreferenceStore,
    connectivity: Arc<dyn Connectivity>,
    notifier: Arc<dyn Notifier>,
    gateway_factory: Arc<dyn GatewayFactory>,
    device: DeviceInfo,
    events: EventDispatcher,
    diagnostics: DiagnosticsTracker,
    core: Mutex<Core>,
}

struct Core {
    state: MonitoringState,
    config: Option<EngineConfig>,
    gateway: Option<Arc<dyn Gateway>>,
    detection: DetectionEngine,
    registry: TargetRegistry,
    controller: RegionController,
    gate: NotificationGate,
    offline: OfflineQueue,
    watchdog: Option<Watchdog>,
    battery: HashMap<TargetId, u8>,
    within_shift: bool,
    is_foreground: bool,
    monitoring_requested: bool,
    generation: u64,
}

impl Core {
    fn lost_timeout_ms(&self) -> i64 {
        let ms = self
            .config
            .as_ref()
            .map_or(DEFAULT_LOST_TIMEOUT_MS, |c| c.lost_timeout_ms);
        i64::try_from(ms).unwrap_or(i64::MAX)
    }

    fn user_id(&self) -> String {
        self.config
            .as_ref()
            .map_or_else(|| "none".to_string(), |c| c.user_id.clone())
    }
}

/// Beacon detection and monitoring engine.
#[derive(Clone)]
pub struct BeaconEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for BeaconEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeaconEngine").finish_non_exhaustive()
    }
}

impl BeaconEngine {
    /// Shorthand for [`EngineBuilder::new`].
    pub fn builder(scanner: Arc<dyn PlatformScanner>) -> EngineBuilder {
        EngineBuilder::new(scanner)
    }

    fn record(&self, err: impl Into<BeaconError>) -> BeaconError {
        let err = err.into();
        self.inner.diagnostics.record(&err);
        err
    }

    fn now_ms(&self) -> i64 {
        self.inner.clock.now_ms()
    }

    // --- Lifecycle ---

    /// Reapply the persisted configuration and resume monitoring if it was
    /// active when the process last ran.
    ///
    /// Never fails; problems are logged and recorded in diagnostics. Returns
    /// the state reached.
    pub async fn restore(&self) -> MonitoringState {
        self.inner.diagnostics.step("engine.restore");
        let config = match self.inner.prefs.load_config() {
            Ok(Some(config)) => config,
            Ok(None) => {
                debug!("No persisted configuration, nothing to restore");
                return self.state().await;
            }
            Err(e) => {
                let err = self.record(e);
                warn!(error = %err, "Persisted configuration unreadable");
                return self.state().await;
            }
        };

        let resume = self.inner.prefs.is_monitoring_enabled();
        info!(resume, "Restoring persisted configuration");
        if let Err(e) = self.apply_config(config, resume).await {
            warn!(error = %e, "Restore could not reapply configuration");
            return self.state().await;
        }
        if resume {
            if let Err(e) = self.start().await {
                warn!(error = %e, "Restore could not resume monitoring");
            }
        }
        self.state().await
    }

    /// Acquire platform resources. No-op once initialized.
    ///
    /// # Errors
    ///
    /// [`BeaconError::InitializationFailed`] when the scanner cannot be set
    /// up. The state does not advance.
    pub async fn initialize(&self) -> Result<()> {
        self.inner.diagnostics.step("engine.initialize");
        let mut core = self.inner.core.lock().await;
        self.initialize_locked(&mut core)
    }

    fn initialize_locked(&self, core: &mut Core) -> Result<()> {
        if core.state >= MonitoringState::Initialized {
            return Ok(());
        }
        core.controller
            .scanner()
            .initialize()
            .map_err(|e| self.record(BeaconError::InitializationFailed(e.to_string())))?;
        core.state = MonitoringState::Initialized;
        info!("Engine initialized");
        Ok(())
    }

    /// Validate and apply `config`, persist it, and kick off a target
    /// refresh. Initializes first when needed.
    ///
    /// Configuring requests monitoring: a successful refresh starts scanning
    /// without a separate [`start`](Self::start) call.
    ///
    /// # Errors
    ///
    /// [`BeaconError::ConfigurationInvalid`] for a bad configuration,
    /// [`BeaconError::InitializationFailed`] when implicit initialization
    /// fails, or storage/platform errors while applying. The state does not
    /// advance on error.
    pub async fn configure(&self, config: EngineConfig) -> Result<()> {
        self.inner.diagnostics.step("engine.configure");
        self.apply_config(config, true).await
    }

    async fn apply_config(&self, config: EngineConfig, request_monitoring: bool) -> Result<()> {
        config.validate().map_err(|e| self.record(e))?;

        let mut guard = self.inner.core.lock().await;
        let core = &mut *guard;
        self.initialize_locked(core)?;

        let phone_id = match &config.device_id {
            Some(id) => id.clone(),
            None => self.inner.prefs.install_id().map_err(|e| self.record(e))?,
        };
        let gateway = self
            .inner
            .gateway_factory
            .build(&config, &phone_id)
            .map_err(|e| self.record(e))?;
        core.controller
            .scanner()
            .configure_scan_periods(config.scan_periods())
            .map_err(|e| self.record(e))?;
        self.inner
            .prefs
            .save_config(&config)
            .map_err(|e| self.record(e))?;
        self.persist_monitoring_flag(request_monitoring);

        core.detection
            .set_thresholds(config.rssi_threshold, config.time_threshold_ms());
        core.gate.reconfigure(
            config.notification_cooldown_ms,
            config.max_notifications,
            config.tz(),
        );

        let watchdog = self.build_watchdog(&config);
        if let Some(old) = core.watchdog.take() {
            old.stop();
        }
        if core.controller.is_scanning() {
            watchdog.start();
        }
        core.watchdog = Some(watchdog);

        info!(
            user_id = %config.user_id,
            rssi_threshold = config.rssi_threshold,
            time_threshold_secs = config.time_threshold_secs,
            "Engine configured"
        );
        core.gateway = Some(gateway);
        core.config = Some(config);
        core.monitoring_requested = request_monitoring;
        core.generation += 1;
        if core.state < MonitoringState::Configured {
            core.state = MonitoringState::Configured;
        }
        drop(guard);

        self.spawn_refresh();
        Ok(())
    }

    /// Begin monitoring the registered targets.
    ///
    /// With an empty registry this only schedules a target refresh; scanning
    /// starts once targets arrive. Calling it while running is a no-op.
    ///
    /// # Errors
    ///
    /// [`BeaconError::MonitoringNotStarted`] before a successful configure,
    /// or the scanner's failure to start watching.
    pub async fn start(&self) -> Result<()> {
        self.inner.diagnostics.step("engine.start");
        let mut guard = self.inner.core.lock().await;
        let core = &mut *guard;

        if core.state == MonitoringState::Running {
            debug!("Monitoring already running");
            return Ok(());
        }
        if core.state < MonitoringState::Configured {
            return Err(self.record(BeaconError::MonitoringNotStarted(
                "configure must succeed before start".into(),
            )));
        }

        core.monitoring_requested = true;
        self.persist_monitoring_flag(true);

        if core.registry.is_empty() {
            info!("No targets registered yet, deferring start to target refresh");
            drop(guard);
            self.spawn_refresh();
            return Ok(());
        }
        self.start_scanning(core)
    }

    /// Stop monitoring. A no-op unless running.
    ///
    /// # Errors
    ///
    /// Currently infallible; kept fallible for host symmetry with
    /// [`start`](Self::start).
    pub async fn stop(&self) -> Result<()> {
        self.inner.diagnostics.step("engine.stop");
        let mut core = self.inner.core.lock().await;
        self.stop_locked(&mut core);
        Ok(())
    }

    fn start_scanning(&self, core: &mut Core) -> Result<()> {
        if let Err(e) = core.controller.start(&core.registry) {
            let err = self.record(e);
            error!(error = %err, "Failed to start region monitoring");
            self.report_event(
                core.gateway.as_ref(),
                GatewayEventKind::ScanError,
                Some(("error", json!(err.to_string()))),
            );
            return Err(err);
        }
        if let Some(watchdog) = &core.watchdog {
            watchdog.start();
        }
        core.state = MonitoringState::Running;

        let target_count = core.registry.len();
        info!(targets = target_count, "Monitoring started");
        self.inner
            .events
            .send(EngineEvent::MonitoringStarted { target_count });
        self.report_event(core.gateway.as_ref(), GatewayEventKind::ScanStarted, None);
        Ok(())
    }

    fn stop_locked(&self, core: &mut Core) {
        if core.monitoring_requested {
            core.monitoring_requested = false;
            self.persist_monitoring_flag(false);
            // A refresh in flight must not auto-start after this.
            core.generation += 1;
        }
        if core.state != MonitoringState::Running {
            debug!(state = %core.state, "Stop ignored, monitoring not running");
            return;
        }

        if let Some(watchdog) = &core.watchdog {
            watchdog.stop();
        }
        core.controller.stop();
        core.detection.clear();
        core.battery.clear();
        core.state = MonitoringState::Configured;
        core.generation += 1;

        info!("Monitoring stopped");
        self.inner.events.send(EngineEvent::MonitoringStopped {});
        self.report_event(core.gateway.as_ref(), GatewayEventKind::ScanStopped, None);
    }

    fn persist_monitoring_flag(&self, enabled: bool) {
        if let Err(e) = self.inner.prefs.set_monitoring_enabled(enabled) {
            let err = self.record(e);
            warn!(error = %err, enabled, "Failed to persist monitoring flag");
        }
    }

    fn build_watchdog(&self, config: &EngineConfig) -> Watchdog {
        let watchdog = Watchdog::new(
            Arc::clone(&self.inner.clock),
            Duration::from_millis(config.watchdog_check_interval_ms),
            i64::try_from(config.watchdog_timeout_ms).unwrap_or(i64::MAX),
        );
        let weak = Arc::downgrade(&self.inner);
        watchdog.on_timeout(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let engine = Self { inner };
            tokio::spawn(async move { engine.recover_scanning().await });
        });
        watchdog
    }

    /// Restart region monitoring after a scan stall. Leaves the lifecycle
    /// state and the persisted flag alone.
    async fn recover_scanning(&self) {
        let mut guard = self.inner.core.lock().await;
        let core = &mut *guard;
        if core.state != MonitoringState::Running {
            return;
        }
        self.inner.diagnostics.step("watchdog.recover");
        warn!("No scan results within watchdog timeout, restarting region monitoring");

        core.controller.stop();
        if let Err(e) = core.controller.start(&core.registry) {
            let err = self.record(e);
            error!(error = %err, "Watchdog restart failed");
            self.report_event(
                core.gateway.as_ref(),
                GatewayEventKind::ScanError,
                Some(("error", json!(err.to_string()))),
            );
        }
    }

    // --- Targets ---

    /// Register or rename one target.
    ///
    /// # Errors
    ///
    /// [`BeaconError::InvalidInput`] for a malformed id or name.
    pub async fn add_target(&self, id: &str, name: &str) -> Result<TargetId> {
        self.inner.diagnostics.step("engine.add_target");
        let mut guard = self.inner.core.lock().await;
        let core = &mut *guard;
        let id = core.registry.add(id, name).map_err(|e| self.record(e))?;
        if core.controller.is_scanning() {
            if let Err(e) = core.controller.resubscribe(&core.registry) {
                let err = self.record(e);
                warn!(error = %err, "Could not pick up new target while scanning");
            }
        }
        Ok(id)
    }

    /// Stop monitoring, then forget every target.
    ///
    /// # Errors
    ///
    /// [`BeaconError::Storage`] when the persisted map cannot be removed.
    pub async fn clear_targets(&self) -> Result<()> {
        self.inner.diagnostics.step("engine.clear_targets");
        let mut guard = self.inner.core.lock().await;
        let core = &mut *guard;
        self.stop_locked(core);
        core.generation += 1;
        core.detection.clear();
        core.battery.clear();
        core.registry.clear().map_err(|e| self.record(e))
    }

    /// Fetch the authoritative target list and apply it.
    ///
    /// Retries per the configured policy. On success the registry is
    /// replaced and scanning is started or re-subscribed; on exhaustion the
    /// cached targets stay. A result that arrives after a configure or stop
    /// is discarded.
    ///
    /// # Errors
    ///
    /// [`BeaconError::MonitoringNotStarted`] before configure,
    /// [`BeaconError::Storage`] when the new list cannot be persisted.
    pub async fn refresh_targets(&self) -> Result<RefreshSummary> {
        self.inner.diagnostics.step("engine.refresh_targets");
        let (gateway, policy, generation) = {
            let core = self.inner.core.lock().await;
            let Some(gateway) = core.gateway.clone() else {
                return Err(self.record(BeaconError::MonitoringNotStarted(
                    "configure must succeed before refreshing targets".into(),
                )));
            };
            let policy = core
                .config
                .as_ref()
                .map(RefreshPolicy::from_config)
                .unwrap_or_default();
            (gateway, policy, core.generation)
        };

        let outcome = fetch_with_retry(gateway.as_ref(), policy).await;

        let mut guard = self.inner.core.lock().await;
        let core = &mut *guard;
        match outcome {
            RefreshOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                if let Some(message) = last_error {
                    self.record(BeaconError::Network(message));
                }
                Ok(RefreshSummary {
                    applied: false,
                    attempts,
                    target_count: core.registry.len(),
                })
            }
            RefreshOutcome::Fetched { targets, attempts } => {
                if core.generation != generation {
                    info!(
                        started = generation,
                        current = core.generation,
                        "Discarding stale target refresh"
                    );
                    return Ok(RefreshSummary {
                        applied: false,
                        attempts,
                        target_count: core.registry.len(),
                    });
                }

                core.registry
                    .replace_all(targets)
                    .map_err(|e| self.record(e))?;

                if core.controller.is_scanning() {
                    if let Err(e) = core.controller.resubscribe(&core.registry) {
                        let err = self.record(e);
                        warn!(error = %err, "Re-subscription after refresh failed");
                    }
                } else if core.monitoring_requested && core.state >= MonitoringState::Configured {
                    if let Err(e) = self.start_scanning(core) {
                        warn!(error = %e, "Auto-start after refresh failed");
                    }
                }

                Ok(RefreshSummary {
                    applied: true,
                    attempts,
                    target_count: core.registry.len(),
                })
            }
        }
    }

    fn spawn_refresh(&self) {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.refresh_targets().await {
                warn!(error = %e, "Background target refresh failed");
            }
        });
    }

    /// Every registered target, ordered by id.
    pub async fn targets(&self) -> Vec<Target> {
        self.inner.core.lock().await.registry.list()
    }

    // --- Scan ingestion ---

    /// Feed one scan batch from the platform scanner.
    ///
    /// Unknown ids are dropped. A bad sample is recorded and skipped; the
    /// rest of the batch still runs. Lost targets are evicted afterwards.
    ///
    /// # Errors
    ///
    /// [`BeaconError::MonitoringNotStarted`] unless running.
    pub async fn process_batch(&self, sightings: Vec<Sighting>) -> Result<BatchSummary> {
        self.inner.diagnostics.step("engine.process_batch");
        let mut guard = self.inner.core.lock().await;
        let core = &mut *guard;
        if core.state != MonitoringState::Running {
            return Err(self.record(BeaconError::MonitoringNotStarted(
                "scan batch received while not monitoring".into(),
            )));
        }
        if let Some(watchdog) = &core.watchdog {
            watchdog.notify_scan();
        }

        let mut summary = BatchSummary::default();
        let mut forwards = Vec::new();
        // Dwell, last-seen and loss all run on the engine clock.
        let now = self.now_ms();

        for sighting in sightings {
            let Some((id, name)) = core.registry.resolve(&sighting.id) else {
                trace!(id = %sighting.id, "Sighting for unknown id dropped");
                summary.ignored += 1;
                continue;
            };
            let battery = sighting.battery.or_else(|| core.battery.get(&id).copied());
            let sample = SignalSample {
                target: id,
                rssi: sighting.rssi,
                timestamp_ms: now,
                is_background: !core.is_foreground,
                battery,
            };

            let outcome = match core.detection.process_sample(&sample) {
                Ok(outcome) => outcome,
                Err(e) => {
                    let err = self.record(e);
                    warn!(error = %err, "Sample rejected");
                    summary.rejected += 1;
                    continue;
                }
            };
            summary.processed += 1;

            let ranged = outcome.ranged;
            self.inner.events.send(EngineEvent::BeaconRanged {
                id: ranged.target,
                name: name.clone(),
                rssi: ranged.rssi,
                avg_rssi: ranged.avg_rssi,
                timestamp: sighting.timestamp_ms,
                is_background: ranged.is_background,
                battery: ranged.battery,
            });

            if let Some(detection) = outcome.detected {
                summary.detections += 1;
                if let Some(forward) = self.route_detection(core, detection, name) {
                    forwards.push(forward);
                }
            }
        }

        let lost = core
            .detection
            .check_lost_beacons(now, core.lost_timeout_ms());
        summary.lost = lost.len();
        for id in lost {
            self.inner.events.send(EngineEvent::BeaconLost { id });
        }

        let generation = core.generation;
        let gateway = core.gateway.clone();
        drop(guard);

        if let Some(gateway) = gateway {
            for (detection, name) in forwards {
                let engine = self.clone();
                let gateway = Arc::clone(&gateway);
                tokio::spawn(async move {
                    engine
                        .forward_detection(gateway, detection, name, generation)
                        .await;
                });
            }
        }
        Ok(summary)
    }

    /// Decide what a confirmed dwell becomes. Returns the detection when it
    /// should be reported to the gateway.
    fn route_detection(
        &self,
        core: &mut Core,
        detection: Detection,
        name: String,
    ) -> Option<(Detection, String)> {
        let payload = DetectionPayload {
            id: detection.target.clone(),
            name: name.clone(),
            avg_rssi: detection.avg_rssi,
            timestamp: detection.timestamp_ms,
            battery: detection.battery,
        };

        if !core.within_shift {
            info!(beacon = %detection.target, "Detection outside shift window");
            self.inner
                .events
                .send(EngineEvent::OutsideShiftDetection(payload));
            return None;
        }

        let now = self.now_ms();
        if !self.inner.connectivity.is_online() {
            info!(beacon = %detection.target, "Offline, queueing detection");
            core.offline.push(OfflineQueueEntry {
                id: detection.target.clone(),
                name,
                avg_rssi: detection.avg_rssi,
                battery: detection.battery,
                timestamp: detection.timestamp_ms,
            });
            if core.gate.gate(&detection.target, now).is_allowed() {
                self.inner.events.send(EngineEvent::OfflineDetection(payload));
            }
            return None;
        }

        match core.gate.peek(&detection.target, now) {
            GateDecision::Allow => Some((detection, name)),
            GateDecision::Suppress(reason) => {
                debug!(beacon = %detection.target, ?reason, "Detection suppressed by gate");
                None
            }
        }
    }

    async fn forward_detection(
        &self,
        gateway: Arc<dyn Gateway>,
        detection: Detection,
        name: String,
        generation: u64,
    ) {
        let report = DetectionReport {
            target: detection.target.clone(),
            rssi: detection.avg_rssi,
            battery: detection.battery,
            is_initial: true,
            timestamp_ms: detection.timestamp_ms,
        };
        let response = match gateway.report_detection(&report).await {
            Ok(response) => response,
            Err(e) => {
                let err = self.record(e);
                warn!(beacon = %detection.target, error = %err, "Detection report failed");
                return;
            }
        };
        if !response.trigger_noti {
            debug!(beacon = %detection.target, "Gateway did not request a notification");
            return;
        }

        {
            let mut core = self.inner.core.lock().await;
            if core.generation != generation {
                debug!(beacon = %detection.target, "Discarding stale detection response");
                return;
            }
            if !core.gate.gate(&detection.target, self.now_ms()).is_allowed() {
                return;
            }
        }

        self.inner.notifier.notify(&Notification {
            target: detection.target.clone(),
            name: name.clone(),
            params: response.params,
        });
        self.inner
            .events
            .send(EngineEvent::BeaconDetected(DetectionPayload {
                id: detection.target.clone(),
                name,
                avg_rssi: detection.avg_rssi,
                timestamp: detection.timestamp_ms,
                battery: detection.battery,
            }));
        self.report_event(
            Some(&gateway),
            GatewayEventKind::BeaconDetected,
            Some(("beacon_mac", json!(detection.target.as_str()))),
        );
    }

    /// Cache a battery reading from a raw advertisement. Returns `false` for
    /// ids not in the registry.
    ///
    /// # Errors
    ///
    /// [`BeaconError::InvalidInput`] when `percent` exceeds 100.
    pub async fn update_battery(&self, id: &str, percent: u8) -> Result<bool> {
        self.inner.diagnostics.step("engine.update_battery");
        if percent > 100 {
            return Err(self.record(BeaconError::InvalidInput(format!(
                "battery percentage {percent} exceeds 100"
            ))));
        }
        let mut core = self.inner.core.lock().await;
        let Some((id, _)) = core.registry.resolve(id) else {
            return Ok(false);
        };
        trace!(beacon = %id, percent, "Battery cached");
        core.battery.insert(id, percent);
        Ok(true)
    }

    // --- Host context ---

    /// Evaluate `window` at `timestamp` and remember the answer for routing
    /// later detections.
    pub async fn check_shift(&self, window: &ShiftWindow, timestamp: i64) -> bool {
        self.inner.diagnostics.step("engine.check_shift");
        let within = is_within_shift(window, timestamp);
        self.inner.core.lock().await.within_shift = within;
        debug!(within, timestamp, "Shift window evaluated");
        within
    }

    /// Record whether the host app is in the foreground.
    pub async fn set_foreground(&self, foreground: bool) {
        self.inner.diagnostics.step("engine.set_foreground");
        self.inner.core.lock().await.is_foreground = foreground;
        debug!(foreground, "Foreground state updated");
    }

    // --- Regions ---

    /// Platform reported entering `region_id`.
    ///
    /// # Errors
    ///
    /// [`BeaconError::PlatformScan`] when ranging cannot start.
    pub async fn region_entered(&self, region_id: &str) -> Result<()> {
        self.inner.diagnostics.step("engine.region_entered");
        self.inner.events.send(EngineEvent::RegionEnter {
            region_id: region_id.to_string(),
        });
        self.set_ranging(region_id, true).await
    }

    /// Platform reported leaving `region_id`.
    ///
    /// # Errors
    ///
    /// [`BeaconError::PlatformScan`] when ranging cannot stop.
    pub async fn region_exited(&self, region_id: &str) -> Result<()> {
        self.inner.diagnostics.step("engine.region_exited");
        self.inner.events.send(EngineEvent::RegionExit {
            region_id: region_id.to_string(),
        });
        self.set_ranging(region_id, false).await
    }

    /// Platform reported the initial inside/outside state of `region_id`.
    /// Adjusts ranging without emitting a transition event.
    ///
    /// # Errors
    ///
    /// [`BeaconError::PlatformScan`] when ranging cannot change.
    pub async fn region_state_determined(&self, region_id: &str, inside: bool) -> Result<()> {
        self.inner.diagnostics.step("engine.region_state_determined");
        self.set_ranging(region_id, inside).await
    }

    async fn set_ranging(&self, region_id: &str, inside: bool) -> Result<()> {
        let mut core = self.inner.core.lock().await;
        if !core.controller.is_scanning() {
            debug!(region = region_id, "Region transition ignored, not scanning");
            return Ok(());
        }
        if !core.controller.is_watched(region_id) {
            warn!(region = region_id, "Transition for unwatched region");
            return Ok(());
        }
        let result = if inside {
            core.controller.region_entered(region_id)
        } else {
            core.controller.region_exited(region_id)
        };
        result.map_err(|e| self.record(e))
    }

    /// Regions being watched, or those that would be watched when idle.
    pub async fn regions(&self) -> Vec<Region> {
        let core = self.inner.core.lock().await;
        if core.controller.is_scanning() {
            core.controller.regions().to_vec()
        } else {
            core.registry.regions()
        }
    }

    /// Regions currently being ranged.
    pub async fn ranging(&self) -> Vec<String> {
        let core = self.inner.core.lock().await;
        core.controller.ranging().iter().cloned().collect()
    }

    // --- Offline queue ---

    /// Detections waiting for connectivity, oldest first.
    pub async fn offline_queue(&self) -> Vec<OfflineQueueEntry> {
        self.inner.core.lock().await.offline.entries().to_vec()
    }

    /// Re-report queued detections. Entries the gateway rejects stay queued.
    ///
    /// # Errors
    ///
    /// [`BeaconError::MonitoringNotStarted`] before configure,
    /// [`BeaconError::Network`] while offline.
    pub async fn flush_offline_queue(&self) -> Result<FlushSummary> {
        self.inner.diagnostics.step("engine.flush_offline_queue");
        if !self.inner.connectivity.is_online() {
            return Err(self.record(BeaconError::Network(
                "cannot flush offline queue while offline".into(),
            )));
        }
        let (gateway, entries) = {
            let mut core = self.inner.core.lock().await;
            let Some(gateway) = core.gateway.clone() else {
                return Err(self.record(BeaconError::MonitoringNotStarted(
                    "configure must succeed before flushing".into(),
                )));
            };
            (gateway, core.offline.take_all())
        };

        let mut sent = 0;
        let mut failed = Vec::new();
        for entry in entries {
            let report = DetectionReport {
                target: entry.id.clone(),
                rssi: entry.avg_rssi,
                battery: entry.battery,
                is_initial: false,
                timestamp_ms: entry.timestamp,
            };
            match gateway.report_detection(&report).await {
                Ok(_) => sent += 1,
                Err(e) => {
                    let err = self.record(e);
                    warn!(beacon = %entry.id, error = %err, "Offline replay failed");
                    failed.push(entry);
                }
            }
        }

        let mut core = self.inner.core.lock().await;
        core.offline.requeue_front(failed);
        let remaining = core.offline.len();
        info!(sent, remaining, "Offline queue flushed");
        Ok(FlushSummary { sent, remaining })
    }

    // --- Introspection ---

    /// Current lifecycle state.
    pub async fn state(&self) -> MonitoringState {
        self.inner.core.lock().await.state
    }

    /// The configuration currently applied, if any.
    pub async fn config(&self) -> Option<EngineConfig> {
        self.inner.core.lock().await.config.clone()
    }

    /// Lightweight status summary.
    pub async fn status(&self) -> EngineStatus {
        let core = self.inner.core.lock().await;
        EngineStatus {
            is_monitoring: core.controller.is_scanning(),
            target_count: core.registry.len(),
            is_foreground: core.is_foreground,
            user_id: core.user_id(),
        }
    }

    /// Side-effect-free diagnostic snapshot.
    pub async fn diagnostics(&self) -> DiagnosticSnapshot {
        let state = self.state().await;
        self.inner.diagnostics.snapshot(state, self.now_ms())
    }

    /// Attach the event subscriber, replacing any previous one.
    pub fn subscribe_events(&self) -> EventReceiver {
        self.inner.events.subscribe()
    }

    // --- Gateway events ---

    fn report_event(
        &self,
        gateway: Option<&Arc<dyn Gateway>>,
        kind: GatewayEventKind,
        extra: Option<(&str, Value)>,
    ) {
        let Some(gateway) = gateway.cloned() else {
            return;
        };
        let mut details = device_details(&self.inner.device);
        if let (Some((key, value)), Some(map)) = (extra, details.as_object_mut()) {
            map.insert(key.to_string(), value);
        }
        tokio::spawn(async move {
            if let Err(e) = gateway.report_event(kind, details).await {
                warn!(event = kind.as_str(), error = %e, "Gateway event report failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::gateway::{FixedGatewayFactory, GatewayError, GatewayResponse, GatewayResult};
    use crate::platform::{MockScanner, RecordingNotifier};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    // 2025-01-15T00:00:00Z
    const T0: i64 = 1_736_899_200_000;

    struct StubGateway {
        targets: Vec<Target>,
        trigger: AtomicBool,
        fail_reports: AtomicBool,
        slow_reports: AtomicBool,
        reports: StdMutex<Vec<DetectionReport>>,
        events: StdMutex<Vec<GatewayEventKind>>,
    }

    impl StubGateway {
        fn new(targets: Vec<Target>) -> Arc<Self> {
            Arc::new(Self {
                targets,
                trigger: AtomicBool::new(true),
                fail_reports: AtomicBool::new(false),
                slow_reports: AtomicBool::new(false),
                reports: StdMutex::new(Vec::new()),
                events: StdMutex::new(Vec::new()),
            })
        }

        fn reports(&self) -> Vec<DetectionReport> {
            self.reports.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Gateway for StubGateway {
        async fn fetch_targets(&self) -> GatewayResult<Vec<Target>> {
            Ok(self.targets.clone())
        }

        async fn report_detection(&self, report: &DetectionReport) -> GatewayResult<GatewayResponse> {
            if self.slow_reports.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            if self.fail_reports.load(Ordering::SeqCst) {
                return Err(GatewayError::Status {
                    status: 503,
                    body: String::new(),
                });
            }
            self.reports.lock().unwrap().push(report.clone());
            Ok(GatewayResponse {
                trigger_noti: self.trigger.load(Ordering::SeqCst),
                params: json!({"loc": "Lobby"}),
            })
        }

        async fn report_event(&self, kind: GatewayEventKind, _: Value) -> GatewayResult<()> {
            self.events.lock().unwrap().push(kind);
            Ok(())
        }
    }

    struct Harness {
        engine: BeaconEngine,
        scanner: Arc<MockScanner>,
        notifier: Arc<RecordingNotifier>,
        clock: Arc<ManualClock>,
        connectivity: Arc<StaticConnectivity>,
        gateway: Arc<StubGateway>,
    }

    fn harness_with(store: Arc<MemoryStore>, gateway: Arc<StubGateway>) -> Harness {
        let scanner = Arc::new(MockScanner::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let clock = Arc::new(ManualClock::new(T0));
        let connectivity = Arc::new(StaticConnectivity::new(true));
        let engine = BeaconEngine::builder(scanner.clone())
            .store(store)
            .clock(clock.clone())
            .connectivity(connectivity.clone())
            .notifier(notifier.clone())
            .gateway_factory(Arc::new(FixedGatewayFactory(gateway.clone())))
            .build();
        Harness {
            engine,
            scanner,
            notifier,
            clock,
            connectivity,
            gateway,
        }
    }

    fn harness(gateway: Arc<StubGateway>) -> Harness {
        harness_with(Arc::new(MemoryStore::new()), gateway)
    }

    fn lobby() -> Target {
        Target {
            id: TargetId::new("AA:BB:CC:DD:EE:FF"),
            name: "Lobby".into(),
        }
    }

    fn config() -> EngineConfig {
        let mut config = EngineConfig::new("http://gw.test/gateway", "http://gw.test/beacons", "staff-7");
        config.notification_cooldown_ms = 60_000;
        config.max_notifications = 0;
        config
    }

    fn all_day() -> ShiftWindow {
        ShiftWindow {
            shift_start: T0,
            shift_end: T0 + 86_400_000,
            buffer_early_check_in: 86_400_000,
            buffer_late_check_in: 86_400_000,
            buffer_early_check_out: 0,
            buffer_late_check_out: 0,
        }
    }

    fn sighting(id: &str, rssi: i32, at: i64) -> Sighting {
        Sighting {
            id: id.into(),
            rssi,
            timestamp_ms: at,
            battery: None,
        }
    }

    /// Configure and let the background refresh auto-start monitoring.
    async fn running(h: &Harness) {
        h.engine.configure(config()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(h.engine.state().await, MonitoringState::Running);
    }

    /// Three strong samples one second apart, the clock following along.
    async fn dwell(h: &Harness, start: i64) -> BatchSummary {
        let mut total = BatchSummary::default();
        for step in 0..3 {
            let at = start + step * 1_000;
            h.clock.set(at);
            let summary = h
                .engine
                .process_batch(vec![sighting("aa:bb:cc:dd:ee:ff", -80, at)])
                .await
                .unwrap();
            total.detections += summary.detections;
        }
        total
    }

    async fn next_matching(
        rx: &mut EventReceiver,
        wanted: impl Fn(&EngineEvent) -> bool,
    ) -> EngineEvent {
        loop {
            let event = rx.recv().await.unwrap();
            if wanted(&event) {
                return event;
            }
        }
    }

    fn drain(rx: &mut EventReceiver) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_before_configure_is_rejected() {
        let h = harness(StubGateway::new(vec![lobby()]));
        let err = h.engine.start().await.unwrap_err();
        assert!(matches!(err, BeaconError::MonitoringNotStarted(_)));

        let snap = h.engine.diagnostics().await;
        assert_eq!(snap.state, MonitoringState::Created);
        assert_eq!(snap.last_step.as_deref(), Some("engine.start"));
        assert_eq!(snap.last_error_code, Some(2001));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_does_not_advance_state() {
        let h = harness(StubGateway::new(vec![lobby()]));
        let mut bad = config();
        bad.user_id = "  ".into();
        bad.gateway_url = "ftp://nope".into();

        let err = h.engine.configure(bad).await.unwrap_err();
        assert!(matches!(err, BeaconError::ConfigurationInvalid(_)));
        assert_eq!(h.engine.state().await, MonitoringState::Created);
        assert_eq!(h.engine.diagnostics().await.last_error_code, Some(1002));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_failure_is_recorded() {
        let h = harness(StubGateway::new(vec![lobby()]));
        h.scanner.fail_initialize(true);
        let err = h.engine.configure(config()).await.unwrap_err();
        assert!(matches!(err, BeaconError::InitializationFailed(_)));
        assert_eq!(h.engine.state().await, MonitoringState::Created);
        assert_eq!(h.engine.diagnostics().await.last_error_code, Some(1001));
    }

    #[tokio::test(start_paused = true)]
    async fn test_configure_refresh_auto_starts_monitoring() {
        let h = harness(StubGateway::new(vec![lobby()]));
        let mut rx = h.engine.subscribe_events();

        h.engine.configure(config()).await.unwrap();
        assert_eq!(h.engine.state().await, MonitoringState::Configured);
        assert!(h.scanner.periods().is_some());

        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(h.engine.state().await, MonitoringState::Running);
        assert_eq!(h.engine.targets().await, vec![lobby()]);
        assert_eq!(h.scanner.watching().len(), 1);
        assert!(h.scanner.wake_lock_held());
        assert_eq!(
            drain(&mut rx),
            vec![EngineEvent::MonitoringStarted { target_count: 1 }]
        );
        assert_eq!(
            h.gateway.events.lock().unwrap().as_slice(),
            &[GatewayEventKind::ScanStarted]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_exhaustion_keeps_cached_targets() {
        let h = harness(StubGateway::new(Vec::new()));
        h.engine.configure(config()).await.unwrap();
        h.engine.add_target("11:22:33:44:55:66", "Cached").await.unwrap();

        let summary = h.engine.refresh_targets().await.unwrap();
        assert!(!summary.applied);
        assert_eq!(summary.attempts, 4);
        assert_eq!(summary.target_count, 1);
        assert_eq!(h.engine.targets().await[0].name, "Cached");
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop_are_idempotent() {
        let h = harness(StubGateway::new(vec![lobby()]));
        let mut rx = h.engine.subscribe_events();
        running(&h).await;
        drain(&mut rx);

        h.engine.start().await.unwrap();
        assert!(drain(&mut rx).is_empty());
        assert_eq!(h.scanner.start_count(), 1);

        h.engine.stop().await.unwrap();
        assert_eq!(drain(&mut rx), vec![EngineEvent::MonitoringStopped {}]);
        assert_eq!(h.engine.state().await, MonitoringState::Configured);
        assert!(!h.scanner.wake_lock_held());

        h.engine.stop().await.unwrap();
        assert!(drain(&mut rx).is_empty());
        assert_eq!(h.scanner.stop_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_online_detection_is_reported_and_notified() {
        let h = harness(StubGateway::new(vec![lobby()]));
        let mut rx = h.engine.subscribe_events();
        running(&h).await;
        assert!(h.engine.check_shift(&all_day(), T0).await);

        let summary = dwell(&h, T0).await;
        assert_eq!(summary.detections, 1);

        let event = next_matching(&mut rx, |e| matches!(e, EngineEvent::BeaconDetected(_))).await;
        let EngineEvent::BeaconDetected(payload) = event else {
            unreachable!()
        };
        assert_eq!(payload.id.as_str(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(payload.name, "Lobby");
        assert_eq!(payload.avg_rssi, -80);
        assert_eq!(payload.timestamp, T0 + 2_000);

        let reports = h.gateway.reports();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].is_initial);
        assert_eq!(reports[0].rssi, -80);

        let shown = h.notifier.shown();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].params["loc"], "Lobby");
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_sample_emits_ranged_event() {
        let h = harness(StubGateway::new(vec![lobby()]));
        let mut rx = h.engine.subscribe_events();
        running(&h).await;
        drain(&mut rx);

        h.engine.set_foreground(false).await;
        h.engine.update_battery("aa:bb:cc:dd:ee:ff", 64).await.unwrap();
        h.engine
            .process_batch(vec![
                sighting("aa:bb:cc:dd:ee:ff", -95, T0),
                sighting("99:99:99:99:99:99", -40, T0),
            ])
            .await
            .unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![EngineEvent::BeaconRanged {
                id: TargetId::new("AA:BB:CC:DD:EE:FF"),
                name: "Lobby".into(),
                rssi: -95,
                avg_rssi: -95,
                timestamp: T0,
                is_background: true,
                battery: Some(64),
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_sample_does_not_abort_batch() {
        let h = harness(StubGateway::new(vec![lobby()]));
        running(&h).await;

        let summary = h
            .engine
            .process_batch(vec![
                sighting("aa:bb:cc:dd:ee:ff", 500, T0),
                sighting("aa:bb:cc:dd:ee:ff", -70, T0),
                sighting("unknown", -70, T0),
            ])
            .await
            .unwrap();

        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.ignored, 1);
        assert_eq!(h.engine.diagnostics().await.last_error_code, Some(2002));
    }

    #[tokio::test(start_paused = true)]
    async fn test_detection_outside_shift_is_not_reported() {
        let h = harness(StubGateway::new(vec![lobby()]));
        let mut rx = h.engine.subscribe_events();
        running(&h).await;

        dwell(&h, T0).await;
        tokio::task::yield_now().await;

        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, EngineEvent::OutsideShiftDetection(_))));
        assert!(h.gateway.reports().is_empty());
        assert!(h.notifier.shown().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_suppresses_second_detection() {
        let h = harness(StubGateway::new(vec![lobby()]));
        let mut rx = h.engine.subscribe_events();
        running(&h).await;
        h.engine.check_shift(&all_day(), T0).await;

        dwell(&h, T0).await;
        next_matching(&mut rx, |e| matches!(e, EngineEvent::BeaconDetected(_))).await;

        // Second full dwell inside the 60 s cooldown.
        assert_eq!(dwell(&h, T0 + 10_000).await.detections, 1);
        tokio::task::yield_now().await;
        assert_eq!(h.gateway.reports().len(), 1);

        // After the cooldown the next dwell goes through.
        dwell(&h, T0 + 120_000).await;
        next_matching(&mut rx, |e| matches!(e, EngineEvent::BeaconDetected(_))).await;
        assert_eq!(h.gateway.reports().len(), 2);
        assert_eq!(h.notifier.shown().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_detection_is_queued_then_flushed() {
        let h = harness(StubGateway::new(vec![lobby()]));
        let mut rx = h.engine.subscribe_events();
        running(&h).await;
        h.engine.check_shift(&all_day(), T0).await;
        h.connectivity.set_online(false);

        dwell(&h, T0).await;
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, EngineEvent::OfflineDetection(_))));
        assert_eq!(h.engine.offline_queue().await.len(), 1);
        assert!(h.gateway.reports().is_empty());
        assert!(h.engine.flush_offline_queue().await.is_err());

        h.connectivity.set_online(true);
        let summary = h.engine.flush_offline_queue().await.unwrap();
        assert_eq!(summary, FlushSummary { sent: 1, remaining: 0 });
        let reports = h.gateway.reports();
        assert_eq!(reports.len(), 1);
        assert!(!reports[0].is_initial);
        assert!(h.engine.offline_queue().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_flush_keeps_entries() {
        let h = harness(StubGateway::new(vec![lobby()]));
        running(&h).await;
        h.engine.check_shift(&all_day(), T0).await;
        h.connectivity.set_online(false);
        dwell(&h, T0).await;

        h.connectivity.set_online(true);
        h.gateway.fail_reports.store(true, Ordering::SeqCst);
        let summary = h.engine.flush_offline_queue().await.unwrap();
        assert_eq!(summary, FlushSummary { sent: 0, remaining: 1 });
        assert_eq!(h.engine.diagnostics().await.last_error_code, Some(3002));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_beacon_reported_once() {
        let h = harness(StubGateway::new(vec![lobby()]));
        let mut rx = h.engine.subscribe_events();
        running(&h).await;

        h.engine
            .process_batch(vec![sighting("aa:bb:cc:dd:ee:ff", -90, T0)])
            .await
            .unwrap();
        drain(&mut rx);

        h.clock.set(T0 + 6_000);
        let summary = h.engine.process_batch(Vec::new()).await.unwrap();
        assert_eq!(summary.lost, 1);
        assert_eq!(
            drain(&mut rx),
            vec![EngineEvent::BeaconLost {
                id: TargetId::new("AA:BB:CC:DD:EE:FF")
            }]
        );

        h.clock.set(T0 + 12_000);
        h.engine.process_batch(Vec::new()).await.unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_restarts_stalled_scanning() {
        let h = harness(StubGateway::new(vec![lobby()]));
        let mut rx = h.engine.subscribe_events();
        let mut config = config();
        config.watchdog_check_interval_ms = 1_000;
        config.watchdog_timeout_ms = 2_000;
        h.engine.configure(config).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(h.scanner.start_count(), 1);
        drain(&mut rx);

        h.clock.advance(5_000);
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        assert_eq!(h.scanner.start_count(), 2);
        assert_eq!(h.engine.state().await, MonitoringState::Running);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(
            h.engine.diagnostics().await.last_step.as_deref(),
            Some("watchdog.recover")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_regions_drive_ranging() {
        let h = harness(StubGateway::new(vec![lobby()]));
        let mut rx = h.engine.subscribe_events();
        running(&h).await;
        drain(&mut rx);

        h.engine.region_entered("all-beacons-region").await.unwrap();
        assert_eq!(h.engine.ranging().await, vec!["all-beacons-region".to_string()]);
        h.engine.region_exited("all-beacons-region").await.unwrap();
        assert!(h.scanner.ranging().is_empty());

        assert_eq!(
            drain(&mut rx),
            vec![
                EngineEvent::RegionEnter {
                    region_id: "all-beacons-region".into()
                },
                EngineEvent::RegionExit {
                    region_id: "all-beacons-region".into()
                },
            ]
        );

        h.engine
            .region_state_determined("all-beacons-region", true)
            .await
            .unwrap();
        assert!(drain(&mut rx).is_empty());
        assert!(h.scanner.ranging().contains("all-beacons-region"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_targets_stops_monitoring() {
        let h = harness(StubGateway::new(vec![lobby()]));
        let mut rx = h.engine.subscribe_events();
        running(&h).await;
        drain(&mut rx);

        h.engine.clear_targets().await.unwrap();
        assert_eq!(drain(&mut rx), vec![EngineEvent::MonitoringStopped {}]);
        assert!(h.engine.targets().await.is_empty());
        assert_eq!(h.engine.state().await, MonitoringState::Configured);
        assert!(!h.engine.status().await.is_monitoring);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_during_refresh_discards_stale_result() {
        let h = harness(StubGateway::new(vec![lobby()]));
        let mut rx = h.engine.subscribe_events();
        h.engine.configure(config()).await.unwrap();
        h.engine.clear_targets().await.unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;

        assert!(h.engine.targets().await.is_empty());
        assert_eq!(h.engine.state().await, MonitoringState::Configured);
        assert_eq!(h.scanner.start_count(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_refresh_prevents_auto_start() {
        let h = harness(StubGateway::new(vec![lobby()]));
        h.engine.configure(config()).await.unwrap();
        h.engine.stop().await.unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(h.engine.state().await, MonitoringState::Configured);
        assert_eq!(h.scanner.start_count(), 0);
        assert!(h.engine.targets().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconfigure_during_refresh_applies_latest_only() {
        let h = harness(StubGateway::new(vec![lobby()]));
        let mut rx = h.engine.subscribe_events();
        h.engine.configure(config()).await.unwrap();
        h.engine.configure(config()).await.unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(h.engine.state().await, MonitoringState::Running);
        assert_eq!(h.engine.targets().await, vec![lobby()]);
        assert_eq!(h.scanner.start_count(), 1);
        assert_eq!(
            drain(&mut rx),
            vec![EngineEvent::MonitoringStarted { target_count: 1 }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_sighting_timestamp_does_not_evict() {
        let h = harness(StubGateway::new(vec![lobby()]));
        let mut rx = h.engine.subscribe_events();
        running(&h).await;
        drain(&mut rx);
        h.clock.set(T0);

        // Radio clock six seconds behind the engine clock.
        let summary = h
            .engine
            .process_batch(vec![sighting("aa:bb:cc:dd:ee:ff", -70, T0 - 6_000)])
            .await
            .unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.lost, 0);
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name(), "beaconRanged");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dwell_follows_engine_clock_not_radio_clock() {
        let h = harness(StubGateway::new(vec![lobby()]));
        running(&h).await;
        h.engine.check_shift(&all_day(), T0).await;

        // Radio stamps spread over two seconds but arrive at one instant.
        h.clock.set(T0);
        let summary = h
            .engine
            .process_batch(vec![
                sighting("aa:bb:cc:dd:ee:ff", -80, T0),
                sighting("aa:bb:cc:dd:ee:ff", -80, T0 + 1_000),
                sighting("aa:bb:cc:dd:ee:ff", -80, T0 + 2_000),
            ])
            .await
            .unwrap();
        assert_eq!(summary.detections, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gateway_declining_notification_is_silent() {
        let gateway = StubGateway::new(vec![lobby()]);
        gateway.trigger.store(false, Ordering::SeqCst);
        let h = harness(gateway);
        let mut rx = h.engine.subscribe_events();
        running(&h).await;
        h.engine.check_shift(&all_day(), T0).await;

        assert_eq!(dwell(&h, T0).await.detections, 1);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(h.gateway.reports().len(), 1);
        assert!(h.notifier.shown().is_empty());
        assert!(!drain(&mut rx)
            .iter()
            .any(|e| matches!(e, EngineEvent::BeaconDetected(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_online_report_records_network_error() {
        let h = harness(StubGateway::new(vec![lobby()]));
        let mut rx = h.engine.subscribe_events();
        running(&h).await;
        h.engine.check_shift(&all_day(), T0).await;
        h.gateway.fail_reports.store(true, Ordering::SeqCst);

        assert_eq!(dwell(&h, T0).await.detections, 1);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(h.engine.diagnostics().await.last_error_code, Some(3002));
        assert!(h.notifier.shown().is_empty());
        assert!(!drain(&mut rx)
            .iter()
            .any(|e| matches!(e, EngineEvent::BeaconDetected(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_after_stop_is_discarded() {
        let h = harness(StubGateway::new(vec![lobby()]));
        let mut rx = h.engine.subscribe_events();
        running(&h).await;
        h.engine.check_shift(&all_day(), T0).await;
        h.gateway.slow_reports.store(true, Ordering::SeqCst);

        assert_eq!(dwell(&h, T0).await.detections, 1);
        h.engine.stop().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(h.gateway.reports().len(), 1);
        assert!(h.notifier.shown().is_empty());
        assert!(!drain(&mut rx)
            .iter()
            .any(|e| matches!(e, EngineEvent::BeaconDetected(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_resumes_monitoring() {
        let store = Arc::new(MemoryStore::new());
        let prefs = PreferenceStore::new(store.clone());
        prefs.save_config(&config()).unwrap();
        prefs.set_monitoring_enabled(true).unwrap();
        prefs
            .save_targets(&BTreeMap::from([(lobby().id, lobby().name)]))
            .unwrap();

        let h = harness_with(store, StubGateway::new(Vec::new()));
        assert_eq!(h.engine.restore().await, MonitoringState::Running);
        assert_eq!(h.scanner.watching().len(), 1);

        let status = h.engine.status().await;
        assert!(status.is_monitoring);
        assert_eq!(status.target_count, 1);
        assert_eq!(status.user_id, "staff-7");
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_after_stop_stays_configured() {
        let store = Arc::new(MemoryStore::new());
        let prefs = PreferenceStore::new(store.clone());
        prefs.save_config(&config()).unwrap();
        prefs.set_monitoring_enabled(false).unwrap();
        prefs
            .save_targets(&BTreeMap::from([(lobby().id, lobby().name)]))
            .unwrap();

        let h = harness_with(store, StubGateway::new(vec![lobby()]));
        assert_eq!(h.engine.restore().await, MonitoringState::Configured);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(h.engine.state().await, MonitoringState::Configured);
        assert_eq!(h.scanner.start_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_without_config_is_noop() {
        let h = harness(StubGateway::new(vec![lobby()]));
        assert_eq!(h.engine.restore().await, MonitoringState::Created);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_target_rejects_bad_input() {
        let h = harness(StubGateway::new(vec![lobby()]));
        let err = h.engine.add_target("", "Nowhere").await.unwrap_err();
        assert!(matches!(err, BeaconError::InvalidInput(_)));
        assert_eq!(h.engine.diagnostics().await.last_error_code, Some(1003));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_battery_validates_and_ignores_unknown() {
        let h = harness(StubGateway::new(vec![lobby()]));
        h.engine.add_target("AA:BB:CC:DD:EE:FF", "Lobby").await.unwrap();
        assert!(h.engine.update_battery("aa:bb:cc:dd:ee:ff", 80).await.unwrap());
        assert!(!h.engine.update_battery("00:00", 80).await.unwrap());
        assert!(h.engine.update_battery("aa:bb:cc:dd:ee:ff", 101).await.is_err());
    }
}
