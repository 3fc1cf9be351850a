//! Scan-liveness watchdog.
//!
//! The watchdog does not touch scanning itself. It only notices that no scan
//! batch has been reported for longer than the timeout and invokes a
//! caller-supplied recovery callback, at most once per timeout window.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::clock::Clock;

/// Default period between liveness checks.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Default silence tolerated before recovery fires.
pub const DEFAULT_TIMEOUT_MS: i64 = 120_000;

type TimeoutCallback = Arc<dyn Fn() + Send + Sync>;

/// Periodic scan-stall detector.
pub struct Watchdog {
    clock: Arc<dyn Clock>,
    check_interval: Duration,
    timeout_ms: i64,
    last_scan_ms: Arc<AtomicI64>,
    on_timeout: Arc<Mutex<Option<TimeoutCallback>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("check_interval", &self.check_interval)
            .field("timeout_ms", &self.timeout_ms)
            .field("last_scan_ms", &self.last_scan_ms.load(Ordering::SeqCst))
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Watchdog {
    /// Create a stopped watchdog.
    pub fn new(clock: Arc<dyn Clock>, check_interval: Duration, timeout_ms: i64) -> Self {
        Self {
            clock,
            check_interval,
            timeout_ms,
            last_scan_ms: Arc::new(AtomicI64::new(0)),
            on_timeout: Arc::new(Mutex::new(None)),
            task: Mutex::new(None),
        }
    }

    /// Install the recovery callback, replacing any previous one.
    pub fn on_timeout<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self
            .on_timeout
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    /// Seed the last-scan time and begin periodic checks.
    ///
    /// No-op when already running. Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        self.last_scan_ms.store(self.clock.now_ms(), Ordering::SeqCst);

        let clock = Arc::clone(&self.clock);
        let last_scan_ms = Arc::clone(&self.last_scan_ms);
        let on_timeout = Arc::clone(&self.on_timeout);
        let timeout_ms = self.timeout_ms;
        let period = self.check_interval;

        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !check_stall(&last_scan_ms, clock.now_ms(), timeout_ms) {
                    continue;
                }
                let callback = on_timeout
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                if let Some(callback) = callback {
                    if panic::catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                        error!("Watchdog recovery callback panicked");
                    }
                }
            }
        }));

        info!(
            interval_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
            timeout_ms, "Watchdog started"
        );
    }

    /// Cancel periodic checks. Idempotent.
    pub fn stop(&self) {
        if let Some(handle) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
            info!("Watchdog stopped");
        }
    }

    /// Record a successfully processed scan batch.
    pub fn notify_scan(&self) {
        self.last_scan_ms.store(self.clock.now_ms(), Ordering::SeqCst);
    }

    /// Whether the periodic task is live.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if let Some(handle) = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

/// `true` when recovery is due at `now_ms`. A positive result moves the
/// last-scan time to `now_ms`, so a persisting stall fires again only after
/// another full timeout.
fn check_stall(last_scan_ms: &AtomicI64, now_ms: i64, timeout_ms: i64) -> bool {
    let last = last_scan_ms.load(Ordering::SeqCst);
    let elapsed = now_ms.saturating_sub(last);
    if last > 0 && elapsed > timeout_ms {
        warn!(elapsed_ms = elapsed, "No scans within watchdog timeout, triggering recovery");
        last_scan_ms.store(now_ms, Ordering::SeqCst);
        true
    } else {
        false
    }
}
