//! Notification gate and offline detection queue.
//!
//! The gate decides whether a confirmed detection may surface as a host
//! notification. Two limits apply per target: a cooldown between
//! notifications and a cap on notifications per local calendar day. Allowed
//! notifications are persisted immediately so a restart cannot double-fire.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::storage::PreferenceStore;
use crate::types::TargetId;

/// Entries beyond this are dropped oldest-first.
pub const MAX_OFFLINE_QUEUE_LEN: usize = 1_000;

/// Persisted per-target notification history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    /// Time of the last issued notification.
    pub last_notified_ms: i64,
    /// Local day `count` refers to.
    pub day: Option<NaiveDate>,
    /// Notifications issued on `day`.
    pub count: u32,
}

/// Why a notification was held back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// Still inside the cooldown window.
    Cooldown {
        /// Milliseconds until the window closes.
        remaining_ms: i64,
    },
    /// Already notified `max_per_day` times today.
    DailyCapReached,
}

/// Gate verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Notify.
    Allow,
    /// Do not notify.
    Suppress(SuppressReason),
}

impl GateDecision {
    /// `true` for [`GateDecision::Allow`].
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }
}

fn local_day(now_ms: i64, tz: Tz) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(now_ms).map(|utc| utc.with_timezone(&tz).date_naive())
}

/// Per-target cooldown and daily cap.
#[derive(Debug)]
pub struct NotificationGate {
    cooldown_ms: i64,
    max_per_day: u32,
    tz: Tz,
    records: BTreeMap<TargetId, NotificationRecord>,
    prefs: PreferenceStore,
}

impl NotificationGate {
    /// Load persisted history. Unreadable history starts empty.
    pub fn load(prefs: PreferenceStore, cooldown_ms: u64, max_per_day: u32, tz: Tz) -> Self {
        let records = prefs.load_notifications().unwrap_or_else(|e| {
            warn!(error = %e, "Notification history unreadable, starting fresh");
            BTreeMap::new()
        });
        Self {
            cooldown_ms: i64::try_from(cooldown_ms).unwrap_or(i64::MAX),
            max_per_day,
            tz,
            records,
            prefs,
        }
    }

    /// Apply new limits, keeping history.
    pub fn reconfigure(&mut self, cooldown_ms: u64, max_per_day: u32, tz: Tz) {
        self.cooldown_ms = i64::try_from(cooldown_ms).unwrap_or(i64::MAX);
        self.max_per_day = max_per_day;
        self.tz = tz;
    }

    /// Evaluate without recording.
    #[must_use]
    pub fn peek(&self, target: &TargetId, now_ms: i64) -> GateDecision {
        let Some(record) = self.records.get(target) else {
            return GateDecision::Allow;
        };

        let elapsed = now_ms.saturating_sub(record.last_notified_ms);
        if elapsed < self.cooldown_ms {
            return GateDecision::Suppress(SuppressReason::Cooldown {
                remaining_ms: self.cooldown_ms - elapsed,
            });
        }

        if self.max_per_day > 0
            && record.day.is_some()
            && record.day == local_day(now_ms, self.tz)
            && record.count >= self.max_per_day
        {
            return GateDecision::Suppress(SuppressReason::DailyCapReached);
        }

        GateDecision::Allow
    }

    /// Evaluate and, when allowed, record `now_ms` and persist.
    pub fn gate(&mut self, target: &TargetId, now_ms: i64) -> GateDecision {
        let decision = self.peek(target, now_ms);
        if let GateDecision::Suppress(reason) = decision {
            debug!(beacon = %target, ?reason, "Notification suppressed");
            return decision;
        }

        let today = local_day(now_ms, self.tz);
        let record = self
            .records
            .entry(target.clone())
            .or_insert(NotificationRecord {
                last_notified_ms: now_ms,
                day: today,
                count: 0,
            });
        if record.day != today {
            record.day = today;
            record.count = 0;
        }
        record.last_notified_ms = now_ms;
        record.count = record.count.saturating_add(1);

        if let Err(e) = self.prefs.save_notifications(&self.records) {
            warn!(error = %e, beacon = %target, "Failed to persist notification history");
        }
        decision
    }
}

// ============================================================================
// Offline queue
// ============================================================================

/// A confirmed detection that could not reach the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OfflineQueueEntry {
    /// Target id.
    pub id: TargetId,
    /// Display name at detection time.
    pub name: String,
    /// Smoothed strength at confirmation.
    pub avg_rssi: i32,
    /// Battery at confirmation.
    pub battery: Option<u8>,
    /// Confirmation time in milliseconds.
    pub timestamp: i64,
}

/// Persisted FIFO of offline detections.
#[derive(Debug)]
pub struct OfflineQueue {
    entries: Vec<OfflineQueueEntry>,
    prefs: PreferenceStore,
}

impl OfflineQueue {
    /// Load the persisted queue. An unreadable queue starts empty.
    pub fn load(prefs: PreferenceStore) -> Self {
        let entries = prefs.load_offline_queue().unwrap_or_else(|e| {
            warn!(error = %e, "Offline queue unreadable, starting empty");
            Vec::new()
        });
        Self { entries, prefs }
    }

    /// Append an entry and persist.
    pub fn push(&mut self, entry: OfflineQueueEntry) {
        self.entries.push(entry);
        if self.entries.len() > MAX_OFFLINE_QUEUE_LEN {
            let excess = self.entries.len() - MAX_OFFLINE_QUEUE_LEN;
            warn!(dropped = excess, "Offline queue full, dropping oldest entries");
            self.entries.drain(..excess);
        }
        self.persist();
    }

    /// Current entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> &[OfflineQueueEntry] {
        &self.entries
    }

    /// Number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove and return everything, persisting the empty queue.
    pub fn take_all(&mut self) -> Vec<OfflineQueueEntry> {
        let taken = std::mem::take(&mut self.entries);
        if !taken.is_empty() {
            self.persist();
        }
        taken
    }

    /// Put entries back at the front, ahead of anything queued since.
    pub fn requeue_front(&mut self, mut failed: Vec<OfflineQueueEntry>) {
        if failed.is_empty() {
            return;
        }
        failed.append(&mut self.entries);
        self.entries = failed;
        self.persist();
    }

    fn persist(&self) {
        if let Err(e) = self.prefs.save_offline_queue(&self.entries) {
            warn!(error = %e, "Failed to persist offline queue");
        }
    }
}
