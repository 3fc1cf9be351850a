//! Signal smoothing, dwell confirmation and lost-beacon eviction.
//!
//! The [`DetectionEngine`] keeps a small amount of state per target:
//!
//! - a FIFO of the last [`RSSI_BUFFER_SIZE`] raw strength values
//! - the start time of the current dwell (strong-signal run), if any
//! - the last time a sample was seen
//! - the last known battery reading (sticky across samples)
//!
//! Every sample yields a [`Ranged`] reading. A target whose truncated mean
//! stays at or above the RSSI threshold for the configured time threshold
//! yields exactly one [`Detection`], after which all of its state is cleared
//! so a later approach re-arms from zero. A single weak sample cancels an
//! in-progress dwell.
//!
//! The engine is a plain synchronous state machine; callers serialize access.

use std::collections::{HashMap, VecDeque};

use thiserror::Error;
use tracing::{debug, info};

use crate::types::{ShiftWindow, SignalSample, TargetId};

/// Capacity of the per-target RSSI ring buffer.
pub const RSSI_BUFFER_SIZE: usize = 5;

/// Weakest strength accepted from the platform.
pub const MIN_RSSI: i32 = -127;

/// Strongest strength accepted from the platform.
pub const MAX_RSSI: i32 = 20;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while processing a single sample.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DetectionError {
    /// The reported strength is outside what any radio produces.
    #[error("RSSI {rssi} for {target} is outside {MIN_RSSI}..={MAX_RSSI}")]
    InvalidRssi {
        /// Target the sample belonged to.
        target: TargetId,
        /// Rejected value.
        rssi: i32,
    },

    /// The reported battery percentage is above 100.
    #[error("Battery {battery}% for {target} exceeds 100")]
    InvalidBattery {
        /// Target the sample belonged to.
        target: TargetId,
        /// Rejected value.
        battery: u8,
    },
}

// ============================================================================
// Outputs
// ============================================================================

/// Live telemetry produced for every accepted sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ranged {
    /// Target the sample belonged to.
    pub target: TargetId,
    /// Raw strength of this sample.
    pub rssi: i32,
    /// Truncated mean of the ring buffer after inserting this sample.
    pub avg_rssi: i32,
    /// Sample time.
    pub timestamp_ms: i64,
    /// Whether the host was in the background.
    pub is_background: bool,
    /// Sticky battery reading.
    pub battery: Option<u8>,
}

/// A confirmed dwell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// Confirmed target.
    pub target: TargetId,
    /// Smoothed strength at confirmation.
    pub avg_rssi: i32,
    /// Confirmation time.
    pub timestamp_ms: i64,
    /// Sticky battery reading.
    pub battery: Option<u8>,
}

/// Result of [`DetectionEngine::process_sample`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleOutcome {
    /// Always present.
    pub ranged: Ranged,
    /// Present only when this sample completed a dwell.
    pub detected: Option<Detection>,
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Debug, Default)]
struct Track {
    buffer: VecDeque<i32>,
    dwell_start: Option<i64>,
    last_seen: Option<i64>,
    battery: Option<u8>,
}

impl Track {
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn average(&self) -> i32 {
        if self.buffer.is_empty() {
            return 0;
        }
        let sum: i64 = self.buffer.iter().map(|&v| i64::from(v)).sum();
        // Integer division truncates toward zero.
        (sum / self.buffer.len() as i64) as i32
    }
}

/// Per-target RSSI smoothing and dwell tracker.
#[derive(Debug)]
pub struct DetectionEngine {
    rssi_threshold: i32,
    time_threshold_ms: i64,
    tracks: HashMap<TargetId, Track>,
}

impl DetectionEngine {
    /// Create an engine with the given thresholds.
    #[must_use]
    pub fn new(rssi_threshold: i32, time_threshold_ms: i64) -> Self {
        Self {
            rssi_threshold,
            time_threshold_ms,
            tracks: HashMap::new(),
        }
    }

    /// Replace thresholds, keeping per-target state.
    pub fn set_thresholds(&mut self, rssi_threshold: i32, time_threshold_ms: i64) {
        self.rssi_threshold = rssi_threshold;
        self.time_threshold_ms = time_threshold_ms;
    }

    /// Feed one sample.
    ///
    /// # Errors
    ///
    /// Returns [`DetectionError`] when the sample carries an implausible
    /// strength or battery value. The target's state is left untouched.
    pub fn process_sample(
        &mut self,
        sample: &SignalSample,
    ) -> Result<SampleOutcome, DetectionError> {
        if !(MIN_RSSI..=MAX_RSSI).contains(&sample.rssi) {
            return Err(DetectionError::InvalidRssi {
                target: sample.target.clone(),
                rssi: sample.rssi,
            });
        }
        if let Some(battery) = sample.battery.filter(|&b| b > 100) {
            return Err(DetectionError::InvalidBattery {
                target: sample.target.clone(),
                battery,
            });
        }

        let now = sample.timestamp_ms;
        let track = self.tracks.entry(sample.target.clone()).or_default();

        track.last_seen = Some(now);
        track.buffer.push_back(sample.rssi);
        while track.buffer.len() > RSSI_BUFFER_SIZE {
            track.buffer.pop_front();
        }
        if sample.battery.is_some() {
            track.battery = sample.battery;
        }

        let avg_rssi = track.average();
        let battery = track.battery;

        debug!(
            beacon = %sample.target,
            rssi = sample.rssi,
            avg_rssi,
            battery = ?battery,
            "Sample ranged"
        );

        let ranged = Ranged {
            target: sample.target.clone(),
            rssi: sample.rssi,
            avg_rssi,
            timestamp_ms: now,
            is_background: sample.is_background,
            battery,
        };

        let mut detected = None;
        if avg_rssi >= self.rssi_threshold {
            let start = *track.dwell_start.get_or_insert_with(|| {
                debug!(beacon = %sample.target, "Dwell timer started");
                now
            });
            if now.saturating_sub(start) >= self.time_threshold_ms {
                info!(beacon = %sample.target, avg_rssi, "Dwell confirmed");
                detected = Some(Detection {
                    target: sample.target.clone(),
                    avg_rssi,
                    timestamp_ms: now,
                    battery,
                });
            }
        } else {
            if track.dwell_start.take().is_some() {
                debug!(beacon = %sample.target, avg_rssi, "Weak signal, dwell reset");
            }
            track.buffer.clear();
        }

        if detected.is_some() {
            // A confirmed target starts from scratch and is not tracked for loss.
            self.tracks.remove(&sample.target);
        }
        Ok(SampleOutcome { ranged, detected })
    }

    /// Evict every target not seen for more than `timeout_ms`.
    ///
    /// Returns the evicted ids. A target is reported once per loss: its
    /// track is dropped on eviction, so repeated calls stay quiet until it
    /// is sampled again.
    pub fn check_lost_beacons(&mut self, now_ms: i64, timeout_ms: i64) -> Vec<TargetId> {
        let mut lost: Vec<TargetId> = self
            .tracks
            .iter()
            .filter(|(_, track)| {
                track
                    .last_seen
                    .is_some_and(|seen| now_ms.saturating_sub(seen) > timeout_ms)
            })
            .map(|(id, _)| id.clone())
            .collect();
        lost.sort();

        for id in &lost {
            info!(beacon = %id, timeout_ms, "Beacon lost");
            self.tracks.remove(id);
        }
        lost
    }

    /// Drop all state.
    pub fn clear(&mut self) {
        self.tracks.clear();
    }
}

/// Whether `timestamp` falls inside the check-in or check-out window.
///
/// Both windows are inclusive on both ends:
/// `[start - early_in, start + late_in]` and `[end - early_out, end + late_out]`.
#[must_use]
pub const fn is_within_shift(window: &ShiftWindow, timestamp: i64) -> bool {
    let check_in_open = window.shift_start.saturating_sub(window.buffer_early_check_in);
    let check_in_close = window.shift_start.saturating_add(window.buffer_late_check_in);
    let check_out_open = window.shift_end.saturating_sub(window.buffer_early_check_out);
    let check_out_close = window.shift_end.saturating_add(window.buffer_late_check_out);

    (timestamp >= check_in_open && timestamp <= check_in_close)
        || (timestamp >= check_out_open && timestamp <= check_out_close)
}

impl ShiftWindow {
    /// See [`is_within_shift`].
    #[must_use]
    pub const fn contains(&self, timestamp: i64) -> bool {
        is_within_shift(self, timestamp)
    }
}
