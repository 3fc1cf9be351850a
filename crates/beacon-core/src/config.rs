//! Engine configuration management.
//!
//! Handles parsing, persisting, and validating the configuration the host
//! hands to [`crate::engine::BeaconEngine::configure`]:
//! - Gateway and data-source endpoints
//! - RSSI and dwell-time thresholds
//! - Scan cadence for foreground and background operation
//! - Notification cooldown and daily cap
//! - Watchdog and target-refresh timing
//!
//! The persisted form is the camelCase JSON produced by
//! [`EngineConfig::to_json_string`]; hosts may also keep a TOML file and load
//! it with [`EngineConfig::load`].

use std::path::Path;
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use utoipa::ToSchema;

/// Default RSSI threshold in dBm.
pub const DEFAULT_RSSI_THRESHOLD: i32 = -85;
/// Default dwell time in seconds.
pub const DEFAULT_TIME_THRESHOLD_SECS: u32 = 2;
/// Default scan period in milliseconds.
pub const DEFAULT_SCAN_PERIOD_MS: u64 = 1_100;
/// Default pause between scans in milliseconds.
pub const DEFAULT_BETWEEN_SCAN_PERIOD_MS: u64 = 5_000;
/// Default notification cooldown in milliseconds.
pub const DEFAULT_NOTIFICATION_COOLDOWN_MS: u64 = 3_000;
/// Default per-target daily notification cap.
pub const DEFAULT_MAX_NOTIFICATIONS: u32 = 3;
/// Default lost-beacon timeout in milliseconds.
pub const DEFAULT_LOST_TIMEOUT_MS: u64 = 5_000;
/// Default timezone for gateway timestamps and the daily cap.
pub const DEFAULT_TIMEZONE: &str = "Asia/Kuala_Lumpur";

/// Valid RSSI threshold range (dBm).
const RSSI_THRESHOLD_RANGE: std::ops::RangeInclusive<i32> = -120..=0;
/// Upper bound on the dwell time.
const MAX_TIME_THRESHOLD_SECS: u32 = 3_600;
/// Upper bound on refresh attempts.
const MAX_REFRESH_ATTEMPTS: u32 = 10;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file was not found.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// Failed to read the configuration file.
    #[error("Failed to read configuration file '{path}': {source}")]
    ReadError {
        /// Path that was being read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML configuration.
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to parse or serialize the JSON form.
    #[error("Invalid configuration JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    /// A single field failed validation.
    #[error("Invalid configuration for '{field}': {message}")]
    ValidationError {
        /// Field (camelCase) that failed validation.
        field: String,
        /// Human-readable description.
        message: String,
    },

    /// Several fields failed validation.
    #[error("Configuration has {} validation errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

impl ConfigError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Scan cadence handed to the platform scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanPeriods {
    /// Foreground scan window.
    pub foreground_scan: Duration,
    /// Foreground pause between scans.
    pub foreground_between_scan: Duration,
    /// Background scan window.
    pub background_scan: Duration,
    /// Background pause between scans.
    pub background_between_scan: Duration,
}

/// Engine configuration consumed at configure-time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({
    "gatewayUrl": "https://attendance.example.com/api/gateway",
    "dataUrl": "https://attendance.example.com/api/beacons",
    "userId": "staff-0042",
    "rssiThreshold": -85,
    "timeThreshold": 2,
    "notificationCooldown": 3000
}))]
pub struct EngineConfig {
    /// Endpoint receiving detection and event reports.
    pub gateway_url: String,

    /// Endpoint serving the authoritative target list.
    pub data_url: String,

    /// User the device reports on behalf of.
    pub user_id: String,

    /// Smoothed RSSI at or above which a target counts as "strong".
    #[serde(default = "defaults::rssi_threshold")]
    pub rssi_threshold: i32,

    /// Seconds a target must stay strong before it is confirmed.
    #[serde(default = "defaults::time_threshold", rename = "timeThreshold")]
    pub time_threshold_secs: u32,

    /// Foreground scan window in milliseconds.
    #[serde(default = "defaults::scan_period", rename = "scanPeriod")]
    pub scan_period_ms: u64,

    /// Foreground pause between scans in milliseconds.
    #[serde(default = "defaults::between_scan_period", rename = "betweenScanPeriod")]
    pub between_scan_period_ms: u64,

    /// Background scan window in milliseconds.
    #[serde(default = "defaults::scan_period", rename = "backgroundScanPeriod")]
    pub background_scan_period_ms: u64,

    /// Background pause between scans in milliseconds.
    #[serde(
        default = "defaults::between_scan_period",
        rename = "backgroundBetweenScanPeriod"
    )]
    pub background_between_scan_period_ms: u64,

    /// Minimum gap between two notifications for the same target.
    #[serde(default = "defaults::notification_cooldown", rename = "notificationCooldown")]
    pub notification_cooldown_ms: u64,

    /// Per-target notifications allowed per local day (0 = unlimited).
    #[serde(default = "defaults::max_notifications")]
    pub max_notifications: u32,

    /// Silence after which a ranged target is considered lost.
    #[serde(default = "defaults::lost_timeout", rename = "lostTimeoutMs")]
    pub lost_timeout_ms: u64,

    /// How often the watchdog checks scan liveness.
    #[serde(default = "defaults::watchdog_check_interval", rename = "watchdogCheckIntervalMs")]
    pub watchdog_check_interval_ms: u64,

    /// Scan silence that triggers a pipeline restart.
    #[serde(default = "defaults::watchdog_timeout", rename = "watchdogTimeoutMs")]
    pub watchdog_timeout_ms: u64,

    /// Delay before the first target fetch.
    #[serde(default = "defaults::refresh_initial_delay", rename = "refreshInitialDelayMs")]
    pub refresh_initial_delay_ms: u64,

    /// Delay before each retry of the target fetch.
    #[serde(default = "defaults::refresh_retry_delay", rename = "refreshRetryDelayMs")]
    pub refresh_retry_delay_ms: u64,

    /// Total fetch attempts before falling back to cached targets.
    #[serde(default = "defaults::refresh_max_attempts")]
    pub refresh_max_attempts: u32,

    /// IANA timezone for gateway timestamps and the daily cap.
    #[serde(default = "defaults::timezone")]
    #[schema(example = "Asia/Kuala_Lumpur")]
    pub timezone: String,

    /// Stable device id; a persisted random id is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

mod defaults {
    pub const fn rssi_threshold() -> i32 {
        super::DEFAULT_RSSI_THRESHOLD
    }
    pub const fn time_threshold() -> u32 {
        super::DEFAULT_TIME_THRESHOLD_SECS
    }
    pub const fn scan_period() -> u64 {
        super::DEFAULT_SCAN_PERIOD_MS
    }
    pub const fn between_scan_period() -> u64 {
        super::DEFAULT_BETWEEN_SCAN_PERIOD_MS
    }
    pub const fn notification_cooldown() -> u64 {
        super::DEFAULT_NOTIFICATION_COOLDOWN_MS
    }
    pub const fn max_notifications() -> u32 {
        super::DEFAULT_MAX_NOTIFICATIONS
    }
    pub const fn lost_timeout() -> u64 {
        super::DEFAULT_LOST_TIMEOUT_MS
    }
    pub const fn watchdog_check_interval() -> u64 {
        60_000
    }
    pub const fn watchdog_timeout() -> u64 {
        120_000
    }
    pub const fn refresh_initial_delay() -> u64 {
        2_000
    }
    pub const fn refresh_retry_delay() -> u64 {
        5_000
    }
    pub const fn refresh_max_attempts() -> u32 {
        4
    }
    pub fn timezone() -> String {
        super::DEFAULT_TIMEZONE.to_string()
    }
}

impl EngineConfig {
    /// Build a configuration with every optional field at its default.
    #[must_use]
    pub fn new(
        gateway_url: impl Into<String>,
        data_url: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            gateway_url: gateway_url.into(),
            data_url: data_url.into(),
            user_id: user_id.into(),
            rssi_threshold: defaults::rssi_threshold(),
            time_threshold_secs: defaults::time_threshold(),
            scan_period_ms: defaults::scan_period(),
            between_scan_period_ms: defaults::between_scan_period(),
            background_scan_period_ms: defaults::scan_period(),
            background_between_scan_period_ms: defaults::between_scan_period(),
            notification_cooldown_ms: defaults::notification_cooldown(),
            max_notifications: defaults::max_notifications(),
            lost_timeout_ms: defaults::lost_timeout(),
            watchdog_check_interval_ms: defaults::watchdog_check_interval(),
            watchdog_timeout_ms: defaults::watchdog_timeout(),
            refresh_initial_delay_ms: defaults::refresh_initial_delay(),
            refresh_retry_delay_ms: defaults::refresh_retry_delay(),
            refresh_max_attempts: defaults::refresh_max_attempts(),
            timezone: defaults::timezone(),
            device_id: None,
        }
    }

    /// Load and validate a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable, malformed, or
    /// fails validation.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate the persisted JSON form.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or fails validation.
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to the persisted JSON form.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_string(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Validate every field, reporting all problems at once.
    ///
    /// # Errors
    ///
    /// Returns a single [`ConfigError::ValidationError`] or
    /// [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if !is_valid_http_url(&self.gateway_url) {
            errors.push(ConfigError::invalid(
                "gatewayUrl",
                format!("'{}' is not an http(s) URL", self.gateway_url),
            ));
        }
        if !is_valid_http_url(&self.data_url) {
            errors.push(ConfigError::invalid(
                "dataUrl",
                format!("'{}' is not an http(s) URL", self.data_url),
            ));
        }
        if self.user_id.trim().is_empty() {
            errors.push(ConfigError::invalid("userId", "must not be blank"));
        }
        if !RSSI_THRESHOLD_RANGE.contains(&self.rssi_threshold) {
            errors.push(ConfigError::invalid(
                "rssiThreshold",
                format!(
                    "must be between {} and {} dBm",
                    RSSI_THRESHOLD_RANGE.start(),
                    RSSI_THRESHOLD_RANGE.end()
                ),
            ));
        }
        if self.time_threshold_secs > MAX_TIME_THRESHOLD_SECS {
            errors.push(ConfigError::invalid(
                "timeThreshold",
                format!("must be at most {MAX_TIME_THRESHOLD_SECS} seconds"),
            ));
        }
        for (field, value) in [
            ("scanPeriod", self.scan_period_ms),
            ("backgroundScanPeriod", self.background_scan_period_ms),
            ("lostTimeoutMs", self.lost_timeout_ms),
            ("watchdogCheckIntervalMs", self.watchdog_check_interval_ms),
            ("watchdogTimeoutMs", self.watchdog_timeout_ms),
        ] {
            if value == 0 {
                errors.push(ConfigError::invalid(field, "must be greater than zero"));
            }
        }
        if !(1..=MAX_REFRESH_ATTEMPTS).contains(&self.refresh_max_attempts) {
            errors.push(ConfigError::invalid(
                "refreshMaxAttempts",
                format!("must be between 1 and {MAX_REFRESH_ATTEMPTS}"),
            ));
        }
        if self.timezone.parse::<Tz>().is_err() {
            errors.push(ConfigError::invalid(
                "timezone",
                format!("unknown timezone '{}'", self.timezone),
            ));
        }
        if self.device_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            errors.push(ConfigError::invalid("deviceId", "must not be blank when set"));
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Parsed timezone, falling back to UTC if the field is invalid.
    #[must_use]
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or(chrono_tz::UTC)
    }

    /// Dwell time in milliseconds.
    #[must_use]
    pub fn time_threshold_ms(&self) -> i64 {
        i64::from(self.time_threshold_secs) * 1_000
    }

    /// Scan cadence for the platform scanner.
    #[must_use]
    pub const fn scan_periods(&self) -> ScanPeriods {
        ScanPeriods {
            foreground_scan: Duration::from_millis(self.scan_period_ms),
            foreground_between_scan: Duration::from_millis(self.between_scan_period_ms),
            background_scan: Duration::from_millis(self.background_scan_period_ms),
            background_between_scan: Duration::from_millis(self.background_between_scan_period_ms),
        }
    }
}

/// Returns `true` if `value` parses as an absolute http or https URL with a host.
#[must_use]
pub fn is_valid_http_url(value: &str) -> bool {
    Url::parse(value.trim())
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host().is_some())
        .unwrap_or(false)
}
