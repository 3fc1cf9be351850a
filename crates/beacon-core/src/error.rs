//! Unified error types for the beacon core library.
//!
//! This module provides a unified error type [`BeaconError`] that covers all failure
//! modes across the engine. Each module also has its own specific error type
//! (`ConfigError`, `GatewayError`, `PlatformError`, `StorageError`,
//! `DetectionError`) for internal use.
//!
//! # Design Principles
//!
//! - **Specific variants**: Each error variant captures exactly one failure mode
//! - **Actionable messages**: Error messages guide users toward resolution
//! - **Diagnostic-ready**: Every variant maps to a stable numeric code that is
//!   recorded in the diagnostics snapshot
//! - **HTTP-ready**: Error types include HTTP status codes and error codes
//!
//! # Example
//!
//! ```rust
//! use beacon_core::error::{BeaconError, Result};
//!
//! fn require_user(user_id: &str) -> Result<()> {
//!     if user_id.trim().is_empty() {
//!         return Err(BeaconError::ConfigurationInvalid("userId: must not be blank".into()));
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// The unified error type for all engine operations.
///
/// Variants follow the engine's failure taxonomy. Each one is:
///
/// 1. **Self-descriptive**: The variant name indicates the failure mode
/// 2. **Contextual**: Variants include relevant data for debugging
/// 3. **Actionable**: Error messages suggest how to resolve the issue
#[derive(Debug, Error)]
pub enum BeaconError {
    // =========================================================================
    // LIFECYCLE ERRORS
    // =========================================================================
    /// Platform resources could not be acquired during initialization.
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// The supplied configuration is malformed or incomplete.
    #[error("Configuration invalid: {0}")]
    ConfigurationInvalid(String),

    /// A caller-supplied argument was rejected.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Monitoring was requested before a successful configure.
    #[error("Monitoring not started: {0}")]
    MonitoringNotStarted(String),

    // =========================================================================
    // RUNTIME ERRORS
    // =========================================================================
    /// A sample could not be processed by the detection engine.
    #[error("Detection engine error: {0}")]
    DetectionEngine(String),

    /// The platform scan service failed.
    #[error("Platform scan error: {0}. Check that the radio is powered on and permitted.")]
    PlatformScan(String),

    /// A remote fetch or report failed.
    #[error("Network error: {0}")]
    Network(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// Persisted state could not be read or written.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for engine operations.
pub type Result<T> = std::result::Result<T, BeaconError>;

/// Numeric diagnostic codes recorded in the diagnostics snapshot.
pub mod codes {
    /// Resource acquisition failed.
    pub const INITIALIZATION_FAILED: u16 = 1001;
    /// Configuration malformed or missing.
    pub const CONFIGURATION_INVALID: u16 = 1002;
    /// Bad caller input.
    pub const INPUT_ERROR: u16 = 1003;
    /// Start without configure.
    pub const MONITORING_NOT_STARTED: u16 = 2001;
    /// Sample processing failure.
    pub const DETECTION_ENGINE_ERROR: u16 = 2002;
    /// Platform scan failure.
    pub const PLATFORM_SCAN_ERROR: u16 = 3001;
    /// Remote fetch/report failure.
    pub const NETWORK_ERROR: u16 = 3002;
    /// Persistence failure.
    pub const STORAGE_ERROR: u16 = 3003;
}

impl BeaconError {
    /// Returns `true` if this error is related to configuration or input.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::ConfigurationInvalid(_) | Self::InvalidInput(_))
    }

    /// Returns `true` if this error came from a remote collaborator.
    #[inline]
    #[must_use]
    pub const fn is_network_error(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub const fn is_io_error(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Io(_))
    }

    /// Returns `true` if the state machine refused the call.
    #[inline]
    #[must_use]
    pub const fn is_lifecycle_error(&self) -> bool {
        matches!(
            self,
            Self::InitializationFailed(_) | Self::MonitoringNotStarted(_)
        )
    }

    /// Returns `true` if this error is likely recoverable without user intervention.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::PlatformScan(_) | Self::DetectionEngine(_)
        )
    }

    /// Returns the numeric code recorded in the diagnostics snapshot.
    #[inline]
    #[must_use]
    pub const fn diagnostic_code(&self) -> u16 {
        match self {
            Self::InitializationFailed(_) => codes::INITIALIZATION_FAILED,
            Self::ConfigurationInvalid(_) => codes::CONFIGURATION_INVALID,
            Self::InvalidInput(_) => codes::INPUT_ERROR,
            Self::MonitoringNotStarted(_) => codes::MONITORING_NOT_STARTED,
            Self::DetectionEngine(_) => codes::DETECTION_ENGINE_ERROR,
            Self::PlatformScan(_) => codes::PLATFORM_SCAN_ERROR,
            Self::Network(_) => codes::NETWORK_ERROR,
            Self::Storage(_) | Self::Io(_) => codes::STORAGE_ERROR,
        }
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - malformed input
            Self::InvalidInput(_) => 400,

            // 409 Conflict - refused in the current lifecycle state
            Self::MonitoringNotStarted(_) => 409,

            // 422 Unprocessable Entity - semantic errors
            Self::ConfigurationInvalid(_) | Self::DetectionEngine(_) => 422,

            // 500 Internal Server Error - server-side issues
            Self::InitializationFailed(_) | Self::Storage(_) | Self::Io(_) => 500,

            // 502 Bad Gateway - upstream failure
            Self::Network(_) => 502,

            // 503 Service Unavailable - radio issues
            Self::PlatformScan(_) => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InitializationFailed(_) => "INITIALIZATION_FAILED",
            Self::ConfigurationInvalid(_) => "CONFIGURATION_INVALID",
            Self::InvalidInput(_) => "INPUT_ERROR",
            Self::MonitoringNotStarted(_) => "MONITORING_NOT_STARTED",
            Self::DetectionEngine(_) => "DETECTION_ENGINE_ERROR",
            Self::PlatformScan(_) => "PLATFORM_SCAN_ERROR",
            Self::Network(_) => "NETWORK_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for BeaconError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => {
                Self::ConfigurationInvalid(format!("configuration file not found: {path}"))
            }
            ConfigError::ReadError { path, source } => {
                Self::Storage(format!("Failed to read {path}: {source}"))
            }
            ConfigError::ParseError(e) => Self::ConfigurationInvalid(e.to_string()),
            ConfigError::JsonError(e) => Self::ConfigurationInvalid(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigurationInvalid(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigurationInvalid(messages.join("; "))
            }
        }
    }
}

impl From<crate::gateway::GatewayError> for BeaconError {
    fn from(err: crate::gateway::GatewayError) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<crate::platform::PlatformError> for BeaconError {
    fn from(err: crate::platform::PlatformError) -> Self {
        use crate::platform::PlatformError;
        match err {
            PlatformError::ResourceUnavailable(message) => Self::InitializationFailed(message),
            other => Self::PlatformScan(other.to_string()),
        }
    }
}

impl From<crate::storage::StorageError> for BeaconError {
    fn from(err: crate::storage::StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<crate::detection::DetectionError> for BeaconError {
    fn from(err: crate::detection::DetectionError) -> Self {
        Self::DetectionEngine(err.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoErr, ErrorKind};

    #[test]
    fn test_config_error_classification() {
        assert!(BeaconError::ConfigurationInvalid("x".into()).is_config_error());
        assert!(BeaconError::InvalidInput("x".into()).is_config_error());
        assert!(!BeaconError::Network("x".into()).is_config_error());
    }

    #[test]
    fn test_io_error_classification() {
        assert!(BeaconError::Storage("disk full".into()).is_io_error());
        assert!(BeaconError::Io(IoErr::new(ErrorKind::NotFound, "test")).is_io_error());
        assert!(!BeaconError::PlatformScan("off".into()).is_io_error());
    }

    #[test]
    fn test_lifecycle_and_recoverable() {
        assert!(BeaconError::MonitoringNotStarted("x".into()).is_lifecycle_error());
        assert!(BeaconError::InitializationFailed("x".into()).is_lifecycle_error());
        assert!(BeaconError::Network("timeout".into()).is_recoverable());
        assert!(BeaconError::PlatformScan("busy".into()).is_recoverable());
        assert!(!BeaconError::ConfigurationInvalid("x".into()).is_recoverable());
    }

    #[test]
    fn test_diagnostic_codes() {
        assert_eq!(BeaconError::InitializationFailed("x".into()).diagnostic_code(), 1001);
        assert_eq!(BeaconError::ConfigurationInvalid("x".into()).diagnostic_code(), 1002);
        assert_eq!(BeaconError::InvalidInput("x".into()).diagnostic_code(), 1003);
        assert_eq!(BeaconError::MonitoringNotStarted("x".into()).diagnostic_code(), 2001);
        assert_eq!(BeaconError::DetectionEngine("x".into()).diagnostic_code(), 2002);
        assert_eq!(BeaconError::PlatformScan("x".into()).diagnostic_code(), 3001);
        assert_eq!(BeaconError::Network("x".into()).diagnostic_code(), 3002);
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(BeaconError::InvalidInput("bad".into()).http_status_code(), 400);
        assert_eq!(BeaconError::MonitoringNotStarted("x".into()).http_status_code(), 409);
        assert_eq!(BeaconError::ConfigurationInvalid("x".into()).http_status_code(), 422);
        assert_eq!(BeaconError::Storage("x".into()).http_status_code(), 500);
        assert_eq!(BeaconError::Network("x".into()).http_status_code(), 502);
        assert_eq!(BeaconError::PlatformScan("x".into()).http_status_code(), 503);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(BeaconError::InvalidInput("x".into()).error_code(), "INPUT_ERROR");
        assert_eq!(
            BeaconError::MonitoringNotStarted("x".into()).error_code(),
            "MONITORING_NOT_STARTED"
        );
    }

    #[test]
    fn test_from_config_validation_error() {
        let err = crate::config::ConfigError::ValidationError {
            field: "userId".into(),
            message: "must not be blank".into(),
        };
        let beacon: BeaconError = err.into();
        assert!(matches!(beacon, BeaconError::ConfigurationInvalid(ref m) if m.contains("userId")));
    }

    #[test]
    fn test_from_platform_error() {
        let unavailable: BeaconError =
            crate::platform::PlatformError::ResourceUnavailable("no adapter".into()).into();
        assert!(matches!(unavailable, BeaconError::InitializationFailed(_)));

        let failed: BeaconError =
            crate::platform::PlatformError::ScanFailed("radio off".into()).into();
        assert!(matches!(failed, BeaconError::PlatformScan(_)));
    }

    #[test]
    fn test_error_display_messages() {
        let err = BeaconError::PlatformScan("adapter busy".into());
        assert!(format!("{err}").contains("adapter busy"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<BeaconError>();
        assert_sync::<BeaconError>();
    }
}
