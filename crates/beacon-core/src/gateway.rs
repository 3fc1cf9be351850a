//! Remote gateway collaborator.
//!
//! The gateway serves the authoritative target list and receives detection
//! and lifecycle reports. [`HttpGateway`] speaks the JSON wire format over
//! `reqwest`; hosts and tests may substitute any other [`Gateway`].
//!
//! Wire format:
//!
//! - `GET dataUrl` returns `{"data":[{"beacon_mac"|"beacon_uuid": id, "location_name": name}]}`
//! - `POST gatewayUrl` with `{"type":"beacon_detection", ...}` returns
//!   `{"trigger_noti": bool, "params": {...}}`
//! - `POST gatewayUrl` with `{"type":"gateway_event", ...}` (response ignored)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use chrono_tz::Tz;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::config::EngineConfig;
use crate::types::{DeviceInfo, Target, TargetId};

/// Per-request timeout for gateway calls.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Name used for fetched entries without a `location_name`.
pub const UNKNOWN_BEACON_NAME: &str = "Unknown Beacon";

/// Gateway timestamp layout.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ============================================================================
// Error Types
// ============================================================================

/// Errors from gateway calls.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A configured URL did not parse.
    #[error("Invalid gateway URL '{0}'")]
    InvalidUrl(String),

    /// The request never produced a response.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The gateway answered with a non-success status.
    #[error("Gateway returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// The response body did not match the expected shape.
    #[error("Unexpected gateway response: {0}")]
    Decode(String),
}

/// Result alias for gateway calls.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

// ============================================================================
// Wire types
// ============================================================================

/// One detection to report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionReport {
    /// Detected target.
    pub target: TargetId,
    /// Smoothed strength.
    pub rssi: i32,
    /// Battery percentage, when known.
    pub battery: Option<u8>,
    /// `false` when replayed from the offline queue.
    pub is_initial: bool,
    /// Detection time in milliseconds.
    pub timestamp_ms: i64,
}

/// Gateway verdict on a detection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayResponse {
    /// Whether the host should be notified.
    #[serde(default)]
    pub trigger_noti: bool,
    /// Extra data for the notification.
    #[serde(default)]
    pub params: Value,
}

/// Lifecycle events reported to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayEventKind {
    /// Scanning began.
    ScanStarted,
    /// Scanning ended.
    ScanStopped,
    /// Scanning could not start.
    ScanError,
    /// A detection was confirmed.
    BeaconDetected,
}

impl GatewayEventKind {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ScanStarted => "SCAN_STARTED",
            Self::ScanStopped => "SCAN_STOPPED",
            Self::ScanError => "SCAN_ERROR",
            Self::BeaconDetected => "BEACON_DETECTED",
        }
    }
}

/// Standard `details` object for lifecycle events.
#[must_use]
pub fn device_details(device: &DeviceInfo) -> Value {
    json!({
        "device_model": device.device_model,
        "os_version": device.os_version,
    })
}

#[derive(Debug, Deserialize)]
struct TargetListResponse {
    #[serde(default)]
    data: Vec<RemoteTarget>,
}

#[derive(Debug, Deserialize)]
struct RemoteTarget {
    beacon_mac: Option<String>,
    beacon_uuid: Option<String>,
    location_name: Option<String>,
}

/// Format `timestamp_ms` as local wall time in `tz`.
#[must_use]
pub fn format_timestamp(timestamp_ms: i64, tz: Tz) -> String {
    DateTime::from_timestamp_millis(timestamp_ms)
        .map(|utc| utc.with_timezone(&tz).format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_default()
}

// ============================================================================
// Traits
// ============================================================================

/// Remote attendance gateway.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Fetch the authoritative target list.
    async fn fetch_targets(&self) -> GatewayResult<Vec<Target>>;

    /// Report a confirmed detection.
    async fn report_detection(&self, report: &DetectionReport) -> GatewayResult<GatewayResponse>;

    /// Report a lifecycle event.
    async fn report_event(&self, kind: GatewayEventKind, details: Value) -> GatewayResult<()>;
}

/// Builds a [`Gateway`] for a configuration.
///
/// The engine rebuilds its gateway on every configure, since URLs and the
/// reporting identity come from the configuration.
pub trait GatewayFactory: Send + Sync {
    /// Create a gateway for `config`, reporting as `phone_id`.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvalidUrl`] or client construction failures.
    fn build(&self, config: &EngineConfig, phone_id: &str) -> GatewayResult<Arc<dyn Gateway>>;
}

/// Factory producing [`HttpGateway`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpGatewayFactory;

impl GatewayFactory for HttpGatewayFactory {
    fn build(&self, config: &EngineConfig, phone_id: &str) -> GatewayResult<Arc<dyn Gateway>> {
        Ok(Arc::new(HttpGateway::new(config, phone_id)?))
    }
}

/// Factory that always hands out the same gateway.
#[derive(Clone)]
pub struct FixedGatewayFactory(pub Arc<dyn Gateway>);

impl GatewayFactory for FixedGatewayFactory {
    fn build(&self, _config: &EngineConfig, _phone_id: &str) -> GatewayResult<Arc<dyn Gateway>> {
        Ok(Arc::clone(&self.0))
    }
}

// ============================================================================
// HTTP implementation
// ============================================================================

/// JSON-over-HTTP gateway client.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    gateway_url: Url,
    data_url: Url,
    user_id: String,
    phone_id: String,
    tz: Tz,
}

fn parse_url(raw: &str) -> GatewayResult<Url> {
    Url::parse(raw.trim()).map_err(|_| GatewayError::InvalidUrl(raw.to_string()))
}

impl HttpGateway {
    /// Create a client for `config`.
    ///
    /// # Errors
    ///
    /// Returns an error when a URL does not parse or the HTTP client cannot
    /// be built.
    pub fn new(config: &EngineConfig, phone_id: &str) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("beacon-core/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            gateway_url: parse_url(&config.gateway_url)?,
            data_url: parse_url(&config.data_url)?,
            user_id: config.user_id.clone(),
            phone_id: phone_id.to_string(),
            tz: config.tz(),
        })
    }

    async fn post(&self, body: &Value) -> GatewayResult<String> {
        let kind = body.get("type").and_then(Value::as_str).unwrap_or("unknown");
        debug!(
            kind,
            url = %self.gateway_url,
            "Posting to gateway"
        );
        let response = self
            .client
            .post(self.gateway_url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if status.is_success() {
            Ok(text)
        } else {
            Err(GatewayError::Status {
                status: status.as_u16(),
                body: text,
            })
        }
    }

    fn now_stamp(&self) -> String {
        format_timestamp(chrono::Utc::now().timestamp_millis(), self.tz)
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn fetch_targets(&self) -> GatewayResult<Vec<Target>> {
        let response = self
            .client
            .get(self.data_url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await?;
        let parsed: TargetListResponse =
            serde_json::from_str(&text).map_err(|e| GatewayError::Decode(e.to_string()))?;

        let targets: Vec<Target> = parsed
            .data
            .into_iter()
            .filter_map(|remote| {
                let Some(raw_id) = remote.beacon_mac.or(remote.beacon_uuid) else {
                    warn!("Fetched entry without beacon id skipped");
                    return None;
                };
                let id = TargetId::new(&raw_id);
                if id.as_str().is_empty() {
                    return None;
                }
                Some(Target {
                    id,
                    name: remote
                        .location_name
                        .unwrap_or_else(|| UNKNOWN_BEACON_NAME.to_string()),
                })
            })
            .collect();

        debug!(count = targets.len(), "Fetched targets from gateway");
        Ok(targets)
    }

    async fn report_detection(&self, report: &DetectionReport) -> GatewayResult<GatewayResponse> {
        let body = json!({
            "type": "beacon_detection",
            "user_id": self.user_id,
            "phone_id": self.phone_id,
            "beacon_mac": report.target.as_str(),
            "rssi": report.rssi,
            "battery": report.battery,
            "is_initial": report.is_initial,
            "timestamp": format_timestamp(report.timestamp_ms, self.tz),
        });
        let text = self.post(&body).await?;
        if text.trim().is_empty() {
            return Err(GatewayError::Decode("empty response".into()));
        }
        serde_json::from_str(&text).map_err(|e| GatewayError::Decode(e.to_string()))
    }

    async fn report_event(&self, kind: GatewayEventKind, details: Value) -> GatewayResult<()> {
        let body = json!({
            "type": "gateway_event",
            "event_type": kind.as_str(),
            "user_id": self.user_id,
            "phone_id": self.phone_id,
            "details": details,
            "timestamp": self.now_stamp(),
        });
        self.post(&body).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway_for(server: &MockServer) -> HttpGateway {
        let config = EngineConfig::new(
            format!("{}/gateway", server.uri()),
            format!("{}/beacons", server.uri()),
            "staff-7",
        );
        HttpGateway::new(&config, "phone-1").unwrap()
    }

    #[test]
    fn test_format_timestamp_uses_timezone() {
        // 2025-01-15T00:00:00Z is 08:00 in Kuala Lumpur.
        assert_eq!(
            format_timestamp(1_736_899_200_000, chrono_tz::Asia::Kuala_Lumpur),
            "2025-01-15 08:00:00"
        );
        assert_eq!(
            format_timestamp(1_736_899_200_000, chrono_tz::UTC),
            "2025-01-15 00:00:00"
        );
    }

    #[tokio::test]
    async fn test_fetch_targets_accepts_mac_and_uuid_keys() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/beacons"))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"beacon_mac": "aa:bb:cc:dd:ee:ff", "location_name": "Lobby"},
                    {"beacon_uuid": "fda50693-a4e2-4fb1-afcf-c6eb07647825:1:2", "location_name": "Dock"},
                    {"location_name": "Orphan"},
                    {"beacon_mac": "11:22:33:44:55:66"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let targets = gateway_for(&server).fetch_targets().await.unwrap();
        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0].id.as_str(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(targets[1].id.as_str(), "FDA50693-A4E2-4FB1-AFCF-C6EB07647825:1:2");
        assert_eq!(targets[1].name, "Dock");
        assert_eq!(targets[2].name, UNKNOWN_BEACON_NAME);
    }

    #[tokio::test]
    async fn test_fetch_targets_non_200_is_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = gateway_for(&server).fetch_targets().await.unwrap_err();
        assert!(matches!(err, GatewayError::Status { status: 503, ref body } if body == "maintenance"));
    }

    #[tokio::test]
    async fn test_fetch_targets_rejects_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = gateway_for(&server).fetch_targets().await.unwrap_err();
        assert!(matches!(err, GatewayError::Decode(_)));
    }

    #[tokio::test]
    async fn test_report_detection_wire_format() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gateway"))
            .and(body_partial_json(json!({
                "type": "beacon_detection",
                "user_id": "staff-7",
                "phone_id": "phone-1",
                "beacon_mac": "AA:BB",
                "rssi": -80,
                "battery": 55,
                "is_initial": true,
                "timestamp": "2025-01-15 08:00:00"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "trigger_noti": true,
                "params": {"loc": "Lobby", "shift": "morning"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = gateway_for(&server)
            .report_detection(&DetectionReport {
                target: TargetId::new("aa:bb"),
                rssi: -80,
                battery: Some(55),
                is_initial: true,
                timestamp_ms: 1_736_899_200_000,
            })
            .await
            .unwrap();
        assert!(response.trigger_noti);
        assert_eq!(response.params["loc"], "Lobby");
    }

    #[tokio::test]
    async fn test_report_detection_missing_trigger_defaults_false() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let response = gateway_for(&server)
            .report_detection(&DetectionReport {
                target: TargetId::new("aa"),
                rssi: -70,
                battery: None,
                is_initial: false,
                timestamp_ms: 0,
            })
            .await
            .unwrap();
        assert!(!response.trigger_noti);
    }

    #[tokio::test]
    async fn test_report_event_wire_format() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "type": "gateway_event",
                "event_type": "SCAN_STARTED",
                "details": {"device_model": "pi", "os_version": "linux"}
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let device = DeviceInfo {
            device_model: "pi".into(),
            os_version: "linux".into(),
        };
        gateway_for(&server)
            .report_event(GatewayEventKind::ScanStarted, device_details(&device))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_report_event_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = gateway_for(&server)
            .report_event(GatewayEventKind::ScanStopped, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Status { status: 500, .. }));
    }

    #[test]
    fn test_invalid_url_rejected() {
        let config = EngineConfig::new("not a url", "http://ok.local", "u");
        assert!(matches!(
            HttpGateway::new(&config, "p"),
            Err(GatewayError::InvalidUrl(_))
        ));
    }
}
