//! Remote target refresh with bounded retry.
//!
//! The first attempt waits a short settle delay; every later attempt waits
//! the longer retry delay. A fetch that fails or returns an empty list counts
//! as a failed attempt. When attempts run out the caller keeps whatever
//! targets it already had.

use std::time::Duration;

use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::gateway::Gateway;
use crate::types::Target;

/// Delays and attempt budget for [`fetch_with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Wait before the first attempt.
    pub initial_delay: Duration,
    /// Wait before each later attempt.
    pub retry_delay: Duration,
    /// Total attempts, at least one.
    pub max_attempts: u32,
}

impl RefreshPolicy {
    /// Policy from engine configuration.
    #[must_use]
    pub const fn from_config(config: &EngineConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.refresh_initial_delay_ms),
            retry_delay: Duration::from_millis(config.refresh_retry_delay_ms),
            max_attempts: config.refresh_max_attempts,
        }
    }

    /// Delay before zero-based `attempt`.
    #[must_use]
    pub const fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            self.initial_delay
        } else {
            self.retry_delay
        }
    }
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            retry_delay: Duration::from_secs(5),
            max_attempts: 4,
        }
    }
}

/// How a refresh ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A non-empty list was fetched.
    Fetched {
        /// Authoritative targets.
        targets: Vec<Target>,
        /// Attempts used, one-based.
        attempts: u32,
    },
    /// Every attempt failed or came back empty.
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Last transport or decode error, if any attempt errored.
        last_error: Option<String>,
    },
}

/// Fetch targets from `gateway`, retrying per `policy`.
pub async fn fetch_with_retry(gateway: &dyn Gateway, policy: RefreshPolicy) -> RefreshOutcome {
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 0..max_attempts {
        let delay = policy.delay_for(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        info!(attempt = attempt + 1, max_attempts, "Fetching targets");
        match gateway.fetch_targets().await {
            Ok(targets) if !targets.is_empty() => {
                info!(count = targets.len(), attempt = attempt + 1, "Targets fetched");
                return RefreshOutcome::Fetched {
                    targets,
                    attempts: attempt + 1,
                };
            }
            Ok(_) => {
                warn!(attempt = attempt + 1, "Gateway returned no targets");
            }
            Err(e) => {
                warn!(attempt = attempt + 1, error = %e, "Target fetch failed");
                last_error = Some(e.to_string());
            }
        }
    }

    warn!(attempts = max_attempts, "Target refresh gave up, keeping cached targets");
    RefreshOutcome::Exhausted {
        attempts: max_attempts,
        last_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{
        DetectionReport, GatewayError, GatewayEventKind, GatewayResponse, GatewayResult,
    };
    use crate::types::TargetId;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    struct ScriptedFetch {
        replies: Mutex<VecDeque<GatewayResult<Vec<Target>>>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedFetch {
        fn new(replies: Vec<GatewayResult<Vec<Target>>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Gateway for ScriptedFetch {
        async fn fetch_targets(&self) -> GatewayResult<Vec<Target>> {
            self.calls.lock().unwrap().push(Instant::now());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn report_detection(&self, _: &DetectionReport) -> GatewayResult<GatewayResponse> {
            Ok(GatewayResponse::default())
        }

        async fn report_event(&self, _: GatewayEventKind, _: serde_json::Value) -> GatewayResult<()> {
            Ok(())
        }
    }

    fn lobby() -> Vec<Target> {
        vec![Target {
            id: TargetId::new("aa:bb"),
            name: "Lobby".into(),
        }]
    }

    #[test]
    fn test_delay_schedule() {
        let policy = RefreshPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(3), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_failures_follows_backoff() {
        let gateway = ScriptedFetch::new(vec![
            Err(GatewayError::Decode("bad".into())),
            Ok(Vec::new()),
            Ok(lobby()),
        ]);
        let start = Instant::now();

        let outcome = fetch_with_retry(&gateway, RefreshPolicy::default()).await;

        assert_eq!(
            outcome,
            RefreshOutcome::Fetched {
                targets: lobby(),
                attempts: 3
            }
        );
        let calls = gateway.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0] - start, Duration::from_secs(2));
        assert_eq!(calls[1] - start, Duration::from_secs(7));
        assert_eq!(calls[2] - start, Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_last_error() {
        let gateway = ScriptedFetch::new(vec![
            Ok(Vec::new()),
            Err(GatewayError::Status {
                status: 502,
                body: String::new(),
            }),
        ]);

        let outcome = fetch_with_retry(&gateway, RefreshPolicy::default()).await;

        match outcome {
            RefreshOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 4);
                assert!(last_error.unwrap().contains("502"));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(gateway.calls.lock().unwrap().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_tries_once() {
        let gateway = ScriptedFetch::new(vec![Ok(lobby())]);
        let policy = RefreshPolicy {
            max_attempts: 0,
            ..RefreshPolicy::default()
        };
        assert!(matches!(
            fetch_with_retry(&gateway, policy).await,
            RefreshOutcome::Fetched { attempts: 1, .. }
        ));
    }
}
