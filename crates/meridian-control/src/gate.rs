//! Strict validation gate.
//!
//! Runs before deployability is evaluated. A release that declares strict
//! validation checks and is still waiting on them holds the deploy request
//! until the validation subsystem reports back, the caller gives up, or the
//! configured deadline passes.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::AdmissionConfig;
use crate::error::{ControlError, ControlResult, StepContext};
use crate::store::ReleaseStore;
use crate::types::{DownstreamKey, ReleaseStatus};
use crate::validation::ValidationState;

/// Cause reported when a strict check has failed.
pub const STRICT_CHECK_FAILED_CAUSE: &str =
    "Unable to deploy as a strict validation check has failed.";

/// Shortest interval between status reads while waiting.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of the validation gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Validation does not prevent the deploy.
    Admitted,
    /// A strict check failed.
    Blocked {
        /// Human-readable cause.
        cause: String,
    },
}

/// Waits on and decides strict validation for a release.
pub struct ValidationGate {
    store: Arc<dyn ReleaseStore>,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl ValidationGate {
    /// Create a gate with the default two second poll interval and no deadline.
    #[must_use]
    pub fn new(store: Arc<dyn ReleaseStore>) -> Self {
        Self::from_config(store, &AdmissionConfig::default())
    }

    /// Create a gate from admission configuration.
    #[must_use]
    pub fn from_config(store: Arc<dyn ReleaseStore>, config: &AdmissionConfig) -> Self {
        Self {
            store,
            poll_interval: config.poll_interval().max(MIN_POLL_INTERVAL),
            timeout: config.validation_timeout(),
        }
    }

    /// Set how often the release status is re-read while waiting.
    ///
    /// Intervals below [`MIN_POLL_INTERVAL`] are raised to it.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    /// Set how long to wait for validation before giving up.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Decide whether strict validation allows deploying `sequence`.
    ///
    /// If strict checks are declared, not skipped, and still running, this
    /// waits until the release leaves `pending_validation`. The wait ends
    /// early with [`ControlError::ValidationWaitCancelled`] when `cancel`
    /// fires and [`ControlError::ValidationWaitTimedOut`] when the configured
    /// deadline passes.
    pub async fn admit_if_validated(
        &self,
        key: &DownstreamKey,
        sequence: i64,
        cancel: &CancellationToken,
    ) -> ControlResult<GateDecision> {
        let mut state = self.read_state(key, sequence).await?;

        if !state.has_strict_checks {
            return Ok(GateDecision::Admitted);
        }

        if state.must_wait() {
            info!(
                app = %key.app_id,
                downstream = %key.downstream_id,
                sequence,
                "waiting for strict validation to finish"
            );
            self.wait_for_validation(key, sequence, cancel).await?;
            state = self.read_state(key, sequence).await?;
        }

        if state.strict_failure() {
            return Ok(GateDecision::Blocked {
                cause: STRICT_CHECK_FAILED_CAUSE.to_owned(),
            });
        }

        Ok(GateDecision::Admitted)
    }

    async fn read_state(&self, key: &DownstreamKey, sequence: i64) -> ControlResult<ValidationState> {
        self.store
            .get_validation_state(key, sequence)
            .await
            .and_then(|state| state.ok_or_else(|| ControlError::release_not_found(key, sequence)))
            .step("read validation state")
    }

    async fn wait_for_validation(
        &self,
        key: &DownstreamKey,
        sequence: i64,
        cancel: &CancellationToken,
    ) -> ControlResult<()> {
        let started = Instant::now();
        let deadline = self.timeout.map(|timeout| started + timeout);

        loop {
            let status = self
                .store
                .get_status(key, sequence)
                .await
                .and_then(|s| s.ok_or_else(|| ControlError::release_not_found(key, sequence)))
                .step("poll status")?;

            if status != ReleaseStatus::PendingValidation {
                info!(sequence, status = %status, "strict validation finished");
                return Ok(());
            }

            debug!(sequence, interval = ?self.poll_interval, "validation still pending");

            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(ControlError::ValidationWaitCancelled { sequence });
                }
                () = sleep_until_deadline(deadline) => {
                    return Err(ControlError::ValidationWaitTimedOut {
                        sequence,
                        waited: started.elapsed(),
                    });
                }
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl std::fmt::Debug for ValidationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationGate")
            .field("poll_interval", &self.poll_interval)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
