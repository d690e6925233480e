//! Error types for meridian-control.
//!
//! Admission outcomes (blocked by validation, blocked by required releases)
//! are not errors; they are returned as values. Everything here is an
//! infrastructure failure or an abandoned wait.

use std::time::Duration;

/// Result type alias using [`ControlError`].
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors that can occur in the control plane.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A lower-level failure wrapped with the step that was being performed.
    #[error("failed to {step}: {source}")]
    Step {
        /// Step being performed, e.g. "read history".
        step: &'static str,
        /// Underlying failure.
        #[source]
        source: Box<ControlError>,
    },

    /// Application not found.
    #[error("application not found: {0}")]
    ApplicationNotFound(String),

    /// Downstream not found.
    #[error("downstream not found: {0}")]
    DownstreamNotFound(String),

    /// Release not found in a downstream.
    #[error("release not found: {downstream} sequence {sequence}")]
    ReleaseNotFound {
        /// Downstream the release was looked up in.
        downstream: String,
        /// Requested sequence.
        sequence: i64,
    },

    /// Validation did not finish before the configured deadline.
    #[error("gave up waiting for validation of sequence {sequence} after {}s", waited.as_secs())]
    ValidationWaitTimedOut {
        /// Release sequence being waited on.
        sequence: i64,
        /// How long the gate waited.
        waited: Duration,
    },

    /// The caller abandoned the validation wait.
    #[error("validation wait for sequence {sequence} was cancelled")]
    ValidationWaitCancelled {
        /// Release sequence being waited on.
        sequence: i64,
    },

    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a release-not-found error.
    #[must_use]
    pub fn release_not_found(downstream: impl std::fmt::Display, sequence: i64) -> Self {
        Self::ReleaseNotFound {
            downstream: downstream.to_string(),
            sequence,
        }
    }

    /// Wrap this error with the step that failed.
    #[must_use]
    pub fn at_step(self, step: &'static str) -> Self {
        Self::Step {
            step,
            source: Box::new(self),
        }
    }

    /// The innermost error, with all step wrappers removed.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Step { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the caller gave up waiting on validation, as opposed to the
    /// validation itself failing.
    #[must_use]
    pub fn is_abandoned_wait(&self) -> bool {
        matches!(
            self.root(),
            Self::ValidationWaitTimedOut { .. } | Self::ValidationWaitCancelled { .. }
        )
    }

    /// Whether the failure lies in the release store or the cluster rather
    /// than in the request. Callers see these as temporarily unavailable.
    ///
    /// Stored data that no longer parses counts as a store failure.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root(),
            Self::Database(_) | Self::Kube(_) | Self::Serialisation(_) | Self::Internal(_)
        )
    }
}

/// Attach step context to a fallible store or cluster call.
pub trait StepContext<T> {
    /// Wrap the error, if any, with the step that was being performed.
    fn step(self, step: &'static str) -> ControlResult<T>;
}

impl<T> StepContext<T> for ControlResult<T> {
    fn step(self, step: &'static str) -> ControlResult<T> {
        self.map_err(|e| e.at_step(step))
    }
}
