//! Mandatory validation model.
//!
//! The validation subsystem runs the checks a release declares and uploads a
//! structured result. Only strict checks can block a deploy.

use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};
use crate::types::ReleaseStatus;

/// Checks declared by a release.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSpec {
    /// Declared checks.
    #[serde(default)]
    pub checks: Vec<ValidationCheck>,
}

impl ValidationSpec {
    /// Whether any check is strict.
    #[must_use]
    pub fn has_strict_checks(&self) -> bool {
        self.checks.iter().any(|c| c.strict)
    }
}

/// A single declared check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationCheck {
    /// Check name.
    pub name: String,
    /// A failing strict check blocks deployment.
    #[serde(default)]
    pub strict: bool,
}

/// Uploaded result of a validation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Per-check outcomes.
    #[serde(default)]
    pub results: Vec<CheckOutcome>,
}

impl ValidationResult {
    /// Parse a result document. Blank documents parse as an empty result.
    pub fn parse(json: &str) -> ControlResult<Self> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(json).map_err(|e| {
            ControlError::Serialisation(format!("failed to parse validation result: {e}"))
        })
    }

    /// Whether any strict check failed.
    #[must_use]
    pub fn is_strict_failing(&self) -> bool {
        self.results.iter().any(|r| r.strict && r.is_fail)
    }
}

/// Outcome of one check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    /// Check title.
    pub title: String,
    /// Whether the check was strict.
    #[serde(default)]
    pub strict: bool,
    /// The check failed.
    #[serde(default)]
    pub is_fail: bool,
    /// The check produced a warning.
    #[serde(default)]
    pub is_warn: bool,
    /// The check passed.
    #[serde(default)]
    pub is_pass: bool,
    /// Message from the check.
    #[serde(default)]
    pub message: String,
}

/// Point-in-time validation view of a release, as read by the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationState {
    /// Release status.
    pub status: ReleaseStatus,
    /// The operator chose to skip validation.
    pub skipped: bool,
    /// Strict checks are declared in the release spec.
    pub has_strict_checks: bool,
    /// Latest uploaded result, if any.
    pub result: Option<ValidationResult>,
}

impl ValidationState {
    /// Strict checks are declared and the latest result has a strict failure.
    #[must_use]
    pub fn strict_failure(&self) -> bool {
        self.has_strict_checks && self.result.as_ref().is_some_and(ValidationResult::is_strict_failing)
    }

    /// Strict checks are declared and either no result exists yet or a strict
    /// check failed. This is what the catalog reports on each release.
    #[must_use]
    pub fn failing_or_not_run(&self) -> bool {
        self.has_strict_checks
            && self
                .result
                .as_ref()
                .map_or(true, ValidationResult::is_strict_failing)
    }

    /// The gate must wait for validation to finish.
    #[must_use]
    pub fn must_wait(&self) -> bool {
        self.has_strict_checks && !self.skipped && self.status == ReleaseStatus::PendingValidation
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn outcome(strict: bool, is_fail: bool) -> CheckOutcome {
        CheckOutcome {
            title: "check".to_owned(),
            strict,
            is_fail,
            is_pass: !is_fail,
            ..CheckOutcome::default()
        }
    }

    fn state(has_strict_checks: bool, result: Option<ValidationResult>) -> ValidationState {
        ValidationState {
            status: ReleaseStatus::Pending,
            skipped: false,
            has_strict_checks,
            result,
        }
    }

    #[test]
    fn only_strict_failures_count() {
        let advisory_fail = ValidationResult {
            results: vec![outcome(false, true), outcome(true, false)],
        };
        assert!(!advisory_fail.is_strict_failing());

        let strict_fail = ValidationResult {
            results: vec![outcome(true, true)],
        };
        assert!(strict_fail.is_strict_failing());
    }

    #[test]
    fn parses_uploaded_result() {
        let result = ValidationResult::parse(
            r#"{"results":[{"title":"cluster-version","strict":true,"is_fail":true,"message":"too old"}]}"#,
        )
        .unwrap();
        assert!(result.is_strict_failing());
        assert_eq!(result.results[0].message, "too old");

        assert_eq!(ValidationResult::parse("").unwrap(), ValidationResult::default());
        assert!(ValidationResult::parse("{").is_err());
    }

    #[test]
    fn missing_result_is_not_a_failure_but_is_not_run() {
        let pending = state(true, None);
        assert!(!pending.strict_failure());
        assert!(pending.failing_or_not_run());

        let passing = state(
            true,
            Some(ValidationResult {
                results: vec![outcome(true, false)],
            }),
        );
        assert!(!passing.failing_or_not_run());

        let undeclared = state(false, None);
        assert!(!undeclared.failing_or_not_run());
    }

    #[test]
    fn waits_only_for_unskipped_pending_strict_validation() {
        let mut s = state(true, None);
        s.status = ReleaseStatus::PendingValidation;
        assert!(s.must_wait());

        s.skipped = true;
        assert!(!s.must_wait());

        s.skipped = false;
        s.has_strict_checks = false;
        assert!(!s.must_wait());
    }
}
