//! Deployability evaluation.
//!
//! Decides whether a target release may be activated given the downstream's
//! history. Rules are checked in order:
//!
//! 1. a failing (or never run) strict validation check blocks outright,
//! 2. a downstream with nothing deployed accepts anything,
//! 3. redeploying the active release is always allowed,
//! 4. otherwise every required release strictly between the target and the
//!    active release (by sequence, in either direction) blocks, unless it is
//!    the same upstream release as the target or the active release.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::identity::same_upstream_release;
use crate::types::{Release, ReleaseHistory};

/// Cause reported when strict validation blocks a release.
pub const FAILING_VALIDATION_CAUSE: &str =
    "Deployment is disabled as a strict validation check in this version has failed or has not been run.";

/// Why a release cannot be deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BlockReason {
    /// A strict validation check failed or has not been run.
    FailingValidation,
    /// Required releases must be deployed first.
    RequiredReleases {
        /// Version labels in ascending sequence order.
        labels: Vec<String>,
    },
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FailingValidation => f.write_str(FAILING_VALIDATION_CAUSE),
            Self::RequiredReleases { labels } if labels.len() == 1 => write!(
                f,
                "This version cannot be deployed because version {} is required and must be deployed first.",
                labels[0]
            ),
            Self::RequiredReleases { labels } => write!(
                f,
                "This version cannot be deployed because versions {} are required and must be deployed first.",
                labels.join(", ")
            ),
        }
    }
}

/// Outcome of evaluating a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deployability {
    /// The release may be deployed now.
    Deployable,
    /// The release may not be deployed.
    Blocked(BlockReason),
}

impl Deployability {
    /// Whether the release may be deployed.
    #[must_use]
    pub const fn is_deployable(&self) -> bool {
        matches!(self, Self::Deployable)
    }

    /// Human-readable cause; empty when deployable.
    #[must_use]
    pub fn cause(&self) -> String {
        match self {
            Self::Deployable => String::new(),
            Self::Blocked(reason) => reason.to_string(),
        }
    }
}

/// Evaluate whether `target` may be deployed.
///
/// `history` may be absent; the validation rule is still applied.
#[must_use]
pub fn evaluate(
    target: &Release,
    history: Option<&ReleaseHistory>,
    semver_authoritative: bool,
) -> Deployability {
    if target.has_failing_strict_validation {
        return Deployability::Blocked(BlockReason::FailingValidation);
    }

    let Some(history) = history else {
        return Deployability::Deployable;
    };
    let Some(current) = history.current.as_ref() else {
        return Deployability::Deployable;
    };

    if target.sequence == current.sequence {
        return Deployability::Deployable;
    }

    let labels = blocking_labels(target, current, &history.releases, semver_authoritative);
    if labels.is_empty() {
        Deployability::Deployable
    } else {
        Deployability::Blocked(BlockReason::RequiredReleases { labels })
    }
}

fn blocking_labels(
    target: &Release,
    current: &Release,
    releases: &[Release],
    semver_authoritative: bool,
) -> Vec<String> {
    let lo = target.sequence.min(current.sequence);
    let hi = target.sequence.max(current.sequence);

    let mut blocking: Vec<&Release> = releases
        .iter()
        .filter(|v| v.sequence > lo && v.sequence < hi)
        .filter(|v| v.is_required)
        .filter(|v| !same_upstream_release(v, target, semver_authoritative))
        .filter(|v| !same_upstream_release(v, current, semver_authoritative))
        .collect();
    blocking.sort_by_key(|v| v.sequence);

    let mut seen = HashSet::new();
    blocking
        .into_iter()
        .filter(|v| seen.insert(v.version_label.as_str()))
        .map(|v| v.version_label.clone())
        .collect()
}

/// A release paired with its evaluation against the rest of the history.
#[derive(Debug, Clone, Serialize)]
pub struct AnnotatedRelease {
    /// The release.
    #[serde(flatten)]
    pub release: Release,
    /// Whether it may be deployed now.
    pub is_deployable: bool,
    /// Why not, when it may not.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub non_deployable_cause: String,
}

/// Evaluate every release of a history, newest first.
#[must_use]
pub fn annotate_history(history: &ReleaseHistory, semver_authoritative: bool) -> Vec<AnnotatedRelease> {
    history
        .releases
        .iter()
        .map(|release| {
            let outcome = evaluate(release, Some(history), semver_authoritative);
            AnnotatedRelease {
                release: release.clone(),
                is_deployable: outcome.is_deployable(),
                non_deployable_cause: outcome.cause(),
            }
        })
        .collect()
}
