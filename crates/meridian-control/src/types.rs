//! Core types for meridian-control.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};

/// Unique identifier for an application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(String);

impl AppId {
    /// Create a new application ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for AppId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier for a deployment target (one cluster/namespace) of an application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownstreamId(String);

impl DownstreamId {
    /// Create a new downstream ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DownstreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for DownstreamId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Scopes every history and release lookup to one application downstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DownstreamKey {
    /// Owning application.
    pub app_id: AppId,
    /// Deployment target.
    pub downstream_id: DownstreamId,
}

impl DownstreamKey {
    /// Create a new downstream key.
    #[must_use]
    pub fn new(app_id: impl Into<String>, downstream_id: impl Into<String>) -> Self {
        Self {
            app_id: AppId::new(app_id),
            downstream_id: DownstreamId::new(downstream_id),
        }
    }
}

impl fmt::Display for DownstreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.app_id, self.downstream_id)
    }
}

/// An application known to the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    /// Application identifier.
    pub id: AppId,
    /// Human-friendly slug.
    pub slug: String,
    /// Whether semantic versions are authoritative for release identity.
    #[serde(default)]
    pub semver_required: bool,
}

/// Lifecycle status of a release on a downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStatus {
    /// Waiting for the operator to supply configuration.
    PendingConfig,
    /// Waiting for the release payload to be downloaded.
    PendingDownload,
    /// Mandatory validation is still running.
    PendingValidation,
    /// Ready to deploy.
    Pending,
    /// Currently (or most recently) activated.
    Deployed,
    /// Replaced by a later activation.
    Superseded,
    /// Activation or validation failed.
    Failed,
    /// Status could not be determined.
    Unknown,
}

impl ReleaseStatus {
    /// Get the status name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PendingConfig => "pending_config",
            Self::PendingDownload => "pending_download",
            Self::PendingValidation => "pending_validation",
            Self::Pending => "pending",
            Self::Deployed => "deployed",
            Self::Superseded => "superseded",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReleaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_config" => Ok(Self::PendingConfig),
            "pending_download" => Ok(Self::PendingDownload),
            "pending_validation" => Ok(Self::PendingValidation),
            "pending" => Ok(Self::Pending),
            "deployed" => Ok(Self::Deployed),
            "superseded" => Ok(Self::Superseded),
            "failed" => Ok(Self::Failed),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("unknown release status: {s}")),
        }
    }
}

/// One catalog entry for one downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Downstream-local ordering key.
    pub sequence: i64,
    /// Upstream channel the release arrived on.
    pub channel_id: String,
    /// Position within the channel.
    pub cursor: i64,
    /// Human-readable version.
    pub version_label: String,
    /// Parsed semantic version, when the application uses semver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semver: Option<semver::Version>,
    /// Publisher marked this release as non-skippable.
    #[serde(default)]
    pub is_required: bool,
    /// A strict validation check failed or has not produced a result yet.
    #[serde(default)]
    pub has_failing_strict_validation: bool,
    /// Lifecycle status.
    pub status: ReleaseStatus,
    /// When the release was added to the catalog.
    pub created_at: DateTime<Utc>,
    /// When the release was last activated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_at: Option<DateTime<Utc>>,
}

/// All known releases of a downstream plus the active one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseHistory {
    /// Releases ordered by sequence, newest first.
    pub releases: Vec<Release>,
    /// The active release, if anything has been deployed.
    pub current: Option<Release>,
}

impl ReleaseHistory {
    /// Build a history, ordering releases newest first and resolving the
    /// current pointer against the collection.
    ///
    /// A pointer to a release that is not in the collection is an error.
    /// Dropping it would make every release look like a fresh install.
    pub fn new(mut releases: Vec<Release>, current_sequence: Option<i64>) -> ControlResult<Self> {
        releases.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        let current = match current_sequence {
            Some(seq) => Some(
                releases
                    .iter()
                    .find(|r| r.sequence == seq)
                    .cloned()
                    .ok_or_else(|| {
                        ControlError::internal(format!(
                            "active release sequence {seq} is missing from the history"
                        ))
                    })?,
            ),
            None => None,
        };
        Ok(Self { releases, current })
    }

    /// Look up a release by sequence.
    #[must_use]
    pub fn get(&self, sequence: i64) -> Option<&Release> {
        self.releases.iter().find(|r| r.sequence == sequence)
    }
}

/// A release to add to a downstream's catalog.
#[derive(Debug, Clone)]
pub struct NewRelease {
    /// Upstream channel.
    pub channel_id: String,
    /// Position within the channel.
    pub cursor: i64,
    /// Human-readable version.
    pub version_label: String,
    /// Parsed semantic version.
    pub semver: Option<semver::Version>,
    /// Publisher marked this release as non-skippable.
    pub is_required: bool,
    /// Initial status.
    pub status: ReleaseStatus,
    /// Release specification (YAML), if any.
    pub spec: Option<String>,
}

impl NewRelease {
    /// A release ready to deploy with no spec attached.
    #[must_use]
    pub fn new(channel_id: impl Into<String>, cursor: i64, version_label: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            cursor,
            version_label: version_label.into(),
            semver: None,
            is_required: false,
            status: ReleaseStatus::Pending,
            spec: None,
        }
    }

    /// Mark the release as required.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.is_required = true;
        self
    }

    /// Attach a semantic version.
    #[must_use]
    pub fn with_semver(mut self, version: semver::Version) -> Self {
        self.semver = Some(version);
        self
    }

    /// Set the initial status.
    #[must_use]
    pub const fn with_status(mut self, status: ReleaseStatus) -> Self {
        self.status = status;
        self
    }

    /// Attach a release specification.
    #[must_use]
    pub fn with_spec(mut self, spec: impl Into<String>) -> Self {
        self.spec = Some(spec.into());
        self
    }
}
