//! Test fixtures for control plane integration tests.

use meridian_control::validation::CheckOutcome;
use meridian_control::{NewRelease, ReleaseStatus, ValidationResult};

/// Release spec declaring one strict check.
pub const STRICT_SPEC: &str = r"
validation:
  checks:
    - name: cluster-version
      strict: true
";

/// Release spec with links and ports.
pub const DASHBOARD_SPEC: &str = r"
links:
  - title: Open dashboard
    url: http://dashboard
  - title: Status page
    url: https://status.example.com
ports:
  - service_name: dashboard
    service_port: 80
    local_port: 8800
    application_url: http://dashboard
  - service_name: metrics
    service_port: 9090
    local_port: 9090
";

/// Builder for releases on the `stable` channel.
pub struct ReleaseBuilder {
    release: NewRelease,
}

impl ReleaseBuilder {
    /// Creates a release at the given channel cursor.
    pub fn new(cursor: i64, label: &str) -> Self {
        Self {
            release: NewRelease::new("stable", cursor, label),
        }
    }

    /// Moves the release to another channel.
    pub fn on_channel(mut self, channel: &str) -> Self {
        self.release.channel_id = channel.to_owned();
        self
    }

    /// Marks the release as required.
    pub fn required(mut self) -> Self {
        self.release = self.release.required();
        self
    }

    /// Parses `label` as the release's semantic version.
    pub fn with_semver(mut self) -> Self {
        let version = semver::Version::parse(&self.release.version_label).unwrap();
        self.release = self.release.with_semver(version);
        self
    }

    /// Declares a strict check that has not run yet.
    pub fn awaiting_validation(mut self) -> Self {
        self.release = self
            .release
            .with_spec(STRICT_SPEC)
            .with_status(ReleaseStatus::PendingValidation);
        self
    }

    /// Attaches a release spec.
    pub fn with_spec(mut self, spec: &str) -> Self {
        self.release = self.release.with_spec(spec);
        self
    }

    /// Builds the release.
    pub fn build(self) -> NewRelease {
        self.release
    }
}

/// A validation result for the strict check in [`STRICT_SPEC`].
pub fn strict_result(passed: bool) -> ValidationResult {
    ValidationResult {
        results: vec![CheckOutcome {
            title: "cluster-version".to_owned(),
            strict: true,
            is_fail: !passed,
            is_pass: passed,
            message: if passed { String::new() } else { "cluster too old".to_owned() },
            ..CheckOutcome::default()
        }],
    }
}
