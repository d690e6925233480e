//! Release specification documents.
//!
//! Each release carries a YAML document describing what the operator can see
//! and check before deploying it:
//!
//! ```yaml
//! links:
//!   - title: Open dashboard
//!     url: http://dashboard
//! ports:
//!   - service_name: dashboard
//!     service_port: 80
//!     local_port: 8800
//!     application_url: http://dashboard
//! validation:
//!   checks:
//!     - name: cluster-version
//!       strict: true
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};
use crate::validation::ValidationSpec;

/// Parsed release specification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseSpec {
    /// External links shown to the operator.
    #[serde(default)]
    pub links: Vec<SpecLink>,
    /// Application ports that may be forwarded locally.
    #[serde(default)]
    pub ports: Vec<ApplicationPort>,
    /// Mandatory and advisory validation checks.
    #[serde(default)]
    pub validation: Option<ValidationSpec>,
}

impl ReleaseSpec {
    /// Parse a spec document. Blank documents parse as an empty spec.
    pub fn parse(yaml: &str) -> ControlResult<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).map_err(|e| {
            ControlError::Serialisation(format!("failed to parse release spec: {e}"))
        })
    }

    /// Whether any declared validation check is strict.
    #[must_use]
    pub fn has_strict_validation(&self) -> bool {
        self.validation
            .as_ref()
            .is_some_and(ValidationSpec::has_strict_checks)
    }
}

/// A declared external link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecLink {
    /// Link text.
    pub title: String,
    /// Target URL.
    pub url: String,
}

/// An application port that can be forwarded to the operator's machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationPort {
    /// Cluster service backing the port.
    pub service_name: String,
    /// Port on the service.
    pub service_port: u16,
    /// Local port to forward to.
    pub local_port: u16,
    /// URL the application advertises for this port.
    #[serde(default)]
    pub application_url: String,
}
