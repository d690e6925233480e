//! Configuration for meridian-control.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::{ControlError, ControlResult};

/// Top-level configuration for the control service.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ControlConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Deploy admission behaviour.
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Cluster inspection configuration.
    #[serde(default)]
    pub cluster: ClusterConfig,
}

impl ControlConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `control.toml` in the current directory (if present)
    /// 3. Environment variables with `MERIDIAN_CONTROL_` prefix
    pub fn load() -> ControlResult<Self> {
        Figment::new()
            .merge(Toml::file("control.toml"))
            .merge(Env::prefixed("MERIDIAN_CONTROL_").split("__"))
            .extract::<Self>()
            .map_err(|e| ControlError::Config(e.to_string()))?
            .validated()
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> ControlResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("MERIDIAN_CONTROL_").split("__"))
            .extract::<Self>()
            .map_err(|e| ControlError::Config(e.to_string()))?
            .validated()
    }

    /// Reject values the service cannot run with.
    pub fn validated(self) -> ControlResult<Self> {
        if self.admission.poll_interval_secs == 0 {
            return Err(ControlError::Config(
                "admission.poll_interval_secs must be at least 1".to_owned(),
            ));
        }
        Ok(self)
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
}

fn default_listen() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8084)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL.
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_database_url() -> String {
    "postgres://localhost/meridian".to_owned()
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_min_connections() -> u32 {
    1
}

const fn default_connect_timeout_secs() -> u64 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Deploy admission configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionConfig {
    /// How often to re-check a release waiting on validation (seconds).
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Give up waiting on validation after this many seconds.
    ///
    /// Unset means wait until the caller goes away.
    #[serde(default)]
    pub validation_timeout_secs: Option<u64>,
}

const fn default_poll_interval_secs() -> u64 {
    2
}

impl AdmissionConfig {
    /// Poll interval as a duration.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Validation wait timeout as a duration.
    #[must_use]
    pub fn validation_timeout(&self) -> Option<Duration> {
        self.validation_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            validation_timeout_secs: None,
        }
    }
}

/// Cluster inspection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    /// Which inspector to use.
    #[serde(default)]
    pub inspector: InspectorType,

    /// Namespace the application's services live in.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_namespace() -> String {
    "default".to_owned()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            inspector: InspectorType::default(),
            namespace: default_namespace(),
        }
    }
}

/// Type of cluster inspector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectorType {
    /// Query the Kubernetes API.
    #[default]
    Kube,

    /// No cluster access; every port is reported unavailable.
    Static,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ControlConfig::default();
        assert_eq!(config.server.listen.port(), 8084);
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.admission.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.admission.validation_timeout(), None);
        assert_eq!(config.cluster.inspector, InspectorType::Kube);
        assert_eq!(config.cluster.namespace, "default");
    }

    #[test]
    fn config_from_toml() {
        let toml = r#"
            [server]
            listen = "127.0.0.1:9000"

            [database]
            url = "postgres://user:pass@db:5432/mydb"
            max_connections = 20

            [admission]
            poll_interval_secs = 5
            validation_timeout_secs = 600

            [cluster]
            inspector = "static"
            namespace = "apps"
        "#;

        let config: ControlConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.listen.port(), 9000);
        assert_eq!(config.database.url, "postgres://user:pass@db:5432/mydb");
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.database.min_connections, 1);
        assert_eq!(config.admission.poll_interval(), Duration::from_secs(5));
        assert_eq!(
            config.admission.validation_timeout(),
            Some(Duration::from_secs(600))
        );
        assert_eq!(config.cluster.inspector, InspectorType::Static);
        assert_eq!(config.cluster.namespace, "apps");
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let config: ControlConfig =
            toml::from_str("[admission]\npoll_interval_secs = 0\n").unwrap();

        let err = config.validated().unwrap_err();
        assert!(matches!(err, ControlError::Config(_)));
        assert!(err.to_string().contains("poll_interval_secs"));
        assert!(ControlConfig::default().validated().is_ok());
    }
}
