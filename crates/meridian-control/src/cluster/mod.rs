//! Cluster inspection.
//!
//! Port forwarding is only offered for application services that have a
//! workload able to serve traffic. This module answers that question through
//! the [`ClusterInspector`] trait. The primary implementation queries the
//! Kubernetes API; a static implementation backs tests and clusterless runs.

mod kubernetes;

pub use kubernetes::KubeInspector;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::{ClusterConfig, InspectorType};
use crate::error::{ControlError, ControlResult};

/// Observed state of one workload backing a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadStatus {
    /// Workload (pod) name.
    pub name: String,
    /// The workload is in the running phase.
    pub running: bool,
    /// At least one of its containers reports ready.
    pub ready: bool,
}

impl WorkloadStatus {
    /// Whether traffic forwarded to this workload would be served.
    #[must_use]
    pub const fn is_serving(&self) -> bool {
        self.running && self.ready
    }
}

/// Trait for querying the workloads behind a cluster service.
#[async_trait]
pub trait ClusterInspector: Send + Sync {
    /// List the workloads selected by `service` in `namespace`.
    ///
    /// Fails if the service does not exist or the cluster cannot be queried.
    async fn backing_workloads(
        &self,
        namespace: &str,
        service: &str,
    ) -> ControlResult<Vec<WorkloadStatus>>;
}

/// Create a cluster inspector from configuration.
pub async fn create_inspector(config: &ClusterConfig) -> ControlResult<Arc<dyn ClusterInspector>> {
    match config.inspector {
        InspectorType::Kube => {
            let inspector = KubeInspector::connect().await?;
            info!(namespace = %config.namespace, "connected to Kubernetes API");
            Ok(Arc::new(inspector))
        }
        InspectorType::Static => Ok(Arc::new(StaticInspector::default())),
    }
}

/// Inspector answering from a fixed table of services.
///
/// Services not in the table are reported as missing.
#[derive(Debug, Default, Clone)]
pub struct StaticInspector {
    services: HashMap<(String, String), Vec<WorkloadStatus>>,
}

impl StaticInspector {
    /// Create an empty inspector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the workloads behind a service.
    #[must_use]
    pub fn with_service(
        mut self,
        namespace: impl Into<String>,
        service: impl Into<String>,
        workloads: Vec<WorkloadStatus>,
    ) -> Self {
        self.services
            .insert((namespace.into(), service.into()), workloads);
        self
    }
}

#[async_trait]
impl ClusterInspector for StaticInspector {
    async fn backing_workloads(
        &self,
        namespace: &str,
        service: &str,
    ) -> ControlResult<Vec<WorkloadStatus>> {
        self.services
            .get(&(namespace.to_owned(), service.to_owned()))
            .cloned()
            .ok_or_else(|| {
                ControlError::internal(format!("service {namespace}/{service} not found"))
            })
    }
}
