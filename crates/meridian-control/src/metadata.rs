//! Operator-facing release metadata: links and forwardable ports.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use crate::cluster::ClusterInspector;
use crate::error::{ControlError, ControlResult, StepContext};
use crate::release_spec::{ApplicationPort, ReleaseSpec};
use crate::store::ReleaseStore;
use crate::types::DownstreamKey;

/// A declared link, rewritten to a local port-forward when one applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RealizedLink {
    /// Link text.
    pub title: String,
    /// URL the operator should open.
    pub uri: String,
}

/// An application port whose service has a serving workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForwardedPort {
    /// Cluster service backing the port.
    pub service_name: String,
    /// Port on the service.
    pub service_port: u16,
    /// Local port to forward to.
    pub local_port: u16,
    /// URL the application advertises for this port.
    pub application_url: String,
}

impl From<&ApplicationPort> for ForwardedPort {
    fn from(port: &ApplicationPort) -> Self {
        Self {
            service_name: port.service_name.clone(),
            service_port: port.service_port,
            local_port: port.local_port,
            application_url: port.application_url.clone(),
        }
    }
}

/// Rewrite declared links against the declared application ports.
///
/// A link whose URL is some port's application URL points at the local
/// forward of that port instead. When several ports match, the last wins.
#[must_use]
pub fn realize_links(spec: &ReleaseSpec) -> Vec<RealizedLink> {
    spec.links
        .iter()
        .map(|link| {
            let uri = spec
                .ports
                .iter()
                .rev()
                .find(|port| port.application_url == link.url)
                .map_or_else(
                    || link.url.clone(),
                    |port| format!("http://localhost:{}", port.local_port),
                );
            RealizedLink {
                title: link.title.clone(),
                uri,
            }
        })
        .collect()
}

/// Reads links and forwardable ports for releases.
pub struct MetadataReader {
    store: Arc<dyn ReleaseStore>,
    inspector: Arc<dyn ClusterInspector>,
    namespace: String,
}

impl MetadataReader {
    /// Create a reader that inspects services in `namespace`.
    pub fn new(
        store: Arc<dyn ReleaseStore>,
        inspector: Arc<dyn ClusterInspector>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            store,
            inspector,
            namespace: namespace.into(),
        }
    }

    /// Links declared by a release. A missing release has none.
    pub async fn realized_links(
        &self,
        key: &DownstreamKey,
        sequence: i64,
    ) -> ControlResult<Vec<RealizedLink>> {
        let spec = self
            .store
            .get_release_spec(key, sequence)
            .await
            .step("read release spec")?;

        Ok(spec.as_ref().map(realize_links).unwrap_or_default())
    }

    /// Declared ports whose service has at least one serving workload.
    ///
    /// Ports whose service cannot be inspected are logged and left out.
    pub async fn forwarded_ports(
        &self,
        key: &DownstreamKey,
        sequence: i64,
    ) -> ControlResult<Vec<ForwardedPort>> {
        let spec = self
            .store
            .get_release_spec(key, sequence)
            .await
            .and_then(|spec| spec.ok_or_else(|| ControlError::release_not_found(key, sequence)))
            .step("read release spec")?;

        let mut ports = Vec::with_capacity(spec.ports.len());
        for port in &spec.ports {
            let workloads = match self
                .inspector
                .backing_workloads(&self.namespace, &port.service_name)
                .await
            {
                Ok(workloads) => workloads,
                Err(e) => {
                    error!(
                        service = %port.service_name,
                        namespace = %self.namespace,
                        error = %e,
                        "failed to inspect service, not forwarding"
                    );
                    continue;
                }
            };

            if !workloads.iter().any(|w| w.is_serving()) {
                info!(
                    service = %port.service_name,
                    namespace = %self.namespace,
                    "not forwarding to service because no pods are ready"
                );
                continue;
            }

            ports.push(ForwardedPort::from(port));
        }

        Ok(ports)
    }
}

impl std::fmt::Debug for MetadataReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataReader")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}
