//! Kubernetes cluster inspector.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{Api, ListParams};
use kube::Client;
use tracing::debug;

use super::{ClusterInspector, WorkloadStatus};
use crate::error::ControlResult;

const RUNNING_PHASE: &str = "Running";

/// Inspector backed by the Kubernetes API.
///
/// Resolves a service's label selector and lists the pods it matches.
#[derive(Clone)]
pub struct KubeInspector {
    client: Client,
}

impl KubeInspector {
    /// Connect using the in-cluster or kubeconfig defaults.
    pub async fn connect() -> ControlResult<Self> {
        let client = Client::try_default().await?;
        Ok(Self { client })
    }

    /// Create an inspector from an existing client.
    #[must_use]
    pub const fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterInspector for KubeInspector {
    async fn backing_workloads(
        &self,
        namespace: &str,
        service: &str,
    ) -> ControlResult<Vec<WorkloadStatus>> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let svc = services.get(service).await?;

        // An empty selector matches every pod in the namespace.
        let selector = svc.spec.and_then(|spec| spec.selector).unwrap_or_default();
        let labels = label_selector(&selector);
        debug!(namespace, service, selector = %labels, "listing backing pods");

        let mut params = ListParams::default();
        if !labels.is_empty() {
            params = params.labels(&labels);
        }
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods.list(&params).await?;

        Ok(list.items.iter().map(workload_status).collect())
    }
}

impl std::fmt::Debug for KubeInspector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeInspector").finish_non_exhaustive()
    }
}

/// Render a service selector as a label query, e.g. `app=web,tier=front`.
fn label_selector(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn workload_status(pod: &Pod) -> WorkloadStatus {
    let status = pod.status.as_ref();
    let running = status
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase == RUNNING_PHASE);
    let ready = status
        .and_then(|s| s.container_statuses.as_ref())
        .is_some_and(|containers| containers.iter().any(|c| c.ready));

    WorkloadStatus {
        name: pod.metadata.name.clone().unwrap_or_default(),
        running,
        ready,
    }
}
