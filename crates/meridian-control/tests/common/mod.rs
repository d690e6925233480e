//! Common test utilities for control plane integration tests.

pub mod fixtures;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use meridian_control::{
    api::AppState,
    cluster::{StaticInspector, WorkloadStatus},
    config::AdmissionConfig,
    AdmissionController, AppId, Application, CommitCheck, ControlResult, Deployability,
    DownstreamKey, MemoryStore, MetadataReader, NewRelease, Release, ReleaseHistory, ReleaseSpec,
    ReleaseStatus, ReleaseStore, ValidationGate, ValidationResult, ValidationState,
};
use tokio::sync::Barrier;
use tokio_util::sync::CancellationToken;

/// Namespace the test inspector serves.
pub const NAMESPACE: &str = "apps";

/// Complete test control plane with all components wired together.
pub struct TestControl {
    pub store: Arc<MemoryStore>,
    pub admission: Arc<AdmissionController>,
    pub app_state: AppState,
    pub key: DownstreamKey,
}

impl TestControl {
    /// Creates a control plane with one application and one downstream.
    pub async fn new(semver_required: bool) -> Self {
        Self::with_inspector(semver_required, StaticInspector::new()).await
    }

    /// Creates a control plane whose cluster is described by `inspector`.
    pub async fn with_inspector(semver_required: bool, inspector: StaticInspector) -> Self {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_application(&Application {
                id: AppId::new("app"),
                slug: "app".to_owned(),
                semver_required,
            })
            .await
            .unwrap();
        let key = DownstreamKey::new("app", "prod");
        store.insert_downstream(&key).await.unwrap();

        let dyn_store: Arc<dyn ReleaseStore> = store.clone();
        let gate = ValidationGate::from_config(Arc::clone(&dyn_store), &AdmissionConfig::default())
            .with_poll_interval(Duration::from_secs(2));
        let admission = Arc::new(AdmissionController::with_gate(Arc::clone(&dyn_store), gate));
        let metadata = Arc::new(MetadataReader::new(
            Arc::clone(&dyn_store),
            Arc::new(inspector),
            NAMESPACE,
        ));

        let app_state = AppState {
            admission: Arc::clone(&admission),
            metadata,
            store: dyn_store,
            shutdown: CancellationToken::new(),
        };

        Self {
            store,
            admission,
            app_state,
            key,
        }
    }

    /// URI of a release sub-resource of the test downstream.
    pub fn release_uri(&self, sequence: i64, resource: &str) -> String {
        format!("/apps/app/downstreams/prod/releases/{sequence}/{resource}")
    }
}

/// A workload that is running with a ready container.
pub fn serving(name: &str) -> WorkloadStatus {
    WorkloadStatus {
        name: name.to_owned(),
        running: true,
        ready: true,
    }
}

/// A workload that is running but not ready.
pub fn starting(name: &str) -> WorkloadStatus {
    WorkloadStatus {
        name: name.to_owned(),
        running: true,
        ready: false,
    }
}

/// Store that holds every commit until `parties` commits have arrived.
///
/// Lets concurrent deploys all finish their pre-commit evaluation before any
/// of them reaches the commit.
pub struct CommitBarrierStore {
    pub inner: Arc<MemoryStore>,
    barrier: Barrier,
}

impl CommitBarrierStore {
    pub fn new(inner: Arc<MemoryStore>, parties: usize) -> Self {
        Self {
            inner,
            barrier: Barrier::new(parties),
        }
    }
}

#[async_trait]
impl ReleaseStore for CommitBarrierStore {
    async fn ping(&self) -> ControlResult<()> {
        self.inner.ping().await
    }

    async fn insert_application(&self, application: &Application) -> ControlResult<()> {
        self.inner.insert_application(application).await
    }

    async fn get_application(&self, id: &AppId) -> ControlResult<Option<Application>> {
        self.inner.get_application(id).await
    }

    async fn insert_downstream(&self, key: &DownstreamKey) -> ControlResult<()> {
        self.inner.insert_downstream(key).await
    }

    async fn insert_release(&self, key: &DownstreamKey, release: NewRelease) -> ControlResult<i64> {
        self.inner.insert_release(key, release).await
    }

    async fn get_release(&self, key: &DownstreamKey, sequence: i64) -> ControlResult<Option<Release>> {
        self.inner.get_release(key, sequence).await
    }

    async fn get_release_history(&self, key: &DownstreamKey) -> ControlResult<ReleaseHistory> {
        self.inner.get_release_history(key).await
    }

    async fn get_release_spec(
        &self,
        key: &DownstreamKey,
        sequence: i64,
    ) -> ControlResult<Option<ReleaseSpec>> {
        self.inner.get_release_spec(key, sequence).await
    }

    async fn get_validation_state(
        &self,
        key: &DownstreamKey,
        sequence: i64,
    ) -> ControlResult<Option<ValidationState>> {
        self.inner.get_validation_state(key, sequence).await
    }

    async fn get_status(
        &self,
        key: &DownstreamKey,
        sequence: i64,
    ) -> ControlResult<Option<ReleaseStatus>> {
        self.inner.get_status(key, sequence).await
    }

    async fn record_validation(
        &self,
        key: &DownstreamKey,
        sequence: i64,
        result: &ValidationResult,
    ) -> ControlResult<()> {
        self.inner.record_validation(key, sequence, result).await
    }

    async fn skip_validation(&self, key: &DownstreamKey, sequence: i64) -> ControlResult<()> {
        self.inner.skip_validation(key, sequence).await
    }

    async fn commit(
        &self,
        key: &DownstreamKey,
        sequence: i64,
        check: CommitCheck,
    ) -> ControlResult<Deployability> {
        self.barrier.wait().await;
        self.inner.commit(key, sequence, check).await
    }
}
