//! In-memory release store for testing.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::deployability::{evaluate, Deployability};
use crate::error::{ControlError, ControlResult};
use crate::release_spec::ReleaseSpec;
use crate::types::{
    AppId, Application, DownstreamKey, NewRelease, Release, ReleaseHistory, ReleaseStatus,
};
use crate::validation::{ValidationResult, ValidationState};

use super::{validation_state, CommitCheck, ReleaseStore};

/// In-memory release store.
///
/// All state lives behind a single lock, so a commit's re-check and write
/// happen in one critical section. Data is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    applications: HashMap<AppId, Application>,
    downstreams: HashMap<DownstreamKey, Downstream>,
}

#[derive(Debug, Default)]
struct Downstream {
    current: Option<i64>,
    releases: BTreeMap<i64, StoredRelease>,
}

#[derive(Debug)]
struct StoredRelease {
    sequence: i64,
    channel_id: String,
    cursor: i64,
    version_label: String,
    semver: Option<semver::Version>,
    is_required: bool,
    status: ReleaseStatus,
    spec: Option<String>,
    validation_skipped: bool,
    validation_result: Option<ValidationResult>,
    created_at: DateTime<Utc>,
    deployed_at: Option<DateTime<Utc>>,
}

impl StoredRelease {
    fn validation_state(&self) -> ControlResult<ValidationState> {
        validation_state(
            self.status,
            self.validation_skipped,
            self.spec.as_deref(),
            self.validation_result.clone(),
        )
    }

    fn to_release(&self) -> ControlResult<Release> {
        Ok(Release {
            sequence: self.sequence,
            channel_id: self.channel_id.clone(),
            cursor: self.cursor,
            version_label: self.version_label.clone(),
            semver: self.semver.clone(),
            is_required: self.is_required,
            has_failing_strict_validation: self.validation_state()?.failing_or_not_run(),
            status: self.status,
            created_at: self.created_at,
            deployed_at: self.deployed_at,
        })
    }
}

impl Downstream {
    fn history(&self) -> ControlResult<ReleaseHistory> {
        let releases = self
            .releases
            .values()
            .map(StoredRelease::to_release)
            .collect::<ControlResult<Vec<_>>>()?;
        ReleaseHistory::new(releases, self.current)
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&Inner) -> ControlResult<T>) -> ControlResult<T> {
        let inner = self
            .inner
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        f(&inner)
    }

    fn write<T>(&self, f: impl FnOnce(&mut Inner) -> ControlResult<T>) -> ControlResult<T> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        f(&mut inner)
    }

    fn with_release<T>(
        &self,
        key: &DownstreamKey,
        sequence: i64,
        f: impl FnOnce(&StoredRelease) -> ControlResult<T>,
    ) -> ControlResult<Option<T>> {
        self.read(|inner| {
            inner
                .downstreams
                .get(key)
                .and_then(|d| d.releases.get(&sequence))
                .map(f)
                .transpose()
        })
    }

    fn update_release(
        &self,
        key: &DownstreamKey,
        sequence: i64,
        f: impl FnOnce(&mut StoredRelease),
    ) -> ControlResult<()> {
        self.write(|inner| {
            let release = inner
                .downstreams
                .get_mut(key)
                .and_then(|d| d.releases.get_mut(&sequence))
                .ok_or_else(|| ControlError::release_not_found(key, sequence))?;
            f(release);
            Ok(())
        })
    }
}

#[async_trait]
impl ReleaseStore for MemoryStore {
    async fn ping(&self) -> ControlResult<()> {
        self.read(|_| Ok(()))
    }

    async fn insert_application(&self, application: &Application) -> ControlResult<()> {
        self.write(|inner| {
            if inner.applications.contains_key(&application.id) {
                return Err(ControlError::internal(format!(
                    "application {} already exists",
                    application.id
                )));
            }
            inner
                .applications
                .insert(application.id.clone(), application.clone());
            Ok(())
        })
    }

    async fn get_application(&self, id: &AppId) -> ControlResult<Option<Application>> {
        self.read(|inner| Ok(inner.applications.get(id).cloned()))
    }

    async fn insert_downstream(&self, key: &DownstreamKey) -> ControlResult<()> {
        self.write(|inner| {
            if !inner.applications.contains_key(&key.app_id) {
                return Err(ControlError::ApplicationNotFound(key.app_id.to_string()));
            }
            if inner.downstreams.contains_key(key) {
                return Err(ControlError::internal(format!(
                    "downstream {key} already exists"
                )));
            }
            inner.downstreams.insert(key.clone(), Downstream::default());
            Ok(())
        })
    }

    async fn insert_release(&self, key: &DownstreamKey, release: NewRelease) -> ControlResult<i64> {
        if let Some(spec) = &release.spec {
            ReleaseSpec::parse(spec)?;
        }

        self.write(|inner| {
            let downstream = inner
                .downstreams
                .get_mut(key)
                .ok_or_else(|| ControlError::DownstreamNotFound(key.to_string()))?;

            let sequence = downstream
                .releases
                .keys()
                .next_back()
                .map_or(0, |last| last + 1);

            downstream.releases.insert(
                sequence,
                StoredRelease {
                    sequence,
                    channel_id: release.channel_id,
                    cursor: release.cursor,
                    version_label: release.version_label,
                    semver: release.semver,
                    is_required: release.is_required,
                    status: release.status,
                    spec: release.spec,
                    validation_skipped: false,
                    validation_result: None,
                    created_at: Utc::now(),
                    deployed_at: None,
                },
            );
            Ok(sequence)
        })
    }

    async fn get_release(&self, key: &DownstreamKey, sequence: i64) -> ControlResult<Option<Release>> {
        self.with_release(key, sequence, StoredRelease::to_release)
    }

    async fn get_release_history(&self, key: &DownstreamKey) -> ControlResult<ReleaseHistory> {
        self.read(|inner| {
            inner
                .downstreams
                .get(key)
                .ok_or_else(|| ControlError::DownstreamNotFound(key.to_string()))?
                .history()
        })
    }

    async fn get_release_spec(
        &self,
        key: &DownstreamKey,
        sequence: i64,
    ) -> ControlResult<Option<ReleaseSpec>> {
        self.with_release(key, sequence, |r| match &r.spec {
            Some(doc) => ReleaseSpec::parse(doc),
            None => Ok(ReleaseSpec::default()),
        })
    }

    async fn get_validation_state(
        &self,
        key: &DownstreamKey,
        sequence: i64,
    ) -> ControlResult<Option<ValidationState>> {
        self.with_release(key, sequence, StoredRelease::validation_state)
    }

    async fn get_status(
        &self,
        key: &DownstreamKey,
        sequence: i64,
    ) -> ControlResult<Option<ReleaseStatus>> {
        self.with_release(key, sequence, |r| Ok(r.status))
    }

    async fn record_validation(
        &self,
        key: &DownstreamKey,
        sequence: i64,
        result: &ValidationResult,
    ) -> ControlResult<()> {
        self.update_release(key, sequence, |r| {
            r.validation_result = Some(result.clone());
            if r.status == ReleaseStatus::PendingValidation {
                r.status = ReleaseStatus::Pending;
            }
        })
    }

    async fn skip_validation(&self, key: &DownstreamKey, sequence: i64) -> ControlResult<()> {
        self.update_release(key, sequence, |r| {
            r.validation_skipped = true;
            if r.status == ReleaseStatus::PendingValidation {
                r.status = ReleaseStatus::Pending;
            }
        })
    }

    async fn commit(
        &self,
        key: &DownstreamKey,
        sequence: i64,
        check: CommitCheck,
    ) -> ControlResult<Deployability> {
        self.write(|inner| {
            let downstream = inner
                .downstreams
                .get_mut(key)
                .ok_or_else(|| ControlError::DownstreamNotFound(key.to_string()))?;

            if !downstream.releases.contains_key(&sequence) {
                return Err(ControlError::release_not_found(key, sequence));
            }

            if let CommitCheck::Deployable {
                semver_authoritative,
            } = check
            {
                let history = downstream.history()?;
                let target = history
                    .get(sequence)
                    .ok_or_else(|| ControlError::release_not_found(key, sequence))?;
                let outcome = evaluate(target, Some(&history), semver_authoritative);
                if !outcome.is_deployable() {
                    return Ok(outcome);
                }
            }

            // Nothing below can fail, so the transition is all-or-nothing.
            if let Some(previous) = downstream.current.filter(|p| *p != sequence) {
                if let Some(release) = downstream.releases.get_mut(&previous) {
                    release.status = ReleaseStatus::Superseded;
                }
            }
            if let Some(release) = downstream.releases.get_mut(&sequence) {
                release.status = ReleaseStatus::Deployed;
                release.deployed_at = Some(Utc::now());
            }
            downstream.current = Some(sequence);

            Ok(Deployability::Deployable)
        })
    }
}
