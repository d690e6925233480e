//! Release catalog storage backends.
//!
//! This module provides the [`ReleaseStore`] trait and its implementations.
//! The primary implementation uses PostgreSQL, but an in-memory
//! implementation is provided for testing and as a fallback.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;

use crate::deployability::Deployability;
use crate::error::ControlResult;
use crate::release_spec::ReleaseSpec;
use crate::types::{
    AppId, Application, DownstreamKey, NewRelease, Release, ReleaseHistory, ReleaseStatus,
};
use crate::validation::{ValidationResult, ValidationState};

/// What the commit transaction must confirm before writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitCheck {
    /// Write without re-evaluating deployability.
    Unconditional,
    /// Re-evaluate deployability against the history read inside the
    /// transaction and write only if the release is still deployable.
    Deployable {
        /// Whether semantic versions are authoritative for release identity.
        semver_authoritative: bool,
    },
}

/// Backend for the release catalog.
///
/// Implementations must make [`ReleaseStore::commit`] atomic: the active
/// release pointer and the release status change together or not at all, and
/// concurrent commits for the same downstream are serialised.
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    /// Check that the backend can serve requests.
    async fn ping(&self) -> ControlResult<()>;

    /// Register an application.
    async fn insert_application(&self, application: &Application) -> ControlResult<()>;

    /// Get an application by ID.
    async fn get_application(&self, id: &AppId) -> ControlResult<Option<Application>>;

    /// Register a downstream of an existing application.
    async fn insert_downstream(&self, key: &DownstreamKey) -> ControlResult<()>;

    /// Add a release to a downstream's catalog and return its sequence.
    ///
    /// Sequences start at 0 and increase by one per release.
    async fn insert_release(&self, key: &DownstreamKey, release: NewRelease) -> ControlResult<i64>;

    /// Get a single release.
    async fn get_release(&self, key: &DownstreamKey, sequence: i64) -> ControlResult<Option<Release>>;

    /// Get all releases of a downstream, newest first, and the active release.
    ///
    /// Returns an error if the downstream does not exist.
    async fn get_release_history(&self, key: &DownstreamKey) -> ControlResult<ReleaseHistory>;

    /// Get a release's parsed specification.
    ///
    /// Returns `None` if the release does not exist and an empty spec if the
    /// release has none.
    async fn get_release_spec(
        &self,
        key: &DownstreamKey,
        sequence: i64,
    ) -> ControlResult<Option<ReleaseSpec>>;

    /// Get the validation view of a release.
    async fn get_validation_state(
        &self,
        key: &DownstreamKey,
        sequence: i64,
    ) -> ControlResult<Option<ValidationState>>;

    /// Get a release's status.
    async fn get_status(&self, key: &DownstreamKey, sequence: i64)
        -> ControlResult<Option<ReleaseStatus>>;

    /// Record an uploaded validation result.
    ///
    /// A release waiting on validation moves to `pending`.
    async fn record_validation(
        &self,
        key: &DownstreamKey,
        sequence: i64,
        result: &ValidationResult,
    ) -> ControlResult<()>;

    /// Mark validation as skipped by the operator.
    async fn skip_validation(&self, key: &DownstreamKey, sequence: i64) -> ControlResult<()>;

    /// Make `sequence` the active release of the downstream.
    ///
    /// In one transaction: point the downstream at the release, mark it
    /// deployed with an activation timestamp, and mark the previously active
    /// release superseded. With [`CommitCheck::Deployable`] the history is
    /// re-read inside the transaction first; if the release is no longer
    /// deployable nothing is written and the blocking outcome is returned.
    async fn commit(
        &self,
        key: &DownstreamKey,
        sequence: i64,
        check: CommitCheck,
    ) -> ControlResult<Deployability>;
}

/// Build a validation view from stored columns.
fn validation_state(
    status: ReleaseStatus,
    skipped: bool,
    spec: Option<&str>,
    result: Option<ValidationResult>,
) -> ControlResult<ValidationState> {
    let has_strict_checks = match spec {
        Some(doc) => ReleaseSpec::parse(doc)?.has_strict_validation(),
        None => false,
    };
    Ok(ValidationState {
        status,
        skipped,
        has_strict_checks,
        result,
    })
}
