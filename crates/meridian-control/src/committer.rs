//! Atomic deploy transition.

use std::sync::Arc;

use tracing::info;

use crate::deployability::Deployability;
use crate::error::{ControlResult, StepContext};
use crate::store::{CommitCheck, ReleaseStore};
use crate::types::DownstreamKey;

/// Activates releases through the store's commit transaction.
pub struct DeploymentCommitter {
    store: Arc<dyn ReleaseStore>,
}

impl DeploymentCommitter {
    /// Create a committer over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn ReleaseStore>) -> Self {
        Self { store }
    }

    /// Make `sequence` the active release of the downstream.
    ///
    /// The active pointer, the release's `deployed` status and activation
    /// time, and the superseded status of the previous release are written
    /// together. On failure nothing is written.
    pub async fn commit(&self, key: &DownstreamKey, sequence: i64) -> ControlResult<()> {
        self.store
            .commit(key, sequence, CommitCheck::Unconditional)
            .await
            .step("commit transition")?;

        info!(
            app = %key.app_id,
            downstream = %key.downstream_id,
            sequence,
            "release activated"
        );
        Ok(())
    }

    /// Like [`Self::commit`], but re-checks deployability inside the
    /// transaction and writes nothing if the release has become blocked.
    pub async fn commit_if_deployable(
        &self,
        key: &DownstreamKey,
        sequence: i64,
        semver_authoritative: bool,
    ) -> ControlResult<Deployability> {
        let outcome = self
            .store
            .commit(
                key,
                sequence,
                CommitCheck::Deployable {
                    semver_authoritative,
                },
            )
            .await
            .step("commit transition")?;

        if outcome.is_deployable() {
            info!(
                app = %key.app_id,
                downstream = %key.downstream_id,
                sequence,
                "release activated"
            );
        }
        Ok(outcome)
    }
}

impl std::fmt::Debug for DeploymentCommitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentCommitter").finish_non_exhaustive()
    }
}
