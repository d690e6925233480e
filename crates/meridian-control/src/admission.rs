//! Deploy admission.
//!
//! A deploy request for a release passes through, in order:
//!
//! 1. the strict validation gate, which may wait for validation to finish,
//! 2. deployability evaluation against a fresh read of the history,
//! 3. the commit transaction, which re-checks deployability before writing.
//!
//! Any stage may turn the request away; only the last one writes.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::committer::DeploymentCommitter;
use crate::config::AdmissionConfig;
use crate::deployability::{annotate_history, evaluate, AnnotatedRelease, Deployability};
use crate::error::{ControlError, ControlResult, StepContext};
use crate::gate::{GateDecision, ValidationGate};
use crate::store::ReleaseStore;
use crate::types::{Application, DownstreamKey};

/// Result of a deploy request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployOutcome {
    /// The release is now the active release of the downstream.
    Deployed {
        /// Activated release.
        sequence: i64,
    },
    /// The release was not activated.
    Blocked {
        /// Human-readable cause.
        cause: String,
    },
}

/// Runs deploy requests through gate, evaluation and commit.
pub struct AdmissionController {
    store: Arc<dyn ReleaseStore>,
    gate: ValidationGate,
    committer: DeploymentCommitter,
}

impl AdmissionController {
    /// Create a controller over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn ReleaseStore>, config: &AdmissionConfig) -> Self {
        Self {
            gate: ValidationGate::from_config(Arc::clone(&store), config),
            committer: DeploymentCommitter::new(Arc::clone(&store)),
            store,
        }
    }

    /// Create a controller with a preconfigured gate.
    #[must_use]
    pub fn with_gate(store: Arc<dyn ReleaseStore>, gate: ValidationGate) -> Self {
        Self {
            gate,
            committer: DeploymentCommitter::new(Arc::clone(&store)),
            store,
        }
    }

    /// Deploy `sequence` to the downstream if it is admitted.
    ///
    /// `cancel` abandons a pending validation wait.
    pub async fn deploy(
        &self,
        key: &DownstreamKey,
        sequence: i64,
        cancel: &CancellationToken,
    ) -> ControlResult<DeployOutcome> {
        let application = self.application(key).await?;

        info!(
            app = %key.app_id,
            downstream = %key.downstream_id,
            sequence,
            "deploy requested"
        );

        if let GateDecision::Blocked { cause } =
            self.gate.admit_if_validated(key, sequence, cancel).await?
        {
            warn!(sequence, cause = %cause, "deploy blocked by validation");
            return Ok(DeployOutcome::Blocked { cause });
        }

        let outcome = self.evaluate(key, sequence, application.semver_required).await?;
        if let Deployability::Blocked(_) = &outcome {
            return Ok(Self::blocked(sequence, &outcome));
        }

        let outcome = self
            .committer
            .commit_if_deployable(key, sequence, application.semver_required)
            .await?;
        if let Deployability::Blocked(_) = &outcome {
            return Ok(Self::blocked(sequence, &outcome));
        }

        Ok(DeployOutcome::Deployed { sequence })
    }

    /// Evaluate whether `sequence` could be deployed now, without waiting
    /// on validation or writing anything.
    pub async fn deployability(
        &self,
        key: &DownstreamKey,
        sequence: i64,
    ) -> ControlResult<Deployability> {
        let application = self.application(key).await?;
        self.evaluate(key, sequence, application.semver_required).await
    }

    /// All releases of the downstream, newest first, each with its
    /// deployability.
    pub async fn history(&self, key: &DownstreamKey) -> ControlResult<Vec<AnnotatedRelease>> {
        let application = self.application(key).await?;
        let history = self
            .store
            .get_release_history(key)
            .await
            .step("read history")?;

        Ok(annotate_history(&history, application.semver_required))
    }

    async fn application(&self, key: &DownstreamKey) -> ControlResult<Application> {
        self.store
            .get_application(&key.app_id)
            .await
            .step("read application")?
            .ok_or_else(|| ControlError::ApplicationNotFound(key.app_id.to_string()))
    }

    async fn evaluate(
        &self,
        key: &DownstreamKey,
        sequence: i64,
        semver_authoritative: bool,
    ) -> ControlResult<Deployability> {
        let history = self
            .store
            .get_release_history(key)
            .await
            .step("read history")?;
        let target = history
            .get(sequence)
            .ok_or_else(|| ControlError::release_not_found(key, sequence))?;

        Ok(evaluate(target, Some(&history), semver_authoritative))
    }

    fn blocked(sequence: i64, outcome: &Deployability) -> DeployOutcome {
        let cause = outcome.cause();
        warn!(sequence, cause = %cause, "deploy blocked");
        DeployOutcome::Blocked { cause }
    }
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::deployability::FAILING_VALIDATION_CAUSE;
    use crate::store::MemoryStore;
    use crate::types::{AppId, NewRelease, ReleaseStatus};

    async fn setup(semver_required: bool) -> (Arc<MemoryStore>, AdmissionController, DownstreamKey) {
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
        let controller = AdmissionController::new(dyn_store, &AdmissionConfig::default());
        (store, controller, key)
    }

    #[tokio::test]
    async fn first_deploy_is_admitted() {
        let (store, controller, key) = setup(false).await;
        let seq = store
            .insert_release(&key, NewRelease::new("stable", 1, "1.0"))
            .await
            .unwrap();

        let outcome = controller
            .deploy(&key, seq, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, DeployOutcome::Deployed { sequence: seq });

        let release = store.get_release(&key, seq).await.unwrap().unwrap();
        assert_eq!(release.status, ReleaseStatus::Deployed);
    }

    #[tokio::test]
    async fn skipping_a_required_release_is_blocked() {
        let (store, controller, key) = setup(false).await;
        let cancel = CancellationToken::new();
        let first = store
            .insert_release(&key, NewRelease::new("stable", 1, "1.0"))
            .await
            .unwrap();
        store
            .insert_release(&key, NewRelease::new("stable", 2, "1.1").required())
            .await
            .unwrap();
        let third = store
            .insert_release(&key, NewRelease::new("stable", 3, "1.2"))
            .await
            .unwrap();
        controller.deploy(&key, first, &cancel).await.unwrap();

        let outcome = controller.deploy(&key, third, &cancel).await.unwrap();
        assert_eq!(
            outcome,
            DeployOutcome::Blocked {
                cause: "This version cannot be deployed because version 1.1 is required and must be deployed first.".to_owned()
            }
        );

        let history = store.get_release_history(&key).await.unwrap();
        assert_eq!(history.current.unwrap().sequence, first);
    }

    #[tokio::test]
    async fn unvalidated_strict_release_is_not_deployable() {
        let (store, controller, key) = setup(false).await;
        let seq = store
            .insert_release(
                &key,
                NewRelease::new("stable", 1, "1.0")
                    .with_spec("validation:\n  checks:\n    - name: k8s\n      strict: true\n"),
            )
            .await
            .unwrap();

        let outcome = controller.deployability(&key, seq).await.unwrap();
        assert_eq!(outcome.cause(), FAILING_VALIDATION_CAUSE);
    }

    #[tokio::test]
    async fn history_is_annotated() {
        let (store, controller, key) = setup(false).await;
        let cancel = CancellationToken::new();
        let first = store
            .insert_release(&key, NewRelease::new("stable", 1, "1.0"))
            .await
            .unwrap();
        store
            .insert_release(&key, NewRelease::new("stable", 2, "1.1").required())
            .await
            .unwrap();
        store
            .insert_release(&key, NewRelease::new("stable", 3, "1.2"))
            .await
            .unwrap();
        controller.deploy(&key, first, &cancel).await.unwrap();

        let annotated = controller.history(&key).await.unwrap();
        let flags: Vec<_> = annotated
            .iter()
            .map(|a| (a.release.sequence, a.is_deployable))
            .collect();
        assert_eq!(flags, vec![(2, false), (1, true), (0, true)]);
    }

    #[tokio::test]
    async fn unknown_application_and_release_are_errors() {
        let (_store, controller, key) = setup(false).await;

        let err = controller.deployability(&key, 5).await.unwrap_err();
        assert!(matches!(err.root(), ControlError::ReleaseNotFound { .. }));

        let other = DownstreamKey::new("missing", "prod");
        let err = controller.history(&other).await.unwrap_err();
        assert!(matches!(err, ControlError::ApplicationNotFound(_)));
    }
}
