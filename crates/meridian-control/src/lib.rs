//! Meridian Control Plane
//!
//! This crate decides whether a release of an application may be deployed to
//! a downstream, and performs the deploy when it may.
//!
//! # Architecture
//!
//! - **Release identity**: two catalog entries are the same upstream release
//!   when they share channel and cursor, or (for applications that require
//!   semantic versions) when their versions are equal
//! - **Deployability**: a release is blocked by failing strict validation or
//!   by required releases between it and the active release
//! - **Validation gate**: a deploy of a release whose strict checks are still
//!   running waits for them, cancellably
//! - **Commit**: the active release pointer and release status change in one
//!   transaction, with deployability re-checked inside it
//! - **Metadata**: operator links and forwardable ports, with ports filtered
//!   by what the cluster can serve
//!
//! # Admission
//!
//! ```text
//! deploy ──▶ gate ──▶ evaluate ──▶ commit ──▶ Deployed
//!             │          │           │
//!             ▼          ▼           ▼
//!          Blocked    Blocked     Blocked
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use meridian_control::{AdmissionController, ControlConfig, DownstreamKey, MemoryStore};
//! use tokio_util::sync::CancellationToken;
//!
//! let store = Arc::new(MemoryStore::new());
//! let controller = AdmissionController::new(store, &ControlConfig::default().admission);
//!
//! let key = DownstreamKey::new("my-app", "production");
//! let outcome = controller.deploy(&key, 4, &CancellationToken::new()).await?;
//! ```

#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

pub mod admission;
pub mod api;
pub mod cluster;
pub mod committer;
pub mod config;
pub mod deployability;
pub mod error;
pub mod gate;
pub mod identity;
pub mod metadata;
pub mod release_spec;
pub mod service;
pub mod store;
pub mod types;
pub mod validation;

// Re-export commonly used types at the crate root
pub use admission::{AdmissionController, DeployOutcome};
pub use cluster::{ClusterInspector, KubeInspector, StaticInspector, WorkloadStatus};
pub use committer::DeploymentCommitter;
pub use config::ControlConfig;
pub use deployability::{annotate_history, evaluate, AnnotatedRelease, BlockReason, Deployability};
pub use error::{ControlError, ControlResult};
pub use gate::{GateDecision, ValidationGate};
pub use identity::same_upstream_release;
pub use metadata::{ForwardedPort, MetadataReader, RealizedLink};
pub use release_spec::ReleaseSpec;
pub use service::ControlService;
pub use store::{CommitCheck, MemoryStore, PostgresStore, ReleaseStore};
pub use types::{
    AppId, Application, DownstreamId, DownstreamKey, NewRelease, Release, ReleaseHistory,
    ReleaseStatus,
};
pub use validation::{ValidationResult, ValidationState};
