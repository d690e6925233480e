//! HTTP API for the control service.
//!
//! Provides endpoints for:
//! - Release history with per-release deployability
//! - Deploy requests
//! - Release links and forwardable ports
//! - Health and readiness checks

mod releases;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;

use crate::admission::AdmissionController;
use crate::metadata::MetadataReader;
use crate::store::ReleaseStore;

pub use releases::{DeployResponse, DeployabilityResponse, ErrorResponse};

/// Shared application state for the control service.
#[derive(Clone)]
pub struct AppState {
    /// Admission controller for deploy requests and evaluations.
    pub admission: Arc<AdmissionController>,
    /// Reader for links and forwarded ports.
    pub metadata: Arc<MetadataReader>,
    /// Release store for readiness probes.
    pub store: Arc<dyn ReleaseStore>,
    /// Cancelled on shutdown; abandons pending validation waits.
    pub shutdown: CancellationToken,
}

/// Creates the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        // Releases
        .route(
            "/apps/{app}/downstreams/{downstream}/releases",
            get(releases::list_releases),
        )
        .route(
            "/apps/{app}/downstreams/{downstream}/releases/{sequence}/deployability",
            get(releases::get_deployability),
        )
        .route(
            "/apps/{app}/downstreams/{downstream}/releases/{sequence}/deploy",
            post(releases::deploy_release),
        )
        .route(
            "/apps/{app}/downstreams/{downstream}/releases/{sequence}/links",
            get(releases::get_links),
        )
        .route(
            "/apps/{app}/downstreams/{downstream}/releases/{sequence}/ports",
            get(releases::get_ports),
        )
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> axum::Json<HealthResponse> {
    axum::Json(HealthResponse { status: "healthy" })
}

/// Readiness check endpoint.
async fn readiness_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> (axum::http::StatusCode, axum::Json<ReadyResponse>) {
    match state.store.ping().await {
        Ok(()) => (
            axum::http::StatusCode::OK,
            axum::Json(ReadyResponse { ready: true }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "release store not ready");
            (
                axum::http::StatusCode::SERVICE_UNAVAILABLE,
                axum::Json(ReadyResponse { ready: false }),
            )
        }
    }
}

/// Health response.
#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Readiness response.
#[derive(serde::Serialize)]
struct ReadyResponse {
    ready: bool,
}
