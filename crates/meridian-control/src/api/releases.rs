//! Release endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use tracing::{error, info};

use crate::admission::DeployOutcome;
use crate::deployability::AnnotatedRelease;
use crate::error::ControlError;
use crate::metadata::{ForwardedPort, RealizedLink};
use crate::types::DownstreamKey;

use super::AppState;

const UNAVAILABLE_MESSAGE: &str = "release store temporarily unavailable, retry later";

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
}

/// Deployability of a single release.
#[derive(Debug, Serialize)]
pub struct DeployabilityResponse {
    /// Whether the release may be deployed now.
    pub is_deployable: bool,
    /// Why not, when it may not.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cause: String,
}

/// Response for an admitted deploy.
#[derive(Debug, Serialize)]
pub struct DeployResponse {
    /// Activated release.
    pub sequence: i64,
    /// New status of the release.
    pub status: &'static str,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// List a downstream's releases, newest first, with deployability.
pub async fn list_releases(
    State(state): State<AppState>,
    Path((app, downstream)): Path<(String, String)>,
) -> Result<Json<Vec<AnnotatedRelease>>, ApiError> {
    let key = DownstreamKey::new(app, downstream);

    state
        .admission
        .history(&key)
        .await
        .map(Json)
        .map_err(error_response)
}

/// Evaluate whether a release may be deployed now.
pub async fn get_deployability(
    State(state): State<AppState>,
    Path((app, downstream, sequence)): Path<(String, String, i64)>,
) -> Result<Json<DeployabilityResponse>, ApiError> {
    let key = DownstreamKey::new(app, downstream);

    let outcome = state
        .admission
        .deployability(&key, sequence)
        .await
        .map_err(error_response)?;

    Ok(Json(DeployabilityResponse {
        is_deployable: outcome.is_deployable(),
        cause: outcome.cause(),
    }))
}

/// Deploy a release.
///
/// May wait for strict validation to finish before answering.
pub async fn deploy_release(
    State(state): State<AppState>,
    Path((app, downstream, sequence)): Path<(String, String, i64)>,
) -> Result<Json<DeployResponse>, ApiError> {
    let key = DownstreamKey::new(app, downstream);

    info!(
        app = %key.app_id,
        downstream = %key.downstream_id,
        sequence,
        "deploy requested via API"
    );

    let cancel = state.shutdown.child_token();
    match state.admission.deploy(&key, sequence, &cancel).await {
        Ok(DeployOutcome::Deployed { sequence }) => Ok(Json(DeployResponse {
            sequence,
            status: "deployed",
        })),
        Ok(DeployOutcome::Blocked { cause }) => {
            Err((StatusCode::CONFLICT, Json(ErrorResponse { error: cause })))
        }
        Err(e) => Err(error_response(e)),
    }
}

/// Links declared by a release.
pub async fn get_links(
    State(state): State<AppState>,
    Path((app, downstream, sequence)): Path<(String, String, i64)>,
) -> Result<Json<Vec<RealizedLink>>, ApiError> {
    let key = DownstreamKey::new(app, downstream);

    state
        .metadata
        .realized_links(&key, sequence)
        .await
        .map(Json)
        .map_err(error_response)
}

/// Ports of a release that can be forwarded now.
pub async fn get_ports(
    State(state): State<AppState>,
    Path((app, downstream, sequence)): Path<(String, String, i64)>,
) -> Result<Json<Vec<ForwardedPort>>, ApiError> {
    let key = DownstreamKey::new(app, downstream);

    state
        .metadata
        .forwarded_ports(&key, sequence)
        .await
        .map(Json)
        .map_err(error_response)
}

fn error_response(error: ControlError) -> ApiError {
    let status = error_to_status(&error);

    let message = if error.is_retryable() {
        error!(error = %error, "release store request failed");
        UNAVAILABLE_MESSAGE.to_owned()
    } else {
        error.to_string()
    };

    (status, Json(ErrorResponse { error: message }))
}

fn error_to_status(error: &ControlError) -> StatusCode {
    if error.is_retryable() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    if error.is_abandoned_wait() {
        return StatusCode::GATEWAY_TIMEOUT;
    }

    match error.root() {
        ControlError::ApplicationNotFound(_)
        | ControlError::DownstreamNotFound(_)
        | ControlError::ReleaseNotFound { .. } => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
