//! Service lifecycle management.
//!
//! Provides the main service runner with signal handling and graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::admission::AdmissionController;
use crate::api;
use crate::cluster::{create_inspector, ClusterInspector, StaticInspector};
use crate::config::ControlConfig;
use crate::error::{ControlError, ControlResult};
use crate::metadata::MetadataReader;
use crate::store::{MemoryStore, PostgresStore, ReleaseStore};

/// The control service.
///
/// Manages the lifecycle of the control plane, including:
/// - Database connections
/// - Cluster inspection
/// - HTTP API server
/// - Signal handling and graceful shutdown
pub struct ControlService {
    config: ControlConfig,
    cancel: CancellationToken,
}

impl ControlService {
    /// Create a new control service with the given configuration.
    #[must_use]
    pub fn new(config: ControlConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Run the control service.
    ///
    /// This will:
    /// 1. Connect to the database (or use in-memory store as fallback)
    /// 2. Create the cluster inspector
    /// 3. Start the HTTP API server
    /// 4. Wait for shutdown signal
    pub async fn run(&self) -> ControlResult<()> {
        let store = self.create_store().await;
        let inspector = self.create_inspector().await;

        let admission = Arc::new(AdmissionController::new(
            Arc::clone(&store),
            &self.config.admission,
        ));
        info!(
            poll_interval = ?self.config.admission.poll_interval(),
            validation_timeout = ?self.config.admission.validation_timeout(),
            "admission controller initialised"
        );

        let metadata = Arc::new(MetadataReader::new(
            Arc::clone(&store),
            inspector,
            self.config.cluster.namespace.clone(),
        ));

        let state = api::AppState {
            admission,
            metadata,
            store,
            shutdown: self.cancel.clone(),
        };

        let app = api::router(state);

        info!(addr = %self.config.server.listen, "control service listening");

        serve(self.config.server.listen, app, self.cancel.clone()).await?;

        info!("control service shutdown complete");
        Ok(())
    }

    /// Request graceful shutdown.
    ///
    /// Deploy requests still waiting on validation are abandoned.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn create_store(&self) -> Arc<dyn ReleaseStore> {
        match PostgresStore::connect(&self.config.database).await {
            Ok(store) => {
                info!(url = %self.config.database.url, "connected to PostgreSQL");
                Arc::new(store)
            }
            Err(e) => {
                error!(
                    error = %e,
                    "failed to connect to PostgreSQL, using in-memory store"
                );
                Arc::new(MemoryStore::new())
            }
        }
    }

    async fn create_inspector(&self) -> Arc<dyn ClusterInspector> {
        match create_inspector(&self.config.cluster).await {
            Ok(inspector) => {
                info!(
                    inspector = ?self.config.cluster.inspector,
                    namespace = %self.config.cluster.namespace,
                    "cluster inspector configured"
                );
                inspector
            }
            Err(e) => {
                error!(
                    error = %e,
                    "failed to create cluster inspector, no ports will be forwarded"
                );
                Arc::new(StaticInspector::new())
            }
        }
    }
}

/// Serve an axum router on the given address with graceful shutdown.
async fn serve(addr: SocketAddr, app: axum::Router, cancel: CancellationToken) -> ControlResult<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ControlError::Config(format!("failed to bind TCP: {e}")))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await
        .map_err(|e| ControlError::Config(format!("server error: {e}")))?;
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("received SIGTERM, initiating shutdown");
        }
        () = cancel.cancelled() => {
            info!("shutdown requested");
        }
    }

    // Release handlers still parked on a validation wait.
    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_creation() {
        let config = ControlConfig::default();
        let service = ControlService::new(config);
        assert!(!service.cancel.is_cancelled());
    }

    #[test]
    fn service_shutdown() {
        let config = ControlConfig::default();
        let service = ControlService::new(config);
        service.shutdown();
        assert!(service.cancel.is_cancelled());
    }
}
