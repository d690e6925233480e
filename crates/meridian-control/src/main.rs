//! Meridian control service binary.
//!
//! Serves release history and admits deploy requests.

use tracing::info;
use tracing_subscriber::EnvFilter;

use meridian_control::{ControlConfig, ControlService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("meridian_control=info".parse()?),
        )
        .init();

    info!("Meridian control service starting");

    let config = ControlConfig::load().unwrap_or_else(|e| {
        info!(error = %e, "failed to load config, using defaults");
        ControlConfig::default()
    });

    info!(
        listen_addr = %config.server.listen,
        database = %config.database.url,
        inspector = ?config.cluster.inspector,
        "configuration loaded"
    );

    ControlService::new(config).run().await?;

    Ok(())
}
