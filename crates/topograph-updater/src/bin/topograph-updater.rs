//! Change-stream updater entry point: recovers stale projections, then runs
//! the worker supervisor until the process is stopped.

use tracing::info;
use tracing_subscriber::EnvFilter;

use topograph_core::registry::Registry;
use topograph_inventory::InventoryConfig;
use topograph_model::GraphNames;
use topograph_store::{GraphClient, StoreConfig};
use topograph_updater::config::{KafkaConfig, SupervisorConfig};
use topograph_updater::supervisor::Supervisor;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let names = GraphNames::from_env();
    let store_config = StoreConfig::from_env();
    let client = GraphClient::connect(&store_config, &names.sys_database).await?;

    // Anything left In Process by a dead process is an error now.
    let registry = Registry::new(client.clone(), names.clone());
    let recovered = registry.recover_stale().await?;
    if recovered > 0 {
        info!(recovered, "stale in-process projections marked as errors");
    }

    let supervisor = Supervisor::new(
        client,
        names,
        KafkaConfig::from_env(),
        InventoryConfig::from_env(),
        SupervisorConfig::from_env(),
    );
    info!("updater supervisor starting");
    supervisor.run().await?;
    Ok(())
}
