//! Deploy worker process: one competing consumer in the `oal-workers`
//! queue group.

use conveyor_core::bus::MessageBus;
use conveyor_core::events::{groups, subjects};
use conveyor_deploy_worker::{Config, DeployStage, SimulatedDeploy};
use conveyor_kafka::KafkaBus;
use conveyor_runtime::{ShutdownCoordinator, StageConsumer, wait_for_signal};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conveyor_deploy_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Conveyor deploy worker");

    let config = Config::from_env();
    info!(brokers = %config.bus.brokers, "Configuration loaded");

    let bus: Arc<dyn MessageBus> = Arc::new(KafkaBus::connect(&config.bus).await?);
    info!("Bus connection established");

    let mut coordinator = ShutdownCoordinator::new(config.shutdown_grace);

    let handler = Arc::new(DeployStage::new(Arc::new(SimulatedDeploy::new(
        config.deploy_delay,
    ))));
    let consumer = StageConsumer::new(
        subjects::BUILD_SUCCEEDED,
        groups::OAL_WORKERS,
        Arc::clone(&bus),
        handler,
        coordinator.subscribe(),
    );
    coordinator.register_worker("deploy-stage", consumer.start().await?);

    wait_for_signal().await;

    let outcome = coordinator.drain().await;
    if !outcome.is_clean() {
        warn!(?outcome, "Drain forced a stop; in-flight resolution is indeterminate");
    }

    drop(bus);
    info!("Deploy worker exiting");
    Ok(())
}
