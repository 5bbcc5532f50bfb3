//! Build worker process: one competing consumer in the `build-workers`
//! queue group.

use conveyor_build_worker::{BuildStage, Config, SimulatedBuild};
use conveyor_core::bus::MessageBus;
use conveyor_core::events::{groups, subjects};
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
                .unwrap_or_else(|_| "conveyor_build_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Conveyor build worker");

    let config = Config::from_env();
    info!(brokers = %config.bus.brokers, "Configuration loaded");

    let bus: Arc<dyn MessageBus> = Arc::new(KafkaBus::connect(&config.bus).await?);
    info!("Bus connection established");

    let mut coordinator = ShutdownCoordinator::new(config.shutdown_grace);

    let handler = Arc::new(BuildStage::new(Arc::new(SimulatedBuild::new(
        config.build_delay,
    ))));
    let consumer = StageConsumer::new(
        subjects::DEPLOYMENT_REQUESTED,
        groups::BUILD_WORKERS,
        Arc::clone(&bus),
        handler,
        coordinator.subscribe(),
    );
    coordinator.register_worker("build-stage", consumer.start().await?);

    wait_for_signal().await;

    let outcome = coordinator.drain().await;
    if !outcome.is_clean() {
        warn!(?outcome, "Drain forced a stop; in-flight resolution is indeterminate");
    }

    // Only now, with every fetched message resolved (or its worker
    // forcibly stopped), is the connection released.
    drop(bus);
    info!("Build worker exiting");
    Ok(())
}
