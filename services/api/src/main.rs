//! Conveyor ingress HTTP server.

use conveyor_api::{AppState, Config, app_router};
use conveyor_core::bus::MessageBus;
use conveyor_kafka::KafkaBus;
use conveyor_runtime::wait_for_signal;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conveyor_api=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Conveyor ingress");

    let config = Config::from_env();
    info!(brokers = %config.bus.brokers, "Configuration loaded");

    // Bootstrap the bus connection before binding the server; exhausting
    // the retry budget is fatal.
    let bus: Arc<dyn MessageBus> = Arc::new(KafkaBus::connect(&config.bus).await?);
    info!("Bus connection established");

    let app = app_router(AppState { bus });

    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(address = %address, "Ingress listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_signal())
        .await?;

    // The server has stopped accepting and finished in-flight requests;
    // the bus handle is released when it drops below.
    info!("HTTP server stopped, releasing bus connection");
    Ok(())
}
