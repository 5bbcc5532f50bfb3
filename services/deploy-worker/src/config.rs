//! Configuration management for the deploy worker.

use conveyor_kafka::KafkaConfig;
use std::env;
use std::time::Duration;

/// Deploy worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bus transport configuration.
    pub bus: KafkaConfig,
    /// How long drain waits for in-flight work before forcing a stop.
    pub shutdown_grace: Duration,
    /// Simulated rollout duration.
    pub deploy_delay: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            bus: KafkaConfig::from_env(),
            shutdown_grace: Duration::from_secs(
                env::var("WORKER_SHUTDOWN_GRACE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            ),
            deploy_delay: Duration::from_millis(
                env::var("DEPLOY_SIMULATION_DELAY_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1000),
            ),
        }
    }
}
