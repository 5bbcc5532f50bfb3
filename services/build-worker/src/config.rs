//! Configuration management for the build worker.

use conveyor_kafka::KafkaConfig;
use std::env;
use std::time::Duration;

/// Build worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bus transport configuration.
    pub bus: KafkaConfig,
    /// How long drain waits for in-flight work before forcing a stop.
    pub shutdown_grace: Duration,
    /// Simulated build duration.
    pub build_delay: Duration,
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
            build_delay: Duration::from_millis(
                env::var("BUILD_SIMULATION_DELAY_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1000),
            ),
        }
    }
}
