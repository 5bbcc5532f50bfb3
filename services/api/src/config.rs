//! Configuration management for the ingress service.
//!
//! Loads configuration from environment variables with sensible defaults.

use conveyor_kafka::KafkaConfig;
use std::env;
use std::time::Duration;

/// Ingress configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server configuration.
    pub server: ServerConfig,
    /// Bus transport configuration.
    pub bus: KafkaConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
    /// Grace period for the HTTP server to finish in-flight requests.
    pub shutdown_grace: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(8080),
                shutdown_grace: Duration::from_secs(
                    env::var("SHUTDOWN_GRACE_SECS")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(5),
                ),
            },
            bus: KafkaConfig::from_env(),
        }
    }
}
