//! Bus configuration loaded from environment variables.

use conveyor_runtime::ConnectPolicy;
use std::env;
use std::time::Duration;

/// Transport configuration shared by every Conveyor service.
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Broker addresses (comma-separated).
    pub brokers: String,
    /// Bootstrap retry policy.
    pub connect: ConnectPolicy,
    /// Producer send timeout.
    pub producer_timeout: Duration,
    /// Consumer session timeout in milliseconds.
    pub session_timeout_ms: u32,
    /// Where a new consumer group starts reading.
    pub auto_offset_reset: String,
    /// Pause before re-fetching a negatively-acknowledged message.
    pub redelivery_delay: Duration,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            connect: ConnectPolicy::default(),
            producer_timeout: Duration::from_secs(5),
            session_timeout_ms: 6000,
            auto_offset_reset: "latest".to_string(),
            redelivery_delay: Duration::from_millis(500),
        }
    }
}

impl KafkaConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let connect = ConnectPolicy::builder()
            .max_attempts(env_parse("BUS_CONNECT_MAX_ATTEMPTS", 10))
            .base_delay(Duration::from_millis(env_parse(
                "BUS_CONNECT_BASE_DELAY_MS",
                1000,
            )))
            .max_delay(Duration::from_millis(env_parse(
                "BUS_CONNECT_MAX_DELAY_MS",
                30_000,
            )))
            .build();

        Self {
            brokers: env::var("BUS_BROKERS").unwrap_or(defaults.brokers),
            connect,
            producer_timeout: Duration::from_millis(env_parse("BUS_PRODUCER_TIMEOUT_MS", 5000)),
            session_timeout_ms: env_parse("BUS_SESSION_TIMEOUT_MS", 6000),
            auto_offset_reset: env::var("BUS_AUTO_OFFSET_RESET")
                .unwrap_or(defaults.auto_offset_reset),
            redelivery_delay: Duration::from_millis(env_parse("BUS_REDELIVERY_DELAY_MS", 500)),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(fallback)
}
