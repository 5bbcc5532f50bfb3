//! Connection bootstrap with bounded exponential backoff and full jitter.
//!
//! Every Conveyor process establishes its bus connection through this
//! module before doing anything else. Failed attempts back off
//! exponentially up to a cap, with a uniform random jitter added to each
//! delay so that a fleet of processes restarting together does not retry
//! in lockstep. Exhausting the attempt budget is fatal: callers are
//! expected to log the error and exit non-zero.
//!
//! # Example
//!
//! ```rust,ignore
//! use conveyor_runtime::connect::{ConnectPolicy, connect_with_retry};
//! use std::time::Duration;
//!
//! let policy = ConnectPolicy::builder()
//!     .max_attempts(10)
//!     .base_delay(Duration::from_secs(1))
//!     .max_delay(Duration::from_secs(30))
//!     .build();
//!
//! let bus = connect_with_retry(&policy, &connector).await?;
//! ```

use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

/// Upper bound of the uniform jitter added to every backoff delay.
const JITTER_CEILING: Duration = Duration::from_secs(1);

/// Fatal bootstrap failure.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// Every attempt in the budget failed. The process cannot participate
    /// in messaging and should exit non-zero.
    #[error("bus unreachable after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// How many attempts were made.
        attempts: u32,
        /// The error reported by the final attempt.
        last_error: String,
    },
}

/// A fallible way to establish one connection.
///
/// Transports implement this for their concrete handle; tests substitute
/// scripted connectors that fail a set number of times.
#[async_trait]
pub trait Connector: Send + Sync {
    /// The live connection handle produced on success.
    type Connection: Send;
    /// The per-attempt failure type.
    type Error: std::fmt::Display + Send;

    /// Make a single connection attempt.
    ///
    /// # Errors
    ///
    /// Returns the transport's error for this attempt; the bootstrap
    /// decides whether to retry.
    async fn connect(&self) -> Result<Self::Connection, Self::Error>;
}

/// Bootstrap policy: attempt budget and backoff bounds.
///
/// # Default Values
///
/// - `max_attempts`: 10
/// - `base_delay`: 1 second
/// - `max_delay`: 30 seconds
#[derive(Debug, Clone)]
pub struct ConnectPolicy {
    /// Total number of connection attempts before giving up.
    pub max_attempts: u32,
    /// Delay after the first failure; doubles per subsequent failure.
    pub base_delay: Duration,
    /// Cap on the exponential delay (jitter is added on top).
    pub max_delay: Duration,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ConnectPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> ConnectPolicyBuilder {
        ConnectPolicyBuilder {
            max_attempts: None,
            base_delay: None,
            max_delay: None,
        }
    }

    /// Backoff delay for a given zero-based attempt index, before jitter.
    ///
    /// `min(base_delay * 2^attempt, max_delay)`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        exponential.min(self.max_delay)
    }
}

/// Builder for [`ConnectPolicy`].
#[derive(Debug, Clone)]
pub struct ConnectPolicyBuilder {
    max_attempts: Option<u32>,
    base_delay: Option<Duration>,
    max_delay: Option<Duration>,
}

impl ConnectPolicyBuilder {
    /// Set the total attempt budget.
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Set the delay after the first failure.
    #[must_use]
    pub const fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = Some(delay);
        self
    }

    /// Set the cap on the exponential delay.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Build the [`ConnectPolicy`].
    #[must_use]
    pub fn build(self) -> ConnectPolicy {
        let defaults = ConnectPolicy::default();
        ConnectPolicy {
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            base_delay: self.base_delay.unwrap_or(defaults.base_delay),
            max_delay: self.max_delay.unwrap_or(defaults.max_delay),
        }
    }
}

/// Establish a connection, retrying with backoff and jitter.
///
/// Returns the live connection as soon as any attempt succeeds; no
/// further attempts or delays follow a success. Emits one tracing record
/// per attempt. There is no sleep after the final failed attempt.
///
/// # Errors
///
/// Returns [`ConnectError::RetriesExhausted`] once `policy.max_attempts`
/// consecutive attempts have failed. Callers treat this as unrecoverable.
pub async fn connect_with_retry<C: Connector>(
    policy: &ConnectPolicy,
    connector: &C,
) -> Result<C::Connection, ConnectError> {
    let mut last_error = "no attempts were made".to_string();

    for attempt in 0..policy.max_attempts {
        match connector.connect().await {
            Ok(connection) => {
                tracing::info!(attempt = attempt + 1, "Connected to message bus");
                return Ok(connection);
            }
            Err(err) => {
                last_error = err.to_string();

                if attempt + 1 == policy.max_attempts {
                    tracing::error!(
                        attempt = attempt + 1,
                        error = %last_error,
                        "Connection attempts exhausted"
                    );
                    break;
                }

                let delay = policy.delay_for_attempt(attempt) + jitter();
                tracing::warn!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis(),
                    error = %last_error,
                    "Failed to connect to message bus, retrying"
                );
                sleep(delay).await;
            }
        }
    }

    Err(ConnectError::RetriesExhausted {
        attempts: policy.max_attempts,
        last_error,
    })
}

/// Full jitter: uniform in `0..=1s`, fresh per delay.
fn jitter() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..=JITTER_CEILING.as_millis() as u64))
}
