//! Deploy stage handler and the injectable deploy effect.

use async_trait::async_trait;
use conveyor_core::events::BuildSucceeded;
use conveyor_runtime::{StageError, StageHandler, Successor};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Failure reported by a deploy effect.
#[derive(Error, Debug)]
#[error("deploy failed: {0}")]
pub struct DeployError(pub String);

/// The deploy side effect, injectable so tests can substitute
/// deterministic fakes. Must be repeatable under redelivery.
#[async_trait]
pub trait DeployEffect: Send + Sync + 'static {
    /// Install the built artifact.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError`] if the rollout cannot complete; the message
    /// is then redelivered to the group.
    async fn deploy(&self, event: &BuildSucceeded) -> Result<(), DeployError>;
}

/// Simulated rollout: sleeps for the configured duration and logs the
/// steps a real deployment would take.
pub struct SimulatedDeploy {
    delay: Duration,
}

impl SimulatedDeploy {
    /// Create a simulation that takes `delay` per rollout.
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl DeployEffect for SimulatedDeploy {
    async fn deploy(&self, event: &BuildSucceeded) -> Result<(), DeployError> {
        info!(
            app_id = %event.app_id,
            image_uri = %event.image_uri,
            "Simulating deployment"
        );
        info!("> docker-compose up -d (simulation)");
        tokio::time::sleep(self.delay).await;
        info!(app_id = %event.app_id, "Deployment simulation complete");
        Ok(())
    }
}

/// Stage handler wiring the deploy effect into the consumer loop.
///
/// The deploy stage ends the workflow: there is no successor event.
pub struct DeployStage {
    effect: Arc<dyn DeployEffect>,
}

impl DeployStage {
    /// Create the stage over a deploy effect.
    #[must_use]
    pub fn new(effect: Arc<dyn DeployEffect>) -> Self {
        Self { effect }
    }
}

#[async_trait]
impl StageHandler for DeployStage {
    type Input = BuildSucceeded;

    fn stage(&self) -> &'static str {
        "deploy"
    }

    async fn execute(&self, event: BuildSucceeded) -> Result<Option<Successor>, StageError> {
        self.effect
            .deploy(&event)
            .await
            .map_err(|e| StageError::Effect(e.to_string()))?;

        info!(app_id = %event.app_id, "End of workflow");
        Ok(None)
    }
}
