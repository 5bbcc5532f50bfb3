//! Build stage handler and the injectable build effect.

use async_trait::async_trait;
use conveyor_core::events::{BuildSucceeded, DeploymentRequested};
use conveyor_runtime::{StageError, StageHandler, Successor};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Commit placeholder until real git resolution exists.
const PLACEHOLDER_COMMIT_SHA: &str = "a1b2c3d4e5f6";

/// Descriptor of a produced artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Where the image was pushed.
    pub image_uri: String,
    /// Commit the image was built from.
    pub git_commit_sha: String,
}

/// Failure reported by a build effect.
#[derive(Error, Debug)]
#[error("build failed: {0}")]
pub struct BuildError(pub String);

/// The build side effect, injectable so tests can substitute
/// deterministic fakes.
///
/// Implementations must be repeatable: building the same request twice
/// (which happens when the successor publish fails and the message is
/// redelivered) must yield the same artifact identifiers, or downstream
/// consumers would desynchronize.
#[async_trait]
pub trait BuildEffect: Send + Sync + 'static {
    /// Build an artifact for the request.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError`] if the build cannot complete; the message is
    /// then redelivered to the group.
    async fn build(&self, request: &DeploymentRequested) -> Result<Artifact, BuildError>;
}

/// Simulated build: sleeps for the configured duration and derives the
/// artifact from the request.
///
/// Stands in for real git/buildpack/registry tooling.
pub struct SimulatedBuild {
    delay: Duration,
}

impl SimulatedBuild {
    /// Create a simulation that takes `delay` per build.
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl BuildEffect for SimulatedBuild {
    async fn build(&self, request: &DeploymentRequested) -> Result<Artifact, BuildError> {
        info!(
            app_id = %request.app_id,
            repository = %request.git_repository,
            branch = %request.git_branch,
            "Simulating build"
        );
        tokio::time::sleep(self.delay).await;

        // Derived, never random: redelivery must reproduce the same
        // identifiers.
        let git_commit_sha = PLACEHOLDER_COMMIT_SHA.to_string();
        let image_uri = format!(
            "registry.conveyor.internal/{}:{git_commit_sha}",
            request.app_id
        );

        info!(app_id = %request.app_id, image_uri = %image_uri, "Build simulation complete");
        Ok(Artifact {
            image_uri,
            git_commit_sha,
        })
    }
}

/// Stage handler wiring the build effect into the consumer loop.
pub struct BuildStage {
    effect: Arc<dyn BuildEffect>,
}

impl BuildStage {
    /// Create the stage over a build effect.
    #[must_use]
    pub fn new(effect: Arc<dyn BuildEffect>) -> Self {
        Self { effect }
    }
}

#[async_trait]
impl StageHandler for BuildStage {
    type Input = DeploymentRequested;

    fn stage(&self) -> &'static str {
        "build"
    }

    async fn execute(&self, request: DeploymentRequested) -> Result<Option<Successor>, StageError> {
        let artifact = self
            .effect
            .build(&request)
            .await
            .map_err(|e| StageError::Effect(e.to_string()))?;

        let event = BuildSucceeded {
            app_id: request.app_id,
            image_uri: artifact.image_uri,
            git_commit_sha: artifact.git_commit_sha,
        };
        Ok(Some(Successor::from_event(&event)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> DeploymentRequested {
        DeploymentRequested {
            app_id: "app-123".to_string(),
            git_repository: "https://example.com/a.git".to_string(),
            git_branch: "main".to_string(),
        }
    }

    #[tokio::test]
    async fn simulated_build_is_deterministic() {
        let effect = SimulatedBuild::new(Duration::ZERO);

        #[allow(clippy::expect_used)] // Panics: test fails if the simulation fails
        let first = effect.build(&request()).await.expect("build should succeed");
        #[allow(clippy::expect_used)] // Panics: test fails if the simulation fails
        let second = effect.build(&request()).await.expect("build should succeed");

        assert_eq!(first, second);
        assert_eq!(
            first.image_uri,
            "registry.conveyor.internal/app-123:a1b2c3d4e5f6"
        );
    }

    #[tokio::test]
    async fn execute_emits_build_succeeded_for_the_same_app() {
        let stage = BuildStage::new(Arc::new(SimulatedBuild::new(Duration::ZERO)));

        #[allow(clippy::expect_used)] // Panics: test fails if the stage fails
        let successor = stage
            .execute(request())
            .await
            .expect("stage should succeed")
            .expect("build stage always has a successor");

        assert_eq!(successor.subject, "v1.build.succeeded");
        #[allow(clippy::expect_used)] // Panics: test fails if the payload is malformed
        let event: BuildSucceeded =
            serde_json::from_slice(&successor.payload).expect("payload should decode");
        assert_eq!(event.app_id, "app-123");
        assert!(!event.image_uri.is_empty());
        assert!(!event.git_commit_sha.is_empty());
    }
}
