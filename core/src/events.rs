//! Pipeline events and their wire contract.
//!
//! Subjects and queue-group names are part of the wire contract and must
//! match exactly across producers and consumers; they live here as
//! constants so no service spells them by hand. Payloads are JSON objects
//! with the field names fixed by the contract.
//!
//! Validation is split from decoding on purpose: undecodable bytes and
//! well-formed-but-invalid payloads are distinct failure classes, even
//! though both terminate the message.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use url::Url;

/// Bus subjects carried by the pipeline.
pub mod subjects {
    /// A deployment has been requested by the ingress.
    pub const DEPLOYMENT_REQUESTED: &str = "v1.deployment.requested";
    /// A build worker produced an artifact.
    pub const BUILD_SUCCEEDED: &str = "v1.build.succeeded";
}

/// Queue-group names for the competing consumer sets.
pub mod groups {
    /// Build stage workers.
    pub const BUILD_WORKERS: &str = "build-workers";
    /// Deploy (orchestration abstraction layer) workers.
    pub const OAL_WORKERS: &str = "oal-workers";
}

/// Errors from required-field validation of a decoded payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("required field '{0}' is empty")]
    MissingField(&'static str),

    /// The repository field is present but not a syntactically valid URL.
    #[error("git_repository is not a valid URL: {reason}")]
    InvalidRepositoryUrl {
        /// Parser diagnostic.
        reason: String,
    },
}

/// An event that travels the pipeline as a JSON payload.
///
/// The trait pins each event to its subject and provides the JSON
/// encode/decode used on both sides of the bus.
pub trait PipelineEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The subject this event is published on.
    fn subject(&self) -> &'static str;

    /// Check the required-field invariants of a decoded payload.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] naming the first violated invariant.
    fn validate(&self) -> Result<(), ValidationError>;

    /// Serialize this event to its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error; with these payload
    /// types this only fails under resource exhaustion.
    fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize an event from its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error for malformed or
    /// mistyped payloads.
    fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Request to build and deploy an application, published by the ingress
/// and consumed by the build stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRequested {
    /// Identifier of the target application.
    pub app_id: String,
    /// Git repository to build from.
    pub git_repository: String,
    /// Branch to build.
    pub git_branch: String,
}

impl PipelineEvent for DeploymentRequested {
    fn subject(&self) -> &'static str {
        subjects::DEPLOYMENT_REQUESTED
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.app_id.is_empty() {
            return Err(ValidationError::MissingField("app_id"));
        }
        if self.git_repository.is_empty() {
            return Err(ValidationError::MissingField("git_repository"));
        }
        Url::parse(&self.git_repository).map_err(|e| ValidationError::InvalidRepositoryUrl {
            reason: e.to_string(),
        })?;
        if self.git_branch.is_empty() {
            return Err(ValidationError::MissingField("git_branch"));
        }
        Ok(())
    }
}

/// Successful build result, published by the build stage and consumed by
/// the deploy stage. Only emitted after the build side effect completed
/// without error; `app_id` always equals the originating request's.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSucceeded {
    /// Identifier of the application the artifact belongs to.
    pub app_id: String,
    /// Identifier of the produced artifact.
    pub image_uri: String,
    /// Commit the artifact was built from.
    pub git_commit_sha: String,
}

impl PipelineEvent for BuildSucceeded {
    fn subject(&self) -> &'static str {
        subjects::BUILD_SUCCEEDED
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.app_id.is_empty() {
            return Err(ValidationError::MissingField("app_id"));
        }
        if self.image_uri.is_empty() {
            return Err(ValidationError::MissingField("image_uri"));
        }
        if self.git_commit_sha.is_empty() {
            return Err(ValidationError::MissingField("git_commit_sha"));
        }
        Ok(())
    }
}
