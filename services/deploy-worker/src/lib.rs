//! Deploy stage: consumes `BuildSucceeded` and installs the artifact.
//!
//! This is the last stage of the pipeline — a valid message acknowledges
//! with no successor event. The rollout itself is an injectable effect
//! behind [`DeployEffect`]; the shipped implementation simulates it.

pub mod config;
pub mod stage;

pub use config::Config;
pub use stage::{DeployEffect, DeployError, DeployStage, SimulatedDeploy};
