//! Build stage: consumes `DeploymentRequested`, produces an artifact, and
//! publishes `BuildSucceeded`.
//!
//! The build itself is an injectable effect behind [`BuildEffect`]; the
//! shipped implementation simulates the work (clone, buildpacks, registry
//! push) with a sleep and a deterministic artifact descriptor.

pub mod config;
pub mod stage;

pub use config::Config;
pub use stage::{Artifact, BuildEffect, BuildError, BuildStage, SimulatedBuild};
