//! # Conveyor Testing
//!
//! Testing utilities for the Conveyor pipeline.
//!
//! This crate provides:
//! - [`bus::InMemoryBus`]: a deterministic in-process transport with real
//!   queue-group competing-consumer semantics, failure injection, and a
//!   journal of published payloads and delivery resolutions
//! - [`connectors::ScriptedConnector`]: a [`conveyor_runtime::Connector`]
//!   that fails a scripted number of attempts, for exercising the
//!   bootstrap retry budget
//!
//! ## Example
//!
//! ```ignore
//! use conveyor_testing::InMemoryBus;
//! use std::sync::Arc;
//!
//! #[tokio::test]
//! async fn build_stage_acknowledges_valid_requests() {
//!     let bus = Arc::new(InMemoryBus::new());
//!     let stream = bus.subscribe("v1.deployment.requested", "build-workers").await?;
//!     bus.publish("v1.deployment.requested", payload).await?;
//!     // ... drive the consumer, then:
//!     assert_eq!(bus.published("v1.build.succeeded").len(), 1);
//! }
//! ```

/// In-memory message bus with queue-group semantics.
pub mod bus;

/// Scripted connectors for bootstrap tests.
pub mod connectors;

pub use bus::InMemoryBus;
pub use connectors::ScriptedConnector;
