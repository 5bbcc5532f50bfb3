//! # Conveyor Runtime
//!
//! Runtime building blocks shared by every Conveyor service.
//!
//! This crate provides the three lifecycle pieces each pipeline process is
//! assembled from:
//!
//! - **Connection bootstrap** ([`connect`]): establish the bus connection
//!   with bounded exponential backoff and full jitter before doing
//!   anything else
//! - **Stage consumer** ([`consumer`]): the dequeue → decode → validate →
//!   execute → publish-successor → resolve loop shared by the build and
//!   deploy stages
//! - **Shutdown coordinator** ([`shutdown`]): drain in-flight work on a
//!   termination signal, then — and only then — release the connection
//!
//! ## Example
//!
//! ```ignore
//! use conveyor_runtime::{ConnectPolicy, ShutdownCoordinator, StageConsumer, connect_with_retry};
//!
//! let bus = connect_with_retry(&ConnectPolicy::default(), &connector).await?;
//!
//! let mut coordinator = ShutdownCoordinator::new(grace);
//! let consumer = StageConsumer::new(subject, group, bus, handler, coordinator.subscribe());
//! coordinator.register_worker("build-stage", consumer.start().await?);
//!
//! conveyor_runtime::wait_for_signal().await;
//! coordinator.drain().await;
//! ```

/// Connection bootstrap with bounded exponential backoff and jitter
pub mod connect;

/// Stage consumer loop and handler trait
pub mod consumer;

/// Drain protocol and termination-signal handling
pub mod shutdown;

pub use connect::{ConnectError, ConnectPolicy, Connector, connect_with_retry};
pub use consumer::{StageConsumer, StageError, StageHandler, Successor};
pub use shutdown::{
    DrainOutcome, LifecycleState, ShutdownCoordinator, ShutdownHandler, wait_for_signal,
};
