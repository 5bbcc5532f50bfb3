//! # Conveyor Core
//!
//! Core traits and types for the Conveyor deployment pipeline.
//!
//! This crate defines the capability surface every pipeline process depends
//! on, independent of any concrete transport:
//!
//! - [`bus::MessageBus`]: publish/subscribe over named subjects with
//!   queue-group (competing consumer) semantics
//! - [`envelope::Envelope`]: an inbound message carrying its single-use
//!   delivery resolution handle
//! - [`events`]: the wire-level pipeline events ([`events::DeploymentRequested`],
//!   [`events::BuildSucceeded`]) and their validation rules
//!
//! ## Delivery model
//!
//! Every inbound message must reach exactly one of three terminal
//! resolutions:
//!
//! - **Acknowledged** — processed, never redelivered
//! - **Negatively-acknowledged** — requeued for redelivery to some member
//!   of the same queue group
//! - **Terminated** — discarded without redelivery (malformed input can
//!   never become valid by retrying)
//!
//! The [`envelope::Delivery`] handle is consumed by resolution, so a second
//! resolution of the same message is unrepresentable.
//!
//! ## Example
//!
//! ```rust,ignore
//! use conveyor_core::bus::MessageBus;
//! use conveyor_core::events::{subjects, DeploymentRequested, PipelineEvent};
//! use futures::StreamExt;
//!
//! async fn example(bus: &dyn MessageBus) -> Result<(), Box<dyn std::error::Error>> {
//!     let request = DeploymentRequested {
//!         app_id: "app-123".to_string(),
//!         git_repository: "https://example.com/a.git".to_string(),
//!         git_branch: "main".to_string(),
//!     };
//!     bus.publish(subjects::DEPLOYMENT_REQUESTED, &request.to_bytes()?).await?;
//!
//!     let mut stream = bus.subscribe(subjects::DEPLOYMENT_REQUESTED, "build-workers").await?;
//!     while let Some(envelope) = stream.next().await {
//!         match DeploymentRequested::from_bytes(&envelope.payload) {
//!             Ok(request) => envelope.ack(),
//!             Err(_) => envelope.term(),
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod envelope;
pub mod events;

pub use bus::{BusError, EnvelopeStream, MessageBus};
pub use envelope::{Delivery, Envelope, Resolution};
