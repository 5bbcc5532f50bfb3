//! Message bus capability for cross-stage communication.
//!
//! This module provides the [`MessageBus`] trait: the minimal surface a
//! pipeline process needs from a transport. Publishing sends opaque bytes
//! on a subject; subscribing with a queue-group name joins a competing
//! consumer set where the bus delivers each message to exactly one member.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  v1.deployment.requested   ┌───────────────┐
//! │ Ingress  │ ──────────────────────────▶│ build-workers │ (one of N)
//! └──────────┘                            └───────┬───────┘
//!                                                 │ v1.build.succeeded
//!                                                 ▼
//!                                         ┌───────────────┐
//!                                         │  oal-workers  │ (one of N)
//!                                         └───────────────┘
//! ```
//!
//! # Key Principles
//!
//! - **Capability, not transport**: the core depends only on this trait;
//!   concrete transports (Kafka, in-memory) live in their own crates
//! - **Queue-group load balancing**: members of a group compete; a message
//!   reaches exactly one of them
//! - **No ordering across subjects**: ordering is only meaningful per
//!   subject and is not guaranteed across competing consumers in a group
//! - **Infinite streams**: a subscription yields messages until it is torn
//!   down during drain or the connection closes; an idle poll window is
//!   not an error and never surfaces to stage logic
//!
//! # Dyn Compatibility
//!
//! The trait uses explicit `Pin<Box<dyn Future>>` returns instead of
//! `async fn` so it can be used as a trait object (`Arc<dyn MessageBus>`)
//! and shared across consumer tasks and HTTP handlers.

use crate::envelope::Envelope;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during bus operations.
#[derive(Error, Debug, Clone)]
pub enum BusError {
    /// Failed to establish or keep the bus connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a payload to a subject.
    #[error("Publish failed for subject '{subject}': {reason}")]
    PublishFailed {
        /// The subject that failed.
        subject: String,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to create a queue-group subscription.
    #[error("Subscribe failed for subject '{subject}' (group '{group}'): {reason}")]
    SubscribeFailed {
        /// The subject that failed to subscribe.
        subject: String,
        /// The queue group that was requested.
        group: String,
        /// The reason for failure.
        reason: String,
    },

    /// The connection has been closed; no further operations are possible.
    #[error("Bus connection closed")]
    Closed,
}

/// Infinite stream of inbound envelopes from one subscription.
///
/// The stream ends only when the subscription is torn down (drain) or the
/// underlying connection is closed. Consuming it may block indefinitely
/// waiting for the next message.
pub type EnvelopeStream = Pin<Box<dyn Stream<Item = Envelope> + Send>>;

/// Trait for message bus implementations.
///
/// All implementations must be safe for concurrent use: `publish` may be
/// invoked from multiple consumer loops at once without external locking.
///
/// # Examples
///
/// ```rust,ignore
/// use futures::StreamExt;
///
/// // Publish the first pipeline event
/// bus.publish("v1.deployment.requested", &payload).await?;
///
/// // Join the build-worker competing consumer set
/// let mut stream = bus.subscribe("v1.deployment.requested", "build-workers").await?;
/// while let Some(envelope) = stream.next().await {
///     // ... decode, process, then envelope.ack() / nak() / term()
/// }
/// ```
pub trait MessageBus: Send + Sync {
    /// Publish opaque payload bytes on a subject.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::PublishFailed`] if the transport rejects or
    /// cannot deliver the payload, [`BusError::Closed`] after the
    /// connection has been released.
    fn publish(
        &self,
        subject: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>>;

    /// Subscribe to a subject as a member of a queue group.
    ///
    /// Multiple subscribers sharing a group form a competing consumer set:
    /// each message on the subject is delivered to exactly one member.
    /// The subscription lives until the returned stream is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscribeFailed`] if the subscription cannot be
    /// created, [`BusError::Closed`] after the connection has been
    /// released.
    fn subscribe(
        &self,
        subject: &str,
        group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<EnvelopeStream, BusError>> + Send + '_>>;
}
