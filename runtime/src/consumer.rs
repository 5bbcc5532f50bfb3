//! Stage consumer: the dequeue-process-resolve loop shared by all stages.
//!
//! A stage consumer binds one queue-group subscription to one
//! [`StageHandler`]. Per message it walks a fixed state machine with
//! exactly one terminal resolution:
//!
//! 1. **decode** the JSON payload — failure terminates the message
//!    (malformed input can never become valid by retrying)
//! 2. **validate** required fields — failure terminates
//! 3. **execute** the stage side effect — runs to completion, never
//!    cancelled by shutdown
//! 4. **publish** the successor event, if the stage has one — publish
//!    failure negatively-acknowledges so another group member retries;
//!    success (or no successor) acknowledges
//!
//! Negative acknowledgment is capped: once a message's delivery attempt
//! exceeds the consumer's redelivery limit, the would-be nak becomes a
//! terminate with an error record, so a permanently failing downstream
//! cannot loop a message forever.
//!
//! Messages are processed one at a time per consumer instance; a slow
//! side effect delays only this instance's next dequeue while other group
//! members continue. The shutdown signal is consulted only at the dequeue
//! point, which is what lets the drain protocol stop intake without
//! abandoning the message in hand.

use async_trait::async_trait;
use conveyor_core::bus::{BusError, EnvelopeStream, MessageBus};
use conveyor_core::envelope::Envelope;
use conveyor_core::events::PipelineEvent;
use futures::StreamExt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Default cap on redelivery attempts before a message is terminated.
pub const DEFAULT_NAK_LIMIT: u32 = 5;

/// Failure inside a stage's processing of a valid message.
#[derive(Error, Debug)]
pub enum StageError {
    /// The stage side effect reported a failure. The effect contract is
    /// repeatable, so the message is redelivered rather than discarded.
    #[error("side effect failed: {0}")]
    Effect(String),

    /// Encoding the successor event failed.
    #[error("could not encode successor event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A successor event ready to publish when a message completes.
#[derive(Debug, Clone)]
pub struct Successor {
    /// Subject to publish on.
    pub subject: String,
    /// JSON payload bytes.
    pub payload: Vec<u8>,
}

impl Successor {
    /// Build a successor from a pipeline event.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Encode`] if the event cannot be serialized.
    pub fn from_event<E: PipelineEvent>(event: &E) -> Result<Self, StageError> {
        Ok(Self {
            subject: event.subject().to_string(),
            payload: event.to_bytes()?,
        })
    }
}

/// The pluggable part of a stage: its input type and side effect.
///
/// Implementations must be safe to repeat for the same input: a message
/// whose successor publish failed is redelivered and executed again, so
/// the successor must carry the same identifiers on every run (no fresh
/// random identifiers minted per attempt).
#[async_trait]
pub trait StageHandler: Send + Sync + 'static {
    /// Payload type this stage consumes.
    type Input: PipelineEvent;

    /// Stage name for logs.
    fn stage(&self) -> &'static str;

    /// Perform the stage side effect for a decoded, validated input and
    /// return the successor event to publish, if this stage has one.
    ///
    /// # Errors
    ///
    /// Returns [`StageError`] if the effect fails; the consumer then
    /// requeues the message for redelivery.
    async fn execute(&self, input: Self::Input) -> Result<Option<Successor>, StageError>;
}

/// One queue-group consumer driving a [`StageHandler`].
///
/// # Lifecycle
///
/// 1. Created via [`StageConsumer::new`]
/// 2. Started via [`StageConsumer::start`], which subscribes and spawns
///    the loop — a subscribe failure at startup is fatal to the process
/// 3. Runs until the drain signal flips or the stream ends
pub struct StageConsumer<H: StageHandler> {
    subject: String,
    group: String,
    bus: Arc<dyn MessageBus>,
    handler: Arc<H>,
    shutdown: watch::Receiver<bool>,
    nak_limit: u32,
}

impl<H: StageHandler> StageConsumer<H> {
    /// Create a consumer for one subject/group pair.
    #[must_use]
    pub fn new(
        subject: impl Into<String>,
        group: impl Into<String>,
        bus: Arc<dyn MessageBus>,
        handler: Arc<H>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            subject: subject.into(),
            group: group.into(),
            bus,
            handler,
            shutdown,
            nak_limit: DEFAULT_NAK_LIMIT,
        }
    }

    /// Override the redelivery cap.
    #[must_use]
    pub fn with_nak_limit(mut self, nak_limit: u32) -> Self {
        self.nak_limit = nak_limit;
        self
    }

    /// Subscribe and spawn the consumer loop.
    ///
    /// The subscription is created before spawning so that a broken bus
    /// surfaces at process startup instead of inside a background task.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscribeFailed`] (or [`BusError::Closed`]) if
    /// the queue-group subscription cannot be created.
    pub async fn start(mut self) -> Result<tokio::task::JoinHandle<()>, BusError> {
        let stream = self.bus.subscribe(&self.subject, &self.group).await?;
        info!(
            stage = self.handler.stage(),
            subject = %self.subject,
            group = %self.group,
            "Listening for events"
        );
        Ok(tokio::spawn(async move { self.run(stream).await }))
    }

    async fn run(&mut self, mut stream: EnvelopeStream) {
        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        info!(stage = self.handler.stage(), "Drain signal received, stopping intake");
                        break;
                    }
                }
                envelope = stream.next() => {
                    match envelope {
                        Some(envelope) => self.process(envelope).await,
                        None => {
                            warn!(stage = self.handler.stage(), "Envelope stream ended");
                            break;
                        }
                    }
                }
            }
        }

        // Dropping the stream tears the subscription down; the message
        // processed above (if any) was already resolved.
        drop(stream);
        info!(stage = self.handler.stage(), "Stage consumer stopped");
    }

    /// Walk one message through the stage state machine.
    async fn process(&self, envelope: Envelope) {
        let stage = self.handler.stage();

        let input = match H::Input::from_bytes(&envelope.payload) {
            Ok(input) => input,
            Err(err) => {
                error!(
                    stage,
                    subject = %envelope.subject,
                    error = %err,
                    "Undecodable payload, terminating message"
                );
                envelope.term();
                return;
            }
        };

        if let Err(err) = input.validate() {
            error!(
                stage,
                subject = %envelope.subject,
                error = %err,
                "Invalid payload, terminating message"
            );
            envelope.term();
            return;
        }

        // The side effect is not bus-cancellable: once started it runs to
        // completion even if the drain signal arrives meanwhile.
        let successor = match self.handler.execute(input).await {
            Ok(successor) => successor,
            Err(err) => {
                warn!(stage, error = %err, attempt = envelope.attempt, "Stage effect failed");
                self.requeue_or_terminate(envelope, "effect failure");
                return;
            }
        };

        if let Some(successor) = successor {
            if let Err(err) = self.bus.publish(&successor.subject, &successor.payload).await {
                warn!(
                    stage,
                    subject = %successor.subject,
                    error = %err,
                    attempt = envelope.attempt,
                    "Successor publish failed"
                );
                self.requeue_or_terminate(envelope, "successor publish failure");
                return;
            }
            debug!(stage, subject = %successor.subject, "Published successor event");
        }

        envelope.ack();
    }

    /// Nak for redelivery, unless this delivery already hit the cap.
    fn requeue_or_terminate(&self, envelope: Envelope, reason: &str) {
        if envelope.attempt >= self.nak_limit {
            error!(
                stage = self.handler.stage(),
                subject = %envelope.subject,
                attempt = envelope.attempt,
                limit = self.nak_limit,
                reason,
                "Redelivery limit reached, terminating message"
            );
            envelope.term();
        } else {
            envelope.nak();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::events::BuildSucceeded;

    #[test]
    fn successor_carries_the_event_subject_and_payload() {
        let event = BuildSucceeded {
            app_id: "app-123".to_string(),
            image_uri: "registry/app-123:abc".to_string(),
            git_commit_sha: "abc".to_string(),
        };

        #[allow(clippy::expect_used)] // Panics: test fails if serialization fails
        let successor = Successor::from_event(&event).expect("event should serialize");

        assert_eq!(successor.subject, "v1.build.succeeded");
        #[allow(clippy::expect_used)] // Panics: test fails if deserialization fails
        let round_trip: BuildSucceeded =
            serde_json::from_slice(&successor.payload).expect("payload should decode");
        assert_eq!(round_trip, event);
    }
}
