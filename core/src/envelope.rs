//! Inbound message envelope and delivery resolution.
//!
//! Every message handed to a consumer arrives wrapped in an [`Envelope`]
//! that carries the raw payload, the subject it was published on, the
//! delivery attempt number, and a single-use [`Delivery`] handle. The
//! handle is how the consumer tells the transport what to do with the
//! message: keep it ([`Envelope::ack`]), requeue it for another group
//! member ([`Envelope::nak`]), or discard it for good ([`Envelope::term`]).
//!
//! # Exactly-one-resolution
//!
//! Resolution methods take `self` by value, so the type system rules out
//! resolving a message twice. The inverse defect — dropping an envelope
//! without resolving it — is observable by the transport: the resolution
//! channel closes without a value, and the transport must treat the
//! message as negatively-acknowledged rather than losing it silently.

use tokio::sync::oneshot;

/// Terminal resolution of an inbound message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// The message was processed; it must never be redelivered.
    Acknowledged,
    /// Processing did not complete; requeue the message for redelivery
    /// to some member of the queue group.
    NegativelyAcknowledged,
    /// The message is unprocessable; discard it without redelivery.
    Terminated,
}

/// Single-use handle resolving one message's delivery state.
///
/// Created by the transport via [`Delivery::channel`]; the transport keeps
/// the receiving half and blocks its next dequeue on it.
#[derive(Debug)]
pub struct Delivery {
    tx: oneshot::Sender<Resolution>,
}

impl Delivery {
    /// Create a delivery handle plus the receiver the transport waits on.
    ///
    /// If the handle is dropped unresolved, the receiver completes with
    /// [`oneshot::error::RecvError`] and the transport must handle the
    /// message as negatively-acknowledged.
    #[must_use]
    pub fn channel() -> (Self, oneshot::Receiver<Resolution>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Resolve with the given terminal state.
    ///
    /// A send error means the transport already tore the subscription
    /// down; the message's fate is then governed by the transport's
    /// redelivery rules, and there is nothing further the consumer can do.
    pub fn resolve(self, resolution: Resolution) {
        let _ = self.tx.send(resolution);
    }
}

/// An inbound message together with its delivery handle.
#[derive(Debug)]
pub struct Envelope {
    /// Subject the message was published on.
    pub subject: String,
    /// Opaque payload bytes as published.
    pub payload: Vec<u8>,
    /// Delivery attempt, starting at 1 for the first delivery.
    pub attempt: u32,
    delivery: Delivery,
}

impl Envelope {
    /// Wrap a payload and its delivery handle.
    #[must_use]
    pub fn new(subject: impl Into<String>, payload: Vec<u8>, attempt: u32, delivery: Delivery) -> Self {
        Self {
            subject: subject.into(),
            payload,
            attempt,
            delivery,
        }
    }

    /// Acknowledge: processed, never redeliver.
    pub fn ack(self) {
        self.delivery.resolve(Resolution::Acknowledged);
    }

    /// Negatively acknowledge: requeue for redelivery within the group.
    pub fn nak(self) {
        self.delivery.resolve(Resolution::NegativelyAcknowledged);
    }

    /// Terminate: discard without redelivery.
    pub fn term(self) {
        self.delivery.resolve(Resolution::Terminated);
    }
}
