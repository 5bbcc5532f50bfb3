//! In-memory message bus with queue-group competing-consumer semantics.
//!
//! [`InMemoryBus`] is a faithful test double for the transport: each
//! (subject, group) pair gets a dispatcher that hands every message to
//! exactly one live group member, waits for its terminal resolution, and
//! requeues negatively-acknowledged messages with an incremented attempt
//! counter. Published payloads and resolutions are journaled so tests can
//! assert on exactly what crossed the bus and how each message ended.
//!
//! Failure injection:
//! - [`InMemoryBus::fail_publishes`] makes publishes to one subject fail,
//!   which is how tests force the negative-acknowledge path
//! - [`InMemoryBus::close`] releases the "connection": streams end, new
//!   operations return [`BusError::Closed`], and the journal records how
//!   many resolutions had happened at close time so shutdown-ordering
//!   tests can prove resolution happened-before close.

use async_trait::async_trait;
use conveyor_core::bus::{BusError, EnvelopeStream, MessageBus};
use conveyor_core::envelope::{Delivery, Envelope, Resolution};
use conveyor_runtime::ShutdownHandler;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

/// A message waiting in a group's queue.
struct Queued {
    payload: Vec<u8>,
    attempt: u32,
}

/// Live members of one competing-consumer set.
#[derive(Default)]
struct MemberSet {
    senders: Vec<mpsc::Sender<Envelope>>,
    next: usize,
}

impl MemberSet {
    /// Next live member, round-robin. Closed members are pruned.
    fn pick(&mut self) -> Option<mpsc::Sender<Envelope>> {
        self.senders.retain(|sender| !sender.is_closed());
        if self.senders.is_empty() {
            return None;
        }
        let index = self.next % self.senders.len();
        self.next = self.next.wrapping_add(1);
        Some(self.senders[index].clone())
    }
}

type Members = Arc<Mutex<MemberSet>>;

struct Group {
    queue_tx: mpsc::UnboundedSender<Queued>,
    members: Members,
}

#[derive(Default)]
struct Journal {
    published: HashMap<String, Vec<Vec<u8>>>,
    resolutions: HashMap<String, Vec<Resolution>>,
    total_resolutions: usize,
    resolutions_at_close: Option<usize>,
}

#[derive(Default)]
struct State {
    groups: HashMap<(String, String), Group>,
    failing: HashSet<String>,
    closed: bool,
}

/// Deterministic in-process transport for tests.
pub struct InMemoryBus {
    state: Mutex<State>,
    journal: Arc<Mutex<Journal>>,
    /// Envelopes handed out but not yet journaled as resolved.
    in_flight: Arc<AtomicUsize>,
    /// Pause before requeueing a negatively-acknowledged message.
    redelivery_delay: Duration,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBus {
    /// Create an open bus with no subscriptions.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            journal: Arc::new(Mutex::new(Journal::default())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            redelivery_delay: Duration::from_millis(25),
        }
    }

    /// Override the pause before a nak'd message is requeued.
    #[must_use]
    pub fn with_redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = delay;
        self
    }

    /// Make publishes to `subject` fail until [`Self::restore_publishes`].
    pub fn fail_publishes(&self, subject: &str) {
        lock(&self.state).failing.insert(subject.to_string());
    }

    /// Let publishes to `subject` succeed again.
    pub fn restore_publishes(&self, subject: &str) {
        lock(&self.state).failing.remove(subject);
    }

    /// Payloads successfully published on `subject`, oldest first.
    #[must_use]
    pub fn published(&self, subject: &str) -> Vec<Vec<u8>> {
        lock(&self.journal)
            .published
            .get(subject)
            .cloned()
            .unwrap_or_default()
    }

    /// Terminal resolutions of messages consumed from `subject`, in
    /// resolution order (redeliveries appear once per delivery).
    #[must_use]
    pub fn resolutions(&self, subject: &str) -> Vec<Resolution> {
        lock(&self.journal)
            .resolutions
            .get(subject)
            .cloned()
            .unwrap_or_default()
    }

    /// Total resolutions recorded across all subjects.
    #[must_use]
    pub fn total_resolutions(&self) -> usize {
        lock(&self.journal).total_resolutions
    }

    /// Release the connection: subscriber streams end and further
    /// operations return [`BusError::Closed`].
    pub fn close(&self) {
        let mut state = lock(&self.state);
        state.closed = true;
        // Dropping the groups drops the queue senders; dispatchers exit
        // after finishing the resolution they are waiting on, and member
        // streams end once their senders are gone.
        state.groups.clear();
        drop(state);

        let mut journal = lock(&self.journal);
        journal.resolutions_at_close = Some(journal.total_resolutions);
    }

    /// Whether [`Self::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// How many resolutions had been recorded when the bus was closed.
    /// `None` while the bus is still open.
    #[must_use]
    pub fn resolutions_at_close(&self) -> Option<usize> {
        lock(&self.journal).resolutions_at_close
    }

    /// A drain-phase handler that settles outstanding resolutions and
    /// then releases this bus.
    #[must_use]
    pub fn release_handler(self: &Arc<Self>) -> Arc<dyn ShutdownHandler> {
        Arc::new(BusRelease(Arc::clone(self)))
    }

    /// Wait (bounded) until every handed-out envelope has been journaled
    /// as resolved. The consumer's `ack()` returns before the dispatcher
    /// records the resolution; settling closes that gap.
    pub async fn settle(&self) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while self.in_flight.load(Ordering::SeqCst) > 0
            && tokio::time::Instant::now() < deadline
        {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    /// Wait until `count` resolutions have been journaled for `subject`.
    ///
    /// Resolutions are recorded by dispatcher tasks, so assertions right
    /// after an `ack()` can race; tests use this to rendezvous. Returns
    /// `false` on timeout (1s) so the subsequent assertion still reports
    /// the observed state.
    pub async fn wait_for_resolutions(&self, subject: &str, count: usize) -> bool {
        self.wait_until(|| self.resolutions(subject).len() >= count)
            .await
    }

    /// Wait until `count` payloads have been published on `subject`.
    pub async fn wait_for_published(&self, subject: &str, count: usize) -> bool {
        self.wait_until(|| self.published(subject).len() >= count)
            .await
    }

    async fn wait_until(&self, predicate: impl Fn() -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while tokio::time::Instant::now() < deadline {
            if predicate() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        predicate()
    }
}

/// Ignore mutex poisoning: a panicking test thread should not mask the
/// original failure with a second one.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn record_resolution(journal: &Arc<Mutex<Journal>>, subject: &str, resolution: Resolution) {
    let mut journal = lock(journal);
    journal
        .resolutions
        .entry(subject.to_string())
        .or_default()
        .push(resolution);
    journal.total_resolutions += 1;
}

/// Per-(subject, group) delivery loop: one message at a time, to exactly
/// one member, requeueing on negative acknowledgment.
async fn dispatch(
    subject: String,
    mut queue_rx: mpsc::UnboundedReceiver<Queued>,
    // Weak so the dispatcher's own requeue handle cannot keep the queue
    // alive after the bus is closed; recv() then drains and ends.
    queue_tx: mpsc::WeakUnboundedSender<Queued>,
    members: Members,
    journal: Arc<Mutex<Journal>>,
    in_flight: Arc<AtomicUsize>,
    redelivery_delay: Duration,
) {
    while let Some(message) = queue_rx.recv().await {
        // Wait until the group has a live member; an empty poll window is
        // internal and never surfaces.
        let sender = loop {
            let candidate = lock(&members).pick();
            match candidate {
                Some(sender) => break sender,
                None => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        };

        let (delivery, resolution) = Delivery::channel();
        let envelope = Envelope::new(
            subject.clone(),
            message.payload.clone(),
            message.attempt,
            delivery,
        );

        in_flight.fetch_add(1, Ordering::SeqCst);
        if sender.send(envelope).await.is_err() {
            // Member went away before taking delivery; try again.
            in_flight.fetch_sub(1, Ordering::SeqCst);
            if let Some(queue) = queue_tx.upgrade() {
                let _ = queue.send(message);
            }
            continue;
        }

        let requeue = match resolution.await {
            Ok(resolution) => {
                record_resolution(&journal, &subject, resolution);
                resolution == Resolution::NegativelyAcknowledged
            }
            Err(_) => {
                warn!(subject = %subject, "Envelope dropped without resolution, requeueing");
                true
            }
        };
        in_flight.fetch_sub(1, Ordering::SeqCst);

        if requeue {
            tokio::time::sleep(redelivery_delay).await;
            if let Some(queue) = queue_tx.upgrade() {
                let _ = queue.send(Queued {
                    payload: message.payload,
                    attempt: message.attempt + 1,
                });
            }
        }
    }
}

impl MessageBus for InMemoryBus {
    fn publish(
        &self,
        subject: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        let subject = subject.to_string();
        let payload = payload.to_vec();

        Box::pin(async move {
            let state = lock(&self.state);
            if state.closed {
                return Err(BusError::Closed);
            }
            if state.failing.contains(&subject) {
                return Err(BusError::PublishFailed {
                    subject: subject.clone(),
                    reason: "injected publish failure".to_string(),
                });
            }

            for ((group_subject, _), group) in &state.groups {
                if *group_subject == subject {
                    let _ = group.queue_tx.send(Queued {
                        payload: payload.clone(),
                        attempt: 1,
                    });
                }
            }
            drop(state);

            lock(&self.journal)
                .published
                .entry(subject)
                .or_default()
                .push(payload);
            Ok(())
        })
    }

    fn subscribe(
        &self,
        subject: &str,
        group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<EnvelopeStream, BusError>> + Send + '_>> {
        let subject = subject.to_string();
        let group = group.to_string();

        Box::pin(async move {
            let (member_tx, mut member_rx) = mpsc::channel(1);

            {
                let mut state = lock(&self.state);
                if state.closed {
                    return Err(BusError::Closed);
                }

                let journal = Arc::clone(&self.journal);
                let in_flight = Arc::clone(&self.in_flight);
                let redelivery_delay = self.redelivery_delay;
                let entry = state
                    .groups
                    .entry((subject.clone(), group.clone()))
                    .or_insert_with(|| {
                        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
                        let members: Members = Arc::new(Mutex::new(MemberSet::default()));
                        tokio::spawn(dispatch(
                            subject.clone(),
                            queue_rx,
                            queue_tx.downgrade(),
                            Arc::clone(&members),
                            journal,
                            in_flight,
                            redelivery_delay,
                        ));
                        Group { queue_tx, members }
                    });
                lock(&entry.members).senders.push(member_tx);
            }

            let stream = async_stream::stream! {
                while let Some(envelope) = member_rx.recv().await {
                    yield envelope;
                }
            };

            Ok(Box::pin(stream) as EnvelopeStream)
        })
    }
}

/// Releases the in-memory bus during the post-drain phase.
struct BusRelease(Arc<InMemoryBus>);

#[async_trait]
impl ShutdownHandler for BusRelease {
    fn name(&self) -> &str {
        "bus-connection"
    }

    async fn shutdown(&self) -> Result<(), String> {
        self.0.settle().await;
        self.0.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn publish_is_journaled_without_subscribers() {
        let bus = InMemoryBus::new();
        #[allow(clippy::expect_used)] // Panics: test fails if publish fails
        bus.publish("a.subject", b"payload").await.expect("publish should succeed");
        assert_eq!(bus.published("a.subject"), vec![b"payload".to_vec()]);
    }

    #[tokio::test]
    async fn injected_failure_rejects_publishes() {
        let bus = InMemoryBus::new();
        bus.fail_publishes("a.subject");
        assert!(matches!(
            bus.publish("a.subject", b"payload").await,
            Err(BusError::PublishFailed { .. })
        ));
        assert!(bus.published("a.subject").is_empty());

        bus.restore_publishes("a.subject");
        assert!(bus.publish("a.subject", b"payload").await.is_ok());
    }

    #[tokio::test]
    async fn each_message_reaches_exactly_one_group_member() {
        let bus = Arc::new(InMemoryBus::new());
        #[allow(clippy::expect_used)] // Panics: test fails if subscribe fails
        let mut first = bus.subscribe("a.subject", "workers").await.expect("subscribe");
        #[allow(clippy::expect_used)] // Panics: test fails if subscribe fails
        let mut second = bus.subscribe("a.subject", "workers").await.expect("subscribe");

        for i in 0..4u8 {
            #[allow(clippy::expect_used)] // Panics: test fails if publish fails
            bus.publish("a.subject", &[i]).await.expect("publish");
        }

        // Round-robin across the two members: each sees two messages and
        // the union is all four, with no duplicates.
        let mut seen = Vec::new();
        for _ in 0..2 {
            #[allow(clippy::expect_used)] // Panics: test fails if the stream ends early
            let envelope = first.next().await.expect("stream should yield");
            seen.push(envelope.payload[0]);
            envelope.ack();
            #[allow(clippy::expect_used)] // Panics: test fails if the stream ends early
            let envelope = second.next().await.expect("stream should yield");
            seen.push(envelope.payload[0]);
            envelope.ack();
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert!(bus.wait_for_resolutions("a.subject", 4).await);
        assert_eq!(bus.resolutions("a.subject").len(), 4);
    }

    #[tokio::test]
    async fn nak_redelivers_with_incremented_attempt() {
        let bus = Arc::new(InMemoryBus::new());
        #[allow(clippy::expect_used)] // Panics: test fails if subscribe fails
        let mut stream = bus.subscribe("a.subject", "workers").await.expect("subscribe");
        #[allow(clippy::expect_used)] // Panics: test fails if publish fails
        bus.publish("a.subject", b"retry-me").await.expect("publish");

        #[allow(clippy::expect_used)] // Panics: test fails if the stream ends early
        let envelope = stream.next().await.expect("first delivery");
        assert_eq!(envelope.attempt, 1);
        envelope.nak();

        #[allow(clippy::expect_used)] // Panics: test fails if the stream ends early
        let envelope = stream.next().await.expect("redelivery");
        assert_eq!(envelope.attempt, 2);
        assert_eq!(envelope.payload, b"retry-me".to_vec());
        envelope.ack();

        assert!(bus.wait_for_resolutions("a.subject", 2).await);
        assert_eq!(
            bus.resolutions("a.subject"),
            vec![Resolution::NegativelyAcknowledged, Resolution::Acknowledged]
        );
    }

    #[tokio::test]
    async fn close_ends_streams_and_snapshots_the_journal() {
        let bus = Arc::new(InMemoryBus::new());
        #[allow(clippy::expect_used)] // Panics: test fails if subscribe fails
        let mut stream = bus.subscribe("a.subject", "workers").await.expect("subscribe");
        #[allow(clippy::expect_used)] // Panics: test fails if publish fails
        bus.publish("a.subject", b"payload").await.expect("publish");

        #[allow(clippy::expect_used)] // Panics: test fails if the stream ends early
        let envelope = stream.next().await.expect("delivery");
        envelope.ack();

        // The dispatcher records the resolution asynchronously.
        assert!(bus.wait_for_resolutions("a.subject", 1).await);
        bus.close();

        assert!(stream.next().await.is_none());
        assert!(matches!(
            bus.publish("a.subject", b"payload").await,
            Err(BusError::Closed)
        ));
        assert_eq!(bus.resolutions_at_close(), Some(1));
    }
}
