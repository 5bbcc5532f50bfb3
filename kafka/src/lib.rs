//! Kafka/Redpanda transport for the Conveyor message bus.
//!
//! This crate implements the [`MessageBus`] trait from `conveyor-core` on
//! top of rdkafka. Subjects map to topics and queue groups map to consumer
//! groups, which gives the competing-consumer guarantee: each message is
//! delivered to exactly one member of a group.
//!
//! # Delivery semantics
//!
//! Offsets are committed manually, driven by each message's terminal
//! resolution rather than by receipt:
//!
//! - **Acknowledged** and **Terminated** commit the offset — the message
//!   is never redelivered
//! - **Negatively-acknowledged** leaves the offset uncommitted and seeks
//!   the partition back, so the message is fetched again after a short
//!   redelivery delay, with an incremented attempt counter
//! - An envelope dropped without resolution is a consumer defect; the
//!   transport logs it and treats it as negatively-acknowledged so the
//!   message is not lost
//!
//! The forwarder task processes one message at a time: it hands an
//! envelope to the subscriber and waits for its resolution before fetching
//! the next. Back-pressure is therefore implicit, and tearing down the
//! subscription (dropping the stream) can never abandon more than the one
//! in-flight message, whose uncommitted offset is redelivered to the group
//! after rebalancing.
//!
//! # Example
//!
//! ```no_run
//! use conveyor_kafka::{KafkaBus, KafkaConfig};
//! use conveyor_core::bus::MessageBus;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Bootstrap with bounded exponential backoff and jitter; fatal on
//! // exhaustion.
//! let bus = KafkaBus::connect(&KafkaConfig::from_env()).await?;
//!
//! bus.publish("v1.deployment.requested", b"{}").await?;
//! # Ok(())
//! # }
//! ```

use conveyor_core::bus::{BusError, EnvelopeStream, MessageBus};
use conveyor_core::envelope::{Delivery, Envelope, Resolution};
use conveyor_runtime::{ConnectError, Connector, connect_with_retry};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::Offset;
use rdkafka::util::Timeout;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;

mod config;

pub use config::KafkaConfig;

/// How long the bootstrap probe waits for cluster metadata.
const METADATA_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a redelivery seek may take before it is reported.
const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka-backed message bus.
///
/// One `KafkaBus` owns one producer (the process's connection handle) and
/// creates a dedicated consumer per subscription. The handle is owned by
/// the process that created it and shared inside it via `Arc`; it is never
/// shared across processes.
pub struct KafkaBus {
    producer: FutureProducer,
    brokers: String,
    producer_timeout: Duration,
    session_timeout_ms: u32,
    auto_offset_reset: String,
    redelivery_delay: Duration,
}

impl KafkaBus {
    /// Create a builder with default configuration.
    #[must_use]
    pub fn builder() -> KafkaBusBuilder {
        KafkaBusBuilder::default()
    }

    /// Bootstrap a connection with the configured retry policy.
    ///
    /// Attempts to reach the cluster, backing off exponentially with full
    /// jitter between failures, and returns the live bus on the first
    /// success.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::RetriesExhausted`] once the attempt budget
    /// is spent; callers treat this as unrecoverable and exit non-zero.
    pub async fn connect(config: &KafkaConfig) -> Result<Self, ConnectError> {
        let connector = KafkaConnector::new(config.clone());
        connect_with_retry(&config.connect, &connector).await
    }

    /// Broker addresses this bus was built for.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Verify the cluster is reachable by fetching metadata.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if the cluster does not
    /// answer within the probe timeout.
    async fn probe(&self) -> Result<(), BusError> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(None, METADATA_PROBE_TIMEOUT)
                .map(|_| ())
                .map_err(|e| BusError::ConnectionFailed(e.to_string()))
        })
        .await
        .map_err(|e| BusError::ConnectionFailed(format!("metadata probe panicked: {e}")))?
    }
}

/// Builder for configuring a [`KafkaBus`].
#[derive(Default)]
pub struct KafkaBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    producer_timeout: Option<Duration>,
    session_timeout_ms: Option<u32>,
    auto_offset_reset: Option<String>,
    redelivery_delay: Option<Duration>,
}

impl KafkaBusBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode ("0", "1", "all").
    ///
    /// Default: "1".
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the producer send timeout. Default: 5 seconds.
    #[must_use]
    pub const fn producer_timeout(mut self, timeout: Duration) -> Self {
        self.producer_timeout = Some(timeout);
        self
    }

    /// Set the consumer session timeout in milliseconds. Default: 6000.
    #[must_use]
    pub const fn session_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.session_timeout_ms = Some(timeout_ms);
        self
    }

    /// Where a new group starts reading ("earliest", "latest").
    ///
    /// Default: "latest" — workers only see events published after the
    /// group first formed.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Pause before re-fetching a negatively-acknowledged message.
    ///
    /// Default: 500ms. This is the explicit backoff between redeliveries;
    /// without it a permanently failing downstream would spin on the same
    /// offset.
    #[must_use]
    pub const fn redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = Some(delay);
        self
    }

    /// Build the [`KafkaBus`].
    ///
    /// Creating the producer does not reach the cluster; use
    /// [`KafkaBus::connect`] for a verified connection.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if brokers are not set or
    /// the producer configuration is invalid.
    pub fn build(self) -> Result<KafkaBus, BusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BusError::ConnectionFailed("brokers not configured".to_string()))?;

        let mut producer_config = ClientConfig::new();
        producer_config
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", self.producer_acks.as_deref().unwrap_or("1"));

        let producer: FutureProducer = producer_config.create().map_err(|e| {
            BusError::ConnectionFailed(format!("failed to create producer: {e}"))
        })?;

        tracing::info!(
            brokers = %brokers,
            acks = self.producer_acks.as_deref().unwrap_or("1"),
            auto_offset_reset = self.auto_offset_reset.as_deref().unwrap_or("latest"),
            "Kafka bus created"
        );

        Ok(KafkaBus {
            producer,
            brokers,
            producer_timeout: self.producer_timeout.unwrap_or(Duration::from_secs(5)),
            session_timeout_ms: self.session_timeout_ms.unwrap_or(6000),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "latest".to_string()),
            redelivery_delay: self.redelivery_delay.unwrap_or(Duration::from_millis(500)),
        })
    }
}

impl MessageBus for KafkaBus {
    fn publish(
        &self,
        subject: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        let subject = subject.to_string();
        let payload = payload.to_vec();
        let timeout = self.producer_timeout;

        Box::pin(async move {
            // Key by subject so one subject's messages share a partition.
            let record = FutureRecord::to(&subject)
                .payload(&payload)
                .key(subject.as_bytes());

            let send_result = self.producer.send(record, Timeout::After(timeout)).await;

            match send_result {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        subject = %subject,
                        partition,
                        offset,
                        "Published message"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        subject = %subject,
                        error = %kafka_error,
                        "Failed to publish message"
                    );
                    Err(BusError::PublishFailed {
                        subject,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe(
        &self,
        subject: &str,
        group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<EnvelopeStream, BusError>> + Send + '_>> {
        let subject = subject.to_string();
        let group = group.to_string();
        let brokers = self.brokers.clone();
        let session_timeout_ms = self.session_timeout_ms;
        let auto_offset_reset = self.auto_offset_reset.clone();
        let redelivery_delay = self.redelivery_delay;

        Box::pin(async move {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", session_timeout_ms.to_string())
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| BusError::SubscribeFailed {
                    subject: subject.clone(),
                    group: group.clone(),
                    reason: format!("failed to create consumer: {e}"),
                })?;

            consumer
                .subscribe(&[subject.as_str()])
                .map_err(|e| BusError::SubscribeFailed {
                    subject: subject.clone(),
                    group: group.clone(),
                    reason: format!("failed to subscribe: {e}"),
                })?;

            tracing::info!(
                subject = %subject,
                group = %group,
                manual_commit = true,
                "Joined queue group"
            );

            // Capacity 1: the forwarder waits for each resolution before
            // fetching again, so at most one envelope is ever in flight.
            let (tx, mut rx) = mpsc::channel(1);

            tokio::spawn(run_subscription(
                consumer,
                subject,
                group,
                redelivery_delay,
                tx,
            ));

            let stream = async_stream::stream! {
                while let Some(envelope) = rx.recv().await {
                    yield envelope;
                }
            };

            Ok(Box::pin(stream) as EnvelopeStream)
        })
    }
}

/// Forwarder loop: fetch one message, hand it to the subscriber, wait for
/// its resolution, then commit or seek accordingly.
async fn run_subscription(
    consumer: StreamConsumer,
    subject: String,
    group: String,
    redelivery_delay: Duration,
    tx: mpsc::Sender<Envelope>,
) {
    // Delivery attempts for offsets currently being retried. Entries are
    // removed on commit, so this only holds in-progress redeliveries.
    let mut attempts: HashMap<(i32, i64), u32> = HashMap::new();

    loop {
        let message = tokio::select! {
            received = consumer.recv() => match received {
                Ok(message) => message,
                Err(err) => {
                    tracing::warn!(
                        subject = %subject,
                        group = %group,
                        error = %err,
                        "Error receiving from broker, continuing"
                    );
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    continue;
                }
            },
            // Subscriber dropped the stream (drain): stop fetching.
            () = tx.closed() => break,
        };

        let key = (message.partition(), message.offset());
        let attempt = attempts.get(&key).copied().unwrap_or(0) + 1;
        let payload = message.payload().map(<[u8]>::to_vec).unwrap_or_default();

        let (delivery, resolution) = Delivery::channel();
        let envelope = Envelope::new(subject.clone(), payload, attempt, delivery);

        if tx.send(envelope).await.is_err() {
            // Stream dropped before taking delivery. The offset stays
            // uncommitted and the group redelivers after rebalancing.
            break;
        }

        let resolution = match resolution.await {
            Ok(resolution) => resolution,
            Err(_) => {
                tracing::warn!(
                    subject = %subject,
                    partition = message.partition(),
                    offset = message.offset(),
                    "Envelope dropped without resolution, treating as negative acknowledgment"
                );
                Resolution::NegativelyAcknowledged
            }
        };

        match resolution {
            Resolution::Acknowledged | Resolution::Terminated => {
                attempts.remove(&key);
                if let Err(err) = consumer.commit_message(&message, CommitMode::Async) {
                    tracing::warn!(
                        subject = %subject,
                        partition = message.partition(),
                        offset = message.offset(),
                        error = %err,
                        "Failed to commit offset (message may be redelivered)"
                    );
                }
            }
            Resolution::NegativelyAcknowledged => {
                attempts.insert(key, attempt);
                tokio::time::sleep(redelivery_delay).await;
                if let Err(err) = consumer.seek(
                    message.topic(),
                    message.partition(),
                    Offset::Offset(message.offset()),
                    SEEK_TIMEOUT,
                ) {
                    tracing::error!(
                        subject = %subject,
                        partition = message.partition(),
                        offset = message.offset(),
                        error = %err,
                        "Failed to seek for redelivery"
                    );
                }
            }
        }
    }

    tracing::debug!(subject = %subject, group = %group, "Subscription task exiting");
}

/// Bootstrap connector: builds the producer and verifies the cluster
/// answers a metadata probe.
pub struct KafkaConnector {
    config: KafkaConfig,
}

impl KafkaConnector {
    /// Create a connector for the given configuration.
    #[must_use]
    pub const fn new(config: KafkaConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl Connector for KafkaConnector {
    type Connection = KafkaBus;
    type Error = BusError;

    async fn connect(&self) -> Result<KafkaBus, BusError> {
        let bus = KafkaBus::builder()
            .brokers(&self.config.brokers)
            .producer_timeout(self.config.producer_timeout)
            .session_timeout_ms(self.config.session_timeout_ms)
            .auto_offset_reset(&self.config.auto_offset_reset)
            .redelivery_delay(self.config.redelivery_delay)
            .build()?;
        bus.probe().await?;
        Ok(bus)
    }
}
