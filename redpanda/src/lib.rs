//! Redpanda message broker for the complementary services platform.
//!
//! This crate provides [`RedpandaBroker`], a Kafka-compatible implementation
//! of the [`MessageBroker`] trait from `complementary-core`, built on rdkafka.
//!
//! # Queue Model on Kafka
//!
//! Provider queues map to topics. Message properties travel as record
//! headers (see [`headers`]) and the message id is the record key, so every
//! record about one service request lands on the same partition in order.
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits. Each record is
//! handed to the subscriber as a [`Delivery`] and the partition is held until
//! the subscriber settles it:
//!
//! - `ack` commits the offset
//! - `nack(requeue = true)` seeks the partition back to the record, which is
//!   redelivered with the next attempt number
//! - `nack(requeue = false)` copies the record to `<topic>.dead-letter`, then
//!   commits the offset
//!
//! A delivery dropped without settlement stops the subscription without
//! committing, so the record is redelivered to the next subscriber.
//!
//! # Example
//!
//! ```no_run
//! use complementary_core::broker::{BrokerMessage, MessageBroker};
//! use complementary_redpanda::RedpandaBroker;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = RedpandaBroker::builder()
//!     .brokers("localhost:9092")
//!     .producer_acks("all")
//!     .consumer_group("complementary-services")
//!     .build()?;
//!
//! let message = BrokerMessage::json("svc-1", "service.request.catering", b"{}".to_vec(), chrono::Utc::now());
//! broker.publish("catering.requests", &message).await?;
//!
//! let mut deliveries = broker.subscribe(&["services.responses.platform"]).await?;
//! while let Some(delivery) = deliveries.next().await {
//!     let delivery = delivery?;
//!     // ... handle ...
//!     delivery.ack()?;
//! }
//! # Ok(())
//! # }
//! ```

use complementary_core::broker::{
    Acknowledgement, Acknowledger, BrokerError, BrokerMessage, Delivery, DeliveryStream,
    MessageBroker,
};
use rdkafka::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::Offset;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

pub mod headers;

/// Default suffix of dead-letter topics.
pub const DEFAULT_DEAD_LETTER_SUFFIX: &str = ".dead-letter";

/// Redpanda-backed [`MessageBroker`].
///
/// # Configuration
///
/// - **Producer settings**: acks, compression, send timeout
/// - **Consumer group**: explicit id shared by every instance of the service
/// - **Offset reset**: where a new group starts reading (default: "earliest")
/// - **Dead-letter suffix**: appended to a topic to name its dead-letter topic
pub struct RedpandaBroker {
    /// Kafka producer for publishing and dead-lettering
    producer: FutureProducer,
    /// Broker addresses (for creating consumers)
    brokers: String,
    /// Producer send timeout
    timeout: Duration,
    /// Consumer group ID (if explicitly set)
    consumer_group: Option<String>,
    /// Auto offset reset policy
    auto_offset_reset: String,
    /// Dead-letter topic suffix
    dead_letter_suffix: String,
}

impl RedpandaBroker {
    /// Create a broker with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, BrokerError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the broker.
    #[must_use]
    pub fn builder() -> RedpandaBrokerBuilder {
        RedpandaBrokerBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Name of the dead-letter topic for `topic`.
    #[must_use]
    pub fn dead_letter_topic(&self, topic: &str) -> String {
        format!("{topic}{}", self.dead_letter_suffix)
    }
}

/// Builder for configuring a [`RedpandaBroker`].
///
/// # Example
///
/// ```no_run
/// use complementary_redpanda::RedpandaBroker;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = RedpandaBroker::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")
///     .compression("lz4")
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct RedpandaBrokerBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    auto_offset_reset: Option<String>,
    dead_letter_suffix: Option<String>,
}

impl RedpandaBrokerBuilder {
    /// Set the broker addresses (comma-separated, e.g. "localhost:9092").
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1" or "all".
    ///
    /// Default: "all", so a publish only succeeds once the record is durable.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group ID for subscriptions.
    ///
    /// If not set, the group is derived from the subscribed topics. Instances
    /// sharing a group share the work, which is what a queue needs.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set the auto offset reset policy for new consumer groups.
    ///
    /// Default: "earliest", so requests published before the first
    /// subscriber started are not skipped.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Set the suffix that names dead-letter topics.
    ///
    /// Default: [`DEFAULT_DEAD_LETTER_SUFFIX`]
    #[must_use]
    pub fn dead_letter_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.dead_letter_suffix = Some(suffix.into());
        self
    }

    /// Build the [`RedpandaBroker`].
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if brokers are not set or the
    /// producer cannot be created.
    pub fn build(self) -> Result<RedpandaBroker, BrokerError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BrokerError::ConnectionFailed("Brokers not configured".to_string()))?;
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("enable.idempotence", if acks == "all" { "true" } else { "false" })
            .set("compression.type", compression)
            .create()
            .map_err(|e| BrokerError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "earliest".to_string());
        let dead_letter_suffix = self
            .dead_letter_suffix
            .unwrap_or_else(|| DEFAULT_DEAD_LETTER_SUFFIX.to_string());

        tracing::info!(
            brokers = %brokers,
            acks,
            compression,
            auto_offset_reset = %auto_offset_reset,
            dead_letter_suffix = %dead_letter_suffix,
            "RedpandaBroker created successfully"
        );

        Ok(RedpandaBroker {
            producer,
            brokers,
            timeout,
            consumer_group: self.consumer_group,
            auto_offset_reset,
            dead_letter_suffix,
        })
    }
}

async fn send(
    producer: &FutureProducer,
    topic: &str,
    message: &BrokerMessage,
    headers: OwnedHeaders,
    timeout: Duration,
) -> Result<(i32, i64), BrokerError> {
    let record = FutureRecord::to(topic)
        .key(message.message_id.as_bytes())
        .payload(&message.payload)
        .headers(headers)
        .timestamp(message.published_at.timestamp_millis());

    producer
        .send(record, Timeout::After(timeout))
        .await
        .map_err(|(e, _)| BrokerError::PublishFailed {
            topic: topic.to_string(),
            reason: e.to_string(),
        })
}

impl MessageBroker for RedpandaBroker {
    fn publish(
        &self,
        topic: &str,
        message: &BrokerMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let topic = topic.to_string();
        let message = message.clone();

        Box::pin(async move {
            match send(&self.producer, &topic, &message, headers::encode(&message), self.timeout).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition,
                        offset,
                        message_id = %message.message_id,
                        routing_key = %message.routing_key,
                        "Message published"
                    );
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(
                        topic = %topic,
                        message_id = %message.message_id,
                        error = %e,
                        "Failed to publish message"
                    );
                    Err(e)
                }
            }
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, BrokerError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();

        Box::pin(async move {
            let consumer_group_id = self.consumer_group.clone().unwrap_or_else(|| {
                let mut sorted_topics = topics.clone();
                sorted_topics.sort();
                format!("complementary-{}", sorted_topics.join("-"))
            });

            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &self.brokers)
                .set("group.id", &consumer_group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &self.auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| BrokerError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| BrokerError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to subscribe to topics: {e}"),
                })?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %consumer_group_id,
                auto_offset_reset = %self.auto_offset_reset,
                manual_commit = true,
                "Subscribed to topics"
            );

            // Capacity 1: one delivery in flight per subscription.
            let (tx, rx) = mpsc::channel(1);

            let settler = Settler {
                producer: self.producer.clone(),
                timeout: self.timeout,
                dead_letter_suffix: self.dead_letter_suffix.clone(),
            };
            tokio::spawn(settler.run(consumer, tx));

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}

struct OneshotAcker(oneshot::Sender<Acknowledgement>);

impl Acknowledger for OneshotAcker {
    fn settle(self: Box<Self>, acknowledgement: Acknowledgement) -> Result<(), BrokerError> {
        self.0
            .send(acknowledgement)
            .map_err(|_| BrokerError::AcknowledgeFailed("subscription already closed".to_string()))
    }
}

/// Owns the consumer task: forwards records and applies settlements.
/// Next item of `stream`, or `None` once the stream ends or nobody is
/// receiving on `tx` any more.
async fn next_or_closed<S, T>(stream: &mut S, tx: &mpsc::Sender<T>) -> Option<S::Item>
where
    S: futures::Stream + Unpin,
{
    use futures::StreamExt;

    tokio::select! {
        item = stream.next() => item,
        () = tx.closed() => {
            tracing::debug!("Delivery receiver dropped, exiting consumer task");
            None
        }
    }
}

struct Settler {
    producer: FutureProducer,
    timeout: Duration,
    dead_letter_suffix: String,
}

type PartitionOffset = (String, i32, i64);

impl Settler {
    async fn run(self, consumer: StreamConsumer, tx: mpsc::Sender<Result<Delivery, BrokerError>>) {
        let mut attempts: HashMap<PartitionOffset, u32> = HashMap::new();
        let mut stream = consumer.stream();

        while let Some(received) = next_or_closed(&mut stream, &tx).await {
            let record = match received {
                Ok(record) => record,
                Err(e) => {
                    let err = BrokerError::TransportError(format!("Failed to receive message: {e}"));
                    if tx.send(Err(err)).await.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let position = (record.topic().to_string(), record.partition(), record.offset());
            let attempt = attempts.get(&position).copied().unwrap_or(0) + 1;

            let message = headers::decode(
                record.topic(),
                record.headers(),
                record.key(),
                record.payload(),
                record.timestamp().to_millis(),
            );

            let (ack_tx, ack_rx) = oneshot::channel();
            let delivery = Delivery::new(
                message.clone(),
                record.topic(),
                attempt,
                Box::new(OneshotAcker(ack_tx)),
            );

            if tx.send(Ok(delivery)).await.is_err() {
                tracing::debug!("Delivery receiver dropped, exiting consumer task");
                break;
            }

            let Ok(acknowledgement) = ack_rx.await else {
                // Dropped without settlement: leave uncommitted for redelivery.
                tracing::debug!(
                    topic = record.topic(),
                    partition = record.partition(),
                    offset = record.offset(),
                    "Delivery dropped unsettled, exiting consumer task"
                );
                break;
            };

            match acknowledgement {
                Acknowledgement::Ack => {
                    attempts.remove(&position);
                    commit(&consumer, &record);
                }
                Acknowledgement::Nack { requeue: true } => {
                    attempts.insert(position, attempt);
                    self.rewind(&consumer, &record);
                }
                Acknowledgement::Nack { requeue: false } => {
                    if self.dead_letter(&record, &message, attempt).await {
                        attempts.remove(&position);
                        commit(&consumer, &record);
                    } else {
                        attempts.insert(position, attempt);
                        self.rewind(&consumer, &record);
                    }
                }
            }
        }

        tracing::debug!("Consumer task exiting");
    }

    fn rewind(&self, consumer: &StreamConsumer, record: &BorrowedMessage<'_>) {
        if let Err(e) = consumer.seek(
            record.topic(),
            record.partition(),
            Offset::Offset(record.offset()),
            Timeout::After(self.timeout),
        ) {
            tracing::warn!(
                topic = record.topic(),
                partition = record.partition(),
                offset = record.offset(),
                error = %e,
                "Failed to seek back for redelivery"
            );
        }
    }

    async fn dead_letter(&self, record: &BorrowedMessage<'_>, message: &BrokerMessage, attempt: u32) -> bool {
        let topic = format!("{}{}", record.topic(), self.dead_letter_suffix);
        let headers = headers::encode_dead_letter(message, record.topic(), attempt);

        match send(&self.producer, &topic, message, headers, self.timeout).await {
            Ok(_) => {
                tracing::warn!(
                    source = record.topic(),
                    dead_letter_topic = %topic,
                    message_id = %message.message_id,
                    attempt,
                    "Message moved to dead-letter topic"
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    source = record.topic(),
                    dead_letter_topic = %topic,
                    message_id = %message.message_id,
                    error = %e,
                    "Failed to dead-letter message, rewinding for redelivery"
                );
                false
            }
        }
    }
}

fn commit(consumer: &StreamConsumer, record: &BorrowedMessage<'_>) {
    if let Err(e) = consumer.commit_message(record, CommitMode::Async) {
        tracing::warn!(
            topic = record.topic(),
            partition = record.partition(),
            offset = record.offset(),
            error = %e,
            "Failed to commit offset (message may be redelivered)"
        );
    }
}
