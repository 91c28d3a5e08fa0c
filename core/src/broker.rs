//! Message broker abstraction for provider integration.
//!
//! This module provides the [`MessageBroker`] trait used to publish outbound
//! service requests to provider queues and to consume provider decisions from
//! the response queue.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   publish    ┌───────────────┐
//! │ Request      │─────────────►│  provider     │
//! │ Router       │              │  queues       │
//! └──────────────┘              └───────┬───────┘
//!                                       │ provider
//!                                       ▼
//! ┌──────────────┐   subscribe  ┌───────────────┐
//! │ Response     │◄─────────────│  response     │
//! │ Correlator   │  ack / nack  │  queue        │
//! └──────────────┘─────────────►└───────────────┘
//! ```
//!
//! # Key Principles
//!
//! - **Durable**: published messages survive broker restarts
//! - **At-least-once delivery**: a delivery that is not acknowledged is
//!   delivered again, so consumers must tolerate duplicates
//! - **Explicit settlement**: every [`Delivery`] is settled exactly once with
//!   [`Delivery::ack`] or [`Delivery::nack`]
//! - **No poison loops**: a delivery negatively acknowledged without requeue
//!   is moved to a dead-letter destination instead of being redelivered
//!
//! # Implementations
//!
//! - `InMemoryBroker` in `complementary-testing` - For testing
//! - `RedpandaBroker` in `complementary-redpanda` - For production (Kafka-compatible)

use chrono::{DateTime, Utc};
use futures::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Content type stamped on JSON payloads.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Errors that can occur during broker operations.
#[derive(Error, Debug, Clone)]
pub enum BrokerError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message to a destination
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The destination that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to destinations
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The destinations that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// A delivery could not be settled
    #[error("Acknowledgement failed: {0}")]
    AcknowledgeFailed(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// A message as it travels through the broker.
///
/// The payload is opaque to the broker. `message_id` doubles as the
/// partitioning key, so every message about the same service request keeps
/// its relative order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Unique message identifier (the service request id for this platform)
    pub message_id: String,
    /// Routing key the message was published with
    pub routing_key: String,
    /// Exchange (logical source) the message was published through
    pub exchange: Option<String>,
    /// MIME type of the payload
    pub content_type: String,
    /// Destination the receiver should reply to, if any
    pub reply_to: Option<String>,
    /// Serialized body
    pub payload: Vec<u8>,
    /// When the message was published
    pub published_at: DateTime<Utc>,
}

impl BrokerMessage {
    /// Create a JSON message with the given id, routing key and body.
    #[must_use]
    pub fn json(
        message_id: impl Into<String>,
        routing_key: impl Into<String>,
        payload: Vec<u8>,
        published_at: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            routing_key: routing_key.into(),
            exchange: None,
            content_type: CONTENT_TYPE_JSON.to_string(),
            reply_to: None,
            payload,
            published_at,
        }
    }

    /// Set the exchange the message is published through.
    #[must_use]
    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    /// Set the reply-to destination.
    #[must_use]
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }
}

/// How a delivery was settled by its consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    /// Processing succeeded; the broker may forget the message
    Ack,
    /// Processing failed
    Nack {
        /// `true` to redeliver, `false` to dead-letter
        requeue: bool,
    },
}

impl fmt::Display for Acknowledgement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ack => write!(f, "ack"),
            Self::Nack { requeue: true } => write!(f, "nack-requeue"),
            Self::Nack { requeue: false } => write!(f, "nack-dead-letter"),
        }
    }
}

/// Broker-specific settlement of one delivery.
///
/// Implementations forward the consumer's decision to the broker (commit an
/// offset, seek back for redelivery, move the message to a dead-letter
/// destination).
///
/// `Sync` so a `&Delivery` can be held across an await inside a spawned
/// consumer task.
pub trait Acknowledger: Send + Sync {
    /// Settle the delivery.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AcknowledgeFailed`] if the broker can no longer
    /// accept the decision.
    fn settle(self: Box<Self>, acknowledgement: Acknowledgement) -> Result<(), BrokerError>;
}

/// A message handed to a consumer together with the means to settle it.
///
/// Dropping a delivery without settling it leaves the message unacknowledged;
/// the broker will deliver it again to some consumer.
pub struct Delivery {
    message: BrokerMessage,
    source: String,
    attempt: u32,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    /// Create a delivery.
    ///
    /// `attempt` starts at 1 for the first delivery of a message.
    #[must_use]
    pub fn new(
        message: BrokerMessage,
        source: impl Into<String>,
        attempt: u32,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            message,
            source: source.into(),
            attempt,
            acker,
        }
    }

    /// The delivered message.
    #[must_use]
    pub const fn message(&self) -> &BrokerMessage {
        &self.message
    }

    /// The queue/topic the message was consumed from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Delivery attempt, starting at 1.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether this message has been delivered before.
    #[must_use]
    pub const fn is_redelivery(&self) -> bool {
        self.attempt > 1
    }

    /// Acknowledge successful processing.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AcknowledgeFailed`] if the broker rejected the
    /// acknowledgement.
    pub fn ack(self) -> Result<(), BrokerError> {
        self.acker.settle(Acknowledgement::Ack)
    }

    /// Negatively acknowledge the delivery.
    ///
    /// With `requeue` the message is delivered again; without it the message
    /// is dead-lettered and never redelivered.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AcknowledgeFailed`] if the broker rejected the
    /// acknowledgement.
    pub fn nack(self, requeue: bool) -> Result<(), BrokerError> {
        self.acker.settle(Acknowledgement::Nack { requeue })
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .field("source", &self.source)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

/// Stream of deliveries from a subscription.
///
/// The stream ends when the broker connection is lost; consumers resubscribe.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, BrokerError>> + Send>>;

/// Trait for message broker implementations.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of
/// `async fn` so it can be shared as `Arc<dyn MessageBroker>` between the
/// request router and the response consumer.
pub trait MessageBroker: Send + Sync {
    /// Publish a durable message to a destination queue/topic.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::PublishFailed`] if the broker did not accept the
    /// message.
    fn publish(
        &self,
        topic: &str,
        message: &BrokerMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;

    /// Subscribe to one or more queues/topics.
    ///
    /// Deliveries are handed out one at a time per subscription; the next
    /// delivery is not produced until the previous one has been settled.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::SubscriptionFailed`] if the subscription could
    /// not be established.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, BrokerError>> + Send + '_>>;
}
