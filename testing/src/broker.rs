//! In-memory message broker for fast, deterministic tests.
//!
//! [`InMemoryBroker`] implements [`MessageBroker`] with the same settlement
//! semantics as the production broker:
//!
//! - `ack` forgets the message
//! - `nack(requeue = true)` delivers the message again with `attempt + 1`
//! - `nack(requeue = false)` moves the message to `<topic>.dead-letter`
//!
//! Every publish and every settlement is recorded so tests can assert on them.

use chrono::Utc;
use complementary_core::broker::{
    Acknowledgement, Acknowledger, BrokerError, BrokerMessage, Delivery, DeliveryStream,
    MessageBroker,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

/// Suffix of the topic that receives dead-lettered messages.
pub const DEAD_LETTER_SUFFIX: &str = ".dead-letter";

/// A message accepted by [`MessageBroker::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Destination topic
    pub topic: String,
    /// The message as published
    pub message: BrokerMessage,
}

/// How a consumer settled one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    /// Topic the delivery came from
    pub topic: String,
    /// Id of the settled message
    pub message_id: String,
    /// Delivery attempt (1-based)
    pub attempt: u32,
    /// The consumer's decision
    pub acknowledgement: Acknowledgement,
}

type DeliverySender = mpsc::UnboundedSender<Result<Delivery, BrokerError>>;

struct Subscriber {
    topics: Vec<String>,
    sender: DeliverySender,
}

#[derive(Default)]
struct BrokerState {
    published: Vec<PublishedMessage>,
    settlements: Vec<Settlement>,
    subscribers: Vec<Subscriber>,
    publish_failure: Option<String>,
}

/// In-memory [`MessageBroker`].
///
/// Cloning shares the underlying state, so a test can keep a handle for
/// assertions while the system under test owns another.
///
/// # Example
///
/// ```
/// use complementary_core::broker::{BrokerMessage, MessageBroker};
/// use complementary_testing::InMemoryBroker;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = InMemoryBroker::new();
/// let message = BrokerMessage::json("svc-1", "service.request.catering", b"{}".to_vec(), chrono::Utc::now());
///
/// broker.publish("catering.requests", &message).await?;
/// assert_eq!(broker.published_to("catering.requests").len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every subsequent publish fail with the given reason.
    pub fn fail_publishes(&self, reason: impl Into<String>) {
        self.lock().publish_failure = Some(reason.into());
    }

    /// Let publishes succeed again.
    pub fn restore_publishes(&self) {
        self.lock().publish_failure = None;
    }

    /// Every message published so far, in publish order.
    #[must_use]
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.clone()
    }

    /// Messages published to one topic, in publish order.
    #[must_use]
    pub fn published_to(&self, topic: &str) -> Vec<BrokerMessage> {
        self.lock()
            .published
            .iter()
            .filter(|p| p.topic == topic)
            .map(|p| p.message.clone())
            .collect()
    }

    /// Every settlement so far, in settlement order.
    #[must_use]
    pub fn settlements(&self) -> Vec<Settlement> {
        self.lock().settlements.clone()
    }

    /// Messages moved to the dead-letter topic of `topic`.
    #[must_use]
    pub fn dead_lettered(&self, topic: &str) -> Vec<BrokerMessage> {
        self.published_to(&format!("{topic}{DEAD_LETTER_SUFFIX}"))
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.lock();
        state.subscribers.retain(|s| !s.sender.is_closed());
        state.subscribers.len()
    }

    /// Wait until at least `count` settlements have been recorded.
    ///
    /// Returns `false` if the timeout elapses first.
    pub async fn wait_for_settlements(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |state| state.settlements.len() >= count)
            .await
    }

    /// Wait until at least `count` subscriptions are live.
    ///
    /// Returns `false` if the timeout elapses first.
    pub async fn wait_for_subscribers(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |state| {
            state.subscribers.iter().filter(|s| !s.sender.is_closed()).count() >= count
        })
        .await
    }

    async fn wait_until(&self, timeout: Duration, condition: impl Fn(&BrokerState) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if condition(&self.lock()) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn deliver(&self, state: &mut BrokerState, topic: &str, message: &BrokerMessage, attempt: u32) {
        state.subscribers.retain(|s| !s.sender.is_closed());

        // One consumer per message, like a shared queue.
        if let Some(subscriber) = state
            .subscribers
            .iter()
            .find(|s| s.topics.iter().any(|t| t == topic))
        {
            let acker = InMemoryAcker {
                broker: self.clone(),
                topic: topic.to_string(),
                message: message.clone(),
                attempt,
            };
            let delivery = Delivery::new(message.clone(), topic, attempt, Box::new(acker));
            let _ = subscriber.sender.send(Ok(delivery));
        }
    }
}

impl MessageBroker for InMemoryBroker {
    fn publish(
        &self,
        topic: &str,
        message: &BrokerMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let topic = topic.to_string();
        let message = message.clone();

        Box::pin(async move {
            let mut state = self.lock();

            if let Some(reason) = &state.publish_failure {
                return Err(BrokerError::PublishFailed {
                    topic,
                    reason: reason.clone(),
                });
            }

            state.published.push(PublishedMessage {
                topic: topic.clone(),
                message: message.clone(),
            });
            self.deliver(&mut state, &topic, &message, 1);
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, BrokerError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();

        Box::pin(async move {
            let (sender, receiver) = mpsc::unbounded_channel();
            self.lock().subscribers.push(Subscriber { topics, sender });

            let stream = async_stream::stream! {
                let mut receiver = receiver;
                while let Some(item) = receiver.recv().await {
                    yield item;
                }
            };

            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}

struct InMemoryAcker {
    broker: InMemoryBroker,
    topic: String,
    message: BrokerMessage,
    attempt: u32,
}

impl Acknowledger for InMemoryAcker {
    fn settle(self: Box<Self>, acknowledgement: Acknowledgement) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();

        state.settlements.push(Settlement {
            topic: self.topic.clone(),
            message_id: self.message.message_id.clone(),
            attempt: self.attempt,
            acknowledgement,
        });

        match acknowledgement {
            Acknowledgement::Ack => {}
            Acknowledgement::Nack { requeue: true } => {
                self.broker
                    .deliver(&mut state, &self.topic, &self.message, self.attempt + 1);
            }
            Acknowledgement::Nack { requeue: false } => {
                let mut dead = self.message.clone();
                dead.published_at = Utc::now();
                state.published.push(PublishedMessage {
                    topic: format!("{}{DEAD_LETTER_SUFFIX}", self.topic),
                    message: dead,
                });
            }
        }

        Ok(())
    }
}
