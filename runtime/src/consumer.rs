//! Long-lived broker consumer with acknowledgement policy and graceful shutdown.
//!
//! `MessageConsumer` owns the subscribe-process-reconnect loop. Applications
//! implement [`MessageHandler`] for the per-message work and classify each
//! failure; the consumer turns that classification into a broker settlement.
//!
//! # Settlement Policy
//!
//! | Handler result | Settlement |
//! |----------------|------------|
//! | `Ok(())` | ack |
//! | `Err(Permanent)` | dead-letter sink, then nack without requeue |
//! | `Err(Transient)`, retries left | backoff, then nack with requeue |
//! | `Err(Transient)`, retries used | dead-letter sink, then nack without requeue |
//!
//! # Shutdown
//!
//! The shutdown signal is only observed between deliveries (and during a
//! requeue backoff). A delivery that has been handed to the handler is always
//! processed to completion and settled before the loop exits, after which the
//! subscription is dropped and its broker resources released.
//!
//! # Example
//!
//! ```rust,ignore
//! let consumer = MessageConsumer::builder()
//!     .name("provider-responses")
//!     .topics(vec!["services.responses.platform".to_string()])
//!     .broker(broker)
//!     .handler(correlator)
//!     .dead_letters(dlq)
//!     .shutdown(shutdown_rx)
//!     .build()?;
//!
//! let handle = consumer.spawn();
//! ```

use crate::retry::RetryPolicy;
use async_trait::async_trait;
use complementary_core::broker::{BrokerMessage, Delivery, DeliveryStream, MessageBroker};
use complementary_core::dead_letter::{DeadLetter, DeadLetterSink};
use complementary_core::environment::{Clock, SystemClock};
use futures::StreamExt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Why a handler could not process a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerFailure {
    /// The failure may clear up on redelivery (storage hiccup, lost race)
    #[error("transient failure: {0}")]
    Transient(String),

    /// Redelivering the message cannot help (undecodable payload, unknown target)
    #[error("permanent failure: {0}")]
    Permanent(String),
}

/// Processes one message from a subscription.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle a delivered message.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerFailure`] classifying whether the message should be
    /// redelivered or dead-lettered.
    async fn handle(&self, message: &BrokerMessage) -> Result<(), HandlerFailure>;
}

/// Errors raised while assembling a consumer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumerError {
    /// A required builder field was not provided
    #[error("message consumer is missing required field '{0}'")]
    MissingField(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamOutcome {
    Ended,
    Shutdown,
}

/// Generic broker consumer.
///
/// # Lifecycle
///
/// 1. Created via `builder()`
/// 2. Spawned as background task via `spawn()`
/// 3. Runs until the shutdown signal is received
pub struct MessageConsumer {
    name: String,
    topics: Vec<String>,
    broker: Arc<dyn MessageBroker>,
    handler: Arc<dyn MessageHandler>,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
    clock: Arc<dyn Clock>,
    retry_policy: RetryPolicy,
    shutdown: broadcast::Receiver<()>,
    stopping: bool,
}

impl MessageConsumer {
    /// Create a builder for configuring a consumer.
    #[must_use]
    pub fn builder() -> MessageConsumerBuilder {
        MessageConsumerBuilder::default()
    }

    /// Consumer name used in logs and metrics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the consumer as a background task.
    ///
    /// The returned handle completes once the consumer has observed the
    /// shutdown signal and released its subscription.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the subscribe-process-reconnect loop until shutdown.
    pub async fn run(&mut self) {
        info!(consumer = %self.name, topics = ?self.topics, "Message consumer started");

        let mut reconnects: u32 = 0;

        loop {
            let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();

            let subscription = tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Message consumer received shutdown signal");
                    break;
                }
                result = self.broker.subscribe(&topics) => result,
            };

            match subscription {
                Ok(mut stream) => {
                    reconnects = 0;
                    info!(consumer = %self.name, topics = ?self.topics, "Subscribed to broker");

                    let outcome = self.process_stream(&mut stream).await;
                    drop(stream);

                    if outcome == StreamOutcome::Shutdown {
                        info!(consumer = %self.name, "Subscription released");
                        break;
                    }
                    warn!(consumer = %self.name, "Delivery stream ended, reconnecting");
                }
                Err(e) => {
                    error!(consumer = %self.name, error = %e, "Failed to subscribe to broker");
                }
            }

            let delay = self.retry_policy.delay_for_retry(reconnects);
            reconnects = reconnects.saturating_add(1);

            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Message consumer received shutdown signal while reconnecting");
                    break;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        info!(consumer = %self.name, "Message consumer stopped");
    }

    async fn process_stream(&mut self, stream: &mut DeliveryStream) -> StreamOutcome {
        loop {
            if self.stopping {
                return StreamOutcome::Shutdown;
            }

            let next = tokio::select! {
                biased;
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Message consumer received shutdown signal between deliveries");
                    return StreamOutcome::Shutdown;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(delivery)) => self.process(delivery).await,
                Some(Err(e)) => {
                    error!(consumer = %self.name, error = %e, "Error receiving delivery");
                }
                None => return StreamOutcome::Ended,
            }
        }
    }

    async fn process(&mut self, delivery: Delivery) {
        let message_id = delivery.message().message_id.clone();
        let attempt = delivery.attempt();

        debug!(
            consumer = %self.name,
            message_id = %message_id,
            source = %delivery.source(),
            attempt,
            "Processing delivery"
        );

        let result = self.handler.handle(delivery.message()).await;

        let (outcome, settlement) = match result {
            Ok(()) => ("acked", delivery.ack()),
            Err(HandlerFailure::Permanent(reason)) => {
                warn!(
                    consumer = %self.name,
                    message_id = %message_id,
                    attempt,
                    reason = %reason,
                    "Permanent processing failure, dead-lettering"
                );
                self.dead_letter(&delivery, reason).await;
                ("dead_lettered", delivery.nack(false))
            }
            Err(HandlerFailure::Transient(reason)) if self.retry_policy.is_exhausted(attempt) => {
                warn!(
                    consumer = %self.name,
                    message_id = %message_id,
                    attempt,
                    reason = %reason,
                    "Redeliveries exhausted, dead-lettering"
                );
                self.dead_letter(&delivery, reason).await;
                ("dead_lettered", delivery.nack(false))
            }
            Err(HandlerFailure::Transient(reason)) => {
                let delay = self.retry_policy.delay_for_retry(attempt.saturating_sub(1));
                warn!(
                    consumer = %self.name,
                    message_id = %message_id,
                    attempt,
                    delay_ms = delay.as_millis(),
                    reason = %reason,
                    "Transient processing failure, requeueing"
                );

                tokio::select! {
                    _ = self.shutdown.recv() => {
                        self.stopping = true;
                    }
                    () = tokio::time::sleep(delay) => {}
                }

                ("requeued", delivery.nack(true))
            }
        };

        metrics::counter!(
            "broker_messages_total",
            "consumer" => self.name.clone(),
            "outcome" => outcome
        )
        .increment(1);

        if let Err(e) = settlement {
            error!(
                consumer = %self.name,
                message_id = %message_id,
                outcome,
                error = %e,
                "Failed to settle delivery (message may be redelivered)"
            );
        }
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: String) {
        let Some(sink) = &self.dead_letters else {
            return;
        };

        let dead_letter = DeadLetter {
            consumer: self.name.clone(),
            source: delivery.source().to_string(),
            message: delivery.message().clone(),
            error: reason,
            attempts: delivery.attempt(),
            failed_at: self.clock.now(),
        };

        if let Err(e) = sink.record(dead_letter).await {
            error!(
                consumer = %self.name,
                message_id = %delivery.message().message_id,
                error = %e,
                "Failed to store dead letter"
            );
        }
    }
}

/// Builder for configuring a [`MessageConsumer`].
#[derive(Default)]
pub struct MessageConsumerBuilder {
    name: Option<String>,
    topics: Option<Vec<String>>,
    broker: Option<Arc<dyn MessageBroker>>,
    handler: Option<Arc<dyn MessageHandler>>,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
    clock: Option<Arc<dyn Clock>>,
    retry_policy: Option<RetryPolicy>,
    shutdown: Option<broadcast::Receiver<()>>,
}

impl MessageConsumerBuilder {
    /// Set consumer name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set queues/topics to subscribe to.
    #[must_use]
    pub fn topics(mut self, topics: Vec<String>) -> Self {
        self.topics = Some(topics);
        self
    }

    /// Set broker instance.
    #[must_use]
    pub fn broker(mut self, broker: Arc<dyn MessageBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Set message handler.
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Set the sink that receives dead-lettered deliveries.
    #[must_use]
    pub fn dead_letters(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letters = Some(sink);
        self
    }

    /// Set the clock used to timestamp dead letters (default: system clock).
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set the redelivery/reconnect policy (default: [`RetryPolicy::default`]).
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Set shutdown signal receiver.
    #[must_use]
    pub fn shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Build the [`MessageConsumer`].
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::MissingField`] if name, topics, broker,
    /// handler or shutdown were not set.
    pub fn build(self) -> Result<MessageConsumer, ConsumerError> {
        Ok(MessageConsumer {
            name: self.name.ok_or(ConsumerError::MissingField("name"))?,
            topics: self.topics.ok_or(ConsumerError::MissingField("topics"))?,
            broker: self.broker.ok_or(ConsumerError::MissingField("broker"))?,
            handler: self.handler.ok_or(ConsumerError::MissingField("handler"))?,
            dead_letters: self.dead_letters,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            retry_policy: self.retry_policy.unwrap_or_default(),
            shutdown: self.shutdown.ok_or(ConsumerError::MissingField("shutdown"))?,
            stopping: false,
        })
    }
}
