//! Settlement and shutdown behaviour of `MessageConsumer` against the
//! in-memory broker.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use async_trait::async_trait;
use chrono::Utc;
use complementary_core::broker::{Acknowledgement, BrokerMessage, MessageBroker};
use complementary_core::environment::Clock;
use complementary_runtime::{HandlerFailure, MessageConsumer, MessageHandler, RetryPolicy};
use complementary_testing::{InMemoryBroker, InMemoryDeadLetterSink, test_clock};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

const TOPIC: &str = "services.responses.platform";
const WAIT: Duration = Duration::from_secs(2);

/// Returns scripted results in order, then succeeds.
struct ScriptedHandler {
    script: Mutex<VecDeque<Result<(), HandlerFailure>>>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedHandler {
    fn new(script: Vec<Result<(), HandlerFailure>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl MessageHandler for ScriptedHandler {
    async fn handle(&self, message: &BrokerMessage) -> Result<(), HandlerFailure> {
        self.seen.lock().unwrap().push(message.message_id.clone());
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

struct Harness {
    broker: InMemoryBroker,
    dead_letters: InMemoryDeadLetterSink,
    shutdown: broadcast::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

async fn start(handler: Arc<ScriptedHandler>, max_retries: u32) -> Harness {
    let broker = InMemoryBroker::new();
    let dead_letters = InMemoryDeadLetterSink::new();
    let (shutdown, shutdown_rx) = broadcast::channel(1);

    let consumer = MessageConsumer::builder()
        .name("provider-responses")
        .topics(vec![TOPIC.to_string()])
        .broker(Arc::new(broker.clone()))
        .handler(handler)
        .dead_letters(Arc::new(dead_letters.clone()))
        .clock(Arc::new(test_clock()))
        .retry_policy(
            RetryPolicy::builder()
                .max_retries(max_retries)
                .initial_delay(Duration::from_millis(1))
                .max_delay(Duration::from_millis(5))
                .build(),
        )
        .shutdown(shutdown_rx)
        .build()
        .unwrap();

    let handle = consumer.spawn();
    assert!(broker.wait_for_subscribers(1, WAIT).await);

    Harness {
        broker,
        dead_letters,
        shutdown,
        handle,
    }
}

fn response(id: &str) -> BrokerMessage {
    BrokerMessage::json(id, "service.response", br#"{"serviceId":"x"}"#.to_vec(), Utc::now())
}

#[tokio::test]
async fn successful_handling_acks() {
    let handler = ScriptedHandler::new(vec![]);
    let h = start(Arc::clone(&handler), 3).await;

    h.broker.publish(TOPIC, &response("m-1")).await.unwrap();
    assert!(h.broker.wait_for_settlements(1, WAIT).await);

    let settlements = h.broker.settlements();
    assert_eq!(settlements[0].acknowledgement, Acknowledgement::Ack);
    assert_eq!(settlements[0].message_id, "m-1");
    assert!(h.dead_letters.is_empty());
    assert_eq!(handler.calls(), 1);
}

#[tokio::test]
async fn permanent_failure_is_dead_lettered_without_requeue() {
    let handler = ScriptedHandler::new(vec![Err(HandlerFailure::Permanent(
        "payload is not valid JSON".to_string(),
    ))]);
    let h = start(Arc::clone(&handler), 3).await;

    h.broker.publish(TOPIC, &response("m-1")).await.unwrap();
    assert!(h.broker.wait_for_settlements(1, WAIT).await);

    assert_eq!(
        h.broker.settlements()[0].acknowledgement,
        Acknowledgement::Nack { requeue: false }
    );
    assert_eq!(h.broker.dead_lettered(TOPIC).len(), 1);

    let recorded = h.dead_letters.recorded();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].consumer, "provider-responses");
    assert_eq!(recorded[0].source, TOPIC);
    assert_eq!(recorded[0].attempts, 1);
    assert!(recorded[0].error.contains("not valid JSON"));
    assert_eq!(recorded[0].failed_at, test_clock().now());
    assert_eq!(handler.calls(), 1);
}

#[tokio::test]
async fn transient_failure_is_requeued_then_acked() {
    let handler = ScriptedHandler::new(vec![
        Err(HandlerFailure::Transient("database busy".to_string())),
        Err(HandlerFailure::Transient("database busy".to_string())),
    ]);
    let h = start(Arc::clone(&handler), 3).await;

    h.broker.publish(TOPIC, &response("m-1")).await.unwrap();
    assert!(h.broker.wait_for_settlements(3, WAIT).await);

    let outcomes: Vec<_> = h
        .broker
        .settlements()
        .iter()
        .map(|s| (s.attempt, s.acknowledgement))
        .collect();
    assert_eq!(
        outcomes,
        vec![
            (1, Acknowledgement::Nack { requeue: true }),
            (2, Acknowledgement::Nack { requeue: true }),
            (3, Acknowledgement::Ack),
        ]
    );
    assert!(h.dead_letters.is_empty());
    assert_eq!(handler.calls(), 3);
}

#[tokio::test]
async fn exhausted_redeliveries_are_dead_lettered() {
    let transient = || Err(HandlerFailure::Transient("still failing".to_string()));
    let handler = ScriptedHandler::new(vec![transient(), transient(), transient(), transient()]);
    let h = start(Arc::clone(&handler), 2).await;

    h.broker.publish(TOPIC, &response("m-1")).await.unwrap();
    assert!(h.broker.wait_for_settlements(3, WAIT).await);

    let last = h.broker.settlements().last().cloned().unwrap();
    assert_eq!(last.attempt, 3);
    assert_eq!(last.acknowledgement, Acknowledgement::Nack { requeue: false });

    let recorded = h.dead_letters.recorded();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].attempts, 3);
    assert_eq!(handler.calls(), 3);
}

#[tokio::test]
async fn failing_dead_letter_store_still_settles() {
    let handler = ScriptedHandler::new(vec![Err(HandlerFailure::Permanent("unknown service".to_string()))]);
    let h = start(Arc::clone(&handler), 3).await;
    h.dead_letters.fail_with("disk full");

    h.broker.publish(TOPIC, &response("m-1")).await.unwrap();
    assert!(h.broker.wait_for_settlements(1, WAIT).await);

    assert_eq!(
        h.broker.settlements()[0].acknowledgement,
        Acknowledgement::Nack { requeue: false }
    );
    assert!(h.dead_letters.is_empty());
}

#[tokio::test]
async fn shutdown_stops_consumer_and_releases_subscription() {
    let handler = ScriptedHandler::new(vec![]);
    let h = start(Arc::clone(&handler), 3).await;

    h.shutdown.send(()).unwrap();
    tokio::time::timeout(WAIT, h.handle).await.unwrap().unwrap();

    assert_eq!(h.broker.subscriber_count(), 0);

    // Nothing is listening any more.
    h.broker.publish(TOPIC, &response("late")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(handler.calls(), 0);
    assert!(h.broker.settlements().is_empty());
}

#[test]
fn builder_reports_missing_fields() {
    let (_tx, rx) = broadcast::channel::<()>(1);
    let err = MessageConsumer::builder()
        .name("incomplete")
        .shutdown(rx)
        .build()
        .err()
        .unwrap();

    assert_eq!(err.to_string(), "message consumer is missing required field 'topics'");
}
