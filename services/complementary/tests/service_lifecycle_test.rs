//! End-to-end tests of the service-request loop.
//!
//! A request is created through the use-case layer, routed to its provider
//! queue, answered on the response queue and settled by a real
//! [`MessageConsumer`], all over the in-memory broker.
//!
//! Run with: `cargo test --test service_lifecycle_test`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use complementary_core::broker::{Acknowledgement, BrokerMessage, MessageBroker};
use complementary_core::environment::Clock;
use complementary_runtime::MessageConsumer;
use complementary_services::app::{NewServiceRequest, ServiceRequestService};
use complementary_services::bootstrap::{ConsumerParts, event_dispatcher, response_consumer};
use complementary_services::config::Config;
use complementary_services::domain::{Reservation, ReservationLookup, ServiceRequestRepository};
use complementary_services::lifecycle::Application;
use complementary_services::messaging::ServiceRequestMessage;
use complementary_services::notifications::{ChannelNotifier, NotificationPayload};
use complementary_services::persistence::{
    InMemoryReservationLookup, InMemoryServiceRequestRepository,
};
use complementary_services::{EventId, ReservationId, ServiceId, UserId};
use complementary_testing::{InMemoryBroker, InMemoryDeadLetterSink, init_test_tracing, test_clock};
use complementary_web::{UserChannels, notifications_router};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const WAIT: Duration = Duration::from_secs(5);

struct Loop {
    broker: InMemoryBroker,
    dead_letters: InMemoryDeadLetterSink,
    channels: Arc<UserChannels>,
    service: Arc<ServiceRequestService>,
    config: Config,
    owner: UserId,
    reservation: ReservationId,
}

impl Loop {
    fn new() -> Self {
        init_test_tracing();

        let mut config = Config::default();
        config.consumer.retry_initial_ms = 1;
        config.consumer.retry_max_ms = 5;

        let broker = InMemoryBroker::new();
        let channels = Arc::new(UserChannels::new());
        let clock: Arc<dyn Clock> = Arc::new(test_clock());

        let owner = UserId::new();
        let reservation = ReservationId::new();
        let reservations = InMemoryReservationLookup::new();
        reservations.insert(Reservation::new(reservation, owner, "Confirmed"));

        let service = Arc::new(ServiceRequestService::new(
            Arc::new(InMemoryServiceRequestRepository::new()) as Arc<dyn ServiceRequestRepository>,
            Arc::new(reservations) as Arc<dyn ReservationLookup>,
            event_dispatcher(
                Arc::new(broker.clone()),
                &config.messaging,
                Arc::new(ChannelNotifier::new(Arc::clone(&channels))),
                Arc::clone(&clock),
            ),
            clock,
        ));

        Self {
            broker,
            dead_letters: InMemoryDeadLetterSink::new(),
            channels,
            service,
            config,
            owner,
            reservation,
        }
    }

    fn consumer(&self, shutdown: broadcast::Receiver<()>) -> MessageConsumer {
        response_consumer(
            Arc::clone(&self.service),
            &self.config,
            ConsumerParts {
                broker: Arc::new(self.broker.clone()),
                dead_letters: Arc::new(self.dead_letters.clone()),
                clock: Arc::new(test_clock()),
                shutdown,
            },
        )
        .unwrap()
    }

    /// Spawn the response consumer and wait until it listens.
    async fn start(&self) -> broadcast::Sender<()> {
        let (tx, rx) = broadcast::channel(1);
        let _ = self.consumer(rx).spawn();
        assert!(self.broker.wait_for_subscribers(1, WAIT).await);
        tx
    }

    async fn request(&self, service_type: &str) -> ServiceId {
        self.service
            .request_service(
                self.owner,
                NewServiceRequest {
                    reservation_id: self.reservation,
                    event_id: EventId::new(),
                    service_type: service_type.to_string(),
                    details: "for 4 people".to_string(),
                },
            )
            .await
            .unwrap()
            .service_id
    }

    async fn respond(&self, id: &str, body: &serde_json::Value) {
        let message = BrokerMessage::json(
            id,
            self.config.messaging.response_routing_key.clone(),
            body.to_string().into_bytes(),
            test_clock().now(),
        )
        .with_exchange(self.config.messaging.response_exchange.clone());

        self.broker
            .publish(&self.config.messaging.response_queue, &message)
            .await
            .unwrap();
    }

    async fn settled(&self, count: usize) {
        assert!(self.broker.wait_for_settlements(count, WAIT).await);
    }
}

#[tokio::test]
async fn request_is_routed_to_its_provider_queue() {
    let lp = Loop::new();

    let id = lp.request("catering").await;

    let published = lp.broker.published_to("catering.requests");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].message_id, id.to_string());
    assert_eq!(published[0].routing_key, "service.request.catering");
    assert_eq!(published[0].exchange.as_deref(), Some("services.requests"));
    assert_eq!(published[0].reply_to.as_deref(), Some("services.responses.platform"));

    let body: ServiceRequestMessage = serde_json::from_slice(&published[0].payload).unwrap();
    assert_eq!(body.service_id, id);
    assert_eq!(body.reservation_id, lp.reservation);
    assert_eq!(body.details, "for 4 people");
    assert_eq!(body.callback_queue, "services.responses.platform");

    assert!(lp.broker.published_to("transport.requests").is_empty());
}

#[tokio::test]
async fn rejection_reaches_the_owner_once() {
    let lp = Loop::new();
    let _shutdown = lp.start().await;
    let mut connection = lp.channels.register(*lp.owner.as_uuid());
    let id = lp.request("Catering").await;

    let rejection = json!({
        "serviceId": id,
        "isAvailable": false,
        "rejectionReason": "Fully booked",
    });
    lp.respond(&id.to_string(), &rejection).await;
    lp.settled(1).await;

    let view = lp.service.get_service(id, lp.owner).await.unwrap();
    assert_eq!(view.status, "Rejected");
    assert_eq!(view.rejection_reason.as_deref(), Some("Fully booked"));

    let text = connection.receiver.try_recv().unwrap();
    let payload: NotificationPayload = serde_json::from_str(&text).unwrap();
    assert_eq!(payload.kind(), "ServiceRejected");

    // Redelivered duplicate: acknowledged, nothing new pushed
    lp.respond(&id.to_string(), &rejection).await;
    lp.settled(2).await;

    assert!(lp.broker.settlements().iter().all(|s| s.acknowledgement == Acknowledgement::Ack));
    assert!(connection.receiver.try_recv().is_err());
    assert!(lp.dead_letters.is_empty());
}

#[tokio::test]
async fn confirmation_sets_provider_and_price() {
    let lp = Loop::new();
    let _shutdown = lp.start().await;
    let mut connection = lp.channels.register(*lp.owner.as_uuid());
    let id = lp.request("transport").await;

    lp.respond(
        &id.to_string(),
        &json!({
            "ServiceId": id,
            "IsAvailable": true,
            "ProviderId": "shuttle-co",
            "Price": 42.5,
        }),
    )
    .await;
    lp.settled(1).await;

    let view = lp.service.get_service(id, lp.owner).await.unwrap();
    assert_eq!(view.status, "Confirmed");
    assert_eq!(view.provider_id.as_deref(), Some("shuttle-co"));
    assert!((view.price - 42.5).abs() < f64::EPSILON);
    assert!(view.confirmed_at.is_some());

    let text = connection.receiver.try_recv().unwrap();
    match serde_json::from_str::<NotificationPayload>(&text).unwrap() {
        NotificationPayload::ServiceConfirmed(notice) => {
            assert_eq!(notice.service_id, id);
            assert_eq!(notice.message, "Your Transport service has been confirmed!");
        }
        other => unreachable!("unexpected notification {other:?}"),
    }
}

#[tokio::test]
async fn unknown_service_is_dead_lettered() {
    let lp = Loop::new();
    let _shutdown = lp.start().await;
    let unknown = ServiceId::new();

    lp.respond(
        &unknown.to_string(),
        &json!({ "serviceId": unknown, "isAvailable": false }),
    )
    .await;
    lp.settled(1).await;

    let settlement = &lp.broker.settlements()[0];
    assert_eq!(settlement.acknowledgement, Acknowledgement::Nack { requeue: false });
    assert_eq!(lp.broker.dead_lettered("services.responses.platform").len(), 1);

    let recorded = lp.dead_letters.recorded();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].consumer, "provider-responses");
    assert_eq!(recorded[0].attempts, 1);
}

#[tokio::test]
async fn malformed_payload_is_dead_lettered_without_retry() {
    let lp = Loop::new();
    let _shutdown = lp.start().await;

    let message = BrokerMessage::json("garbage", "service.response", b"not json".to_vec(), test_clock().now());
    lp.broker
        .publish(&lp.config.messaging.response_queue, &message)
        .await
        .unwrap();
    lp.settled(1).await;

    assert_eq!(lp.broker.settlements().len(), 1);
    assert_eq!(lp.dead_letters.len(), 1);
    assert!(lp.dead_letters.recorded()[0].error.contains("malformed"));
}

#[tokio::test]
async fn decisions_show_up_in_metrics() {
    let lp = Loop::new();
    let _shutdown = lp.start().await;

    let first = lp.request("Catering").await;
    let second = lp.request("Catering").await;
    let third = lp.request("Transport").await;

    for (id, price) in [(first, 50.0), (second, 100.0)] {
        lp.respond(
            &id.to_string(),
            &json!({ "serviceId": id, "isAvailable": true, "providerId": "p1", "price": price }),
        )
        .await;
    }
    lp.settled(2).await;

    let metrics = lp.service.metrics().await.unwrap();
    assert_eq!(metrics.total_requests, 3);
    assert_eq!(metrics.confirmed, 2);
    assert_eq!(metrics.pending, 1);
    assert!((metrics.average_price - 75.0).abs() < f64::EPSILON);
    assert_eq!(metrics.by_service_type.get("Catering"), Some(&2));

    let listed = lp.service.list_user_services(lp.owner, None).await.unwrap();
    assert_eq!(listed.len(), 3);
    assert_eq!(
        listed.iter().find(|v| v.service_id == third).map(|v| v.status.as_str()),
        Some("Requested")
    );
}

#[tokio::test]
async fn application_stops_consumers_on_shutdown() {
    let lp = Loop::new();
    let (tx, rx) = broadcast::channel(1);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let app = Application::new(
        listener,
        notifications_router(Arc::clone(&lp.channels)),
        vec![lp.consumer(rx)],
        tx,
        Duration::from_secs(2),
    );
    assert!(app.local_addr().unwrap().port() > 0);

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let broker = lp.broker.clone();

    let (result, ()) = tokio::join!(
        app.run_until(async move {
            let _ = stop_rx.await;
        }),
        async move {
            assert!(broker.wait_for_subscribers(1, WAIT).await);
            stop_tx.send(()).unwrap();
        }
    );

    assert!(result.is_ok());
    assert_eq!(lp.broker.subscriber_count(), 0);
}
