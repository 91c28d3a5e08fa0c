//! Wiring of the service-request loop.
//!
//! The pieces are assembled in the same order regardless of backend:
//! 1. Event dispatcher: request router (required), notification fan-out and
//!    metrics (best effort)
//! 2. [`ServiceRequestService`] over a repository and reservation lookup
//! 3. Response consumer driving the [`ResponseCorrelator`]
//!
//! [`build_application`] does this against `PostgreSQL` and Redpanda. Tests
//! use [`event_dispatcher`] and [`response_consumer`] directly with in-memory
//! collaborators.

use complementary_core::broker::MessageBroker;
use complementary_core::dead_letter::DeadLetterSink;
use complementary_core::environment::{Clock, SystemClock};
use complementary_postgres::{PostgresDeadLetterQueue, run_migrations};
use complementary_redpanda::RedpandaBroker;
use complementary_runtime::{ConsumerError, MessageConsumer, RetryPolicy, retry_with_backoff};
use complementary_web::{UserChannels, notifications_router};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

use crate::app::ServiceRequestService;
use crate::config::{Config, ConsumerConfig, MessagingConfig, PostgresConfig};
use crate::dispatch::{EventDispatcher, EventHandler};
use crate::domain::{ReservationLookup, ServiceEventKind, ServiceRequestRepository};
use crate::lifecycle::Application;
use crate::messaging::{RequestRouter, ResponseCorrelator, RoutingTable};
use crate::metrics::{MetricsRecorder, register_business_metrics};
use crate::notifications::{NotificationFanout, UserNotifier};
use crate::persistence::{PostgresReservationLookup, PostgresServiceRequestRepository};

/// Name of the response consumer, used in logs, metrics and dead letters.
pub const RESPONSE_CONSUMER: &str = "provider-responses";

/// Build the dispatcher that couples the aggregate to its side effects.
#[must_use]
pub fn event_dispatcher(
    broker: Arc<dyn MessageBroker>,
    messaging: &MessagingConfig,
    notifier: Arc<dyn UserNotifier>,
    clock: Arc<dyn Clock>,
) -> EventDispatcher {
    let router: Arc<dyn EventHandler> = Arc::new(RequestRouter::new(
        broker,
        RoutingTable::from_config(messaging),
        Arc::clone(&clock),
    ));
    let fanout: Arc<dyn EventHandler> = Arc::new(NotificationFanout::new(notifier, clock));
    let metrics: Arc<dyn EventHandler> = Arc::new(MetricsRecorder);

    EventDispatcher::builder()
        .required(ServiceEventKind::Requested, router)
        .best_effort(ServiceEventKind::Requested, Arc::clone(&metrics))
        .best_effort(ServiceEventKind::Confirmed, Arc::clone(&fanout))
        .best_effort(ServiceEventKind::Confirmed, Arc::clone(&metrics))
        .best_effort(ServiceEventKind::Rejected, fanout)
        .best_effort(ServiceEventKind::Rejected, Arc::clone(&metrics))
        .best_effort(ServiceEventKind::Cancelled, metrics)
        .build()
}

/// Redelivery policy of the response consumer.
#[must_use]
pub fn retry_policy(consumer: &ConsumerConfig) -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(consumer.max_redeliveries)
        .initial_delay(Duration::from_millis(consumer.retry_initial_ms))
        .max_delay(Duration::from_millis(consumer.retry_max_ms))
        .build()
}

/// Backoff between startup connection attempts to `PostgreSQL`.
#[must_use]
pub fn startup_retry_policy(postgres: &PostgresConfig) -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(postgres.connect_retries)
        .initial_delay(Duration::from_millis(500))
        .max_delay(Duration::from_secs(10))
        .build()
}

/// Open the connection pool, retrying while the database comes up.
///
/// # Errors
///
/// The last connection error once [`startup_retry_policy`] is exhausted.
pub async fn connect_database(postgres: &PostgresConfig) -> Result<PgPool, sqlx::Error> {
    retry_with_backoff(&startup_retry_policy(postgres), "connect_database", || {
        PgPoolOptions::new()
            .max_connections(postgres.max_connections)
            .min_connections(postgres.min_connections)
            .acquire_timeout(Duration::from_secs(postgres.connect_timeout))
            .connect(&postgres.url)
    })
    .await
}

/// Collaborators of the response consumer.
pub struct ConsumerParts {
    /// Broker the response queue lives on
    pub broker: Arc<dyn MessageBroker>,
    /// Store for messages that cannot be processed
    pub dead_letters: Arc<dyn DeadLetterSink>,
    /// Clock stamped on dead letters
    pub clock: Arc<dyn Clock>,
    /// Stops the consumer when signalled
    pub shutdown: broadcast::Receiver<()>,
}

/// Build the consumer that applies provider responses.
///
/// # Errors
///
/// [`ConsumerError`] if the consumer is missing a collaborator.
pub fn response_consumer(
    service: Arc<ServiceRequestService>,
    config: &Config,
    parts: ConsumerParts,
) -> Result<MessageConsumer, ConsumerError> {
    MessageConsumer::builder()
        .name(RESPONSE_CONSUMER)
        .topics(vec![config.messaging.response_queue.clone()])
        .broker(parts.broker)
        .handler(Arc::new(ResponseCorrelator::new(service)))
        .dead_letters(parts.dead_letters)
        .clock(parts.clock)
        .retry_policy(retry_policy(&config.consumer))
        .shutdown(parts.shutdown)
        .build()
}

/// Connect to `PostgreSQL` and Redpanda and assemble the application.
///
/// # Errors
///
/// Returns error if:
/// - the database stays unreachable through every retry, or migrations fail
/// - the Redpanda producer cannot be created
/// - the HTTP listener cannot bind
pub async fn build_application(config: Config) -> Result<Application, Box<dyn std::error::Error>> {
    register_business_metrics();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    info!("Connecting to database...");
    let pool = connect_database(&config.postgres).await?;

    info!("Running migrations...");
    run_migrations(&pool).await?;

    // Producer creation does not contact the brokers; librdkafka reconnects on its own
    info!("Connecting to Redpanda...");
    let broker: Arc<dyn MessageBroker> = Arc::new(
        RedpandaBroker::builder()
            .brokers(&config.redpanda.brokers)
            .producer_acks(&config.redpanda.producer_acks)
            .compression(&config.redpanda.compression)
            .timeout(Duration::from_millis(config.redpanda.send_timeout_ms))
            .consumer_group(&config.redpanda.consumer_group)
            .auto_offset_reset(&config.redpanda.auto_offset_reset)
            .dead_letter_suffix(&config.redpanda.dead_letter_suffix)
            .build()?,
    );

    let channels = Arc::new(UserChannels::new());
    let notifier: Arc<dyn UserNotifier> =
        Arc::new(crate::notifications::ChannelNotifier::new(Arc::clone(&channels)));

    let repository: Arc<dyn ServiceRequestRepository> =
        Arc::new(PostgresServiceRequestRepository::new(pool.clone()));
    let reservations: Arc<dyn ReservationLookup> =
        Arc::new(PostgresReservationLookup::new(pool.clone()));

    let service = Arc::new(ServiceRequestService::new(
        repository,
        reservations,
        event_dispatcher(Arc::clone(&broker), &config.messaging, notifier, Arc::clone(&clock)),
        Arc::clone(&clock),
    ));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(16);
    let consumer = response_consumer(
        service,
        &config,
        ConsumerParts {
            broker,
            dead_letters: Arc::new(PostgresDeadLetterQueue::new(pool)),
            clock,
            shutdown: shutdown_rx,
        },
    )?;

    let listener = tokio::net::TcpListener::bind(config.server.address()).await?;
    info!(address = %config.server.address(), "Listener bound");

    Ok(Application::new(
        listener,
        notifications_router(channels),
        vec![consumer],
        shutdown_tx,
        config.server.shutdown_timeout(),
    ))
}
