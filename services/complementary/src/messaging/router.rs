//! Outbound routing of new service requests to provider queues.
//!
//! Each [`ServiceType`] maps to one provider queue and routing key. The
//! router is registered as a required handler for `ServiceRequested`: if the
//! broker does not accept the message, the create use case fails.

use async_trait::async_trait;
use complementary_core::broker::{BrokerError, BrokerMessage, MessageBroker};
use complementary_core::environment::Clock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

use super::contracts::ServiceRequestMessage;
use crate::config::MessagingConfig;
use crate::dispatch::{EventHandler, HandlerError};
use crate::domain::{ServiceEvent, ServiceRequested, ServiceType};

/// Errors raised while routing a request.
#[derive(Error, Debug, Clone)]
pub enum RoutingError {
    /// The routing table has no entry for this service type
    #[error("Unknown service type: {0}")]
    NoRoute(ServiceType),

    /// The message could not be encoded
    #[error("Failed to serialize service request: {0}")]
    Serialization(String),

    /// The broker did not accept the message
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Destination of one service type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    /// Provider queue (topic)
    pub topic: String,
    /// Routing key stamped on the message
    pub routing_key: String,
}

/// Static service-type to provider-queue table.
#[derive(Clone, Debug)]
pub struct RoutingTable {
    exchange: String,
    callback_queue: String,
    routes: HashMap<ServiceType, Route>,
}

impl RoutingTable {
    /// An empty table for `exchange`, asking providers to reply on
    /// `callback_queue`.
    #[must_use]
    pub fn new(exchange: impl Into<String>, callback_queue: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            callback_queue: callback_queue.into(),
            routes: HashMap::new(),
        }
    }

    /// Add or replace the route of a service type.
    #[must_use]
    pub fn with_route(
        mut self,
        service_type: ServiceType,
        topic: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        self.routes.insert(
            service_type,
            Route {
                topic: topic.into(),
                routing_key: routing_key.into(),
            },
        );
        self
    }

    /// The full table described by the messaging configuration.
    #[must_use]
    pub fn from_config(config: &MessagingConfig) -> Self {
        Self::new(&config.request_exchange, &config.response_queue)
            .with_route(
                ServiceType::Transport,
                &config.transport_queue,
                &config.transport_routing_key,
            )
            .with_route(
                ServiceType::Catering,
                &config.catering_queue,
                &config.catering_routing_key,
            )
            .with_route(
                ServiceType::Merchandising,
                &config.merchandising_queue,
                &config.merchandising_routing_key,
            )
    }

    /// Destination for `service_type`.
    ///
    /// # Errors
    ///
    /// [`RoutingError::NoRoute`] if the table has no entry for it.
    pub fn route(&self, service_type: ServiceType) -> Result<&Route, RoutingError> {
        self.routes
            .get(&service_type)
            .ok_or(RoutingError::NoRoute(service_type))
    }

    /// Exchange stamped on outbound messages.
    #[must_use]
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Queue providers reply to.
    #[must_use]
    pub fn callback_queue(&self) -> &str {
        &self.callback_queue
    }
}

/// Publishes newly requested services to their provider queue.
pub struct RequestRouter {
    broker: Arc<dyn MessageBroker>,
    table: RoutingTable,
    clock: Arc<dyn Clock>,
}

impl RequestRouter {
    /// Create a router.
    #[must_use]
    pub fn new(broker: Arc<dyn MessageBroker>, table: RoutingTable, clock: Arc<dyn Clock>) -> Self {
        Self {
            broker,
            table,
            clock,
        }
    }

    /// Publish the request described by `event`.
    ///
    /// Returns the route the message was published to.
    ///
    /// # Errors
    ///
    /// - [`RoutingError::NoRoute`] if the service type has no route
    /// - [`RoutingError::Broker`] if the broker rejected the message
    pub async fn route(&self, event: &ServiceRequested) -> Result<Route, RoutingError> {
        let route = self.table.route(event.service_type)?.clone();

        let body = ServiceRequestMessage::from_event(event, self.table.callback_queue());
        let payload =
            serde_json::to_vec(&body).map_err(|e| RoutingError::Serialization(e.to_string()))?;

        let message = BrokerMessage::json(
            event.service_id.to_string(),
            route.routing_key.clone(),
            payload,
            self.clock.now(),
        )
        .with_exchange(self.table.exchange())
        .with_reply_to(self.table.callback_queue());

        if let Err(e) = self.broker.publish(&route.topic, &message).await {
            error!(
                service_id = %event.service_id,
                topic = %route.topic,
                error = %e,
                "Failed to publish service request"
            );
            return Err(e.into());
        }

        info!(
            service_id = %event.service_id,
            exchange = %self.table.exchange(),
            topic = %route.topic,
            routing_key = %route.routing_key,
            "Published service request"
        );
        Ok(route)
    }
}

#[async_trait]
impl EventHandler for RequestRouter {
    fn name(&self) -> &'static str {
        "request-router"
    }

    async fn handle(&self, event: &ServiceEvent) -> Result<(), HandlerError> {
        match event {
            ServiceEvent::Requested(requested) => self
                .route(requested)
                .await
                .map(|_| ())
                .map_err(|e| HandlerError::new(e.to_string())),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use crate::types::{EventId, ReservationId, ServiceId, UserId};
    use complementary_testing::{InMemoryBroker, test_clock};

    fn table() -> RoutingTable {
        RoutingTable::from_config(&MessagingConfig::default())
    }

    fn requested(service_type: ServiceType) -> ServiceRequested {
        ServiceRequested {
            service_id: ServiceId::new(),
            reservation_id: ReservationId::new(),
            user_id: UserId::new(),
            event_id: EventId::new(),
            service_type,
            details: "front row".to_string(),
            occurred_at: test_clock().now(),
        }
    }

    fn router(broker: &InMemoryBroker, table: RoutingTable) -> RequestRouter {
        RequestRouter::new(Arc::new(broker.clone()), table, Arc::new(test_clock()))
    }

    #[test]
    fn default_table_routes_every_service_type() {
        let table = table();
        let expected = [
            (ServiceType::Transport, "transport.requests", "service.request.transport"),
            (ServiceType::Catering, "catering.requests", "service.request.catering"),
            (
                ServiceType::Merchandising,
                "merchandising.requests",
                "service.request.merchandising",
            ),
        ];

        for (service_type, topic, routing_key) in expected {
            let route = table.route(service_type).unwrap();
            assert_eq!(route.topic, topic);
            assert_eq!(route.routing_key, routing_key);
        }
        assert_eq!(table.exchange(), "services.requests");
        assert_eq!(table.callback_queue(), "services.responses.platform");
    }

    #[tokio::test]
    async fn publishes_to_the_service_type_queue() {
        let broker = InMemoryBroker::new();
        let event = requested(ServiceType::Catering);

        let route = router(&broker, table()).route(&event).await.unwrap();
        assert_eq!(route.topic, "catering.requests");

        let published = broker.published_to("catering.requests");
        assert_eq!(published.len(), 1);
        let message = &published[0];
        assert_eq!(message.message_id, event.service_id.to_string());
        assert_eq!(message.routing_key, "service.request.catering");
        assert_eq!(message.exchange.as_deref(), Some("services.requests"));
        assert_eq!(message.reply_to.as_deref(), Some("services.responses.platform"));

        let body: ServiceRequestMessage = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(body, ServiceRequestMessage::from_event(&event, "services.responses.platform"));
        assert!(broker.published_to("transport.requests").is_empty());
    }

    #[tokio::test]
    async fn missing_route_fails_loudly() {
        let broker = InMemoryBroker::new();
        let partial = RoutingTable::new("services.requests", "services.responses.platform")
            .with_route(ServiceType::Transport, "transport.requests", "service.request.transport");

        let err = router(&broker, partial)
            .route(&requested(ServiceType::Merchandising))
            .await
            .unwrap_err();

        assert!(matches!(err, RoutingError::NoRoute(ServiceType::Merchandising)));
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn broker_failure_surfaces_as_handler_error() {
        let broker = InMemoryBroker::new();
        broker.fail_publishes("broker unreachable");

        let result = router(&broker, table())
            .handle(&ServiceEvent::Requested(requested(ServiceType::Transport)))
            .await;

        let err = result.unwrap_err();
        assert!(err.0.contains("broker unreachable"), "{err}");
    }
}
