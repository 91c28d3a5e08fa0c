//! Business metrics for the service-request lifecycle.
//!
//! Descriptions are registered once at startup with
//! [`register_business_metrics`]. Lifecycle counters are recorded by
//! [`MetricsRecorder`], a best-effort event handler, so a metrics problem can
//! never fail a use case.

use async_trait::async_trait;
use metrics::{counter, describe_counter};

use crate::dispatch::{EventHandler, HandlerError};
use crate::domain::ServiceEvent;

/// Register descriptions for every counter this crate records.
pub fn register_business_metrics() {
    describe_counter!(
        "complementary_services_requested_total",
        "Total service requests created, by service type"
    );
    describe_counter!(
        "complementary_services_confirmed_total",
        "Total service requests confirmed by a provider, by service type"
    );
    describe_counter!(
        "complementary_services_rejected_total",
        "Total service requests rejected, by service type"
    );
    describe_counter!(
        "complementary_services_cancelled_total",
        "Total service requests cancelled by their owner, by service type"
    );
    describe_counter!(
        "complementary_services_confirmed_price_cents_total",
        "Sum of confirmed prices in cents"
    );
    describe_counter!(
        "complementary_provider_responses_total",
        "Provider responses processed, by outcome (applied, duplicate, failed)"
    );
    describe_counter!(
        "complementary_notifications_total",
        "User notifications attempted, by kind and outcome"
    );
    describe_counter!(
        "broker_messages_total",
        "Broker deliveries settled, by consumer and outcome"
    );
    describe_counter!(
        "dead_letter_entries_total",
        "Messages written to the dead-letter store, by source"
    );
    describe_counter!(
        "event_handler_failures_total",
        "Best-effort event handler failures, by handler"
    );
}

/// Count one processed provider response.
pub fn record_provider_response(outcome: &'static str) {
    counter!("complementary_provider_responses_total", "outcome" => outcome).increment(1);
}

/// Count one notification attempt.
pub fn record_notification(kind: &'static str, outcome: &'static str) {
    counter!("complementary_notifications_total", "kind" => kind, "outcome" => outcome)
        .increment(1);
}

/// Counts lifecycle transitions from domain events.
#[derive(Clone, Copy, Debug, Default)]
pub struct MetricsRecorder;

#[async_trait]
impl EventHandler for MetricsRecorder {
    fn name(&self) -> &'static str {
        "metrics-recorder"
    }

    async fn handle(&self, event: &ServiceEvent) -> Result<(), HandlerError> {
        let service_type = event.service_type().as_str();
        match event {
            ServiceEvent::Requested(_) => {
                counter!("complementary_services_requested_total", "service_type" => service_type)
                    .increment(1);
            }
            ServiceEvent::Confirmed(confirmed) => {
                counter!("complementary_services_confirmed_total", "service_type" => service_type)
                    .increment(1);
                counter!("complementary_services_confirmed_price_cents_total")
                    .increment(confirmed.price.cents());
            }
            ServiceEvent::Rejected(_) => {
                counter!("complementary_services_rejected_total", "service_type" => service_type)
                    .increment(1);
            }
            ServiceEvent::Cancelled(_) => {
                counter!("complementary_services_cancelled_total", "service_type" => service_type)
                    .increment(1);
            }
        }
        Ok(())
    }
}
