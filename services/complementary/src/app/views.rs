//! Inputs and read models of the service-request use cases.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::{ProviderResponse, ServiceRequestState, ServiceStatus};
use crate::types::{EventId, Money, ReservationId, ServiceId};

/// A user's request for a new service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewServiceRequest {
    /// Reservation to attach the service to
    pub reservation_id: ReservationId,
    /// Event the reservation is for
    pub event_id: EventId,
    /// Service type name, parsed case-insensitively
    pub service_type: String,
    /// Free-text details
    #[serde(default)]
    pub details: String,
}

/// A provider's decision, as applied by the response correlator.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderDecision {
    /// Request the decision is about
    pub service_id: ServiceId,
    /// Whether the provider accepted
    pub is_available: bool,
    /// Provider that answered
    pub provider_id: String,
    /// Free-text note
    pub message: String,
    /// Quoted price
    pub price: Money,
    /// Expected delivery time
    pub estimated_time: Option<DateTime<Utc>>,
    /// Why the provider declined
    pub rejection_reason: Option<String>,
}

impl ProviderDecision {
    /// The domain snapshot of this decision.
    #[must_use]
    pub fn to_response(&self) -> ProviderResponse {
        ProviderResponse::new(
            self.is_available,
            self.provider_id.clone(),
            self.message.clone(),
            self.price,
            self.estimated_time,
        )
    }
}

/// What applying a provider decision did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecisionOutcome {
    /// The request moved to Confirmed or Rejected
    Applied(ServiceStatus),
    /// The request already reflected this decision; nothing changed
    Duplicate(ServiceStatus),
}

impl DecisionOutcome {
    /// Metric label for the outcome.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Applied(_) => "applied",
            Self::Duplicate(_) => "duplicate",
        }
    }
}

/// Status of one service request, as shown to its owner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatusView {
    /// Request id
    pub service_id: ServiceId,
    /// Reservation the service is attached to
    pub reservation_id: ReservationId,
    /// Canonical service type name
    pub service_type: String,
    /// Canonical status name
    pub status: String,
    /// Assigned provider
    pub provider_id: Option<String>,
    /// Agreed price as a decimal amount
    pub price: f64,
    /// When the request was made
    pub requested_at: DateTime<Utc>,
    /// When it was confirmed
    pub confirmed_at: Option<DateTime<Utc>>,
    /// When it was rejected
    pub rejected_at: Option<DateTime<Utc>>,
    /// Why it was rejected
    pub rejection_reason: Option<String>,
    /// Free-text details
    pub details: String,
}

impl From<&ServiceRequestState> for ServiceStatusView {
    fn from(state: &ServiceRequestState) -> Self {
        Self {
            service_id: state.id,
            reservation_id: state.reservation_id,
            service_type: state.service_type.to_string(),
            status: state.status.to_string(),
            provider_id: state.provider_id.clone(),
            price: state.price.as_decimal(),
            requested_at: state.requested_at,
            confirmed_at: state.confirmed_at,
            rejected_at: state.rejected_at,
            rejection_reason: state.rejection_reason.clone(),
            details: state.details.clone(),
        }
    }
}

/// Aggregate counts over all service requests.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMetrics {
    /// Number of requests
    pub total_requests: usize,
    /// Requests in Confirmed
    pub confirmed: usize,
    /// Requests in Rejected
    pub rejected: usize,
    /// Requests still waiting on a provider (Requested or Pending)
    pub pending: usize,
    /// Mean price over requests with a non-zero price, 0 if there are none
    pub average_price: f64,
    /// Number of requests per service type name
    pub by_service_type: BTreeMap<String, usize>,
}

impl ServiceMetrics {
    /// Compute metrics over a set of requests.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compute<'a>(requests: impl IntoIterator<Item = &'a ServiceRequestState>) -> Self {
        let mut metrics = Self::default();
        let mut priced: u64 = 0;
        let mut price_total: u128 = 0;

        for request in requests {
            metrics.total_requests += 1;
            match request.status {
                ServiceStatus::Confirmed => metrics.confirmed += 1,
                ServiceStatus::Rejected => metrics.rejected += 1,
                ServiceStatus::Requested | ServiceStatus::Pending => metrics.pending += 1,
                ServiceStatus::Cancelled => {}
            }
            if !request.price.is_zero() {
                priced += 1;
                price_total += u128::from(request.price.cents());
            }
            *metrics
                .by_service_type
                .entry(request.service_type.to_string())
                .or_default() += 1;
        }

        if priced > 0 {
            metrics.average_price = price_total as f64 / priced as f64 / 100.0;
        }
        metrics
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use crate::domain::{ServiceRequest, ServiceType};
    use crate::types::UserId;
    use complementary_core::environment::Clock;
    use complementary_testing::test_clock;

    fn request(service_type: ServiceType) -> ServiceRequest {
        let mut service = ServiceRequest::create(
            ReservationId::new(),
            UserId::new(),
            EventId::new(),
            service_type,
            "",
            test_clock().now(),
        )
        .unwrap();
        let _ = service.take_events();
        service
    }

    fn confirmed(service_type: ServiceType, cents: u64) -> ServiceRequest {
        let mut service = request(service_type);
        service
            .confirm(
                ProviderResponse::new(true, "p1", "", Money::from_cents(cents), None),
                test_clock().now(),
            )
            .unwrap();
        service
    }

    #[test]
    fn metrics_average_over_priced_requests_only() {
        let requests = [
            confirmed(ServiceType::Catering, 10_000),
            confirmed(ServiceType::Transport, 5_000),
            request(ServiceType::Catering),
        ];

        let metrics = ServiceMetrics::compute(requests.iter().map(ServiceRequest::state));

        assert_eq!(metrics.total_requests, 3);
        assert_eq!(metrics.confirmed, 2);
        assert_eq!(metrics.rejected, 0);
        assert_eq!(metrics.pending, 1);
        assert!((metrics.average_price - 75.0).abs() < f64::EPSILON);
        assert_eq!(metrics.by_service_type.get("Catering"), Some(&2));
        assert_eq!(metrics.by_service_type.get("Transport"), Some(&1));
        assert_eq!(metrics.by_service_type.get("Merchandising"), None);
    }

    #[test]
    fn metrics_count_pending_rejected_and_ignore_cancelled() {
        let mut pending = request(ServiceType::Merchandising);
        pending.mark_pending("p1").unwrap();
        let mut rejected = request(ServiceType::Merchandising);
        rejected.reject("sold out", test_clock().now()).unwrap();
        let mut cancelled = request(ServiceType::Transport);
        cancelled.cancel(test_clock().now()).unwrap();

        let requests = [pending, rejected, cancelled];
        let metrics = ServiceMetrics::compute(requests.iter().map(ServiceRequest::state));

        assert_eq!(metrics.total_requests, 3);
        assert_eq!(metrics.pending, 1);
        assert_eq!(metrics.rejected, 1);
        assert_eq!(metrics.confirmed, 0);
        assert!(metrics.average_price.abs() < f64::EPSILON);
    }

    #[test]
    fn empty_metrics() {
        let metrics = ServiceMetrics::compute(std::iter::empty());
        assert_eq!(metrics, ServiceMetrics::default());
    }

    #[test]
    fn status_view_serializes_camel_case() {
        let service = confirmed(ServiceType::Catering, 12_550);
        let view = ServiceStatusView::from(service.state());
        let value = serde_json::to_value(&view).unwrap();

        assert_eq!(value["serviceType"], "Catering");
        assert_eq!(value["status"], "Confirmed");
        assert_eq!(value["providerId"], "p1");
        assert_eq!(value["price"], 125.5);
        assert!(value["rejectedAt"].is_null());
    }
}
