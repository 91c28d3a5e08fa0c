//! JSON documents exchanged with providers.
//!
//! Outbound fields are written in camelCase. Inbound responses are read in
//! camelCase and also accept PascalCase names, which some provider bridges
//! still emit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::ProviderDecision;
use crate::domain::{ServiceRequested, ServiceType};
use crate::types::{EventId, Money, ReservationId, ServiceId};

/// Why an inbound response could not be turned into a decision.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContractError {
    /// Not a valid response document
    #[error("malformed provider response: {0}")]
    Malformed(String),

    /// Price is negative, not a number or too large to store
    #[error("invalid price in provider response: {0}")]
    InvalidPrice(f64),

    /// An available response must name the provider
    #[error("available provider response for {0} has no provider id")]
    MissingProvider(ServiceId),
}

/// Request sent to a provider queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRequestMessage {
    /// Request id (also the broker message id)
    pub service_id: ServiceId,
    /// Reservation the service is attached to
    pub reservation_id: ReservationId,
    /// Event the reservation is for
    pub event_id: EventId,
    /// Canonical service type name
    pub service_type: ServiceType,
    /// Free-text details from the user
    pub details: String,
    /// When the request was made
    pub requested_at: DateTime<Utc>,
    /// Queue the provider must reply to
    pub callback_queue: String,
}

impl ServiceRequestMessage {
    /// Build the outbound message for a newly requested service.
    #[must_use]
    pub fn from_event(event: &ServiceRequested, callback_queue: impl Into<String>) -> Self {
        Self {
            service_id: event.service_id,
            reservation_id: event.reservation_id,
            event_id: event.event_id,
            service_type: event.service_type,
            details: event.details.clone(),
            requested_at: event.occurred_at,
            callback_queue: callback_queue.into(),
        }
    }
}

/// Provider decision received on the response queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceResponseMessage {
    /// Request the decision is about
    #[serde(alias = "ServiceId")]
    pub service_id: ServiceId,
    /// Whether the provider accepted
    #[serde(alias = "IsAvailable")]
    pub is_available: bool,
    /// Provider that answered
    #[serde(default, alias = "ProviderId")]
    pub provider_id: Option<String>,
    /// Free-text note
    #[serde(default, alias = "Message")]
    pub message: Option<String>,
    /// Quoted price as a decimal amount
    #[serde(default, alias = "Price")]
    pub price: f64,
    /// Expected delivery time
    #[serde(default, alias = "EstimatedTime")]
    pub estimated_time: Option<DateTime<Utc>>,
    /// Why the provider declined
    #[serde(default, alias = "RejectionReason")]
    pub rejection_reason: Option<String>,
}

impl ServiceResponseMessage {
    /// Parse a response document.
    ///
    /// # Errors
    ///
    /// [`ContractError::Malformed`] if the bytes are not a response document.
    pub fn decode(payload: &[u8]) -> Result<Self, ContractError> {
        serde_json::from_slice(payload).map_err(|e| ContractError::Malformed(e.to_string()))
    }

    /// Validate the response and convert it to a use-case input.
    ///
    /// # Errors
    ///
    /// - [`ContractError::InvalidPrice`] unless the price is a finite amount [`Money`] can store
    /// - [`ContractError::MissingProvider`] for an available response without
    ///   a provider id
    pub fn into_decision(self) -> Result<ProviderDecision, ContractError> {
        let price = Money::from_decimal(self.price).ok_or(ContractError::InvalidPrice(self.price))?;
        let provider_id = self.provider_id.filter(|p| !p.trim().is_empty());

        if self.is_available && provider_id.is_none() {
            return Err(ContractError::MissingProvider(self.service_id));
        }

        Ok(ProviderDecision {
            service_id: self.service_id,
            is_available: self.is_available,
            provider_id: provider_id.unwrap_or_default(),
            message: self.message.unwrap_or_default(),
            price,
            estimated_time: self.estimated_time,
            rejection_reason: self.rejection_reason,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use crate::types::UserId;
    use complementary_core::environment::Clock;
    use complementary_testing::test_clock;
    use serde_json::json;

    #[test]
    fn request_message_uses_camel_case() {
        let event = ServiceRequested {
            service_id: ServiceId::new(),
            reservation_id: ReservationId::new(),
            user_id: UserId::new(),
            event_id: EventId::new(),
            service_type: ServiceType::Catering,
            details: "vegan x10".to_string(),
            occurred_at: test_clock().now(),
        };

        let message = ServiceRequestMessage::from_event(&event, "services.responses.platform");
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["serviceId"], json!(event.service_id.to_string()));
        assert_eq!(value["reservationId"], json!(event.reservation_id.to_string()));
        assert_eq!(value["eventId"], json!(event.event_id.to_string()));
        assert_eq!(value["serviceType"], json!("Catering"));
        assert_eq!(value["details"], json!("vegan x10"));
        assert_eq!(value["requestedAt"], json!("2025-01-01T00:00:00Z"));
        assert_eq!(value["callbackQueue"], json!("services.responses.platform"));
    }

    #[test]
    fn response_accepts_camel_case() {
        let id = ServiceId::new();
        let payload = json!({
            "serviceId": id,
            "isAvailable": true,
            "providerId": "p1",
            "message": "booked",
            "price": 100.0,
            "estimatedTime": "2025-01-02T18:00:00Z",
        });

        let decision = ServiceResponseMessage::decode(payload.to_string().as_bytes())
            .unwrap()
            .into_decision()
            .unwrap();

        assert_eq!(decision.service_id, id);
        assert!(decision.is_available);
        assert_eq!(decision.provider_id, "p1");
        assert_eq!(decision.message, "booked");
        assert_eq!(decision.price, Money::from_cents(10_000));
        assert!(decision.estimated_time.is_some());
        assert!(decision.rejection_reason.is_none());
    }

    #[test]
    fn response_accepts_pascal_case() {
        let id = ServiceId::new();
        let payload = json!({
            "ServiceId": id,
            "IsAvailable": false,
            "ProviderId": null,
            "Message": null,
            "Price": 0,
            "EstimatedTime": null,
            "RejectionReason": "sold out",
        });

        let decision = ServiceResponseMessage::decode(payload.to_string().as_bytes())
            .unwrap()
            .into_decision()
            .unwrap();

        assert!(!decision.is_available);
        assert_eq!(decision.provider_id, "");
        assert_eq!(decision.rejection_reason.as_deref(), Some("sold out"));
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert!(matches!(
            ServiceResponseMessage::decode(b"not json"),
            Err(ContractError::Malformed(_))
        ));
        assert!(matches!(
            ServiceResponseMessage::decode(br#"{"isAvailable":true}"#),
            Err(ContractError::Malformed(_))
        ));
        assert!(matches!(
            ServiceResponseMessage::decode(br#"{"serviceId":"not-a-uuid","isAvailable":true}"#),
            Err(ContractError::Malformed(_))
        ));
    }

    #[test]
    fn available_response_needs_provider_and_valid_price() {
        let id = ServiceId::new();
        let missing_provider = ServiceResponseMessage {
            service_id: id,
            is_available: true,
            provider_id: Some("  ".to_string()),
            message: None,
            price: 10.0,
            estimated_time: None,
            rejection_reason: None,
        };
        assert_eq!(
            missing_provider.clone().into_decision(),
            Err(ContractError::MissingProvider(id))
        );

        let negative = ServiceResponseMessage {
            provider_id: Some("p1".to_string()),
            price: -5.0,
            ..missing_provider
        };
        assert_eq!(negative.into_decision(), Err(ContractError::InvalidPrice(-5.0)));
    }
}
