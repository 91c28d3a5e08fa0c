//! Closed enumerations and the provider decision snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::DomainError;
use crate::types::Money;

/// Kind of complementary service a user can request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServiceType {
    /// Getting to and from the venue
    Transport,
    /// Food and drink
    Catering,
    /// Event merchandise
    Merchandising,
}

impl ServiceType {
    /// Every service type, in canonical order.
    pub const ALL: [Self; 3] = [Self::Transport, Self::Catering, Self::Merchandising];

    /// Canonical string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "Transport",
            Self::Catering => "Catering",
            Self::Merchandising => "Merchandising",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = DomainError;

    /// Case-insensitive parse of the canonical names.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "transport" => Ok(Self::Transport),
            "catering" => Ok(Self::Catering),
            "merchandising" => Ok(Self::Merchandising),
            _ => Err(DomainError::UnknownServiceType(value.to_string())),
        }
    }
}

/// Lifecycle status of a service request.
///
/// ```text
/// Requested ──► Pending ──► Confirmed
///     │  └──────────────────►  ▲
///     │            │
///     ├────────────┴──► Rejected
///     └────────────┴──► Cancelled
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceStatus {
    /// Created, waiting for a provider
    Requested,
    /// A provider has been provisionally assigned
    Pending,
    /// Provider accepted (terminal)
    Confirmed,
    /// Provider declined (terminal)
    Rejected,
    /// User withdrew the request (terminal)
    Cancelled,
}

impl ServiceStatus {
    /// Canonical string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "Requested",
            Self::Pending => "Pending",
            Self::Confirmed => "Confirmed",
            Self::Rejected => "Rejected",
            Self::Cancelled => "Cancelled",
        }
    }

    /// No transition leaves a terminal status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Rejected | Self::Cancelled)
    }

    /// Still waiting on a provider decision.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Requested | Self::Pending)
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "requested" => Ok(Self::Requested),
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "rejected" => Ok(Self::Rejected),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(DomainError::UnknownServiceStatus(value.to_string())),
        }
    }
}

/// A provider's decision on a service request.
///
/// Two responses are equal when they agree on availability, provider and
/// price; the free-text message and the estimate are informational.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Whether the provider can deliver the service
    pub is_available: bool,
    /// Provider that answered
    pub provider_id: String,
    /// Free-text note from the provider
    pub message: String,
    /// Quoted price
    pub price: Money,
    /// When the provider expects to deliver
    pub estimated_time: Option<DateTime<Utc>>,
}

impl ProviderResponse {
    /// Create a response.
    #[must_use]
    pub fn new(
        is_available: bool,
        provider_id: impl Into<String>,
        message: impl Into<String>,
        price: Money,
        estimated_time: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            is_available,
            provider_id: provider_id.into(),
            message: message.into(),
            price,
            estimated_time,
        }
    }
}

impl PartialEq for ProviderResponse {
    fn eq(&self, other: &Self) -> bool {
        self.is_available == other.is_available
            && self.provider_id == other.provider_id
            && self.price == other.price
    }
}

impl Eq for ProviderResponse {}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn service_type_parse_is_case_insensitive() {
        assert_eq!("Catering".parse::<ServiceType>().unwrap(), ServiceType::Catering);
        assert_eq!("TRANSPORT".parse::<ServiceType>().unwrap(), ServiceType::Transport);
        assert_eq!("merchandising".parse::<ServiceType>().unwrap(), ServiceType::Merchandising);
    }

    #[test]
    fn service_type_parse_rejects_unknown_and_empty() {
        assert_eq!(
            "parking".parse::<ServiceType>(),
            Err(DomainError::UnknownServiceType("parking".to_string()))
        );
        assert!("".parse::<ServiceType>().is_err());
    }

    #[test]
    fn service_status_parse() {
        assert_eq!("pEnDiNg".parse::<ServiceStatus>().unwrap(), ServiceStatus::Pending);
        assert_eq!(
            "expired".parse::<ServiceStatus>(),
            Err(DomainError::UnknownServiceStatus("expired".to_string()))
        );
    }

    #[test]
    fn terminal_statuses() {
        assert!(!ServiceStatus::Requested.is_terminal());
        assert!(!ServiceStatus::Pending.is_terminal());
        assert!(ServiceStatus::Confirmed.is_terminal());
        assert!(ServiceStatus::Rejected.is_terminal());
        assert!(ServiceStatus::Cancelled.is_terminal());
    }

    #[test]
    fn provider_response_equality_ignores_message_and_estimate() {
        let a = ProviderResponse::new(true, "p1", "msgA", Money::from_cents(1_000), None);
        let b = ProviderResponse::new(true, "p1", "msgB", Money::from_cents(1_000), Some(Utc::now()));
        assert_eq!(a, b);

        let other_price = ProviderResponse::new(true, "p1", "msgA", Money::from_cents(1_100), None);
        let other_provider = ProviderResponse::new(true, "p2", "msgA", Money::from_cents(1_000), None);
        let unavailable = ProviderResponse::new(false, "p1", "msgA", Money::from_cents(1_000), None);
        assert_ne!(a, other_price);
        assert_ne!(a, other_provider);
        assert_ne!(a, unavailable);
    }

    fn random_case(value: &str, mask: &[bool]) -> String {
        value
            .chars()
            .zip(mask.iter().cycle())
            .map(|(c, upper)| if *upper { c.to_ascii_uppercase() } else { c.to_ascii_lowercase() })
            .collect()
    }

    proptest! {
        #[test]
        fn any_casing_of_a_service_type_parses(
            index in 0usize..3,
            mask in proptest::collection::vec(any::<bool>(), 1..16),
        ) {
            let expected = ServiceType::ALL[index];
            let input = random_case(expected.as_str(), &mask);
            prop_assert_eq!(input.parse::<ServiceType>(), Ok(expected));
        }

        #[test]
        fn any_casing_of_a_status_parses(
            index in 0usize..5,
            mask in proptest::collection::vec(any::<bool>(), 1..16),
        ) {
            let all = [
                ServiceStatus::Requested,
                ServiceStatus::Pending,
                ServiceStatus::Confirmed,
                ServiceStatus::Rejected,
                ServiceStatus::Cancelled,
            ];
            let expected = all[index];
            let input = random_case(expected.as_str(), &mask);
            prop_assert_eq!(input.parse::<ServiceStatus>(), Ok(expected));
        }

        #[test]
        fn other_strings_do_not_parse_as_service_type(input in "[a-zA-Z ]{0,20}") {
            let known = ServiceType::ALL
                .iter()
                .any(|t| t.as_str().eq_ignore_ascii_case(&input));
            prop_assume!(!known);
            prop_assert!(input.parse::<ServiceType>().is_err());
        }
    }
}
