//! Documents pushed to a user's notification channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ServiceConfirmed, ServiceRejected, ServiceType};
use crate::types::ServiceId;

/// A service was confirmed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfirmedNotice {
    /// Request id
    pub service_id: ServiceId,
    /// Kind of service
    pub service_type: ServiceType,
    /// Provider that accepted
    pub provider_id: String,
    /// Agreed price as a decimal amount
    pub price: f64,
    /// Human-readable message
    pub message: String,
    /// When the notice was built
    pub timestamp: DateTime<Utc>,
}

impl ServiceConfirmedNotice {
    /// Build the notice for a confirmation.
    #[must_use]
    pub fn from_event(event: &ServiceConfirmed, timestamp: DateTime<Utc>) -> Self {
        Self {
            service_id: event.service_id,
            service_type: event.service_type,
            provider_id: event.provider_id.clone(),
            price: event.price.as_decimal(),
            message: format!("Your {} service has been confirmed!", event.service_type),
            timestamp,
        }
    }
}

/// A service was rejected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRejectedNotice {
    /// Request id
    pub service_id: ServiceId,
    /// Kind of service
    pub service_type: ServiceType,
    /// Why it was rejected
    pub reason: String,
    /// Human-readable message
    pub message: String,
    /// When the notice was built
    pub timestamp: DateTime<Utc>,
}

impl ServiceRejectedNotice {
    /// Build the notice for a rejection.
    #[must_use]
    pub fn from_event(event: &ServiceRejected, timestamp: DateTime<Utc>) -> Self {
        Self {
            service_id: event.service_id,
            service_type: event.service_type,
            reason: event.reason.clone(),
            message: format!(
                "Unfortunately, your {} service request was not available.",
                event.service_type
            ),
            timestamp,
        }
    }
}

/// Everything that can be pushed to a user, tagged by `type`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NotificationPayload {
    /// See [`ServiceConfirmedNotice`]
    ServiceConfirmed(ServiceConfirmedNotice),
    /// See [`ServiceRejectedNotice`]
    ServiceRejected(ServiceRejectedNotice),
}

impl NotificationPayload {
    /// The `type` tag, also used as a metric label.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ServiceConfirmed(_) => "ServiceConfirmed",
            Self::ServiceRejected(_) => "ServiceRejected",
        }
    }
}
