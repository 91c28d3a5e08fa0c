//! Domain events emitted by [`ServiceRequest`](super::ServiceRequest) transitions.

use chrono::{DateTime, Utc};
use complementary_core::event::DomainEvent;
use serde::{Deserialize, Serialize};

use super::value_objects::ServiceType;
use crate::types::{EventId, Money, ReservationId, ServiceId, UserId};

/// A new service request was created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRequested {
    /// Request id
    pub service_id: ServiceId,
    /// Reservation the service is attached to
    pub reservation_id: ReservationId,
    /// Requesting user
    pub user_id: UserId,
    /// Event the reservation is for
    pub event_id: EventId,
    /// Kind of service
    pub service_type: ServiceType,
    /// Free-text details from the user
    pub details: String,
    /// When the request was made
    pub occurred_at: DateTime<Utc>,
}

/// A provider accepted the request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfirmed {
    /// Request id
    pub service_id: ServiceId,
    /// Reservation the service is attached to
    pub reservation_id: ReservationId,
    /// Requesting user
    pub user_id: UserId,
    /// Kind of service
    pub service_type: ServiceType,
    /// Provider that accepted
    pub provider_id: String,
    /// Agreed price
    pub price: Money,
    /// When the confirmation was applied
    pub occurred_at: DateTime<Utc>,
}

/// The request was declined.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRejected {
    /// Request id
    pub service_id: ServiceId,
    /// Reservation the service is attached to
    pub reservation_id: ReservationId,
    /// Requesting user
    pub user_id: UserId,
    /// Kind of service
    pub service_type: ServiceType,
    /// Why the request was declined
    pub reason: String,
    /// When the rejection was applied
    pub occurred_at: DateTime<Utc>,
}

/// The user withdrew the request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCancelled {
    /// Request id
    pub service_id: ServiceId,
    /// Reservation the service is attached to
    pub reservation_id: ReservationId,
    /// Requesting user
    pub user_id: UserId,
    /// Kind of service
    pub service_type: ServiceType,
    /// When the cancellation was applied
    pub occurred_at: DateTime<Utc>,
}

/// Every event a service request can emit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceEvent {
    /// See [`ServiceRequested`]
    Requested(ServiceRequested),
    /// See [`ServiceConfirmed`]
    Confirmed(ServiceConfirmed),
    /// See [`ServiceRejected`]
    Rejected(ServiceRejected),
    /// See [`ServiceCancelled`]
    Cancelled(ServiceCancelled),
}

/// Discriminant of [`ServiceEvent`], used to register dispatch handlers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ServiceEventKind {
    /// [`ServiceEvent::Requested`]
    Requested,
    /// [`ServiceEvent::Confirmed`]
    Confirmed,
    /// [`ServiceEvent::Rejected`]
    Rejected,
    /// [`ServiceEvent::Cancelled`]
    Cancelled,
}

impl ServiceEvent {
    /// Which kind of event this is.
    #[must_use]
    pub const fn kind(&self) -> ServiceEventKind {
        match self {
            Self::Requested(_) => ServiceEventKind::Requested,
            Self::Confirmed(_) => ServiceEventKind::Confirmed,
            Self::Rejected(_) => ServiceEventKind::Rejected,
            Self::Cancelled(_) => ServiceEventKind::Cancelled,
        }
    }

    /// Request the event is about.
    #[must_use]
    pub const fn service_id(&self) -> ServiceId {
        match self {
            Self::Requested(e) => e.service_id,
            Self::Confirmed(e) => e.service_id,
            Self::Rejected(e) => e.service_id,
            Self::Cancelled(e) => e.service_id,
        }
    }

    /// Kind of service the request is for.
    #[must_use]
    pub const fn service_type(&self) -> ServiceType {
        match self {
            Self::Requested(e) => e.service_type,
            Self::Confirmed(e) => e.service_type,
            Self::Rejected(e) => e.service_type,
            Self::Cancelled(e) => e.service_type,
        }
    }
}

impl DomainEvent for ServiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Requested(_) => "ServiceRequested",
            Self::Confirmed(_) => "ServiceConfirmed",
            Self::Rejected(_) => "ServiceRejected",
            Self::Cancelled(_) => "ServiceCancelled",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            Self::Requested(e) => e.occurred_at,
            Self::Confirmed(e) => e.occurred_at,
            Self::Rejected(e) => e.occurred_at,
            Self::Cancelled(e) => e.occurred_at,
        }
    }
}
