//! Storage ports for service requests and reservations.

use async_trait::async_trait;
use thiserror::Error;

use super::reservation::Reservation;
use super::service_request::ServiceRequest;
use crate::types::{EventId, ReservationId, ServiceId, UserId};

/// Errors raised by repositories.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// Another writer saved the request since it was loaded
    #[error("Concurrency conflict for service request {service_id}: expected version {expected}, found {actual:?}")]
    ConcurrencyConflict {
        /// Request being saved
        service_id: ServiceId,
        /// Version the writer loaded
        expected: u64,
        /// Version currently stored (`None` if the row is gone)
        actual: Option<u64>,
    },

    /// The backing store failed
    #[error("Database error: {0}")]
    Database(String),

    /// A stored row could not be mapped back to the domain
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Persistence for [`ServiceRequest`] aggregates.
///
/// `save` is the transaction boundary: it writes the whole aggregate
/// atomically and only if the stored version still equals the version the
/// aggregate was loaded at. On success the aggregate's version is advanced.
/// Listing methods return requests newest first.
#[async_trait]
pub trait ServiceRequestRepository: Send + Sync {
    /// Load a request by id.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Database`] or [`RepositoryError::Corrupt`].
    async fn load(&self, id: ServiceId) -> Result<Option<ServiceRequest>, RepositoryError>;

    /// Insert or update a request under optimistic concurrency.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::ConcurrencyConflict`] if the stored version moved.
    async fn save(&self, request: &mut ServiceRequest) -> Result<(), RepositoryError>;

    /// Requests made by a user.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Database`] or [`RepositoryError::Corrupt`].
    async fn find_by_user(&self, user: UserId) -> Result<Vec<ServiceRequest>, RepositoryError>;

    /// Requests attached to a reservation.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Database`] or [`RepositoryError::Corrupt`].
    async fn find_by_reservation(
        &self,
        reservation: ReservationId,
    ) -> Result<Vec<ServiceRequest>, RepositoryError>;

    /// Requests for an event.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Database`] or [`RepositoryError::Corrupt`].
    async fn find_by_event(&self, event: EventId) -> Result<Vec<ServiceRequest>, RepositoryError>;

    /// Every request.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Database`] or [`RepositoryError::Corrupt`].
    async fn all(&self) -> Result<Vec<ServiceRequest>, RepositoryError>;
}

/// Read-only reservation lookup.
#[async_trait]
pub trait ReservationLookup: Send + Sync {
    /// Find a reservation by id.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Database`] if the lookup failed.
    async fn find(&self, id: ReservationId) -> Result<Option<Reservation>, RepositoryError>;
}
