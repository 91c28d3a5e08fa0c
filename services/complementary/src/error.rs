//! Use-case errors and their HTTP mapping.

use complementary_web::AppError;
use thiserror::Error;

use crate::domain::{DomainError, RepositoryError, ServiceStatus};

/// Errors returned by [`ServiceRequestService`](crate::app::ServiceRequestService).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The reservation or service request does not exist
    #[error("{resource} with id {id} not found")]
    NotFound {
        /// What was looked up
        resource: &'static str,
        /// Id that was not found
        id: String,
    },

    /// The caller does not own the reservation or request
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The input is invalid for this operation
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The request's status does not allow the operation
    #[error("Cannot {operation} service in status {status}")]
    InvalidTransition {
        /// Operation that was attempted
        operation: &'static str,
        /// Status the request was in
        status: ServiceStatus,
    },

    /// A required side effect (publishing to a provider) failed
    #[error("Delivery failure: {0}")]
    DeliveryFailure(String),

    /// Storage failed
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ServiceError {
    /// Shorthand for a missing service request.
    #[must_use]
    pub fn service_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            resource: "Service request",
            id: id.to_string(),
        }
    }

    /// Shorthand for a missing reservation.
    #[must_use]
    pub fn reservation_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            resource: "Reservation",
            id: id.to_string(),
        }
    }

    /// Whether retrying the same operation later might succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Repository(_) | Self::DeliveryFailure(_))
    }
}

impl From<DomainError> for ServiceError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidTransition { operation, status } => {
                Self::InvalidTransition { operation, status }
            }
            other => Self::InvalidRequest(other.to_string()),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound { resource, id } => Self::not_found(resource, id),
            ServiceError::Unauthorized(message) => Self::forbidden(message),
            ServiceError::InvalidRequest(message) => Self::bad_request(message),
            e @ ServiceError::InvalidTransition { .. } => Self::conflict(e.to_string()),
            ServiceError::DeliveryFailure(message) => {
                Self::unavailable("Service request could not be delivered to a provider")
                    .with_source(anyhow::anyhow!(message))
            }
            ServiceError::Repository(e) => {
                Self::internal("An internal error occurred").with_source(anyhow::Error::new(e))
            }
        }
    }
}
