//! Errors raised by the domain model.

use thiserror::Error;

use super::value_objects::ServiceStatus;
use crate::types::Money;

/// Why a domain operation was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The operation is not allowed from the request's current status
    #[error("Cannot {operation} service in status {status}")]
    InvalidTransition {
        /// Operation that was attempted (`confirm`, `reject`, ...)
        operation: &'static str,
        /// Status the request was in
        status: ServiceStatus,
    },

    /// A provider response without availability cannot confirm a request
    #[error("Cannot confirm unavailable service")]
    ProviderUnavailable,

    /// Rejections must say why
    #[error("Rejection reason is required")]
    MissingRejectionReason,

    /// Not one of Transport, Catering, Merchandising
    #[error("Invalid service type: {0}")]
    UnknownServiceType(String),

    /// Not one of the service statuses
    #[error("Invalid status: {0}")]
    UnknownServiceStatus(String),

    /// A text field is longer than the request record can hold
    #[error("{field} must be at most {max} characters, got {actual}")]
    TooLong {
        /// Offending field
        field: &'static str,
        /// Maximum number of characters
        max: usize,
        /// Characters supplied
        actual: usize,
    },

    /// The price cannot be represented in the request record
    #[error("Price {0} is out of range")]
    PriceOutOfRange(Money),
}

impl DomainError {
    /// Whether the error is about the request's state rather than the input.
    #[must_use]
    pub const fn is_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }
}
