//! Domain model: value types, the `ServiceRequest` aggregate, its events
//! and the storage ports it is persisted through.

pub mod error;
pub mod events;
pub mod repository;
pub mod reservation;
pub mod service_request;
pub mod value_objects;

pub use error::DomainError;
pub use events::{
    ServiceCancelled, ServiceConfirmed, ServiceEvent, ServiceEventKind, ServiceRejected,
    ServiceRequested,
};
pub use repository::{RepositoryError, ReservationLookup, ServiceRequestRepository};
pub use reservation::Reservation;
pub use service_request::{
    MAX_DETAILS_LEN, MAX_PROVIDER_ID_LEN, MAX_PROVIDER_MESSAGE_LEN, MAX_REASON_LEN,
    ServiceRequest, ServiceRequestState,
};
pub use value_objects::{ProviderResponse, ServiceStatus, ServiceType};
