//! Application layer: the use cases and the views they return.

pub mod service;
pub mod views;

pub use service::{DEFAULT_REJECTION_REASON, ServiceRequestService};
pub use views::{
    DecisionOutcome, NewServiceRequest, ProviderDecision, ServiceMetrics, ServiceStatusView,
};
