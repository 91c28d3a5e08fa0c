//! Complementary services for event reservations.
//!
//! A user holding a confirmed reservation can ask for an extra service
//! (transport, catering or merchandising). Each request goes to the matching
//! external provider over the message broker; the provider answers
//! asynchronously and the answer settles the request.
//!
//! # Architecture
//!
//! ```text
//!   request_service          ServiceRequested
//! ┌─────────────────┐      ┌──────────────────┐  publish   ┌─────────────────┐
//! │ ServiceRequest  │─────►│  EventDispatcher │───────────►│ provider queues │
//! │    Service      │      │  (RequestRouter) │            └────────┬────────┘
//! └────────▲────────┘      └──────────────────┘                     │
//!          │ apply_provider_decision                                │ provider
//! ┌────────┴────────┐  consume   ┌─────────────────┐                │
//! │ ResponseCorrel- │◄───────────│ response queue  │◄───────────────┘
//! │     ator        │  ack/nack  └─────────────────┘
//! └─────────────────┘
//!          │ ServiceConfirmed / ServiceRejected
//!          ▼
//! ┌─────────────────┐   websocket   ┌──────┐
//! │NotificationFan- │──────────────►│ user │
//! │      out        │               └──────┘
//! └─────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! ```text
//! Requested ──► Pending ──► Confirmed
//!     │            │
//!     ├────────────┴──────► Rejected
//!     └────────────┴──────► Cancelled
//! ```
//!
//! Confirmed, Rejected and Cancelled are terminal. Every transition is saved
//! with an optimistic version check before its events are dispatched.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod app;
pub mod bootstrap;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod lifecycle;
pub mod messaging;
pub mod metrics;
pub mod notifications;
pub mod persistence;
pub mod types;

pub use app::{
    DecisionOutcome, NewServiceRequest, ProviderDecision, ServiceMetrics, ServiceRequestService,
    ServiceStatusView,
};
pub use bootstrap::build_application;
pub use config::Config;
pub use dispatch::{EventDispatcher, EventHandler};
pub use domain::{ServiceEvent, ServiceRequest, ServiceStatus, ServiceType};
pub use error::ServiceError;
pub use lifecycle::Application;
pub use types::*;
