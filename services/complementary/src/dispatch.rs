//! In-process dispatch of domain events to registered handlers.
//!
//! Handlers are registered per [`ServiceEventKind`] with a [`Criticality`].
//! After a use case has persisted an aggregate it drains the aggregate's
//! events and passes them to [`EventDispatcher::dispatch`], which invokes the
//! matching handlers one at a time, in emission order and then in
//! registration order.
//!
//! - A failing [`Criticality::Required`] handler stops dispatch and the error
//!   is returned to the use case.
//! - A failing [`Criticality::BestEffort`] handler is logged, counted and
//!   skipped.
//!
//! # Example
//!
//! ```rust,ignore
//! let dispatcher = EventDispatcher::builder()
//!     .required(ServiceEventKind::Requested, router)
//!     .best_effort(ServiceEventKind::Confirmed, Arc::clone(&fanout))
//!     .best_effort(ServiceEventKind::Rejected, fanout)
//!     .build();
//!
//! service.save(&mut request).await?;
//! dispatcher.dispatch(request.take_events()).await?;
//! ```

use async_trait::async_trait;
use complementary_core::event::DomainEvent;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::domain::{ServiceEvent, ServiceEventKind};
use crate::types::ServiceId;

/// Failure reported by an [`EventHandler`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    /// Create a handler error from any message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Reacts to domain events after they have been persisted.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Handle one event.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] if the side effect could not be performed.
    async fn handle(&self, event: &ServiceEvent) -> Result<(), HandlerError>;
}

/// Whether a handler's failure must fail the triggering use case.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Criticality {
    /// The use case cannot complete without this side effect
    Required,
    /// The side effect is logged and dropped on failure
    BestEffort,
}

/// A required handler failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("handler '{handler}' failed on {event_type} for service request {service_id}: {source}")]
pub struct DispatchError {
    /// Handler that failed
    pub handler: &'static str,
    /// Event being dispatched
    pub event_type: &'static str,
    /// Request the event was about
    pub service_id: ServiceId,
    /// The handler's error
    #[source]
    pub source: HandlerError,
}

#[derive(Clone)]
struct Registration {
    kind: ServiceEventKind,
    criticality: Criticality,
    handler: Arc<dyn EventHandler>,
}

/// Ordered registry of event handlers.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    registrations: Vec<Registration>,
}

impl EventDispatcher {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> EventDispatcherBuilder {
        EventDispatcherBuilder::default()
    }

    /// Number of handlers registered for `kind`.
    #[must_use]
    pub fn handler_count(&self, kind: ServiceEventKind) -> usize {
        self.registrations.iter().filter(|r| r.kind == kind).count()
    }

    /// Dispatch events in order to every matching handler.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] for the first required handler that fails;
    /// events after it are not dispatched.
    pub async fn dispatch(&self, events: Vec<ServiceEvent>) -> Result<(), DispatchError> {
        for event in &events {
            let kind = event.kind();
            debug!(
                event_type = event.event_type(),
                service_id = %event.service_id(),
                "Dispatching domain event"
            );

            for registration in self.registrations.iter().filter(|r| r.kind == kind) {
                let handler = registration.handler.name();
                let Err(e) = registration.handler.handle(event).await else {
                    continue;
                };

                match registration.criticality {
                    Criticality::Required => {
                        error!(
                            handler,
                            event_type = event.event_type(),
                            service_id = %event.service_id(),
                            error = %e,
                            "Required event handler failed"
                        );
                        return Err(DispatchError {
                            handler,
                            event_type: event.event_type(),
                            service_id: event.service_id(),
                            source: e,
                        });
                    }
                    Criticality::BestEffort => {
                        warn!(
                            handler,
                            event_type = event.event_type(),
                            service_id = %event.service_id(),
                            error = %e,
                            "Event handler failed, continuing"
                        );
                        metrics::counter!("event_handler_failures_total", "handler" => handler)
                            .increment(1);
                    }
                }
            }
        }

        Ok(())
    }
}

/// Builder for [`EventDispatcher`].
#[derive(Default)]
pub struct EventDispatcherBuilder {
    registrations: Vec<Registration>,
}

impl EventDispatcherBuilder {
    /// Register `handler` for `kind`.
    #[must_use]
    pub fn on(
        mut self,
        kind: ServiceEventKind,
        criticality: Criticality,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        self.registrations.push(Registration {
            kind,
            criticality,
            handler,
        });
        self
    }

    /// Register a handler whose failure fails the use case.
    #[must_use]
    pub fn required(self, kind: ServiceEventKind, handler: Arc<dyn EventHandler>) -> Self {
        self.on(kind, Criticality::Required, handler)
    }

    /// Register a handler whose failure is only logged.
    #[must_use]
    pub fn best_effort(self, kind: ServiceEventKind, handler: Arc<dyn EventHandler>) -> Self {
        self.on(kind, Criticality::BestEffort, handler)
    }

    /// Build the dispatcher.
    #[must_use]
    pub fn build(self) -> EventDispatcher {
        EventDispatcher {
            registrations: self.registrations,
        }
    }
}
