//! Use cases over the `ServiceRequest` aggregate.
//!
//! Every mutating use case follows the same shape: load, mutate, save under
//! the aggregate's version, then drain the aggregate's events and hand them
//! to the [`EventDispatcher`]. Events are only dispatched once the save has
//! succeeded.

use complementary_core::environment::Clock;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::views::{
    DecisionOutcome, NewServiceRequest, ProviderDecision, ServiceMetrics, ServiceStatusView,
};
use crate::dispatch::EventDispatcher;
use crate::domain::{
    ProviderResponse, ReservationLookup, ServiceRequest, ServiceRequestRepository, ServiceStatus,
    ServiceType,
};
use crate::error::ServiceError;
use crate::types::{EventId, ReservationId, ServiceId, UserId};

/// Reason stored when a provider declines without giving one.
pub const DEFAULT_REJECTION_REASON: &str = "Service not available";

/// Application service for complementary service requests.
#[derive(Clone)]
pub struct ServiceRequestService {
    repository: Arc<dyn ServiceRequestRepository>,
    reservations: Arc<dyn ReservationLookup>,
    dispatcher: EventDispatcher,
    clock: Arc<dyn Clock>,
}

impl ServiceRequestService {
    /// Create the service.
    #[must_use]
    pub fn new(
        repository: Arc<dyn ServiceRequestRepository>,
        reservations: Arc<dyn ReservationLookup>,
        dispatcher: EventDispatcher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            reservations,
            dispatcher,
            clock,
        }
    }

    /// Request a service for one of the user's confirmed reservations.
    ///
    /// The new request is stored and then published to the provider queue
    /// of its type.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::NotFound`] if the reservation does not exist
    /// - [`ServiceError::Unauthorized`] if `user` does not own it
    /// - [`ServiceError::InvalidRequest`] if it is not confirmed or the
    ///   service type is unknown
    /// - [`ServiceError::DeliveryFailure`] if the request was stored but
    ///   could not be published
    pub async fn request_service(
        &self,
        user: UserId,
        input: NewServiceRequest,
    ) -> Result<ServiceStatusView, ServiceError> {
        let reservation = self
            .reservations
            .find(input.reservation_id)
            .await?
            .ok_or_else(|| ServiceError::reservation_not_found(input.reservation_id))?;

        if !reservation.is_owned_by(user) {
            warn!(
                user_id = %user,
                reservation_id = %input.reservation_id,
                "Service requested for another user's reservation"
            );
            return Err(ServiceError::Unauthorized(
                "User does not own this reservation".to_string(),
            ));
        }

        if !reservation.is_confirmed() {
            return Err(ServiceError::InvalidRequest(
                "Cannot request services for unconfirmed reservation".to_string(),
            ));
        }

        let service_type: ServiceType = input.service_type.parse()?;

        let mut request = ServiceRequest::create(
            input.reservation_id,
            user,
            input.event_id,
            service_type,
            input.details,
            self.clock.now(),
        )?;
        self.commit(&mut request).await?;

        info!(
            service_id = %request.id(),
            service_type = %service_type,
            reservation_id = %input.reservation_id,
            "Service requested"
        );
        Ok(ServiceStatusView::from(request.state()))
    }

    /// Provisionally assign a provider to a `Requested` request.
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotFound`] or [`ServiceError::InvalidTransition`].
    pub async fn mark_pending(
        &self,
        id: ServiceId,
        provider_id: &str,
    ) -> Result<ServiceStatusView, ServiceError> {
        let mut request = self.load(id).await?;
        request.mark_pending(provider_id)?;
        self.commit(&mut request).await?;

        debug!(service_id = %id, provider_id, "Service marked pending");
        Ok(ServiceStatusView::from(request.state()))
    }

    /// Confirm a request with a provider's acceptance.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::NotFound`] if the request does not exist
    /// - [`ServiceError::InvalidRequest`] if the response is not available
    /// - [`ServiceError::InvalidTransition`] if the request is not open
    pub async fn confirm_service(
        &self,
        id: ServiceId,
        response: ProviderResponse,
    ) -> Result<ServiceStatusView, ServiceError> {
        let mut request = self.load(id).await?;
        let provider_id = response.provider_id.clone();
        let price = response.price;

        request.confirm(response, self.clock.now())?;
        self.commit(&mut request).await?;

        info!(service_id = %id, provider_id = %provider_id, price = %price, "Service confirmed");
        Ok(ServiceStatusView::from(request.state()))
    }

    /// Reject a request.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::NotFound`] if the request does not exist
    /// - [`ServiceError::InvalidRequest`] if `reason` is blank
    /// - [`ServiceError::InvalidTransition`] if the request is not open
    pub async fn reject_service(
        &self,
        id: ServiceId,
        reason: &str,
    ) -> Result<ServiceStatusView, ServiceError> {
        let mut request = self.load(id).await?;
        request.reject(reason, self.clock.now())?;
        self.commit(&mut request).await?;

        info!(service_id = %id, reason, "Service rejected");
        Ok(ServiceStatusView::from(request.state()))
    }

    /// Cancel one of the user's open requests.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::NotFound`] if the request does not exist
    /// - [`ServiceError::Unauthorized`] if `user` does not own it
    /// - [`ServiceError::InvalidTransition`] if the request is not open
    pub async fn cancel_service(
        &self,
        id: ServiceId,
        user: UserId,
    ) -> Result<ServiceStatusView, ServiceError> {
        let mut request = self.load_owned(id, user).await?;
        request.cancel(self.clock.now())?;
        self.commit(&mut request).await?;

        info!(service_id = %id, user_id = %user, "Service cancelled");
        Ok(ServiceStatusView::from(request.state()))
    }

    /// Apply a provider's decision received from the response queue.
    ///
    /// A decision the request already reflects (confirmed by the same
    /// provider, or already rejected) is reported as
    /// [`DecisionOutcome::Duplicate`] and changes nothing.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::NotFound`] for an unknown request
    /// - [`ServiceError::InvalidTransition`] if the request is terminal with
    ///   a different outcome
    /// - [`ServiceError::Repository`] if storage failed
    pub async fn apply_provider_decision(
        &self,
        decision: &ProviderDecision,
    ) -> Result<DecisionOutcome, ServiceError> {
        let mut request = self.load(decision.service_id).await?;
        let status = request.status();

        if is_duplicate(&request, decision) {
            info!(
                service_id = %decision.service_id,
                status = %status,
                "Provider decision already applied, ignoring"
            );
            return Ok(DecisionOutcome::Duplicate(status));
        }

        let now = self.clock.now();
        if decision.is_available {
            request.confirm(decision.to_response(), now)?;
        } else {
            let reason = decision
                .rejection_reason
                .as_deref()
                .filter(|r| !r.trim().is_empty())
                .unwrap_or(DEFAULT_REJECTION_REASON);
            request.reject(reason, now)?;
        }
        self.commit(&mut request).await?;

        info!(
            service_id = %decision.service_id,
            provider_id = %decision.provider_id,
            status = %request.status(),
            "Provider decision applied"
        );
        Ok(DecisionOutcome::Applied(request.status()))
    }

    /// One of the user's requests.
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotFound`] or [`ServiceError::Unauthorized`].
    pub async fn get_service(
        &self,
        id: ServiceId,
        user: UserId,
    ) -> Result<ServiceStatusView, ServiceError> {
        let request = self.load_owned(id, user).await?;
        Ok(ServiceStatusView::from(request.state()))
    }

    /// The user's requests, newest first, optionally for one reservation.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Repository`] if storage failed.
    pub async fn list_user_services(
        &self,
        user: UserId,
        reservation: Option<ReservationId>,
    ) -> Result<Vec<ServiceStatusView>, ServiceError> {
        let requests = self.repository.find_by_user(user).await?;
        Ok(requests
            .iter()
            .filter(|r| reservation.is_none_or(|id| r.state().reservation_id == id))
            .map(|r| ServiceStatusView::from(r.state()))
            .collect())
    }

    /// All requests for an event, newest first.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Repository`] if storage failed.
    pub async fn list_event_services(
        &self,
        event: EventId,
    ) -> Result<Vec<ServiceStatusView>, ServiceError> {
        let requests = self.repository.find_by_event(event).await?;
        Ok(requests
            .iter()
            .map(|r| ServiceStatusView::from(r.state()))
            .collect())
    }

    /// Aggregate counts over every request.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Repository`] if storage failed.
    pub async fn metrics(&self) -> Result<ServiceMetrics, ServiceError> {
        let requests = self.repository.all().await?;
        Ok(ServiceMetrics::compute(requests.iter().map(ServiceRequest::state)))
    }

    async fn load(&self, id: ServiceId) -> Result<ServiceRequest, ServiceError> {
        self.repository
            .load(id)
            .await?
            .ok_or_else(|| ServiceError::service_not_found(id))
    }

    async fn load_owned(&self, id: ServiceId, user: UserId) -> Result<ServiceRequest, ServiceError> {
        let request = self.load(id).await?;
        if request.user_id() != user {
            return Err(ServiceError::Unauthorized(
                "User does not own this service request".to_string(),
            ));
        }
        Ok(request)
    }

    /// Save the aggregate, then dispatch what it emitted.
    async fn commit(&self, request: &mut ServiceRequest) -> Result<(), ServiceError> {
        self.repository.save(request).await?;
        self.dispatcher
            .dispatch(request.take_events())
            .await
            .map_err(|e| ServiceError::DeliveryFailure(e.to_string()))
    }
}

fn is_duplicate(request: &ServiceRequest, decision: &ProviderDecision) -> bool {
    match request.status() {
        ServiceStatus::Confirmed => {
            decision.is_available
                && request.state().provider_id.as_deref() == Some(decision.provider_id.as_str())
        }
        ServiceStatus::Rejected => !decision.is_available,
        _ => false,
    }
}
