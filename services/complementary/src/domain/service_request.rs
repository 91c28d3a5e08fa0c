//! The `ServiceRequest` aggregate and its state machine.
//!
//! | From | Operation | To | Event |
//! |------|-----------|----|-------|
//! | (new) | `create` | Requested | `ServiceRequested` |
//! | Requested | `mark_pending` | Pending | none |
//! | Requested, Pending | `confirm` | Confirmed | `ServiceConfirmed` |
//! | Requested, Pending | `reject` | Rejected | `ServiceRejected` |
//! | Requested, Pending | `cancel` | Cancelled | `ServiceCancelled` |
//!
//! Any other attempt fails with [`DomainError::InvalidTransition`] and leaves
//! the aggregate untouched. Input checks (an available provider for
//! `confirm`, a reason for `reject`) run before the status check.

use chrono::{DateTime, Utc};
use complementary_core::event::EventBuffer;
use complementary_core::version::Version;
use serde::{Deserialize, Serialize};

use super::error::DomainError;
use super::events::{
    ServiceCancelled, ServiceConfirmed, ServiceEvent, ServiceRejected, ServiceRequested,
};
use super::value_objects::{ProviderResponse, ServiceStatus, ServiceType};
use crate::types::{EventId, Money, ReservationId, ServiceId, UserId};

/// Persisted fields of a service request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRequestState {
    /// Request id
    pub id: ServiceId,
    /// Reservation the service is attached to
    pub reservation_id: ReservationId,
    /// Requesting user
    pub user_id: UserId,
    /// Event the reservation is for
    pub event_id: EventId,
    /// Kind of service
    pub service_type: ServiceType,
    /// Lifecycle status
    pub status: ServiceStatus,
    /// Assigned provider, once known
    pub provider_id: Option<String>,
    /// Agreed price; zero until confirmed
    pub price: Money,
    /// Free-text details from the user
    pub details: String,
    /// When the request was made
    pub requested_at: DateTime<Utc>,
    /// Set when the request is confirmed
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Set when the request is rejected
    pub rejected_at: Option<DateTime<Utc>>,
    /// Set when the request is rejected
    pub rejection_reason: Option<String>,
    /// The accepting provider's response
    pub provider_response: Option<ProviderResponse>,
}

/// Longest free-text details a user may attach.
pub const MAX_DETAILS_LEN: usize = 1000;
/// Longest provider identifier.
pub const MAX_PROVIDER_ID_LEN: usize = 100;
/// Longest rejection reason.
pub const MAX_REASON_LEN: usize = 500;
/// Longest provider message.
pub const MAX_PROVIDER_MESSAGE_LEN: usize = 500;

fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), DomainError> {
    let actual = value.chars().count();
    if actual > max {
        return Err(DomainError::TooLong { field, max, actual });
    }
    Ok(())
}

/// A user's request for a complementary service.
///
/// Mutations record domain events in an internal buffer. The use case that
/// invoked the mutation drains them with [`take_events`](Self::take_events)
/// once the aggregate has been persisted.
#[derive(Clone, Debug)]
pub struct ServiceRequest {
    state: ServiceRequestState,
    version: Version,
    events: EventBuffer<ServiceEvent>,
}

impl ServiceRequest {
    /// Create a new request in status `Requested`.
    ///
    /// # Errors
    ///
    /// [`DomainError::TooLong`] if `details` exceeds [`MAX_DETAILS_LEN`].
    pub fn create(
        reservation_id: ReservationId,
        user_id: UserId,
        event_id: EventId,
        service_type: ServiceType,
        details: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let details = details.into();
        check_len("details", &details, MAX_DETAILS_LEN)?;

        let state = ServiceRequestState {
            id: ServiceId::new(),
            reservation_id,
            user_id,
            event_id,
            service_type,
            status: ServiceStatus::Requested,
            provider_id: None,
            price: Money::ZERO,
            details,
            requested_at: now,
            confirmed_at: None,
            rejected_at: None,
            rejection_reason: None,
            provider_response: None,
        };

        let mut events = EventBuffer::new();
        events.record(ServiceEvent::Requested(ServiceRequested {
            service_id: state.id,
            reservation_id,
            user_id,
            event_id,
            service_type,
            details: state.details.clone(),
            occurred_at: now,
        }));

        Ok(Self {
            state,
            version: Version::INITIAL,
            events,
        })
    }

    /// Rebuild a stored request. The event buffer starts empty.
    #[must_use]
    pub fn restore(state: ServiceRequestState, version: Version) -> Self {
        Self {
            state,
            version,
            events: EventBuffer::new(),
        }
    }

    /// Request id.
    #[must_use]
    pub const fn id(&self) -> ServiceId {
        self.state.id
    }

    /// Requesting user.
    #[must_use]
    pub const fn user_id(&self) -> UserId {
        self.state.user_id
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> ServiceStatus {
        self.state.status
    }

    /// All persisted fields.
    #[must_use]
    pub const fn state(&self) -> &ServiceRequestState {
        &self.state
    }

    /// Version this aggregate was loaded at ([`Version::INITIAL`] if never saved).
    #[must_use]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Record that the aggregate is now stored at `version`.
    pub fn mark_saved(&mut self, version: Version) {
        self.version = version;
    }

    /// Events recorded since the last drain.
    #[must_use]
    pub fn pending_events(&self) -> &[ServiceEvent] {
        self.events.pending()
    }

    /// Drain the recorded events in emission order.
    #[must_use]
    pub fn take_events(&mut self) -> Vec<ServiceEvent> {
        self.events.take()
    }

    /// Provisionally assign a provider.
    ///
    /// # Errors
    ///
    /// - [`DomainError::TooLong`] if the provider id exceeds
    ///   [`MAX_PROVIDER_ID_LEN`]
    /// - [`DomainError::InvalidTransition`] unless the request is `Requested`
    pub fn mark_pending(&mut self, provider_id: impl Into<String>) -> Result<(), DomainError> {
        let provider_id = provider_id.into();
        check_len("provider id", &provider_id, MAX_PROVIDER_ID_LEN)?;
        if self.state.status != ServiceStatus::Requested {
            return Err(self.invalid("mark as pending"));
        }

        self.state.status = ServiceStatus::Pending;
        self.state.provider_id = Some(provider_id);
        Ok(())
    }

    /// Apply a provider's acceptance.
    ///
    /// # Errors
    ///
    /// - [`DomainError::ProviderUnavailable`] if the response is not available
    /// - [`DomainError::TooLong`] if the provider id or message is too long
    /// - [`DomainError::PriceOutOfRange`] if the price exceeds [`Money::MAX`]
    /// - [`DomainError::InvalidTransition`] unless the request is open
    pub fn confirm(&mut self, response: ProviderResponse, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !response.is_available {
            return Err(DomainError::ProviderUnavailable);
        }
        check_len("provider id", &response.provider_id, MAX_PROVIDER_ID_LEN)?;
        check_len("provider message", &response.message, MAX_PROVIDER_MESSAGE_LEN)?;
        if response.price > Money::MAX {
            return Err(DomainError::PriceOutOfRange(response.price));
        }
        if !self.state.status.is_open() {
            return Err(self.invalid("confirm"));
        }

        self.state.status = ServiceStatus::Confirmed;
        self.state.confirmed_at = Some(now);
        self.state.price = response.price;
        self.state.provider_id = Some(response.provider_id.clone());

        self.events.record(ServiceEvent::Confirmed(ServiceConfirmed {
            service_id: self.state.id,
            reservation_id: self.state.reservation_id,
            user_id: self.state.user_id,
            service_type: self.state.service_type,
            provider_id: response.provider_id.clone(),
            price: response.price,
            occurred_at: now,
        }));
        self.state.provider_response = Some(response);
        Ok(())
    }

    /// Decline the request.
    ///
    /// # Errors
    ///
    /// - [`DomainError::MissingRejectionReason`] if `reason` is blank
    /// - [`DomainError::TooLong`] if `reason` exceeds [`MAX_REASON_LEN`]
    /// - [`DomainError::InvalidTransition`] unless the request is open
    pub fn reject(&mut self, reason: &str, now: DateTime<Utc>) -> Result<(), DomainError> {
        if reason.trim().is_empty() {
            return Err(DomainError::MissingRejectionReason);
        }
        check_len("rejection reason", reason, MAX_REASON_LEN)?;
        if !self.state.status.is_open() {
            return Err(self.invalid("reject"));
        }

        self.state.status = ServiceStatus::Rejected;
        self.state.rejected_at = Some(now);
        self.state.rejection_reason = Some(reason.to_string());

        self.events.record(ServiceEvent::Rejected(ServiceRejected {
            service_id: self.state.id,
            reservation_id: self.state.reservation_id,
            user_id: self.state.user_id,
            service_type: self.state.service_type,
            reason: reason.to_string(),
            occurred_at: now,
        }));
        Ok(())
    }

    /// Withdraw the request.
    ///
    /// # Errors
    ///
    /// [`DomainError::InvalidTransition`] unless the request is open.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.state.status.is_open() {
            return Err(self.invalid("cancel"));
        }

        self.state.status = ServiceStatus::Cancelled;

        self.events.record(ServiceEvent::Cancelled(ServiceCancelled {
            service_id: self.state.id,
            reservation_id: self.state.reservation_id,
            user_id: self.state.user_id,
            service_type: self.state.service_type,
            occurred_at: now,
        }));
        Ok(())
    }

    const fn invalid(&self, operation: &'static str) -> DomainError {
        DomainError::InvalidTransition {
            operation,
            status: self.state.status,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use complementary_core::environment::Clock;
    use complementary_testing::test_clock;

    fn now() -> DateTime<Utc> {
        test_clock().now()
    }

    fn request() -> ServiceRequest {
        ServiceRequest::create(
            ReservationId::new(),
            UserId::new(),
            EventId::new(),
            ServiceType::Catering,
            "vegan x10",
            now(),
        )
        .unwrap()
    }

    fn available(provider: &str, cents: u64) -> ProviderResponse {
        ProviderResponse::new(true, provider, "see you there", Money::from_cents(cents), None)
    }

    /// Bring a fresh request into `status` and drop its events.
    fn request_in(status: ServiceStatus) -> ServiceRequest {
        let mut service = request();
        match status {
            ServiceStatus::Requested => {}
            ServiceStatus::Pending => service.mark_pending("p1").unwrap(),
            ServiceStatus::Confirmed => service.confirm(available("p1", 10_000), now()).unwrap(),
            ServiceStatus::Rejected => service.reject("sold out", now()).unwrap(),
            ServiceStatus::Cancelled => service.cancel(now()).unwrap(),
        }
        let _ = service.take_events();
        service
    }

    const ALL: [ServiceStatus; 5] = [
        ServiceStatus::Requested,
        ServiceStatus::Pending,
        ServiceStatus::Confirmed,
        ServiceStatus::Rejected,
        ServiceStatus::Cancelled,
    ];

    #[test]
    fn create_starts_requested_with_one_event() {
        let mut service = request();

        assert_eq!(service.status(), ServiceStatus::Requested);
        assert_eq!(service.state().price, Money::ZERO);
        assert!(service.state().provider_id.is_none());
        assert!(service.version().is_initial());

        let events = service.take_events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            ServiceEvent::Requested(e) => {
                assert_eq!(e.service_id, service.id());
                assert_eq!(e.service_type, ServiceType::Catering);
                assert_eq!(e.details, "vegan x10");
                assert_eq!(e.occurred_at, now());
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(service.take_events().is_empty());
    }

    #[test]
    fn create_rejects_details_over_limit() {
        let create = |details: String| {
            ServiceRequest::create(
                ReservationId::new(),
                UserId::new(),
                EventId::new(),
                ServiceType::Transport,
                details,
                now(),
            )
        };

        assert!(create("é".repeat(MAX_DETAILS_LEN)).is_ok());
        let err = create("x".repeat(MAX_DETAILS_LEN + 1)).unwrap_err();
        assert_eq!(
            err,
            DomainError::TooLong {
                field: "details",
                max: MAX_DETAILS_LEN,
                actual: MAX_DETAILS_LEN + 1,
            }
        );
    }

    #[test]
    fn oversized_provider_fields_leave_request_untouched() {
        let mut service = request_in(ServiceStatus::Requested);

        let long_id = "p".repeat(MAX_PROVIDER_ID_LEN + 1);
        assert!(matches!(
            service.mark_pending(long_id.as_str()),
            Err(DomainError::TooLong { field: "provider id", .. })
        ));
        assert!(matches!(
            service.confirm(available(&long_id, 100), now()),
            Err(DomainError::TooLong { field: "provider id", .. })
        ));

        let chatty = ProviderResponse::new(
            true,
            "p1",
            "m".repeat(MAX_PROVIDER_MESSAGE_LEN + 1),
            Money::from_cents(100),
            None,
        );
        assert!(matches!(
            service.confirm(chatty, now()),
            Err(DomainError::TooLong { field: "provider message", .. })
        ));

        let pricey = ProviderResponse::new(true, "p1", "", Money::from_cents(u64::MAX), None);
        assert_eq!(
            service.confirm(pricey, now()).unwrap_err(),
            DomainError::PriceOutOfRange(Money::from_cents(u64::MAX))
        );

        assert!(matches!(
            service.reject(&"r".repeat(MAX_REASON_LEN + 1), now()),
            Err(DomainError::TooLong { field: "rejection reason", .. })
        ));

        assert_eq!(service.status(), ServiceStatus::Requested);
        assert!(service.state().provider_id.is_none());
        assert!(service.take_events().is_empty());

        service.reject(&"r".repeat(MAX_REASON_LEN), now()).unwrap();
        assert_eq!(service.status(), ServiceStatus::Rejected);
    }

    #[test]
    fn confirm_from_requested() {
        let mut service = request_in(ServiceStatus::Requested);
        service.confirm(available("p1", 10_000), now()).unwrap();

        let state = service.state();
        assert_eq!(state.status, ServiceStatus::Confirmed);
        assert_eq!(state.price, Money::from_cents(10_000));
        assert_eq!(state.provider_id.as_deref(), Some("p1"));
        assert_eq!(state.confirmed_at, Some(now()));
        assert!(state.rejected_at.is_none());

        let events = service.take_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            ServiceEvent::Confirmed(e) if e.provider_id == "p1" && e.price == Money::from_cents(10_000)
        ));

        let err = service.confirm(available("p1", 10_000), now()).unwrap_err();
        assert!(err.is_transition());
        assert!(service.take_events().is_empty());
    }

    #[test]
    fn confirm_from_pending_replaces_provisional_provider() {
        let mut service = request_in(ServiceStatus::Pending);
        assert_eq!(service.state().provider_id.as_deref(), Some("p1"));

        service.confirm(available("p2", 5_000), now()).unwrap();
        assert_eq!(service.state().provider_id.as_deref(), Some("p2"));
    }

    #[test]
    fn confirm_unavailable_fails_in_every_status() {
        for status in ALL {
            let mut service = request_in(status);
            let response = ProviderResponse::new(false, "p1", "", Money::ZERO, None);
            assert_eq!(
                service.confirm(response, now()),
                Err(DomainError::ProviderUnavailable),
                "status {status}"
            );
            assert_eq!(service.status(), status);
        }
    }

    #[test]
    fn reject_requires_reason_in_every_status() {
        for status in ALL {
            for reason in ["", "   ", "\t\n"] {
                let mut service = request_in(status);
                assert_eq!(
                    service.reject(reason, now()),
                    Err(DomainError::MissingRejectionReason)
                );
                assert_eq!(service.status(), status);
            }
        }
    }

    #[test]
    fn reject_records_reason_and_event() {
        let mut service = request_in(ServiceStatus::Pending);
        service.reject("sold out", now()).unwrap();

        let state = service.state();
        assert_eq!(state.status, ServiceStatus::Rejected);
        assert_eq!(state.rejection_reason.as_deref(), Some("sold out"));
        assert_eq!(state.rejected_at, Some(now()));
        assert!(state.confirmed_at.is_none());
        assert_eq!(state.price, Money::ZERO);

        let events = service.take_events();
        assert!(matches!(&events[..], [ServiceEvent::Rejected(e)] if e.reason == "sold out"));
    }

    #[test]
    fn cancel_emits_cancelled_event() {
        let mut service = request_in(ServiceStatus::Requested);
        service.cancel(now()).unwrap();

        assert_eq!(service.status(), ServiceStatus::Cancelled);
        assert!(service.state().confirmed_at.is_none());
        assert!(service.state().rejected_at.is_none());
        let events = service.take_events();
        assert!(matches!(&events[..], [ServiceEvent::Cancelled(_)]));
    }

    #[test]
    fn only_documented_edges_are_allowed() {
        type Op = fn(&mut ServiceRequest) -> Result<(), DomainError>;

        fn mark_pending(s: &mut ServiceRequest) -> Result<(), DomainError> {
            s.mark_pending("p9")
        }
        fn confirm(s: &mut ServiceRequest) -> Result<(), DomainError> {
            s.confirm(available("p9", 100), now())
        }
        fn reject(s: &mut ServiceRequest) -> Result<(), DomainError> {
            s.reject("no", now())
        }
        fn cancel(s: &mut ServiceRequest) -> Result<(), DomainError> {
            s.cancel(now())
        }

        let operations: [(&str, Op, ServiceStatus); 4] = [
            ("mark_pending", mark_pending, ServiceStatus::Pending),
            ("confirm", confirm, ServiceStatus::Confirmed),
            ("reject", reject, ServiceStatus::Rejected),
            ("cancel", cancel, ServiceStatus::Cancelled),
        ];

        for from in ALL {
            for (name, operation, to) in operations {
                let allowed = match to {
                    ServiceStatus::Pending => from == ServiceStatus::Requested,
                    _ => from.is_open(),
                };

                let mut service = request_in(from);
                let result = operation(&mut service);

                if allowed {
                    assert!(result.is_ok(), "{name} from {from} should succeed");
                    assert_eq!(service.status(), to);
                } else {
                    let err = result.expect_err("transition should be refused");
                    assert!(err.is_transition(), "{name} from {from}: {err}");
                    assert_eq!(service.status(), from);
                    assert!(service.pending_events().is_empty());
                }
            }
        }
    }

    #[test]
    fn terminal_timestamps_are_exclusive() {
        for status in ALL {
            let state = request_in(status).state().clone();
            match status {
                ServiceStatus::Confirmed => {
                    assert!(state.confirmed_at.is_some() && state.rejected_at.is_none());
                    assert!(!state.price.is_zero());
                }
                ServiceStatus::Rejected => {
                    assert!(state.rejected_at.is_some() && state.confirmed_at.is_none());
                    assert!(state.price.is_zero());
                }
                _ => {
                    assert!(state.confirmed_at.is_none() && state.rejected_at.is_none());
                    assert!(state.price.is_zero());
                }
            }
        }
    }

    #[test]
    fn restore_keeps_state_and_version_without_events() {
        let original = request_in(ServiceStatus::Pending);
        let restored = ServiceRequest::restore(original.state().clone(), Version::new(3));

        assert_eq!(restored.state(), original.state());
        assert_eq!(restored.version(), Version::new(3));
        assert!(restored.pending_events().is_empty());
    }
}
