//! Pushes confirmation and rejection notices to the owning user.

use async_trait::async_trait;
use complementary_core::environment::Clock;
use std::sync::Arc;
use tracing::{info, warn};

use super::notifier::UserNotifier;
use super::payload::{ServiceConfirmedNotice, ServiceRejectedNotice};
use crate::dispatch::{EventHandler, HandlerError};
use crate::domain::ServiceEvent;
use crate::metrics::record_notification;

/// Event handler that notifies users about provider decisions.
///
/// Registered best effort: its failures are logged by the dispatcher and
/// never fail the use case.
pub struct NotificationFanout {
    notifier: Arc<dyn UserNotifier>,
    clock: Arc<dyn Clock>,
}

impl NotificationFanout {
    /// Create the fan-out.
    #[must_use]
    pub fn new(notifier: Arc<dyn UserNotifier>, clock: Arc<dyn Clock>) -> Self {
        Self { notifier, clock }
    }
}

#[async_trait]
impl EventHandler for NotificationFanout {
    fn name(&self) -> &'static str {
        "notification-fanout"
    }

    async fn handle(&self, event: &ServiceEvent) -> Result<(), HandlerError> {
        let now = self.clock.now();
        let (kind, user, result) = match event {
            ServiceEvent::Confirmed(confirmed) => (
                "ServiceConfirmed",
                confirmed.user_id,
                self.notifier
                    .notify_confirmed(
                        confirmed.user_id,
                        ServiceConfirmedNotice::from_event(confirmed, now),
                    )
                    .await,
            ),
            ServiceEvent::Rejected(rejected) => (
                "ServiceRejected",
                rejected.user_id,
                self.notifier
                    .notify_rejected(
                        rejected.user_id,
                        ServiceRejectedNotice::from_event(rejected, now),
                    )
                    .await,
            ),
            ServiceEvent::Requested(_) | ServiceEvent::Cancelled(_) => return Ok(()),
        };

        match result {
            Ok(0) => {
                record_notification(kind, "no_connection");
                info!(user_id = %user, service_id = %event.service_id(), kind, "User offline, notification dropped");
                Ok(())
            }
            Ok(connections) => {
                record_notification(kind, "delivered");
                info!(user_id = %user, service_id = %event.service_id(), kind, connections, "User notified");
                Ok(())
            }
            Err(e) => {
                record_notification(kind, "failed");
                warn!(user_id = %user, service_id = %event.service_id(), kind, error = %e, "Failed to notify user");
                Err(HandlerError::new(e.to_string()))
            }
        }
    }
}
