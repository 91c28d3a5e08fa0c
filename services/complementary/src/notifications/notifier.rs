//! User-addressed push delivery.

use async_trait::async_trait;
use complementary_web::UserChannels;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::payload::{NotificationPayload, ServiceConfirmedNotice, ServiceRejectedNotice};
use crate::types::UserId;

/// Errors raised while delivering a notification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    /// The payload could not be encoded
    #[error("Failed to serialize notification: {0}")]
    Serialization(String),

    /// The transport refused the notification
    #[error("Notification channel failed: {0}")]
    Channel(String),
}

/// Sends notifications to every live connection of a user.
///
/// Delivery is best effort: a user with no open connection simply misses the
/// notification. Implementations return how many connections received it.
#[async_trait]
pub trait UserNotifier: Send + Sync {
    /// Tell `user` that a service was confirmed.
    ///
    /// # Errors
    ///
    /// [`NotificationError`] if the notification could not be sent.
    async fn notify_confirmed(
        &self,
        user: UserId,
        notice: ServiceConfirmedNotice,
    ) -> Result<usize, NotificationError>;

    /// Tell `user` that a service was rejected.
    ///
    /// # Errors
    ///
    /// [`NotificationError`] if the notification could not be sent.
    async fn notify_rejected(
        &self,
        user: UserId,
        notice: ServiceRejectedNotice,
    ) -> Result<usize, NotificationError>;
}

/// [`UserNotifier`] over the websocket channel registry.
#[derive(Clone)]
pub struct ChannelNotifier {
    channels: Arc<UserChannels>,
}

impl ChannelNotifier {
    /// Create a notifier that writes into `channels`.
    #[must_use]
    pub const fn new(channels: Arc<UserChannels>) -> Self {
        Self { channels }
    }

    fn push(&self, user: UserId, payload: &NotificationPayload) -> Result<usize, NotificationError> {
        let text = serde_json::to_string(payload)
            .map_err(|e| NotificationError::Serialization(e.to_string()))?;
        let delivered = self.channels.send(*user.as_uuid(), &text);

        debug!(user_id = %user, kind = payload.kind(), delivered, "Pushed notification");
        Ok(delivered)
    }
}

#[async_trait]
impl UserNotifier for ChannelNotifier {
    async fn notify_confirmed(
        &self,
        user: UserId,
        notice: ServiceConfirmedNotice,
    ) -> Result<usize, NotificationError> {
        self.push(user, &NotificationPayload::ServiceConfirmed(notice))
    }

    async fn notify_rejected(
        &self,
        user: UserId,
        notice: ServiceRejectedNotice,
    ) -> Result<usize, NotificationError> {
        self.push(user, &NotificationPayload::ServiceRejected(notice))
    }
}
