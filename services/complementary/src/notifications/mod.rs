//! Real-time user notifications for provider decisions.

pub mod fanout;
pub mod notifier;
pub mod payload;

pub use fanout::NotificationFanout;
pub use notifier::{ChannelNotifier, NotificationError, UserNotifier};
pub use payload::{NotificationPayload, ServiceConfirmedNotice, ServiceRejectedNotice};
