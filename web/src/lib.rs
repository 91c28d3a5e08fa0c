//! Axum integration for the complementary services platform.
//!
//! This crate is the imperative shell around the service-request core:
//!
//! - [`AppError`]: maps domain failures onto HTTP status codes and a JSON body
//! - [`UserChannels`]: the per-user push channel registry that notification
//!   fan-out delivers into
//! - [`UserIdentity`]: extracts the caller's user id from `X-User-Id`
//! - [`notifications_router`]: `GET /ws/notifications`, the websocket that
//!   drains a user's channel to their browser
//!
//! # Example
//!
//! ```ignore
//! use complementary_web::{UserChannels, notifications_router};
//! use std::sync::Arc;
//!
//! let channels = Arc::new(UserChannels::new());
//! let app = notifications_router(Arc::clone(&channels));
//!
//! // Somewhere in the domain:
//! channels.send(user_id, r#"{"type":"ServiceConfirmed"}"#);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channels;
pub mod error;
pub mod extractors;
pub mod handlers;

pub use channels::{UserChannels, UserConnection};
pub use error::{AppError, ErrorCode};
pub use extractors::{USER_ID_HEADER, UserIdentity};
pub use handlers::websocket::notifications_router;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
