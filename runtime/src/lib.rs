//! # Complementary Runtime
//!
//! Runtime building blocks for the complementary services platform:
//!
//! - [`consumer`]: the long-lived [`MessageConsumer`] that drives a
//!   [`MessageHandler`] from a broker subscription, settles every delivery
//!   according to the handler's verdict, and shuts down cooperatively
//! - [`retry`]: exponential backoff shared by redelivery, reconnection and
//!   startup

pub mod consumer;
pub mod retry;

pub use consumer::{ConsumerError, HandlerFailure, MessageConsumer, MessageConsumerBuilder, MessageHandler};
pub use retry::{RetryPolicy, retry_with_backoff};
