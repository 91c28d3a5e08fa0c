//! Dead-letter storage for deliveries that cannot be processed.
//!
//! A delivery is dead-lettered when its processing failed permanently (for
//! example a payload that cannot be decoded) or when it kept failing after the
//! configured number of redeliveries. Dead letters are kept for inspection and
//! manual reprocessing instead of looping through the broker forever.

use crate::broker::BrokerMessage;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors raised by a dead-letter sink.
#[derive(Error, Debug, Clone)]
pub enum DeadLetterError {
    /// The sink's storage rejected the entry
    #[error("Dead-letter storage error: {0}")]
    Storage(String),
}

/// A message that was taken out of circulation.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// Name of the consumer that gave up on the message
    pub consumer: String,
    /// Queue/topic the message was consumed from
    pub source: String,
    /// The message itself
    pub message: BrokerMessage,
    /// Why processing failed
    pub error: String,
    /// How many deliveries were attempted
    pub attempts: u32,
    /// When the message was dead-lettered
    pub failed_at: DateTime<Utc>,
}

/// Destination for dead letters.
pub trait DeadLetterSink: Send + Sync {
    /// Store a dead letter.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Storage`] if the entry could not be stored.
    fn record(
        &self,
        dead_letter: DeadLetter,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeadLetterError>> + Send + '_>>;
}
