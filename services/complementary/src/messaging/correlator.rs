//! Inbound provider responses, matched back to their service request.
//!
//! The correlator is the [`MessageHandler`] behind the response-queue
//! consumer. It classifies every outcome for the consumer:
//!
//! | Outcome | Verdict |
//! |---------|---------|
//! | decision applied, or already applied | `Ok` (ack) |
//! | undecodable or invalid payload | `Permanent` (dead-letter) |
//! | unknown request, conflicting terminal status | `Permanent` (dead-letter) |
//! | storage failure, lost version race | `Transient` (redeliver) |

use async_trait::async_trait;
use complementary_core::broker::BrokerMessage;
use complementary_runtime::{HandlerFailure, MessageHandler};
use std::sync::Arc;
use tracing::{debug, warn};

use super::contracts::ServiceResponseMessage;
use crate::app::ServiceRequestService;
use crate::metrics;

/// Applies provider decisions from the response queue.
#[derive(Clone)]
pub struct ResponseCorrelator {
    service: Arc<ServiceRequestService>,
}

impl ResponseCorrelator {
    /// Create a correlator that applies decisions through `service`.
    #[must_use]
    pub const fn new(service: Arc<ServiceRequestService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl MessageHandler for ResponseCorrelator {
    async fn handle(&self, message: &BrokerMessage) -> Result<(), HandlerFailure> {
        let decision = match ServiceResponseMessage::decode(&message.payload)
            .and_then(ServiceResponseMessage::into_decision)
        {
            Ok(decision) => decision,
            Err(e) => {
                warn!(message_id = %message.message_id, error = %e, "Rejecting provider response");
                metrics::record_provider_response("failed");
                return Err(HandlerFailure::Permanent(e.to_string()));
            }
        };

        debug!(
            message_id = %message.message_id,
            service_id = %decision.service_id,
            is_available = decision.is_available,
            "Received provider response"
        );

        match self.service.apply_provider_decision(&decision).await {
            Ok(outcome) => {
                metrics::record_provider_response(outcome.label());
                Ok(())
            }
            Err(e) => {
                metrics::record_provider_response("failed");
                if e.is_retryable() {
                    Err(HandlerFailure::Transient(e.to_string()))
                } else {
                    Err(HandlerFailure::Permanent(e.to_string()))
                }
            }
        }
    }
}
