//! Mapping between [`BrokerMessage`] metadata and Kafka record headers.
//!
//! Kafka records carry only a key, a payload and headers, so message
//! properties travel as headers:
//!
//! | Header | Field |
//! |--------|-------|
//! | `message-id` | [`BrokerMessage::message_id`] |
//! | `routing-key` | [`BrokerMessage::routing_key`] |
//! | `content-type` | [`BrokerMessage::content_type`] |
//! | `exchange` | [`BrokerMessage::exchange`] |
//! | `reply-to` | [`BrokerMessage::reply_to`] |

use chrono::{DateTime, Utc};
use complementary_core::broker::{BrokerMessage, CONTENT_TYPE_JSON};
use rdkafka::message::{Header, Headers, OwnedHeaders};

/// Header carrying the message id.
pub const MESSAGE_ID: &str = "message-id";
/// Header carrying the routing key.
pub const ROUTING_KEY: &str = "routing-key";
/// Header carrying the payload MIME type.
pub const CONTENT_TYPE: &str = "content-type";
/// Header carrying the exchange the message was published through.
pub const EXCHANGE: &str = "exchange";
/// Header carrying the reply destination.
pub const REPLY_TO: &str = "reply-to";
/// Header added to dead-lettered records: the topic they failed on.
pub const DEAD_LETTER_SOURCE: &str = "dead-letter-source";
/// Header added to dead-lettered records: how many deliveries were attempted.
pub const DELIVERY_ATTEMPTS: &str = "delivery-attempts";

/// Build the record headers for a message.
#[must_use]
pub fn encode(message: &BrokerMessage) -> OwnedHeaders {
    let mut headers = OwnedHeaders::new()
        .insert(Header {
            key: MESSAGE_ID,
            value: Some(message.message_id.as_bytes()),
        })
        .insert(Header {
            key: ROUTING_KEY,
            value: Some(message.routing_key.as_bytes()),
        })
        .insert(Header {
            key: CONTENT_TYPE,
            value: Some(message.content_type.as_bytes()),
        });

    if let Some(exchange) = &message.exchange {
        headers = headers.insert(Header {
            key: EXCHANGE,
            value: Some(exchange.as_bytes()),
        });
    }
    if let Some(reply_to) = &message.reply_to {
        headers = headers.insert(Header {
            key: REPLY_TO,
            value: Some(reply_to.as_bytes()),
        });
    }

    headers
}

/// Headers for a record moved to a dead-letter topic.
#[must_use]
pub fn encode_dead_letter(message: &BrokerMessage, source: &str, attempts: u32) -> OwnedHeaders {
    let attempts = attempts.to_string();
    encode(message)
        .insert(Header {
            key: DEAD_LETTER_SOURCE,
            value: Some(source.as_bytes()),
        })
        .insert(Header {
            key: DELIVERY_ATTEMPTS,
            value: Some(attempts.as_bytes()),
        })
}

fn lookup<H: Headers>(headers: Option<&H>, key: &str) -> Option<String> {
    headers?
        .iter()
        .find(|h| h.key == key)
        .and_then(|h| h.value)
        .map(|v| String::from_utf8_lossy(v).into_owned())
}

/// Rebuild a [`BrokerMessage`] from the parts of a consumed record.
///
/// Missing headers fall back to the record key (message id), the topic
/// (routing key) and JSON (content type), so records produced by other
/// clients are still deliverable.
#[must_use]
pub fn decode<H: Headers>(
    topic: &str,
    headers: Option<&H>,
    key: Option<&[u8]>,
    payload: Option<&[u8]>,
    timestamp_ms: Option<i64>,
) -> BrokerMessage {
    let message_id = lookup(headers, MESSAGE_ID)
        .or_else(|| key.map(|k| String::from_utf8_lossy(k).into_owned()))
        .unwrap_or_default();

    BrokerMessage {
        message_id,
        routing_key: lookup(headers, ROUTING_KEY).unwrap_or_else(|| topic.to_string()),
        exchange: lookup(headers, EXCHANGE),
        content_type: lookup(headers, CONTENT_TYPE).unwrap_or_else(|| CONTENT_TYPE_JSON.to_string()),
        reply_to: lookup(headers, REPLY_TO),
        payload: payload.map(<[u8]>::to_vec).unwrap_or_default(),
        published_at: timestamp_ms
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or_else(Utc::now),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    fn message() -> BrokerMessage {
        BrokerMessage::json(
            "3f2b9c1e-0000-4000-8000-000000000001",
            "service.request.catering",
            br#"{"serviceType":"Catering"}"#.to_vec(),
            DateTime::<Utc>::from_timestamp_millis(1_735_689_600_000).unwrap(),
        )
        .with_exchange("service.requests")
    }

    #[test]
    fn headers_carry_message_properties() {
        let original = message();
        let headers = encode(&original);

        let decoded = decode(
            "catering.requests",
            Some(&headers),
            Some(original.message_id.as_bytes()),
            Some(original.payload.as_slice()),
            Some(1_735_689_600_000),
        );

        assert_eq!(decoded, original);
    }

    #[test]
    fn missing_headers_fall_back_to_record() {
        let decoded = decode::<OwnedHeaders>(
            "services.responses.platform",
            None,
            Some(b"svc-42".as_slice()),
            Some(b"{}".as_slice()),
            None,
        );

        assert_eq!(decoded.message_id, "svc-42");
        assert_eq!(decoded.routing_key, "services.responses.platform");
        assert_eq!(decoded.content_type, CONTENT_TYPE_JSON);
        assert!(decoded.exchange.is_none());
        assert!(decoded.reply_to.is_none());
    }

    #[test]
    fn dead_letter_headers_record_source_and_attempts() {
        let headers = encode_dead_letter(&message(), "catering.requests", 6);

        assert_eq!(
            lookup(Some(&headers), DEAD_LETTER_SOURCE).as_deref(),
            Some("catering.requests")
        );
        assert_eq!(lookup(Some(&headers), DELIVERY_ATTEMPTS).as_deref(), Some("6"));
        assert_eq!(
            lookup(Some(&headers), ROUTING_KEY).as_deref(),
            Some("service.request.catering")
        );
    }
}
