//! Dead Letter Queue (DLQ) for failed broker deliveries.
//!
//! Provides persistent storage and management of messages that a consumer
//! gave up on, either because processing failed permanently or because the
//! redelivery budget ran out. Enables observability, incident response, and
//! manual reprocessing workflows.

use chrono::{DateTime, Utc};
use complementary_core::broker::BrokerMessage;
use complementary_core::dead_letter::{DeadLetter, DeadLetterError, DeadLetterSink};
use sqlx::{PgPool, Row};
use std::future::Future;
use std::pin::Pin;

/// Status of a failed message in the Dead Letter Queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DLQStatus {
    /// Message is pending investigation/reprocessing
    Pending,
    /// Message is currently being reprocessed
    Processing,
    /// Message was successfully reprocessed
    Resolved,
    /// Message was permanently discarded (cannot be fixed)
    Discarded,
}

impl DLQStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, DeadLetterError> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            _ => Err(DeadLetterError::Storage(format!("Invalid DLQ status: {s}"))),
        }
    }
}

/// An entry in the Dead Letter Queue.
///
/// Contains the failed message plus failure metadata for troubleshooting.
#[derive(Debug, Clone)]
pub struct FailedMessage {
    /// Unique identifier for this DLQ entry
    pub id: i64,

    /// Consumer that gave up on the message
    pub consumer: String,

    /// Queue/topic the message was consumed from
    pub source: String,

    /// The message that failed
    pub message: BrokerMessage,

    /// Error message from the last failure
    pub error_message: String,

    /// Number of deliveries attempted
    pub attempts: i32,

    /// When the message was dead-lettered
    pub failed_at: DateTime<Utc>,

    /// Current processing status
    pub status: DLQStatus,

    /// When the failure was resolved (if applicable)
    pub resolved_at: Option<DateTime<Utc>>,

    /// Who/what resolved the failure
    pub resolved_by: Option<String>,

    /// Notes about the resolution
    pub resolution_notes: Option<String>,
}

/// `PostgreSQL`-based Dead Letter Queue for failed deliveries.
///
/// Implements [`DeadLetterSink`] so a message consumer can record every
/// delivery it dead-letters. The `failed_messages` table is created by the
/// workspace migrations.
///
/// # Example
///
/// ```no_run
/// use complementary_postgres::{DLQStatus, PostgresDeadLetterQueue};
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let dlq = PostgresDeadLetterQueue::new(pool);
///
/// // List pending failures
/// let pending = dlq.list_pending(100).await?;
/// println!("Pending failures: {}", pending.len());
///
/// // Mark one as processing
/// dlq.update_status(pending[0].id, DLQStatus::Processing).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PostgresDeadLetterQueue {
    pool: PgPool,
}

const SELECT_COLUMNS: &str = r"
    SELECT
        id, consumer, source, message_id, routing_key, exchange, content_type,
        reply_to, payload, published_at, error_message, attempts, failed_at,
        status, resolved_at, resolved_by, resolution_notes
    FROM failed_messages
";

impl PostgresDeadLetterQueue {
    /// Create a new Dead Letter Queue with the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Add a dead letter to the DLQ.
    ///
    /// Returns the unique ID of the created DLQ entry.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Storage`] if the insert fails.
    pub async fn add_entry(&self, dead_letter: &DeadLetter) -> Result<i64, DeadLetterError> {
        let message = &dead_letter.message;
        let attempts = i32::try_from(dead_letter.attempts).unwrap_or(i32::MAX);

        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO failed_messages (
                consumer, source, message_id, routing_key, exchange, content_type,
                reply_to, payload, published_at, error_message, attempts, failed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING id
            ",
        )
        .bind(&dead_letter.consumer)
        .bind(&dead_letter.source)
        .bind(&message.message_id)
        .bind(&message.routing_key)
        .bind(message.exchange.as_deref())
        .bind(&message.content_type)
        .bind(message.reply_to.as_deref())
        .bind(&message.payload)
        .bind(message.published_at)
        .bind(&dead_letter.error)
        .bind(attempts)
        .bind(dead_letter.failed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DeadLetterError::Storage(e.to_string()))?;

        tracing::warn!(
            dlq_id = id,
            consumer = %dead_letter.consumer,
            source = %dead_letter.source,
            message_id = %message.message_id,
            error = %dead_letter.error,
            attempts,
            "Message added to Dead Letter Queue"
        );

        metrics::counter!("dead_letter_entries_total", "source" => dead_letter.source.clone())
            .increment(1);

        Ok(id)
    }

    /// List pending failed messages, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Storage`] if the query fails.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<FailedMessage>, DeadLetterError> {
        self.list_by_status(DLQStatus::Pending, limit).await
    }

    /// List failed messages by status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Storage`] if the query fails.
    pub async fn list_by_status(
        &self,
        status: DLQStatus,
        limit: usize,
    ) -> Result<Vec<FailedMessage>, DeadLetterError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE status = $1 ORDER BY failed_at ASC LIMIT $2"
        ))
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DeadLetterError::Storage(e.to_string()))?;

        rows.iter().map(Self::row_to_failed_message).collect()
    }

    /// Get a specific failed message by ID.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Storage`] if the query fails or the entry is not found.
    pub async fn get_by_id(&self, id: i64) -> Result<FailedMessage, DeadLetterError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DeadLetterError::Storage(e.to_string()))?;

        Self::row_to_failed_message(&row)
    }

    /// Update the status of a failed message.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Storage`] if the update fails.
    pub async fn update_status(&self, id: i64, status: DLQStatus) -> Result<(), DeadLetterError> {
        sqlx::query("UPDATE failed_messages SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| DeadLetterError::Storage(e.to_string()))?;

        tracing::info!(dlq_id = id, status = status.as_str(), "DLQ entry status updated");

        Ok(())
    }

    /// Mark a failed message as resolved.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Storage`] if the update fails.
    pub async fn mark_resolved(
        &self,
        id: i64,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<(), DeadLetterError> {
        sqlx::query(
            r"
            UPDATE failed_messages
            SET status = 'resolved',
                resolved_at = NOW(),
                resolved_by = $1,
                resolution_notes = $2
            WHERE id = $3
            ",
        )
        .bind(resolved_by)
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| DeadLetterError::Storage(e.to_string()))?;

        tracing::info!(dlq_id = id, resolved_by, "DLQ entry marked as resolved");

        Ok(())
    }

    /// Mark a failed message as discarded (permanently failed).
    ///
    /// Use this when a message cannot be fixed, e.g. a response for a
    /// service request that no longer exists.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Storage`] if the update fails.
    pub async fn mark_discarded(&self, id: i64, reason: &str) -> Result<(), DeadLetterError> {
        sqlx::query(
            r"
            UPDATE failed_messages
            SET status = 'discarded',
                resolved_at = NOW(),
                resolution_notes = $1
            WHERE id = $2
            ",
        )
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| DeadLetterError::Storage(e.to_string()))?;

        tracing::warn!(dlq_id = id, reason, "DLQ entry marked as discarded");

        Ok(())
    }

    /// Get count of pending failures.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Storage`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64, DeadLetterError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM failed_messages WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| DeadLetterError::Storage(e.to_string()))?;

        Ok(count)
    }

    fn row_to_failed_message(row: &sqlx::postgres::PgRow) -> Result<FailedMessage, DeadLetterError> {
        let status_str: String = row.get("status");
        let status = DLQStatus::parse(&status_str)?;

        Ok(FailedMessage {
            id: row.get("id"),
            consumer: row.get("consumer"),
            source: row.get("source"),
            message: BrokerMessage {
                message_id: row.get("message_id"),
                routing_key: row.get("routing_key"),
                exchange: row.get("exchange"),
                content_type: row.get("content_type"),
                reply_to: row.get("reply_to"),
                payload: row.get("payload"),
                published_at: row.get("published_at"),
            },
            error_message: row.get("error_message"),
            attempts: row.get("attempts"),
            failed_at: row.get("failed_at"),
            status,
            resolved_at: row.get("resolved_at"),
            resolved_by: row.get("resolved_by"),
            resolution_notes: row.get("resolution_notes"),
        })
    }
}

impl DeadLetterSink for PostgresDeadLetterQueue {
    fn record(
        &self,
        dead_letter: DeadLetter,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeadLetterError>> + Send + '_>> {
        Box::pin(async move { self.add_entry(&dead_letter).await.map(|_| ()) })
    }
}
