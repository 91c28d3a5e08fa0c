//! `PostgreSQL` storage for the complementary services platform.
//!
//! This crate provides [`PostgresDeadLetterQueue`], the durable dead-letter
//! store used by message consumers, plus the workspace migrations:
//!
//! - `failed_messages`: dead-lettered broker deliveries
//! - `service_requests`: the service request aggregate
//! - `reservations`: read-only reservation lookup
//!
//! # Example
//!
//! ```no_run
//! use complementary_postgres::{PostgresDeadLetterQueue, run_migrations};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = sqlx::PgPool::connect("postgres://localhost/complementary_services").await?;
//! run_migrations(&pool).await?;
//!
//! let dlq = PostgresDeadLetterQueue::new(pool);
//! println!("pending: {}", dlq.count_pending().await?);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dead_letter_queue;

pub use dead_letter_queue::{DLQStatus, FailedMessage, PostgresDeadLetterQueue};

/// Run the workspace migrations against `pool`.
///
/// # Errors
///
/// Returns the migration error if any migration fails to apply.
pub async fn run_migrations(pool: &sqlx::PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../migrations").run(pool).await
}
