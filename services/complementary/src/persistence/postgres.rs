//! `PostgreSQL` repositories.
//!
//! One row per service request in `service_requests`, carrying a `version`
//! column. Inserts use `ON CONFLICT DO NOTHING` and updates are guarded by
//! `WHERE version = $expected`; a write that touches no row is reported as a
//! [`RepositoryError::ConcurrencyConflict`] and the transaction is rolled back.

use async_trait::async_trait;
use complementary_core::version::Version;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{
    ProviderResponse, RepositoryError, Reservation, ReservationLookup, ServiceRequest,
    ServiceRequestRepository, ServiceRequestState,
};
use crate::types::{EventId, Money, ReservationId, ServiceId, UserId};

const SELECT_COLUMNS: &str = r"
    SELECT
        service_id, reservation_id, user_id, event_id, service_type, status,
        provider_id, price_cents, details, requested_at, confirmed_at,
        rejected_at, rejection_reason, provider_is_available, provider_response_id,
        provider_message, provider_price_cents, provider_estimated_time, version
    FROM service_requests
";

fn db_error(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Database(e.to_string())
}

fn corrupt(e: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Corrupt(e.to_string())
}

fn cents_to_db(money: Money) -> Result<i64, RepositoryError> {
    i64::try_from(money.cents()).map_err(|_| corrupt(format!("price {money} out of range")))
}

fn cents_from_db(cents: i64) -> Result<Money, RepositoryError> {
    u64::try_from(cents)
        .map(Money::from_cents)
        .map_err(|_| corrupt(format!("negative price {cents}")))
}

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// Bind the 18 state columns, in table order, as `$1..$18`.
fn bind_state<'q>(
    query: PgQuery<'q>,
    state: &'q ServiceRequestState,
    price: i64,
    provider_price: Option<i64>,
) -> PgQuery<'q> {
    let response = state.provider_response.as_ref();
    query
        .bind(state.id.as_uuid())
        .bind(state.reservation_id.as_uuid())
        .bind(state.user_id.as_uuid())
        .bind(state.event_id.as_uuid())
        .bind(state.service_type.as_str())
        .bind(state.status.as_str())
        .bind(state.provider_id.as_deref())
        .bind(price)
        .bind(state.details.as_str())
        .bind(state.requested_at)
        .bind(state.confirmed_at)
        .bind(state.rejected_at)
        .bind(state.rejection_reason.as_deref())
        .bind(response.map(|r| r.is_available))
        .bind(response.map(|r| r.provider_id.as_str()))
        .bind(response.map(|r| r.message.as_str()))
        .bind(provider_price)
        .bind(response.and_then(|r| r.estimated_time))
}

/// Service requests stored in `PostgreSQL`.
#[derive(Clone)]
pub struct PostgresServiceRequestRepository {
    pool: PgPool,
}

impl PostgresServiceRequestRepository {
    /// Create a repository over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_request(row: &PgRow) -> Result<ServiceRequest, RepositoryError> {
        let service_type: String = row.try_get("service_type").map_err(corrupt)?;
        let status: String = row.try_get("status").map_err(corrupt)?;
        let price_cents: i64 = row.try_get("price_cents").map_err(corrupt)?;
        let version: i64 = row.try_get("version").map_err(corrupt)?;

        let provider_is_available: Option<bool> =
            row.try_get("provider_is_available").map_err(corrupt)?;
        let provider_response = match provider_is_available {
            Some(is_available) => {
                let provider_price: Option<i64> =
                    row.try_get("provider_price_cents").map_err(corrupt)?;
                let provider_id: Option<String> =
                    row.try_get("provider_response_id").map_err(corrupt)?;
                let message: Option<String> = row.try_get("provider_message").map_err(corrupt)?;
                Some(ProviderResponse::new(
                    is_available,
                    provider_id.unwrap_or_default(),
                    message.unwrap_or_default(),
                    cents_from_db(provider_price.unwrap_or(0))?,
                    row.try_get("provider_estimated_time").map_err(corrupt)?,
                ))
            }
            None => None,
        };

        let state = ServiceRequestState {
            id: ServiceId::from_uuid(row.try_get("service_id").map_err(corrupt)?),
            reservation_id: ReservationId::from_uuid(row.try_get("reservation_id").map_err(corrupt)?),
            user_id: UserId::from_uuid(row.try_get("user_id").map_err(corrupt)?),
            event_id: EventId::from_uuid(row.try_get("event_id").map_err(corrupt)?),
            service_type: service_type.parse().map_err(corrupt)?,
            status: status.parse().map_err(corrupt)?,
            provider_id: row.try_get("provider_id").map_err(corrupt)?,
            price: cents_from_db(price_cents)?,
            details: row.try_get("details").map_err(corrupt)?,
            requested_at: row.try_get("requested_at").map_err(corrupt)?,
            confirmed_at: row.try_get("confirmed_at").map_err(corrupt)?,
            rejected_at: row.try_get("rejected_at").map_err(corrupt)?,
            rejection_reason: row.try_get("rejection_reason").map_err(corrupt)?,
            provider_response,
        };

        let version = u64::try_from(version).map_err(|_| corrupt(format!("negative version {version}")))?;
        Ok(ServiceRequest::restore(state, Version::new(version)))
    }

    async fn fetch(&self, filter: &str, id: Uuid) -> Result<Vec<ServiceRequest>, RepositoryError> {
        let sql = format!("{SELECT_COLUMNS} WHERE {filter} = $1 ORDER BY requested_at DESC");
        let rows = sqlx::query(&sql)
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        rows.iter().map(Self::row_to_request).collect()
    }

    async fn stored_version(
        tx: &mut Transaction<'_, Postgres>,
        id: ServiceId,
    ) -> Result<Option<u64>, RepositoryError> {
        let version: Option<(i64,)> =
            sqlx::query_as("SELECT version FROM service_requests WHERE service_id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&mut **tx)
                .await
                .map_err(db_error)?;

        Ok(version.and_then(|(v,)| u64::try_from(v).ok()))
    }
}

#[async_trait]
impl ServiceRequestRepository for PostgresServiceRequestRepository {
    async fn load(&self, id: ServiceId) -> Result<Option<ServiceRequest>, RepositoryError> {
        let sql = format!("{SELECT_COLUMNS} WHERE service_id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.as_ref().map(Self::row_to_request).transpose()
    }

    async fn save(&self, request: &mut ServiceRequest) -> Result<(), RepositoryError> {
        let expected = request.version();
        let next = expected.next();
        let state = request.state();
        let id = state.id;

        let price = cents_to_db(state.price)?;
        let provider_price = state
            .provider_response
            .as_ref()
            .map(|r| cents_to_db(r.price))
            .transpose()?;
        let expected_db = i64::try_from(expected.value()).map_err(corrupt)?;
        let next_db = i64::try_from(next.value()).map_err(corrupt)?;

        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let sql = if expected.is_initial() {
            r"
            INSERT INTO service_requests (
                service_id, reservation_id, user_id, event_id, service_type, status,
                provider_id, price_cents, details, requested_at, confirmed_at,
                rejected_at, rejection_reason, provider_is_available, provider_response_id,
                provider_message, provider_price_cents, provider_estimated_time, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            ON CONFLICT (service_id) DO NOTHING
            "
        } else {
            r"
            UPDATE service_requests SET
                reservation_id = $2, user_id = $3, event_id = $4, service_type = $5,
                status = $6, provider_id = $7, price_cents = $8, details = $9,
                requested_at = $10, confirmed_at = $11, rejected_at = $12,
                rejection_reason = $13, provider_is_available = $14,
                provider_response_id = $15, provider_message = $16,
                provider_price_cents = $17, provider_estimated_time = $18,
                version = $19
            WHERE service_id = $1 AND version = $20
            "
        };

        let mut query = bind_state(sqlx::query(sql), state, price, provider_price).bind(next_db);
        if !expected.is_initial() {
            query = query.bind(expected_db);
        }
        let result = query.execute(&mut *tx).await.map_err(db_error)?;

        if result.rows_affected() == 0 {
            let actual = Self::stored_version(&mut tx, id).await?;
            tx.rollback().await.map_err(db_error)?;
            warn!(
                service_id = %id,
                expected = expected.value(),
                actual = ?actual,
                "Concurrency conflict saving service request"
            );
            return Err(RepositoryError::ConcurrencyConflict {
                service_id: id,
                expected: expected.value(),
                actual,
            });
        }

        tx.commit().await.map_err(db_error)?;
        debug!(service_id = %id, version = next.value(), "Saved service request");

        request.mark_saved(next);
        Ok(())
    }

    async fn find_by_user(&self, user: UserId) -> Result<Vec<ServiceRequest>, RepositoryError> {
        self.fetch("user_id", *user.as_uuid()).await
    }

    async fn find_by_reservation(
        &self,
        reservation: ReservationId,
    ) -> Result<Vec<ServiceRequest>, RepositoryError> {
        self.fetch("reservation_id", *reservation.as_uuid()).await
    }

    async fn find_by_event(&self, event: EventId) -> Result<Vec<ServiceRequest>, RepositoryError> {
        self.fetch("event_id", *event.as_uuid()).await
    }

    async fn all(&self) -> Result<Vec<ServiceRequest>, RepositoryError> {
        let sql = format!("{SELECT_COLUMNS} ORDER BY requested_at DESC");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        rows.iter().map(Self::row_to_request).collect()
    }
}

/// Reservations read from the booking system's `reservations` table.
#[derive(Clone)]
pub struct PostgresReservationLookup {
    pool: PgPool,
}

impl PostgresReservationLookup {
    /// Create a lookup over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReservationLookup for PostgresReservationLookup {
    async fn find(&self, id: ReservationId) -> Result<Option<Reservation>, RepositoryError> {
        let row: Option<(Uuid, Uuid, String)> =
            sqlx::query_as("SELECT id, user_id, status FROM reservations WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;

        Ok(row.map(|(id, user_id, status)| {
            Reservation::new(
                ReservationId::from_uuid(id),
                UserId::from_uuid(user_id),
                status,
            )
        }))
    }
}
