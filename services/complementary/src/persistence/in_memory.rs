//! In-memory repositories for tests and local runs.

use async_trait::async_trait;
use complementary_core::version::Version;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::domain::{
    RepositoryError, Reservation, ReservationLookup, ServiceRequest, ServiceRequestRepository,
    ServiceRequestState,
};
use crate::types::{EventId, ReservationId, ServiceId, UserId};

#[derive(Clone)]
struct Row {
    state: ServiceRequestState,
    version: Version,
    seq: u64,
}

#[derive(Default)]
struct Store {
    rows: HashMap<ServiceId, Row>,
    next_seq: u64,
}

/// Service requests held in a map, with the same version check as the
/// Postgres repository.
#[derive(Clone, Default)]
pub struct InMemoryServiceRequestRepository {
    store: Arc<RwLock<Store>>,
}

impl InMemoryServiceRequestRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.read().map(|s| s.rows.len()).unwrap_or(0)
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn select(
        &self,
        filter: impl Fn(&ServiceRequestState) -> bool,
    ) -> Result<Vec<ServiceRequest>, RepositoryError> {
        let store = self
            .store
            .read()
            .map_err(|_| RepositoryError::Database("repository lock poisoned".to_string()))?;

        let mut rows: Vec<&Row> = store.rows.values().filter(|r| filter(&r.state)).collect();
        rows.sort_by(|a, b| {
            b.state
                .requested_at
                .cmp(&a.state.requested_at)
                .then(b.seq.cmp(&a.seq))
        });

        Ok(rows
            .into_iter()
            .map(|r| ServiceRequest::restore(r.state.clone(), r.version))
            .collect())
    }
}

#[async_trait]
impl ServiceRequestRepository for InMemoryServiceRequestRepository {
    async fn load(&self, id: ServiceId) -> Result<Option<ServiceRequest>, RepositoryError> {
        let store = self
            .store
            .read()
            .map_err(|_| RepositoryError::Database("repository lock poisoned".to_string()))?;

        Ok(store
            .rows
            .get(&id)
            .map(|r| ServiceRequest::restore(r.state.clone(), r.version)))
    }

    async fn save(&self, request: &mut ServiceRequest) -> Result<(), RepositoryError> {
        let mut store = self
            .store
            .write()
            .map_err(|_| RepositoryError::Database("repository lock poisoned".to_string()))?;

        let expected = request.version();
        let stored = store.rows.get(&request.id()).map(|r| (r.version, r.seq));
        let seq = match stored {
            None if expected.is_initial() => {
                store.next_seq += 1;
                store.next_seq
            }
            Some((version, seq)) if version == expected => seq,
            other => {
                return Err(RepositoryError::ConcurrencyConflict {
                    service_id: request.id(),
                    expected: expected.value(),
                    actual: other.map(|(version, _)| version.value()),
                });
            }
        };

        let version = expected.next();
        store.rows.insert(
            request.id(),
            Row {
                state: request.state().clone(),
                version,
                seq,
            },
        );
        request.mark_saved(version);
        Ok(())
    }

    async fn find_by_user(&self, user: UserId) -> Result<Vec<ServiceRequest>, RepositoryError> {
        self.select(|s| s.user_id == user)
    }

    async fn find_by_reservation(
        &self,
        reservation: ReservationId,
    ) -> Result<Vec<ServiceRequest>, RepositoryError> {
        self.select(|s| s.reservation_id == reservation)
    }

    async fn find_by_event(&self, event: EventId) -> Result<Vec<ServiceRequest>, RepositoryError> {
        self.select(|s| s.event_id == event)
    }

    async fn all(&self) -> Result<Vec<ServiceRequest>, RepositoryError> {
        self.select(|_| true)
    }
}

/// Reservations held in a map.
#[derive(Clone, Default)]
pub struct InMemoryReservationLookup {
    reservations: Arc<RwLock<HashMap<ReservationId, Reservation>>>,
}

impl InMemoryReservationLookup {
    /// Create an empty lookup.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a reservation.
    pub fn insert(&self, reservation: Reservation) {
        if let Ok(mut reservations) = self.reservations.write() {
            reservations.insert(reservation.id, reservation);
        }
    }
}

#[async_trait]
impl ReservationLookup for InMemoryReservationLookup {
    async fn find(&self, id: ReservationId) -> Result<Option<Reservation>, RepositoryError> {
        let reservations = self
            .reservations
            .read()
            .map_err(|_| RepositoryError::Database("reservation lock poisoned".to_string()))?;
        Ok(reservations.get(&id).cloned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use crate::domain::ServiceType;
    use chrono::Duration;
    use complementary_core::environment::Clock;
    use complementary_testing::test_clock;

    fn request(user: UserId, minutes: i64) -> ServiceRequest {
        ServiceRequest::create(
            ReservationId::new(),
            user,
            EventId::new(),
            ServiceType::Transport,
            "",
            test_clock().now() + Duration::minutes(minutes),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn save_advances_version_and_load_round_trips() {
        let repo = InMemoryServiceRequestRepository::new();
        let mut service = request(UserId::new(), 0);

        repo.save(&mut service).await.unwrap();
        assert_eq!(service.version(), Version::new(1));

        let loaded = repo.load(service.id()).await.unwrap().unwrap();
        assert_eq!(loaded.state(), service.state());
        assert_eq!(loaded.version(), Version::new(1));
        assert!(loaded.pending_events().is_empty());
    }

    #[tokio::test]
    async fn stale_writer_gets_concurrency_conflict() {
        let repo = InMemoryServiceRequestRepository::new();
        let mut service = request(UserId::new(), 0);
        repo.save(&mut service).await.unwrap();

        let mut first = repo.load(service.id()).await.unwrap().unwrap();
        let mut second = repo.load(service.id()).await.unwrap().unwrap();

        first.reject("sold out", test_clock().now()).unwrap();
        repo.save(&mut first).await.unwrap();

        second.cancel(test_clock().now()).unwrap();
        let err = repo.save(&mut second).await.unwrap_err();
        assert_eq!(
            err,
            RepositoryError::ConcurrencyConflict {
                service_id: service.id(),
                expected: 1,
                actual: Some(2),
            }
        );
    }

    #[tokio::test]
    async fn inserting_an_existing_id_conflicts() {
        let repo = InMemoryServiceRequestRepository::new();
        let mut service = request(UserId::new(), 0);
        let mut duplicate = service.clone();

        repo.save(&mut service).await.unwrap();
        assert!(matches!(
            repo.save(&mut duplicate).await,
            Err(RepositoryError::ConcurrencyConflict { actual: Some(1), .. })
        ));
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn queries_return_newest_first() {
        let repo = InMemoryServiceRequestRepository::new();
        let user = UserId::new();
        let mut older = request(user, 0);
        let mut newer = request(user, 5);
        let mut other = request(UserId::new(), 10);

        repo.save(&mut older).await.unwrap();
        repo.save(&mut newer).await.unwrap();
        repo.save(&mut other).await.unwrap();

        let ids: Vec<_> = repo
            .find_by_user(user)
            .await
            .unwrap()
            .iter()
            .map(ServiceRequest::id)
            .collect();
        assert_eq!(ids, vec![newer.id(), older.id()]);

        let by_reservation = repo.find_by_reservation(older.state().reservation_id).await.unwrap();
        assert_eq!(by_reservation.len(), 1);

        let by_event = repo.find_by_event(other.state().event_id).await.unwrap();
        assert_eq!(by_event[0].id(), other.id());

        assert_eq!(repo.all().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn reservation_lookup() {
        let lookup = InMemoryReservationLookup::new();
        let reservation = Reservation::new(ReservationId::new(), UserId::new(), "Confirmed");
        lookup.insert(reservation.clone());

        assert_eq!(lookup.find(reservation.id).await.unwrap(), Some(reservation));
        assert_eq!(lookup.find(ReservationId::new()).await.unwrap(), None);
    }
}
