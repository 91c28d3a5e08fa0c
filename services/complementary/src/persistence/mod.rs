//! Repository implementations: in-memory for tests and local runs,
//! `PostgreSQL` for production.

pub mod in_memory;
pub mod postgres;

pub use in_memory::{InMemoryReservationLookup, InMemoryServiceRequestRepository};
pub use postgres::{PostgresReservationLookup, PostgresServiceRequestRepository};
