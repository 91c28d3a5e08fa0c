//! Read-only view of a reservation, owned by the reservations service.

use serde::{Deserialize, Serialize};

use crate::types::{ReservationId, UserId};

/// Status string a reservation carries once it is paid for.
pub const CONFIRMED_STATUS: &str = "Confirmed";

/// A reservation as seen by this service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation id
    pub id: ReservationId,
    /// User who owns the reservation
    pub user_id: UserId,
    /// Status as reported by the reservations service
    pub status: String,
}

impl Reservation {
    /// Create a reservation view.
    #[must_use]
    pub fn new(id: ReservationId, user_id: UserId, status: impl Into<String>) -> Self {
        Self {
            id,
            user_id,
            status: status.into(),
        }
    }

    /// Whether services may be requested for this reservation.
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.status == CONFIRMED_STATUS
    }

    /// Whether `user` owns this reservation.
    #[must_use]
    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.user_id == user
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_confirmed_status_permits_requests() {
        let owner = UserId::new();
        assert!(Reservation::new(ReservationId::new(), owner, "Confirmed").is_confirmed());
        assert!(!Reservation::new(ReservationId::new(), owner, "Pending").is_confirmed());
        assert!(!Reservation::new(ReservationId::new(), owner, "confirmed").is_confirmed());
    }

    #[test]
    fn ownership() {
        let owner = UserId::new();
        let reservation = Reservation::new(ReservationId::new(), owner, "Confirmed");
        assert!(reservation.is_owned_by(owner));
        assert!(!reservation.is_owned_by(UserId::new()));
    }
}
