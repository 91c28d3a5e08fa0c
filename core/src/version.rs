//! Optimistic concurrency versions for persisted aggregates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Persisted version of an aggregate, used for optimistic concurrency control.
///
/// A freshly created aggregate has never been stored and is at
/// [`Version::INITIAL`]. Each successful save moves the stored row to the next
/// version:
///
/// - When saving, the caller states the version it loaded
/// - If the stored version no longer matches, the save fails
/// - This prevents lost updates when two writers race on the same aggregate
///
/// # Examples
///
/// ```
/// use complementary_core::version::Version;
///
/// let v0 = Version::INITIAL;
/// let v1 = v0.next();
/// assert_eq!(v1, Version::new(1));
/// assert!(v0.is_initial());
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// The version of an aggregate that has never been stored.
    pub const INITIAL: Self = Self(0);

    /// Create a new `Version` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the next version (current + 1).
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Check if this is the initial (never stored) version.
    #[must_use]
    pub const fn is_initial(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}
