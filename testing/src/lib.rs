//! # Complementary Services Testing
//!
//! Testing utilities for the complementary services platform.
//!
//! This crate provides:
//! - [`FixedClock`]: deterministic time
//! - [`InMemoryBroker`]: a [`MessageBroker`](complementary_core::broker::MessageBroker)
//!   with real ack/requeue/dead-letter semantics
//! - [`InMemoryDeadLetterSink`]: captures dead letters
//!
//! ## Example
//!
//! ```ignore
//! use complementary_testing::{InMemoryBroker, test_clock};
//!
//! #[tokio::test]
//! async fn confirmed_response_is_acked() {
//!     let broker = InMemoryBroker::new();
//!     let clock = test_clock();
//!     // ... spawn a consumer against `broker`, publish a response ...
//!     assert!(broker.wait_for_settlements(1, Duration::from_secs(1)).await);
//! }
//! ```

use chrono::{DateTime, Utc};
use complementary_core::environment::Clock;

pub mod broker;
pub mod dead_letter;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use complementary_testing::mocks::FixedClock;
    /// use complementary_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }

        /// A clock `seconds` later than this one.
        #[must_use]
        pub fn advanced_by(&self, seconds: i64) -> Self {
            Self::new(self.time + chrono::Duration::seconds(seconds))
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(1_735_689_600))
    }
}

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub use broker::{InMemoryBroker, PublishedMessage, Settlement};
pub use dead_letter::InMemoryDeadLetterSink;
pub use mocks::{FixedClock, test_clock};
