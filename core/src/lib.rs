//! # Complementary Core
//!
//! Core traits and types shared by every crate of the complementary services
//! platform.
//!
//! ## Core Concepts
//!
//! - **Domain events**: facts emitted by aggregate mutations, buffered on the
//!   aggregate and drained once per use case ([`event`])
//! - **Message broker**: durable, at-least-once transport with explicit
//!   acknowledgement of each delivery ([`broker`])
//! - **Dead letters**: terminal home for deliveries that cannot be processed
//!   ([`dead_letter`])
//! - **Versions**: optimistic concurrency tokens for persisted aggregates
//!   ([`version`])
//! - **Environment**: injected dependencies such as the [`environment::Clock`]

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod broker;
pub mod dead_letter;
pub mod event;
pub mod version;

/// Environment module - Dependency injection traits
///
/// External dependencies that vary between production and tests are
/// abstracted behind traits and injected where they are needed.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use complementary_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = clock.now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
