//! Domain events and the accumulate-then-drain buffer aggregates keep them in.
//!
//! An aggregate mutation records at most one domain event. Events stay in the
//! aggregate's [`EventBuffer`] until the use case that invoked the mutation has
//! persisted the aggregate, at which point it drains the buffer exactly once
//! and hands the events to a dispatcher.
//!
//! ```text
//! mutate ──► buffer.record(event)
//!               │
//! persist ──────┤
//!               ▼
//! drain  ──► buffer.take() ──► dispatcher (in emission order)
//! ```

use chrono::{DateTime, Utc};
use smallvec::SmallVec;

/// A fact emitted by an aggregate mutation.
///
/// Domain events are immutable values consumed by handlers outside the
/// aggregate's transaction.
pub trait DomainEvent: Clone + Send + Sync + 'static {
    /// Stable name of the event type (e.g. `"ServiceConfirmed"`).
    ///
    /// Used for logging and for metric labels.
    fn event_type(&self) -> &'static str;

    /// When the fact occurred.
    fn occurred_at(&self) -> DateTime<Utc>;
}

/// Ordered buffer of domain events emitted by an aggregate.
///
/// Most aggregate operations emit a single event, so the buffer stores its
/// first event inline.
///
/// # Examples
///
/// ```
/// use complementary_core::event::EventBuffer;
///
/// let mut buffer = EventBuffer::new();
/// buffer.record("first");
/// buffer.record("second");
///
/// assert_eq!(buffer.take(), vec!["first", "second"]);
/// assert!(buffer.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct EventBuffer<E> {
    events: SmallVec<[E; 1]>,
}

impl<E> EventBuffer<E> {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: SmallVec::new(),
        }
    }

    /// Append an event after any previously recorded ones.
    pub fn record(&mut self, event: E) {
        self.events.push(event);
    }

    /// Remove and return every buffered event in emission order.
    #[must_use]
    pub fn take(&mut self) -> Vec<E> {
        std::mem::take(&mut self.events).into_vec()
    }

    /// Borrow the buffered events without draining them.
    #[must_use]
    pub fn pending(&self) -> &[E] {
        &self.events
    }

    /// Number of buffered events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the buffer holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl<E> Default for EventBuffer<E> {
    fn default() -> Self {
        Self::new()
    }
}
