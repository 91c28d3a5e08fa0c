//! In-memory dead-letter sink.

use complementary_core::dead_letter::{DeadLetter, DeadLetterError, DeadLetterSink};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Collects dead letters in memory so tests can inspect them.
///
/// Can be switched into a failing mode to exercise the path where the
/// dead-letter store itself is unavailable.
#[derive(Clone, Default)]
pub struct InMemoryDeadLetterSink {
    entries: Arc<Mutex<Vec<DeadLetter>>>,
    failure: Arc<Mutex<Option<String>>>,
}

impl InMemoryDeadLetterSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<DeadLetter>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every dead letter recorded so far.
    #[must_use]
    pub fn recorded(&self) -> Vec<DeadLetter> {
        self.entries().clone()
    }

    /// Number of dead letters recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether nothing was dead-lettered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Make every subsequent `record` fail.
    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason.into());
    }
}

impl DeadLetterSink for InMemoryDeadLetterSink {
    fn record(
        &self,
        dead_letter: DeadLetter,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeadLetterError>> + Send + '_>> {
        Box::pin(async move {
            let failure = self
                .failure
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(reason) = failure {
                return Err(DeadLetterError::Storage(reason));
            }

            self.entries().push(dead_letter);
            Ok(())
        })
    }
}
