//! Cooperative cancellation and progress reporting for long operations.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Objects processed between two progress reports
pub const PROGRESS_INTERVAL: u64 = 1024;

/// Result of an operation that can be cancelled.
///
/// Cancellation is not a failure: callers suppress error reporting for it and
/// discard whatever was partially built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Completed(T),
    Cancelled,
}

impl<T> Outcome<T> {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(value) => Some(value),
            Outcome::Cancelled => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Completed(value) => Outcome::Completed(f(value)),
            Outcome::Cancelled => Outcome::Cancelled,
        }
    }
}

type ProgressSink = Arc<dyn Fn(u64) + Send + Sync>;

/// Cancellation flag plus progress sink, passed explicitly into traversal,
/// classification and closure entry points.
#[derive(Clone, Default)]
pub struct TaskContext {
    cancel: Arc<AtomicBool>,
    progress: Option<ProgressSink>,
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("cancelled", &self.is_cancelled())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl TaskContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report the number of objects iterated so far to `sink`.
    #[must_use]
    pub fn with_progress(mut self, sink: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(sink));
        self
    }

    /// Flag shared with whoever may cancel the task (e.g. a Ctrl-C handler)
    #[must_use]
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn report(&self, iterated: u64) {
        if let Some(sink) = &self.progress {
            sink(iterated);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let task = TaskContext::new();
        let clone = task.clone();
        assert!(!clone.is_cancelled());
        task.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_progress_sink() {
        let seen = Arc::new(AtomicU64::new(0));
        let sink = Arc::clone(&seen);
        let task = TaskContext::new().with_progress(move |n| sink.store(n, Ordering::Relaxed));
        task.report(2048);
        assert_eq!(seen.load(Ordering::Relaxed), 2048);
    }

    #[test]
    fn test_outcome_map() {
        assert_eq!(Outcome::Completed(2).map(|n| n * 2), Outcome::Completed(4));
        assert!(Outcome::<u8>::Cancelled.map(|n| n + 1).is_cancelled());
    }
}
