//! One-way progress notifications.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Receives `(percent, message)` updates while a run progresses.
///
/// Called synchronously between awaits; implementations must return quickly.
pub trait ProgressObserver: Send + Sync {
    /// Report progress in percent (0-100)
    fn on_progress(&self, percent: u8, message: &str);
}

impl<F> ProgressObserver for F
where
    F: Fn(u8, &str) + Send + Sync,
{
    fn on_progress(&self, percent: u8, message: &str) {
        self(percent, message);
    }
}

/// Observer that ignores every update
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressObserver for NoopProgress {
    fn on_progress(&self, _percent: u8, _message: &str) {}
}

/// Wraps an observer and keeps reported percentages non-decreasing
#[derive(Clone)]
pub struct ProgressTracker {
    observer: Arc<dyn ProgressObserver>,
    last: Arc<AtomicU8>,
}

impl ProgressTracker {
    /// Track progress for `observer`
    pub fn new(observer: Arc<dyn ProgressObserver>) -> Self {
        Self {
            observer,
            last: Arc::new(AtomicU8::new(0)),
        }
    }

    /// Tracker that reports nowhere
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopProgress))
    }

    /// Report `percent`, clamped to `[last reported, 100]`
    pub fn report(&self, percent: u8, message: &str) {
        let percent = percent.min(100);
        let previous = self.last.fetch_max(percent, Ordering::SeqCst);
        self.observer.on_progress(percent.max(previous), message);
    }

    /// Report a position inside the `[start, end]` sub-range
    pub fn report_within(&self, start: u8, end: u8, done: usize, total: usize, message: &str) {
        let span = usize::from(end.saturating_sub(start));
        let offset = if total == 0 { span } else { span * done.min(total) / total };
        let percent = u8::try_from(usize::from(start) + offset).unwrap_or(end);
        self.report(percent, message);
    }

    /// Last reported percent
    #[must_use]
    pub fn current(&self) -> u8 {
        self.last.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker").field("last", &self.current()).finish()
    }
}
