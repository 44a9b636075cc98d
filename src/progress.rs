//! Cooperative cancellation and progress reporting.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// A cloneable token shared between a caller and an in-flight operation.
///
/// The engine polls [`Progress::is_cancelled`] at chunk boundaries and
/// updates the completed-byte counter as data moves through the pipeline.
/// Cancelling mid-add triggers the rollback protocol before the operation
/// returns [`ZipError::Cancelled`](crate::ZipError::Cancelled).
///
/// ```
/// use rezip::Progress;
///
/// let progress = Progress::new();
/// let handle = progress.clone();
/// handle.cancel();
/// assert!(progress.is_cancelled());
/// ```
#[derive(Clone, Debug, Default)]
pub struct Progress {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    completed: AtomicU64,
    total: AtomicU64,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the operation this token was passed to.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Relaxed)
    }

    /// Bytes processed so far by the current operation.
    pub fn completed_bytes(&self) -> u64 {
        self.inner.completed.load(Ordering::Relaxed)
    }

    /// Total bytes the current operation expects to process, when known.
    pub fn total_bytes(&self) -> u64 {
        self.inner.total.load(Ordering::Relaxed)
    }

    /// Completion ratio in `0.0..=1.0`; zero while the total is unknown.
    pub fn fraction_completed(&self) -> f64 {
        let total = self.total_bytes();
        if total == 0 {
            return 0.0;
        }
        (self.completed_bytes() as f64 / total as f64).min(1.0)
    }

    pub(crate) fn set_total(&self, total: u64) {
        self.inner.total.store(total, Ordering::Relaxed);
        self.inner.completed.store(0, Ordering::Relaxed);
    }

    pub(crate) fn add_completed(&self, n: u64) {
        self.inner.completed.fetch_add(n, Ordering::Relaxed);
    }
}
