//! Cooperative cancellation for a run, plus the one-shot cleanup latch.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Shared cancellation flag observed at every suspension point.
///
/// Clones share state. Cancelling is sticky: once set it never clears.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Guards a cleanup routine so it runs at most once, no matter how many
/// signals arrive.
#[derive(Debug, Default)]
pub struct CleanupLatch {
    fired: AtomicBool,
}

impl CleanupLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `cleanup` if this is the first call. Returns whether it ran.
    pub fn run_once<F: FnOnce()>(&self, cleanup: F) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        cleanup();
        true
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}
