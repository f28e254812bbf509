use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// A cheap, shared cancellation flag — the stand-in for the ambient
/// "context object" the upstream system propagates through every blocking
/// call. This workspace has no async runtime in active use for task
/// orchestration (the teacher's own parallel publish levels use plain
/// `std::thread::spawn`), so cancellation here is a plain shared flag
/// rather than a `tokio_util::sync::CancellationToken`.
///
/// Every blocking call this crate makes on a caller's behalf (HTTP
/// request, backoff sleep) checks this token at the next natural
/// suspension point, never mid-syscall.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sleeps in short increments, checking cancellation between them, so a
    /// long backoff delay or ticker wait can be interrupted promptly.
    pub fn sleep(&self, duration: Duration) {
        const SLICE: Duration = Duration::from_millis(50);
        let mut remaining = duration;
        while remaining > Duration::ZERO {
            if self.is_cancelled() {
                return;
            }
            let step = remaining.min(SLICE);
            std::thread::sleep(step);
            remaining = remaining.saturating_sub(step);
        }
    }

    /// A token that is never cancelled — used by background tasks (manual
    /// sync trigger, best-effort counter touches) which must run under the
    /// process's own lifetime rather than inheriting a caller's token. See
    /// the background-vs-request-lifetime design note.
    pub fn process_root() -> Self {
        Self::new()
    }
}
