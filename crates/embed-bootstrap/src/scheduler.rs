//! Timer scheduling for retry continuations.
//!
//! The loader never sleeps inline; it hands a continuation to a [`Scheduler`]
//! and keeps the returned [`TimerHandle`] so the continuation can be
//! cancelled. [`TokioScheduler`] runs continuations on the tokio runtime, so
//! tests using `start_paused = true` fast-forward retries without real waits.

use futures::future::BoxFuture;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A scheduled continuation.
pub type Task = BoxFuture<'static, ()>;

/// Schedules a task to run after a delay.
pub trait Scheduler: Send + Sync {
    /// Run `task` after `delay` unless the returned handle is cancelled first.
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle;
}

/// Cancellation handle for a scheduled task.
#[derive(Debug, Clone, Default)]
pub struct TimerHandle {
    token: CancellationToken,
}

impl TimerHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the task if it has not started yet.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the handle is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

/// Scheduler backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let handle = TimerHandle::new();
        let token = handle.token.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {
                    tracing::trace!(target: "embed.scheduler", "Scheduled task cancelled");
                }
                () = tokio::time::sleep(delay) => {
                    task.await;
                }
            }
        });

        handle
    }
}

/// Scheduler decorator that records every requested delay.
///
/// Used by tests to assert retry delay sequences.
pub struct RecordingScheduler<S> {
    inner: S,
    delays: Mutex<Vec<Duration>>,
}

impl<S: Scheduler> RecordingScheduler<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            delays: Mutex::new(Vec::new()),
        }
    }

    /// Delays requested so far, in order.
    #[must_use]
    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .map(|delays| delays.clone())
            .unwrap_or_default()
    }
}

impl<S: Scheduler> Scheduler for RecordingScheduler<S> {
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(delay);
        }
        self.inner.schedule(delay, task)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_task_runs_after_delay() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);

        let _handle = TokioScheduler.schedule(
            Duration::from_secs(5),
            Box::pin(async move {
                ran_clone.store(true, Ordering::SeqCst);
            }),
        );
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_secs(4)).await;
        tokio::task::yield_now().await;
        assert!(!ran.load(Ordering::SeqCst));

        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_task_never_runs() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);

        let handle = TokioScheduler.schedule(
            Duration::from_secs(1),
            Box::pin(async move {
                ran_clone.store(true, Ordering::SeqCst);
            }),
        );
        handle.cancel();
        assert!(handle.is_cancelled());

        tokio::time::advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recording_scheduler_records_delays() {
        let scheduler = RecordingScheduler::new(TokioScheduler);
        let _a = scheduler.schedule(Duration::from_millis(1000), Box::pin(async {}));
        let _b = scheduler.schedule(Duration::from_millis(2000), Box::pin(async {}));

        assert_eq!(
            scheduler.delays(),
            vec![Duration::from_millis(1000), Duration::from_millis(2000)]
        );
    }
}
