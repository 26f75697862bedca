//! Recurring task
//!
//! Runs an async action on a fixed period until cancelled. Used to poll
//! the meter for readings.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Handle to a periodically running action
///
/// Dropping the handle cancels the task.
#[derive(Debug)]
pub struct RecurringTask {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl RecurringTask {
    /// Run `action` every `period`, first after one period
    ///
    /// An action that is running when the task is cancelled completes;
    /// no further runs start. Ticks missed while an action overruns are
    /// skipped. Must be called from within a tokio runtime.
    pub fn spawn<F, Fut>(period: Duration, mut action: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let period = period.max(Duration::from_millis(1));
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                action().await;
            }
            tracing::debug!("Recurring task stopped");
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Stop scheduling further runs. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether `cancel` has been called
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel and wait for the task to finish
    pub async fn join(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!("Recurring task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for RecurringTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_runs_every_period() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let task = RecurringTask::spawn(Duration::from_secs(1), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        task.join().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let task = RecurringTask::spawn(Duration::from_secs(1), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        task.cancel();
        task.cancel();
        assert!(task.is_cancelled());
        task.join().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let task = RecurringTask::spawn(Duration::from_millis(100), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        drop(task);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
