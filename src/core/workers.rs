//! Awaitable background work with a shared shutdown signal.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Every background unit (debounce workers, conversation runs, the ticker)
/// is spawned here so shutdown and tests can wait for it.
#[derive(Clone, Default)]
pub struct WorkerPool {
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(future)
    }

    /// A token cancelled when the pool shuts down.
    pub fn child_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once shutdown has started.
    pub async fn cancelled(&self) {
        self.shutdown.cancelled().await
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until nothing is running, then accept work again.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Cancel everything and wait up to `grace` for workers to notice.
    /// Returns false when the grace period ran out first.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.shutdown.cancel();
        self.tracker.close();
        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    in_flight = self.tracker.len(),
                    "Workers still running after {}s grace period",
                    grace.as_secs()
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_wait_idle_waits_for_everything() {
        let pool = WorkerPool::new();
        let done = Arc::new(AtomicUsize::new(0));
        for i in 0..3 {
            let done = done.clone();
            pool.spawn(async move {
                tokio::time::sleep(Duration::from_secs(i + 1)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.wait_idle().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(pool.in_flight(), 0);

        // still usable afterwards
        pool.spawn(async {}).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_cooperative_workers() {
        let pool = WorkerPool::new();
        let token = pool.child_token();
        pool.spawn(async move {
            token.cancelled().await;
        });
        assert!(pool.shutdown(Duration::from_secs(1)).await);
        assert!(pool.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_gives_up_on_stuck_workers() {
        let pool = WorkerPool::new();
        pool.spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        assert!(!pool.shutdown(Duration::from_secs(2)).await);
    }
}
