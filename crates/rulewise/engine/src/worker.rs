//! Bounded pool for CPU-bound work.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::error;

use rulewise_types::{IntelError, IntelResult};

/// At most `size` closures run on the blocking thread pool at once.
///
/// A panicking task is reported as `WorkerPool` and never poisons the pool.
#[derive(Clone, Debug)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Permits not currently held by a running task.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub async fn run<F, T>(&self, task: F) -> IntelResult<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| IntelError::WorkerPool(e.to_string()))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            task()
        })
        .await
        .map_err(|e| {
            let reason = if e.is_panic() {
                "task panicked".to_string()
            } else {
                e.to_string()
            };
            error!(%reason, "Worker task failed");
            IntelError::WorkerPool(reason)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn runs_closure_and_returns_value() {
        let pool = WorkerPool::new(2);
        assert_eq!(pool.run(|| 21 * 2).await.unwrap(), 42);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn panics_are_contained() {
        let pool = WorkerPool::new(1);
        let err = pool.run(|| -> u32 { panic!("boom") }).await.unwrap_err();
        assert_eq!(err, IntelError::WorkerPool("task panicked".into()));
        assert_eq!(pool.run(|| 1).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_is_bounded() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let tasks = (0..8).map(|_| {
            let (running, peak) = (running.clone(), peak.clone());
            pool.run(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                running.fetch_sub(1, Ordering::SeqCst);
            })
        });
        for result in futures::future::join_all(tasks).await {
            result.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.size(), 2);
    }
}
