//! Async runtime utilities for Quarry.
//!
//! Drivers are synchronous state machines; this crate is the thin tokio layer
//! the driver runner uses to place them on worker tasks.

use std::future::Future;

use common_error::{QuarryError, QuarryResult};
use tokio::runtime::{Builder, Runtime};

/// Build a multi-threaded runtime with `worker_threads` workers (None = one per core).
pub fn build_runtime(worker_threads: Option<usize>) -> QuarryResult<Runtime> {
    let mut builder = Builder::new_multi_thread();
    builder.enable_time().thread_name("quarry-driver");
    if let Some(threads) = worker_threads {
        builder.worker_threads(threads.max(1));
    }
    builder
        .build()
        .map_err(|e| QuarryError::InternalError(format!("Failed to create runtime: {e}")))
}

/// Block on a future using a fresh default runtime.
pub fn block_on<F: Future>(future: F) -> QuarryResult<F::Output> {
    let runtime = build_runtime(None)?;
    Ok(runtime.block_on(future))
}

/// Yield the current task back to the scheduler.
pub async fn yield_now() {
    tokio::task::yield_now().await;
}

/// A handle to a set of spawned tasks.
pub struct JoinSet<T> {
    inner: tokio::task::JoinSet<T>,
}

impl<T: Send + 'static> JoinSet<T> {
    /// Create a new join set.
    pub fn new() -> Self {
        Self {
            inner: tokio::task::JoinSet::new(),
        }
    }

    /// Spawn a task into the set.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        self.inner.spawn(future);
    }

    /// Wait for the next task to complete. A panicked or aborted task is
    /// reported as an `InternalError`.
    pub async fn join_next(&mut self) -> Option<QuarryResult<T>> {
        self.inner.join_next().await.map(|joined| {
            joined.map_err(|e| QuarryError::InternalError(format!("driver task failed: {e}")))
        })
    }

    /// Abort every task still running.
    pub fn abort_all(&mut self) {
        self.inner.abort_all();
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Get the number of tasks in the set.
    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

impl<T: Send + 'static> Default for JoinSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_on() {
        let value = block_on(async { 40 + 2 }).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_join_set() {
        let total = block_on(async {
            let mut set = JoinSet::new();
            for i in 0..4u64 {
                set.spawn(async move { i * 10 });
            }
            assert_eq!(set.len(), 4);
            let mut total = 0;
            while let Some(result) = set.join_next().await {
                total += result.unwrap();
            }
            total
        })
        .unwrap();
        assert_eq!(total, 60);
    }
}
