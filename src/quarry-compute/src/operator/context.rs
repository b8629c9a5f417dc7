//! Per-driver execution context.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use common_config::ExecutionConfig;
use common_display::truncate_string;
use common_error::{QuarryError, QuarryResult};
use log::warn;
use tokio::sync::watch;

use super::metrics::MetricsSink;
use crate::memory::{AccountantRef, BlockFactory};

/// Runtime configuration for drivers.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Target positions per emitted page.
    pub page_size: usize,
    /// Loop iterations a driver runs before yielding.
    pub max_iterations_per_slice: usize,
    /// Enable metrics collection.
    pub collect_metrics: bool,
    /// Drivers per partitioned source.
    pub parallelism: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from(&ExecutionConfig::default())
    }
}

impl From<&ExecutionConfig> for RuntimeConfig {
    fn from(config: &ExecutionConfig) -> Self {
        let parallelism = config
            .parallelism
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |n| n.get()));
        Self {
            page_size: config.page_size.max(1),
            max_iterations_per_slice: config.max_iterations_per_slice.max(1),
            collect_metrics: config.collect_metrics,
            parallelism: parallelism.max(1),
        }
    }
}

impl RuntimeConfig {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.collect_metrics = enabled;
        self
    }

    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations_per_slice = iterations.max(1);
        self
    }
}

/// Cap on warnings kept per driver; later ones are only counted.
pub const MAX_WARNINGS: usize = 20;

const MAX_WARNING_LEN: usize = 256;

#[derive(Debug, Default)]
struct WarningsInner {
    messages: Vec<String>,
    dropped: usize,
}

/// Per-value problems that do not fail the query, such as coercion failures.
#[derive(Debug, Clone, Default)]
pub struct Warnings {
    inner: Arc<Mutex<WarningsInner>>,
}

impl Warnings {
    pub fn add(&self, message: impl Into<String>) {
        let message = truncate_string(&message.into(), MAX_WARNING_LEN);
        warn!("{message}");
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.messages.len() < MAX_WARNINGS {
            inner.messages.push(message);
        } else {
            inner.dropped += 1;
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).messages.clone()
    }

    /// Warnings recorded in total, including those past the cap.
    pub fn count(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.messages.len() + inner.dropped
    }
}

/// Context shared by the operators of one driver.
///
/// Operators read from it but do not own it; the driver marks it finished
/// once every operator has been closed.
#[derive(Clone)]
pub struct DriverContext {
    factory: BlockFactory,
    config: RuntimeConfig,
    cancel_rx: watch::Receiver<bool>,
    warnings: Warnings,
    metrics: Option<MetricsSink>,
    finished: Arc<AtomicBool>,
}

impl std::fmt::Debug for DriverContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverContext")
            .field("config", &self.config)
            .field("metrics_enabled", &self.metrics.is_some())
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

impl DriverContext {
    pub fn new(factory: BlockFactory) -> Self {
        let (_, cancel_rx) = watch::channel(false);
        Self {
            factory,
            config: RuntimeConfig::default(),
            cancel_rx,
            warnings: Warnings::default(),
            metrics: Some(MetricsSink::new()),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create with custom configuration.
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        if !config.collect_metrics {
            self.metrics = None;
        }
        self.config = config;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsSink) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_cancellation(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = cancel_rx;
        self
    }

    pub fn block_factory(&self) -> &BlockFactory {
        &self.factory
    }

    pub fn accountant(&self) -> &AccountantRef {
        self.factory.accountant()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn page_size(&self) -> usize {
        self.config.page_size
    }

    pub fn warnings(&self) -> &Warnings {
        &self.warnings
    }

    pub fn metrics(&self) -> Option<&MetricsSink> {
        self.metrics.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Fail with `Cancelled` once cancellation was requested.
    pub fn check_cancelled(&self) -> QuarryResult<()> {
        if self.is_cancelled() {
            Err(QuarryError::cancelled("driver cancelled"))
        } else {
            Ok(())
        }
    }

    /// Resolve when cancellation is requested. Never resolves if the
    /// cancellation handle is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    pub(crate) fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

/// Handle for cancelling drivers from outside the pipeline.
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    cancel_tx: watch::Sender<bool>,
}

impl CancellationHandle {
    /// Create a new cancellation handle and receiver.
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { cancel_tx: tx }, rx)
    }

    /// Another receiver for a driver context.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.cancel_tx.subscribe()
    }

    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_config_from_execution_config() {
        let execution = ExecutionConfig {
            page_size: 0,
            parallelism: Some(3),
            ..ExecutionConfig::default()
        };
        let config = RuntimeConfig::from(&execution);
        assert_eq!(config.page_size, 1);
        assert_eq!(config.parallelism, 3);
        assert_eq!(RuntimeConfig::default().page_size, 8192);
    }

    #[test]
    fn test_context_without_metrics() {
        let ctx = DriverContext::new(BlockFactory::unlimited())
            .with_config(RuntimeConfig::default().with_metrics(false));
        assert!(ctx.metrics().is_none());
    }

    #[test]
    fn test_cancellation() {
        let (handle, rx) = CancellationHandle::new();
        let ctx = DriverContext::new(BlockFactory::unlimited()).with_cancellation(rx);
        assert!(ctx.check_cancelled().is_ok());
        handle.cancel();
        assert!(ctx.check_cancelled().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_warnings_are_capped() {
        let warnings = Warnings::default();
        for i in 0..MAX_WARNINGS + 5 {
            warnings.add(format!("bad value {i}"));
        }
        assert_eq!(warnings.messages().len(), MAX_WARNINGS);
        assert_eq!(warnings.count(), MAX_WARNINGS + 5);
    }
}
