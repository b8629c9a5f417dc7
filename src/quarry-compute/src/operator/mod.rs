//! Operators and the driver that moves pages through them.
//!
//! # Lifecycle
//!
//! ```text
//! NEEDS_INPUT → add_input → HAS_OUTPUT → get_output → NEEDS_INPUT
//!                 ↓ finish                         ↓ is_finished
//!              (drain)  ─────────────────────→  FINISHED → close
//! ```
//!
//! An operator may also report [`IsBlocked::Blocked`] while it waits for an
//! external event; the driver then parks until the handle resolves.

mod context;
mod driver;
mod exchange;
mod hash_aggregation;
mod limit;
mod lookup;
mod mapping;
mod metrics;
mod ordinals_grouping;
mod runner;
mod shuffle;
mod sink;
mod source;
mod values_reader;

use std::fmt;

use common_error::{QuarryError, QuarryResult};
use tokio::sync::watch;

use crate::data::Page;

pub use context::{CancellationHandle, DriverContext, RuntimeConfig, Warnings, MAX_WARNINGS};
pub use driver::{Driver, DriverStatus};
pub use exchange::{ExchangeBuffer, ExchangeSinkOperator, ExchangeSourceOperator};
pub use hash_aggregation::HashAggregationOperator;
pub use limit::LimitOperator;
pub use lookup::RowInTableLookupOperator;
pub use mapping::{FilterOperator, MappingOperator, PageMapper};
pub use metrics::{ExecutionTimer, MetricsSink, OperatorMetrics};
pub use ordinals_grouping::OrdinalsGroupingOperator;
pub use runner::{DriverRunner, LocalDriverRunner};
pub use shuffle::ShuffleDocsOperator;
pub use sink::{PageConsumerOperator, PageStream};
pub use source::{DocMatcher, DocSourceFactory, DocSourceOperator, LocalSourceOperator, MatchAll, SourceOperatorFactory};
pub use values_reader::{ReaderCache, ValuesSourceReaderOperator};

/// A pipeline stage.
///
/// Operators are synchronous and single-threaded: one driver calls them in
/// turn and never re-enters one concurrently.
pub trait Operator: Send + fmt::Debug {
    /// Short name used in metrics keys and descriptions.
    fn name(&self) -> &'static str;

    /// Whether `add_input` may be called now.
    fn needs_input(&self) -> bool;

    /// Take ownership of `page`. Fails when `needs_input()` is false.
    fn add_input(&mut self, page: Page) -> QuarryResult<()>;

    /// No more input will arrive; buffered state drains through `get_output`.
    fn finish(&mut self);

    /// No more output will ever be produced.
    fn is_finished(&self) -> bool;

    /// The next output page, if one is ready.
    fn get_output(&mut self) -> QuarryResult<Option<Page>>;

    /// Whether the operator waits on an external event.
    fn is_blocked(&self) -> IsBlocked {
        IsBlocked::NotBlocked
    }

    /// Release retained pages and accounted memory. Idempotent.
    fn close(&mut self);

    /// Description for driver profiles.
    fn display(&self) -> String {
        self.name().to_string()
    }
}

/// Boxed operator for dynamic dispatch.
pub type BoxedOperator = Box<dyn Operator>;

/// Error for `add_input` on an operator that does not need input.
pub(crate) fn not_accepting(name: &str) -> QuarryError {
    QuarryError::invariant(format!("{name} does not need input"))
}

/// Blocked state reported by an operator.
#[derive(Debug, Clone)]
pub enum IsBlocked {
    NotBlocked,
    Blocked(BlockedHandle),
}

impl IsBlocked {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked(h) if !h.is_done())
    }
}

/// Resolves when the matching [`BlockedListener`] fires or is dropped.
#[derive(Debug, Clone)]
pub struct BlockedHandle {
    rx: watch::Receiver<bool>,
}

impl BlockedHandle {
    /// A handle that is already resolved.
    pub fn resolved() -> Self {
        let (tx, rx) = watch::channel(true);
        drop(tx);
        Self { rx }
    }

    pub fn is_done(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Wait until resolved.
    pub async fn wait(mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Fires the handles an operator handed out while blocked.
#[derive(Debug)]
pub struct BlockedListener {
    tx: watch::Sender<bool>,
}

impl BlockedListener {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn handle(&self) -> BlockedHandle {
        BlockedHandle {
            rx: self.tx.subscribe(),
        }
    }

    pub fn fire(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for BlockedListener {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listener_resolves_handle() {
        let listener = BlockedListener::new();
        let handle = listener.handle();
        assert!(!handle.is_done());
        assert!(IsBlocked::Blocked(handle.clone()).is_blocked());

        let waiter = tokio::spawn(handle.clone().wait());
        listener.fire();
        waiter.await.unwrap();
        assert!(handle.is_done());
    }

    #[tokio::test]
    async fn test_dropped_listener_unblocks() {
        let listener = BlockedListener::new();
        let handle = listener.handle();
        drop(listener);
        assert!(handle.is_done());
        handle.wait().await;
        assert!(BlockedHandle::resolved().is_done());
    }
}
