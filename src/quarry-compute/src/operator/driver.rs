//! The driver: a single-threaded loop moving pages through an operator chain.

use std::fmt;

use common_display::{DisplayTree, TreeNode};
use common_error::QuarryResult;
use log::{debug, trace};

use super::context::DriverContext;
use super::metrics::ExecutionTimer;
use super::{BlockedHandle, BoxedOperator, IsBlocked};

/// Outcome of a bounded run.
#[derive(Debug)]
pub enum DriverStatus {
    /// Every operator finished and was closed.
    Finished,
    /// No page moved; resume once the handle resolves.
    Blocked(BlockedHandle),
    /// The iteration budget ran out with work left.
    Yielded,
}

struct Slot {
    key: String,
    operator: BoxedOperator,
}

/// Drives `source → operators → sink`.
///
/// Each iteration moves at most one page across every adjacent pair,
/// finishes the successor of a finished operator, and closes the finished
/// prefix of the chain. The driver is done when the chain is empty. Every
/// exit path, including errors, cancellation and drop, closes all
/// remaining operators.
pub struct Driver {
    ctx: DriverContext,
    active: Vec<Slot>,
    description: String,
    closed: bool,
}

impl Driver {
    pub fn new(
        ctx: DriverContext,
        source: BoxedOperator,
        operators: Vec<BoxedOperator>,
        sink: BoxedOperator,
    ) -> Self {
        let chain: Vec<BoxedOperator> = std::iter::once(source)
            .chain(operators)
            .chain(std::iter::once(sink))
            .collect();
        let description = describe_chain(&chain);
        let active = chain
            .into_iter()
            .enumerate()
            .map(|(i, operator)| Slot {
                key: format!("{i}:{}", operator.name()),
                operator,
            })
            .collect();
        Self {
            ctx,
            active,
            description,
            closed: false,
        }
    }

    pub fn context(&self) -> &DriverContext {
        &self.ctx
    }

    pub fn is_finished(&self) -> bool {
        self.active.is_empty()
    }

    /// Tree rendering of the operator chain as built.
    pub fn describe(&self) -> &str {
        &self.description
    }

    /// One pass over the chain. Returns a blocked handle when no page moved
    /// and some operator is waiting.
    pub fn run_single_loop_iteration(&mut self) -> QuarryResult<IsBlocked> {
        self.ctx.check_cancelled()?;
        let mut moved_page = false;

        for i in 0..self.active.len().saturating_sub(1) {
            let (head, tail) = self.active.split_at_mut(i + 1);
            let op = &mut head[i];
            let next = &mut tail[0];

            if op.operator.is_blocked().is_blocked() {
                continue;
            }

            if !op.operator.is_finished() && next.operator.needs_input() {
                let timer = ExecutionTimer::start();
                let output = op.operator.get_output()?;
                let elapsed = timer.stop();
                if let Some(metrics) = self.ctx.metrics() {
                    metrics.update(&op.key, |m| m.add_time(elapsed));
                }

                match output {
                    None => {}
                    Some(page) if page.position_count() == 0 => page.release(),
                    Some(page) => {
                        let rows = page.position_count();
                        next.operator.add_input(page)?;
                        moved_page = true;
                        if let Some(metrics) = self.ctx.metrics() {
                            let used = self.ctx.accountant().used();
                            metrics.update(&op.key, |m| {
                                m.add_rows_out(rows);
                                m.add_page();
                            });
                            metrics.update(&next.key, |m| {
                                m.add_rows_in(rows);
                                m.update_memory(used);
                            });
                        }
                    }
                }
            }

            if op.operator.is_finished() {
                next.operator.finish();
            }
        }

        if let Some(index) = self.active.iter().rposition(|s| s.operator.is_finished()) {
            for mut slot in self.active.drain(..=index) {
                trace!("closing finished operator {}", slot.key);
                slot.operator.close();
            }
            if let Some(root) = self.active.first_mut() {
                root.operator.finish();
            }
        }

        if !moved_page {
            for slot in &self.active {
                if let IsBlocked::Blocked(handle) = slot.operator.is_blocked() {
                    if !handle.is_done() {
                        return Ok(IsBlocked::Blocked(handle));
                    }
                }
            }
        }
        Ok(IsBlocked::NotBlocked)
    }

    /// Run up to `max_iterations`, closing everything on finish or error.
    pub fn run_for(&mut self, max_iterations: usize) -> QuarryResult<DriverStatus> {
        for _ in 0..max_iterations {
            if self.is_finished() {
                break;
            }
            match self.run_single_loop_iteration() {
                Err(e) => {
                    debug!("driver failed: {e}");
                    self.close();
                    return Err(e);
                }
                Ok(IsBlocked::Blocked(handle)) => return Ok(DriverStatus::Blocked(handle)),
                Ok(IsBlocked::NotBlocked) => {}
            }
        }
        if self.is_finished() {
            self.close();
            Ok(DriverStatus::Finished)
        } else {
            Ok(DriverStatus::Yielded)
        }
    }

    /// Run to completion, parking on blocked handles and yielding between
    /// slices.
    pub async fn drive(mut self) -> QuarryResult<()> {
        let slice = self.ctx.config().max_iterations_per_slice;
        loop {
            match self.run_for(slice)? {
                DriverStatus::Finished => return Ok(()),
                DriverStatus::Blocked(handle) => {
                    let ctx = self.ctx.clone();
                    tokio::select! {
                        _ = handle.wait() => {}
                        _ = ctx.cancelled() => {}
                    }
                }
                DriverStatus::Yielded => common_runtime::yield_now().await,
            }
        }
    }

    /// Close every remaining operator. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for mut slot in self.active.drain(..) {
            slot.operator.close();
        }
        self.ctx.finish();
        debug!("driver closed");
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("active", &self.active.iter().map(|s| s.key.as_str()).collect::<Vec<_>>())
            .field("closed", &self.closed)
            .finish()
    }
}

/// Profile node for one operator; the chain nests sink-first like a plan.
struct ChainNode {
    name: String,
    child: Option<Box<ChainNode>>,
}

impl TreeNode for ChainNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn children(&self) -> Vec<&dyn TreeNode> {
        self.child.iter().map(|c| c.as_ref() as &dyn TreeNode).collect()
    }
}

fn describe_chain(chain: &[BoxedOperator]) -> String {
    let root = chain.iter().fold(None, |child, op| {
        Some(Box::new(ChainNode {
            name: op.display(),
            child,
        }))
    });
    root.map(|r| DisplayTree::new(r.as_ref()).to_string())
        .unwrap_or_default()
}
