//! In-process exchange between drivers over a bounded page buffer.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common_error::QuarryResult;
use log::trace;

use super::{not_accepting, BlockedListener, IsBlocked, Operator};
use crate::data::Page;

#[derive(Debug)]
struct ExchangeState {
    pages: VecDeque<Page>,
    max_pages: usize,
    open_sinks: usize,
    source_closed: bool,
    not_empty: BlockedListener,
    not_full: BlockedListener,
}

impl ExchangeState {
    fn is_full(&self) -> bool {
        self.pages.len() >= self.max_pages && !self.source_closed
    }

    fn notify_not_empty(&mut self) {
        std::mem::take(&mut self.not_empty).fire();
    }

    fn notify_not_full(&mut self) {
        std::mem::take(&mut self.not_full).fire();
    }
}

/// Bounded queue shared by any number of sinks and one source.
///
/// Sinks must be created before the source driver starts; the source
/// finishes once every sink has finished and the buffer is drained.
#[derive(Debug, Clone)]
pub struct ExchangeBuffer {
    state: Arc<Mutex<ExchangeState>>,
}

impl ExchangeBuffer {
    pub fn new(max_pages: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(ExchangeState {
                pages: VecDeque::new(),
                max_pages: max_pages.max(1),
                open_sinks: 0,
                source_closed: false,
                not_empty: BlockedListener::new(),
                not_full: BlockedListener::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ExchangeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new producer.
    pub fn sink(&self) -> ExchangeSinkOperator {
        self.lock().open_sinks += 1;
        ExchangeSinkOperator {
            buffer: self.clone(),
            finished: false,
        }
    }

    pub fn source(&self) -> ExchangeSourceOperator {
        ExchangeSourceOperator {
            buffer: self.clone(),
            finished: false,
        }
    }

    /// Pages currently buffered.
    pub fn len(&self) -> usize {
        self.lock().pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn add_page(&self, page: Page) {
        let mut state = self.lock();
        if state.source_closed {
            trace!("exchange source closed, dropping page of {} rows", page.position_count());
            return;
        }
        state.pages.push_back(page);
        state.notify_not_empty();
    }

    fn poll_page(&self) -> Option<Page> {
        let mut state = self.lock();
        let page = state.pages.pop_front()?;
        state.notify_not_full();
        Some(page)
    }

    fn sink_finished(&self) {
        let mut state = self.lock();
        state.open_sinks = state.open_sinks.saturating_sub(1);
        state.notify_not_empty();
    }

    fn source_closed(&self) {
        let mut state = self.lock();
        state.source_closed = true;
        state.pages.clear();
        state.notify_not_full();
    }
}

/// Terminal operator of a producing driver.
#[derive(Debug)]
pub struct ExchangeSinkOperator {
    buffer: ExchangeBuffer,
    finished: bool,
}

impl ExchangeSinkOperator {
    fn mark_finished(&mut self) {
        if !self.finished {
            self.finished = true;
            self.buffer.sink_finished();
        }
    }
}

impl Operator for ExchangeSinkOperator {
    fn name(&self) -> &'static str {
        "ExchangeSinkOperator"
    }

    fn needs_input(&self) -> bool {
        !self.finished && !self.buffer.lock().is_full()
    }

    fn add_input(&mut self, page: Page) -> QuarryResult<()> {
        if self.finished {
            return Err(not_accepting(self.name()));
        }
        self.buffer.add_page(page);
        Ok(())
    }

    fn finish(&mut self) {
        self.mark_finished();
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn get_output(&mut self) -> QuarryResult<Option<Page>> {
        Ok(None)
    }

    fn is_blocked(&self) -> IsBlocked {
        let state = self.buffer.lock();
        if !self.finished && state.is_full() {
            IsBlocked::Blocked(state.not_full.handle())
        } else {
            IsBlocked::NotBlocked
        }
    }

    fn close(&mut self) {
        self.mark_finished();
    }
}

/// Source operator of a consuming driver.
#[derive(Debug)]
pub struct ExchangeSourceOperator {
    buffer: ExchangeBuffer,
    finished: bool,
}

impl Operator for ExchangeSourceOperator {
    fn name(&self) -> &'static str {
        "ExchangeSourceOperator"
    }

    fn needs_input(&self) -> bool {
        false
    }

    fn add_input(&mut self, _page: Page) -> QuarryResult<()> {
        Err(not_accepting(self.name()))
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.buffer.source_closed();
        }
    }

    fn is_finished(&self) -> bool {
        if self.finished {
            return true;
        }
        let state = self.buffer.lock();
        state.pages.is_empty() && state.open_sinks == 0
    }

    fn get_output(&mut self) -> QuarryResult<Option<Page>> {
        if self.finished {
            return Ok(None);
        }
        Ok(self.buffer.poll_page())
    }

    fn is_blocked(&self) -> IsBlocked {
        let state = self.buffer.lock();
        if !self.finished && state.pages.is_empty() && state.open_sinks > 0 {
            IsBlocked::Blocked(state.not_empty.handle())
        } else {
            IsBlocked::NotBlocked
        }
    }

    fn close(&mut self) {
        self.finish();
    }
}
