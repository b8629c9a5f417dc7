//! Limit operator.

use common_error::QuarryResult;

use super::{not_accepting, Operator};
use crate::data::Page;
use crate::memory::BlockFactory;

/// Passes through the first `limit` rows in input order, then finishes.
#[derive(Debug)]
pub struct LimitOperator {
    limit: usize,
    remaining: usize,
    pending: Option<Page>,
    finished: bool,
    factory: BlockFactory,
}

impl LimitOperator {
    pub fn new(limit: usize, factory: BlockFactory) -> Self {
        Self {
            limit,
            remaining: limit,
            pending: None,
            finished: false,
            factory,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Operator for LimitOperator {
    fn name(&self) -> &'static str {
        "LimitOperator"
    }

    fn needs_input(&self) -> bool {
        !self.finished && self.pending.is_none() && self.remaining > 0
    }

    fn add_input(&mut self, page: Page) -> QuarryResult<()> {
        if !self.needs_input() {
            return Err(not_accepting(self.name()));
        }
        self.pending = Some(page);
        Ok(())
    }

    fn finish(&mut self) {
        self.finished = true;
    }

    fn is_finished(&self) -> bool {
        self.pending.is_none() && (self.finished || self.remaining == 0)
    }

    fn get_output(&mut self) -> QuarryResult<Option<Page>> {
        let Some(page) = self.pending.take() else {
            return Ok(None);
        };
        let rows = page.position_count();
        if rows <= self.remaining {
            self.remaining -= rows;
            return Ok(Some(page));
        }
        let positions: Vec<usize> = (0..self.remaining).collect();
        self.remaining = 0;
        let truncated = page.filter(&positions, &self.factory)?;
        page.release();
        Ok(Some(truncated))
    }

    fn close(&mut self) {
        self.pending = None;
    }

    fn display(&self) -> String {
        format!("LimitOperator[limit = {}/{}]", self.remaining, self.limit)
    }
}
