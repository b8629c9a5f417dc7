//! Hash-grouped aggregation.

use common_error::QuarryResult;
use log::debug;

use super::context::DriverContext;
use super::{not_accepting, Operator};
use crate::aggregation::{AggregatorSpec, GroupingAggregator};
use crate::data::Page;
use crate::grouping::{block_hash, BlockHash, GroupSpec, NoKeysBlockHash};

/// Groups rows by key channels and aggregates each group.
///
/// Output is one page after `finish`: the key blocks followed by each
/// aggregator's blocks, one row per group in group id order.
#[derive(Debug)]
pub struct HashAggregationOperator {
    ctx: DriverContext,
    hash: Box<dyn BlockHash>,
    aggregators: Vec<GroupingAggregator>,
    finished: bool,
    emitted: bool,
    rows_in: usize,
}

impl HashAggregationOperator {
    pub fn new(groups: &[GroupSpec], aggregators: &[AggregatorSpec], ctx: DriverContext) -> QuarryResult<Self> {
        let factory = ctx.block_factory();
        let hash = block_hash(groups, factory)?;
        let aggregators = aggregators
            .iter()
            .map(|spec| GroupingAggregator::new(spec, factory))
            .collect::<QuarryResult<Vec<_>>>()?;
        Ok(Self {
            ctx,
            hash,
            aggregators,
            finished: false,
            emitted: false,
            rows_in: 0,
        })
    }

    pub fn group_count(&self) -> usize {
        self.hash.group_count()
    }

    fn build_output(&self) -> QuarryResult<Page> {
        let factory = self.ctx.block_factory();
        let selected = self.hash.non_empty_groups();
        let mut blocks = self.hash.keys(factory)?;
        for aggregator in &self.aggregators {
            blocks.extend(aggregator.evaluate(&selected, factory)?);
        }
        debug!(
            "hash aggregation: {} rows into {} groups",
            self.rows_in,
            selected.len()
        );
        Page::with_position_count(selected.len(), blocks)
    }
}

impl Operator for HashAggregationOperator {
    fn name(&self) -> &'static str {
        "HashAggregationOperator"
    }

    fn needs_input(&self) -> bool {
        !self.finished
    }

    fn add_input(&mut self, page: Page) -> QuarryResult<()> {
        if self.finished {
            return Err(not_accepting(self.name()));
        }
        self.rows_in += page.position_count();
        let groups = self.hash.add(&page)?;
        for aggregator in &mut self.aggregators {
            aggregator.process_page(&groups, &page, self.ctx.warnings())?;
        }
        Ok(())
    }

    fn finish(&mut self) {
        self.finished = true;
    }

    fn is_finished(&self) -> bool {
        self.finished && self.emitted
    }

    fn get_output(&mut self) -> QuarryResult<Option<Page>> {
        if !self.finished || self.emitted {
            return Ok(None);
        }
        let page = self.build_output()?;
        self.emitted = true;
        Ok(Some(page))
    }

    fn close(&mut self) {
        self.emitted = true;
        self.aggregators.clear();
        self.hash = Box::new(NoKeysBlockHash::new(self.ctx.block_factory().clone()));
    }

    fn display(&self) -> String {
        let aggregators: Vec<String> = self.aggregators.iter().map(GroupingAggregator::display).collect();
        format!("HashAggregationOperator[aggregators = [{}]]", aggregators.join(", "))
    }
}
