use std::sync::Arc;

use common_error::QuarryResult;

use super::function::{
    check_positions, expect_blocks, for_each_group, GroupingAggregatorFunction, IntermediateStateDesc,
};
use crate::data::{Block, ElementType};
use crate::memory::{BlockFactory, TrackedArray};
use crate::operator::Warnings;

const STATE: [IntermediateStateDesc; 2] = [
    IntermediateStateDesc::new("count", ElementType::Long),
    IntermediateStateDesc::new("seen", ElementType::Boolean),
];

/// Counts values of one channel, or rows when built with [`Count::rows`].
/// Groups without input count zero.
#[derive(Debug)]
pub struct Count {
    rows: bool,
    counts: TrackedArray<i64>,
    seen: TrackedArray<bool>,
}

impl Count {
    /// Count non-null values; a multi-valued position counts every value.
    pub fn values(factory: &BlockFactory) -> Self {
        Self::new(factory, false)
    }

    /// Count rows regardless of content.
    pub fn rows(factory: &BlockFactory) -> Self {
        Self::new(factory, true)
    }

    fn new(factory: &BlockFactory, rows: bool) -> Self {
        Self {
            rows,
            counts: TrackedArray::new(Arc::clone(factory.accountant()), "count"),
            seen: TrackedArray::new(Arc::clone(factory.accountant()), "count"),
        }
    }

    fn add(&mut self, group: usize, n: i64) -> QuarryResult<()> {
        self.counts.update(group, |c| c + n)?;
        self.seen.set(group, true)
    }
}

impl GroupingAggregatorFunction for Count {
    fn name(&self) -> &'static str {
        if self.rows {
            "count_all"
        } else {
            "count"
        }
    }

    fn intermediate_state_desc(&self) -> Vec<IntermediateStateDesc> {
        STATE.to_vec()
    }

    fn add_raw_input(&mut self, groups: &Block, inputs: &[Block], _warnings: &Warnings) -> QuarryResult<()> {
        if self.rows {
            return for_each_group(groups, |_, group| self.add(group, 1));
        }
        let inputs = expect_blocks("count", inputs, 1)?;
        check_positions(groups, inputs)?;
        let input = &inputs[0];
        for_each_group(groups, |p, group| self.add(group, input.value_count(p) as i64))
    }

    fn add_intermediate_input(&mut self, groups: &Block, state: &[Block]) -> QuarryResult<()> {
        let state = expect_blocks(self.name(), state, STATE.len())?;
        check_positions(groups, state)?;
        let counts = state[0].longs()?;
        let seen = state[1].booleans()?;
        for_each_group(groups, |p, group| {
            if seen.get(p) {
                self.add(group, counts.get(p))?;
            }
            Ok(())
        })
    }

    fn evaluate_intermediate(&self, selected: &[u32], factory: &BlockFactory) -> QuarryResult<Vec<Block>> {
        let counts: Vec<i64> = selected.iter().map(|&g| self.counts.get(g as usize)).collect();
        let seen: Vec<bool> = selected.iter().map(|&g| self.seen.get(g as usize)).collect();
        Ok(vec![factory.long_vector(counts)?, factory.boolean_vector(seen)?])
    }

    fn evaluate_final(&self, selected: &[u32], factory: &BlockFactory) -> QuarryResult<Block> {
        factory.long_vector(selected.iter().map(|&g| self.counts.get(g as usize)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Scalar;

    #[test]
    fn test_count_values_and_rows() {
        let factory = BlockFactory::unlimited();
        let warnings = Warnings::default();
        let groups = factory.int_vector(vec![0, 0, 1]).unwrap();
        let mut input = factory.long_builder(3).unwrap();
        input.begin_position_entry().unwrap();
        input.append_value(1).unwrap();
        input.append_value(2).unwrap();
        input.end_position_entry().unwrap();
        input.append_null().unwrap();
        input.append_value(3).unwrap();
        let input = input.build().unwrap();

        let mut values = Count::values(&factory);
        values.add_raw_input(&groups, &[input], &warnings).unwrap();
        let mut rows = Count::rows(&factory);
        rows.add_raw_input(&groups, &[], &warnings).unwrap();

        let counted = values.evaluate_final(&[0, 1, 2], &factory).unwrap();
        assert_eq!(counted.values_at(0), vec![Scalar::Long(2)]);
        assert_eq!(counted.values_at(2), vec![Scalar::Long(0)]);
        assert_eq!(rows.evaluate_final(&[0], &factory).unwrap().values_at(0), vec![Scalar::Long(2)]);
    }
}
