use std::sync::Arc;

use common_error::QuarryResult;

use super::function::{
    check_positions, expect_blocks, for_each_group, for_each_value, GroupingAggregatorFunction, IntermediateStateDesc,
};
use crate::data::{Block, ElementType};
use crate::memory::{BlockFactory, TrackedArray};
use crate::operator::Warnings;

const STATE: [IntermediateStateDesc; 2] = [
    IntermediateStateDesc::new("sum", ElementType::Double),
    IntermediateStateDesc::new("count", ElementType::Long),
];

/// Mean of numeric values as a double; null for groups without values.
#[derive(Debug)]
pub struct Avg {
    sums: TrackedArray<f64>,
    counts: TrackedArray<i64>,
}

impl Avg {
    pub fn new(factory: &BlockFactory) -> Self {
        Self {
            sums: TrackedArray::new(Arc::clone(factory.accountant()), "avg"),
            counts: TrackedArray::new(Arc::clone(factory.accountant()), "avg"),
        }
    }

    fn add(&mut self, group: usize, sum: f64, count: i64) -> QuarryResult<()> {
        self.sums.update(group, |s| s + sum)?;
        self.counts.update(group, |c| c + count)
    }
}

impl GroupingAggregatorFunction for Avg {
    fn name(&self) -> &'static str {
        "avg"
    }

    fn intermediate_state_desc(&self) -> Vec<IntermediateStateDesc> {
        STATE.to_vec()
    }

    fn add_raw_input(&mut self, groups: &Block, inputs: &[Block], warnings: &Warnings) -> QuarryResult<()> {
        let inputs = expect_blocks("avg", inputs, 1)?;
        check_positions(groups, inputs)?;
        for_each_value::<f64>("avg", groups, &inputs[0], warnings, |group, value| self.add(group, value, 1))
    }

    fn add_intermediate_input(&mut self, groups: &Block, state: &[Block]) -> QuarryResult<()> {
        let state = expect_blocks("avg", state, STATE.len())?;
        check_positions(groups, state)?;
        let sums = state[0].doubles()?;
        let counts = state[1].longs()?;
        for_each_group(groups, |p, group| self.add(group, sums.get(p), counts.get(p)))
    }

    fn evaluate_intermediate(&self, selected: &[u32], factory: &BlockFactory) -> QuarryResult<Vec<Block>> {
        let sums = selected.iter().map(|&g| self.sums.get(g as usize)).collect();
        let counts = selected.iter().map(|&g| self.counts.get(g as usize)).collect();
        Ok(vec![factory.double_vector(sums)?, factory.long_vector(counts)?])
    }

    fn evaluate_final(&self, selected: &[u32], factory: &BlockFactory) -> QuarryResult<Block> {
        let mut builder = factory.double_builder(selected.len())?;
        for &group in selected {
            let count = self.counts.get(group as usize);
            if count == 0 {
                builder.append_null()?;
            } else {
                builder.append_value(self.sums.get(group as usize) / count as f64)?;
            }
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Scalar;

    #[test]
    fn test_avg_of_longs() {
        let factory = BlockFactory::unlimited();
        let mut avg = Avg::new(&factory);
        avg.add_raw_input(
            &factory.int_vector(vec![0, 0, 0]).unwrap(),
            &[factory.long_vector(vec![1, 2, 4]).unwrap()],
            &Warnings::default(),
        )
        .unwrap();
        let out = avg.evaluate_final(&[0, 1], &factory).unwrap();
        assert_eq!(out.values_at(0), vec![Scalar::Double(7.0 / 3.0)]);
        assert!(out.is_null(1));
    }
}
