//! Sum, min and max over longs and doubles.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use common_error::QuarryResult;

use super::function::{
    check_positions, expect_blocks, for_each_group, for_each_value, GroupingAggregatorFunction, IntermediateStateDesc,
    NumericValue,
};
use crate::data::{Block, ElementType};
use crate::memory::{BlockFactory, TrackedArray};
use crate::operator::Warnings;

/// How two values of one group combine.
pub trait NumericOp: Send + Sync + 'static {
    const NAME: &'static str;
    /// Whether the op can fail, which adds a `failed` state block.
    const CAN_FAIL: bool;

    /// `None` when the combination overflows.
    fn combine<T: NumericValue>(current: T, value: T) -> Option<T>;
}

#[derive(Debug)]
pub struct SumOp;

impl NumericOp for SumOp {
    const NAME: &'static str = "sum";
    const CAN_FAIL: bool = true;

    fn combine<T: NumericValue>(current: T, value: T) -> Option<T> {
        current.checked_add(value)
    }
}

#[derive(Debug)]
pub struct MinOp;

impl NumericOp for MinOp {
    const NAME: &'static str = "min";
    const CAN_FAIL: bool = false;

    fn combine<T: NumericValue>(current: T, value: T) -> Option<T> {
        Some(if value < current { value } else { current })
    }
}

#[derive(Debug)]
pub struct MaxOp;

impl NumericOp for MaxOp {
    const NAME: &'static str = "max";
    const CAN_FAIL: bool = false;

    fn combine<T: NumericValue>(current: T, value: T) -> Option<T> {
        Some(if value > current { value } else { current })
    }
}

/// State: the running value, whether the group saw a value, and for sums
/// whether it overflowed. A group that never saw a value, or overflowed,
/// evaluates to null.
pub struct NumericAggregator<T: NumericValue, O: NumericOp> {
    values: TrackedArray<T>,
    seen: TrackedArray<bool>,
    failed: TrackedArray<bool>,
    _op: PhantomData<fn() -> O>,
}

pub type SumLong = NumericAggregator<i64, SumOp>;
pub type SumDouble = NumericAggregator<f64, SumOp>;
pub type MinLong = NumericAggregator<i64, MinOp>;
pub type MinDouble = NumericAggregator<f64, MinOp>;
pub type MaxLong = NumericAggregator<i64, MaxOp>;
pub type MaxDouble = NumericAggregator<f64, MaxOp>;

impl<T: NumericValue, O: NumericOp> NumericAggregator<T, O> {
    pub fn new(factory: &BlockFactory) -> Self {
        let accountant = factory.accountant();
        Self {
            values: TrackedArray::new(Arc::clone(accountant), O::NAME),
            seen: TrackedArray::new(Arc::clone(accountant), O::NAME),
            failed: TrackedArray::new(Arc::clone(accountant), O::NAME),
            _op: PhantomData,
        }
    }

    /// Returns false when the value overflowed the group.
    fn accumulate(&mut self, group: usize, value: T) -> QuarryResult<bool> {
        if self.failed.get(group) {
            return Ok(true);
        }
        if !self.seen.get(group) {
            self.values.set(group, value)?;
            self.seen.set(group, true)?;
            return Ok(true);
        }
        match O::combine(self.values.get(group), value) {
            Some(v) => self.values.set(group, v)?,
            None => {
                self.failed.set(group, true)?;
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn state_count() -> usize {
        if O::CAN_FAIL {
            3
        } else {
            2
        }
    }
}

impl<T: NumericValue, O: NumericOp> fmt::Debug for NumericAggregator<T, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", O::NAME, T::ELEMENT_TYPE)
    }
}

impl<T: NumericValue, O: NumericOp> GroupingAggregatorFunction for NumericAggregator<T, O> {
    fn name(&self) -> &'static str {
        O::NAME
    }

    fn intermediate_state_desc(&self) -> Vec<IntermediateStateDesc> {
        let mut desc = vec![
            IntermediateStateDesc::new(O::NAME, T::ELEMENT_TYPE),
            IntermediateStateDesc::new("seen", ElementType::Boolean),
        ];
        if O::CAN_FAIL {
            desc.push(IntermediateStateDesc::new("failed", ElementType::Boolean));
        }
        desc
    }

    fn add_raw_input(&mut self, groups: &Block, inputs: &[Block], warnings: &Warnings) -> QuarryResult<()> {
        let inputs = expect_blocks(O::NAME, inputs, 1)?;
        check_positions(groups, inputs)?;
        for_each_value::<T>(O::NAME, groups, &inputs[0], warnings, |group, value| {
            if !self.accumulate(group, value)? {
                warnings.add(format!("{}: {} overflow, treating result as null", O::NAME, T::ELEMENT_TYPE));
            }
            Ok(())
        })
    }

    fn add_intermediate_input(&mut self, groups: &Block, state: &[Block]) -> QuarryResult<()> {
        let state = expect_blocks(O::NAME, state, Self::state_count())?;
        check_positions(groups, state)?;
        let values = state[0].primitives::<T>()?;
        let seen = state[1].booleans()?;
        let failed = if O::CAN_FAIL { Some(state[2].booleans()?) } else { None };
        for_each_group(groups, |p, group| {
            if failed.is_some_and(|f| f.get(p)) {
                self.failed.set(group, true)?;
            }
            if seen.get(p) {
                self.accumulate(group, values.get(p))?;
            }
            Ok(())
        })
    }

    fn evaluate_intermediate(&self, selected: &[u32], factory: &BlockFactory) -> QuarryResult<Vec<Block>> {
        let mut values = factory.primitive_builder::<T>(selected.len())?;
        let mut seen = factory.boolean_builder(selected.len())?;
        let mut failed = factory.boolean_builder(selected.len())?;
        for &group in selected {
            let group = group as usize;
            values.append_value(self.values.get(group))?;
            seen.append_value(self.seen.get(group))?;
            failed.append_value(self.failed.get(group))?;
        }
        let mut blocks = vec![values.build()?, seen.build()?];
        if O::CAN_FAIL {
            blocks.push(failed.build()?);
        }
        Ok(blocks)
    }

    fn evaluate_final(&self, selected: &[u32], factory: &BlockFactory) -> QuarryResult<Block> {
        let mut builder = factory.primitive_builder::<T>(selected.len())?;
        for &group in selected {
            let group = group as usize;
            if self.seen.get(group) && !self.failed.get(group) {
                builder.append_value(self.values.get(group))?;
            } else {
                builder.append_null()?;
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
    fn test_sum_long_overflow_is_null_with_warning() {
        let factory = BlockFactory::unlimited();
        let mut sum = SumLong::new(&factory);
        let warnings = Warnings::default();
        let groups = factory.int_vector(vec![0, 0, 1]).unwrap();
        let input = factory.long_vector(vec![i64::MAX, 1, 5]).unwrap();
        sum.add_raw_input(&groups, &[input], &warnings).unwrap();
        assert_eq!(warnings.count(), 1);

        let out = sum.evaluate_final(&[0, 1, 2], &factory).unwrap();
        assert!(out.is_null(0));
        assert_eq!(out.values_at(1), vec![Scalar::Long(5)]);
        assert!(out.is_null(2));
    }

    #[test]
    fn test_min_max_double_with_multivalues() {
        let factory = BlockFactory::unlimited();
        let mut min = MinDouble::new(&factory);
        let mut max = MaxDouble::new(&factory);
        let warnings = Warnings::default();
        let groups = factory.int_vector(vec![0, 0]).unwrap();
        let mut input = factory.double_builder(2).unwrap();
        input.begin_position_entry().unwrap();
        input.append_value(3.5).unwrap();
        input.append_value(-1.0).unwrap();
        input.end_position_entry().unwrap();
        input.append_value(2.0).unwrap();
        let input = input.build().unwrap();
        min.add_raw_input(&groups, &[input.clone()], &warnings).unwrap();
        max.add_raw_input(&groups, &[input], &warnings).unwrap();
        assert_eq!(min.evaluate_final(&[0], &factory).unwrap().values_at(0), vec![Scalar::Double(-1.0)]);
        assert_eq!(max.evaluate_final(&[0], &factory).unwrap().values_at(0), vec![Scalar::Double(3.5)]);
        assert_eq!(min.intermediate_state_desc().len(), 2);
    }

    #[test]
    fn test_intermediate_state_merges() {
        let factory = BlockFactory::unlimited();
        let warnings = Warnings::default();
        let mut left = SumLong::new(&factory);
        left.add_raw_input(
            &factory.int_vector(vec![0, 1]).unwrap(),
            &[factory.long_vector(vec![4, 6]).unwrap()],
            &warnings,
        )
        .unwrap();
        let state = left.evaluate_intermediate(&[0, 1], &factory).unwrap();
        assert_eq!(state.len(), 3);

        let mut merged = SumLong::new(&factory);
        // Swap the groups on the receiving side.
        merged
            .add_intermediate_input(&factory.int_vector(vec![1, 0]).unwrap(), &state)
            .unwrap();
        merged
            .add_intermediate_input(&factory.int_vector(vec![1, 0]).unwrap(), &state)
            .unwrap();
        let out = merged.evaluate_final(&[0, 1], &factory).unwrap();
        assert_eq!(out.values_at(0), vec![Scalar::Long(12)]);
        assert_eq!(out.values_at(1), vec![Scalar::Long(8)]);
    }
}
