//! Grouping aggregators and the bucket aggregator tree.
//!
//! Grouping aggregators keep one slot per group id in tracked arrays and
//! run in one of four [`AggregatorMode`]s, so partial results computed per
//! partition can be shipped as intermediate blocks and merged later.

mod aggregator;
mod avg;
mod count;
mod function;
mod numeric;
pub mod tree;

pub use aggregator::{AggregateFunction, AggregatorSpec, GroupingAggregator};
pub use avg::Avg;
pub use count::Count;
pub use function::{AggregatorMode, GroupingAggregatorFunction, IntermediateStateDesc, NumericInput, NumericValue};
pub use numeric::{
    MaxDouble, MaxLong, MaxOp, MinDouble, MinLong, MinOp, NumericAggregator, NumericOp, SumDouble, SumLong, SumOp,
};
