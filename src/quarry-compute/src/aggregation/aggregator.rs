//! Binds an aggregate function to a mode and input channels.

use common_error::{QuarryError, QuarryResult};
use serde::{Deserialize, Serialize};

use super::avg::Avg;
use super::count::Count;
use super::function::{AggregatorMode, GroupingAggregatorFunction, IntermediateStateDesc};
use super::numeric::{MaxDouble, MaxLong, MinDouble, MinLong, SumDouble, SumLong};
use crate::data::{Block, ElementType, Page};
use crate::memory::BlockFactory;
use crate::operator::Warnings;

/// The aggregate functions available to grouping operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    Count,
    CountAll,
    SumLong,
    SumDouble,
    MinLong,
    MinDouble,
    MaxLong,
    MaxDouble,
    Avg,
}

impl AggregateFunction {
    pub fn create(self, factory: &BlockFactory) -> Box<dyn GroupingAggregatorFunction> {
        match self {
            Self::Count => Box::new(Count::values(factory)),
            Self::CountAll => Box::new(Count::rows(factory)),
            Self::SumLong => Box::new(SumLong::new(factory)),
            Self::SumDouble => Box::new(SumDouble::new(factory)),
            Self::MinLong => Box::new(MinLong::new(factory)),
            Self::MinDouble => Box::new(MinDouble::new(factory)),
            Self::MaxLong => Box::new(MaxLong::new(factory)),
            Self::MaxDouble => Box::new(MaxDouble::new(factory)),
            Self::Avg => Box::new(Avg::new(factory)),
        }
    }

    /// Raw input channels the function reads.
    pub fn raw_input_count(self) -> usize {
        match self {
            Self::CountAll => 0,
            _ => 1,
        }
    }

    pub fn final_type(self) -> ElementType {
        match self {
            Self::Count | Self::CountAll | Self::SumLong | Self::MinLong | Self::MaxLong => ElementType::Long,
            Self::SumDouble | Self::MinDouble | Self::MaxDouble | Self::Avg => ElementType::Double,
        }
    }
}

/// Plan-level description of one aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorSpec {
    pub function: AggregateFunction,
    pub mode: AggregatorMode,
    /// Raw input channels, or the first channel of each intermediate state
    /// block, depending on `mode`.
    pub channels: Vec<usize>,
}

impl AggregatorSpec {
    pub fn new(function: AggregateFunction, mode: AggregatorMode, channels: Vec<usize>) -> Self {
        Self {
            function,
            mode,
            channels,
        }
    }

    /// Intermediate state channels starting at `first`.
    pub fn intermediate(function: AggregateFunction, mode: AggregatorMode, first: usize, factory: &BlockFactory) -> Self {
        let count = function.create(factory).intermediate_state_desc().len();
        Self::new(function, mode, (first..first + count).collect())
    }
}

/// A function with its mode and channels.
#[derive(Debug)]
pub struct GroupingAggregator {
    function: Box<dyn GroupingAggregatorFunction>,
    mode: AggregatorMode,
    channels: Vec<usize>,
}

impl GroupingAggregator {
    pub fn new(spec: &AggregatorSpec, factory: &BlockFactory) -> QuarryResult<Self> {
        let function = spec.function.create(factory);
        let expected = if spec.mode.input_is_raw() {
            spec.function.raw_input_count()
        } else {
            function.intermediate_state_desc().len()
        };
        if spec.channels.len() != expected {
            return Err(QuarryError::invalid_argument(format!(
                "{} in {:?} mode needs {expected} channels, got {}",
                function.name(),
                spec.mode,
                spec.channels.len()
            )));
        }
        Ok(Self {
            function,
            mode: spec.mode,
            channels: spec.channels.clone(),
        })
    }

    pub fn mode(&self) -> AggregatorMode {
        self.mode
    }

    pub fn intermediate_state_desc(&self) -> Vec<IntermediateStateDesc> {
        self.function.intermediate_state_desc()
    }

    /// Blocks this aggregator appends to an output page.
    pub fn evaluate_block_count(&self) -> usize {
        if self.mode.output_is_final() {
            1
        } else {
            self.function.intermediate_state_desc().len()
        }
    }

    pub fn process_page(&mut self, groups: &Block, page: &Page, warnings: &Warnings) -> QuarryResult<()> {
        let blocks = self
            .channels
            .iter()
            .map(|&c| page.block(c).cloned())
            .collect::<QuarryResult<Vec<_>>>()?;
        if self.mode.input_is_raw() {
            self.function.add_raw_input(groups, &blocks, warnings)
        } else {
            self.function.add_intermediate_input(groups, &blocks)
        }
    }

    pub fn evaluate(&self, selected: &[u32], factory: &BlockFactory) -> QuarryResult<Vec<Block>> {
        if self.mode.output_is_final() {
            Ok(vec![self.function.evaluate_final(selected, factory)?])
        } else {
            self.function.evaluate_intermediate(selected, factory)
        }
    }

    pub fn display(&self) -> String {
        format!("{}[{:?}, channels = {:?}]", self.function.name(), self.mode, self.channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_count_validated() {
        let factory = BlockFactory::unlimited();
        let bad = AggregatorSpec::new(AggregateFunction::SumLong, AggregatorMode::Initial, vec![]);
        assert!(GroupingAggregator::new(&bad, &factory).is_err());

        let spec = AggregatorSpec::intermediate(AggregateFunction::SumLong, AggregatorMode::Final, 1, &factory);
        assert_eq!(spec.channels, vec![1, 2, 3]);
        let agg = GroupingAggregator::new(&spec, &factory).unwrap();
        assert_eq!(agg.evaluate_block_count(), 1);
    }

    #[test]
    fn test_function_serde() {
        let json = serde_json::to_string(&AggregateFunction::CountAll).unwrap();
        assert_eq!(json, "\"count_all\"");
        let spec: AggregatorSpec =
            serde_json::from_str(r#"{"function":"avg","mode":"single","channels":[2]}"#).unwrap();
        assert_eq!(spec.function.final_type(), ElementType::Double);
    }
}
