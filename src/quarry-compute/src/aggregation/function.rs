//! The grouping aggregator function contract and its shared input plumbing.

use std::fmt;

use common_error::{QuarryError, QuarryResult};
use serde::{Deserialize, Serialize};

use crate::data::{Block, BytesRefs, ElementType, Primitive, PrimitiveValues, Values};
use crate::memory::BlockFactory;
use crate::operator::Warnings;

/// Which side of the partial/final split an aggregator runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregatorMode {
    /// Raw input in, intermediate state out.
    Initial,
    /// Intermediate state in, merged intermediate state out.
    Intermediate,
    /// Intermediate state in, final values out.
    Final,
    /// Raw input in, final values out.
    Single,
}

impl AggregatorMode {
    pub fn input_is_raw(self) -> bool {
        matches!(self, Self::Initial | Self::Single)
    }

    pub fn output_is_final(self) -> bool {
        matches!(self, Self::Final | Self::Single)
    }
}

/// One block of an aggregator's intermediate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IntermediateStateDesc {
    pub name: &'static str,
    pub element_type: ElementType,
}

impl IntermediateStateDesc {
    pub const fn new(name: &'static str, element_type: ElementType) -> Self {
        Self { name, element_type }
    }
}

/// Per-group accumulator state with a lossless intermediate encoding.
///
/// `groups` is an Int block with one position per input row; a row with
/// several group ids contributes to each of them.
pub trait GroupingAggregatorFunction: Send + fmt::Debug {
    fn name(&self) -> &'static str;

    fn intermediate_state_desc(&self) -> Vec<IntermediateStateDesc>;

    /// Accumulate raw values. Unparseable dynamically typed values are
    /// reported to `warnings` and skipped.
    fn add_raw_input(&mut self, groups: &Block, inputs: &[Block], warnings: &Warnings) -> QuarryResult<()>;

    /// Merge intermediate state blocks laid out per `intermediate_state_desc`.
    fn add_intermediate_input(&mut self, groups: &Block, state: &[Block]) -> QuarryResult<()>;

    fn evaluate_intermediate(&self, selected: &[u32], factory: &BlockFactory) -> QuarryResult<Vec<Block>>;

    fn evaluate_final(&self, selected: &[u32], factory: &BlockFactory) -> QuarryResult<Block>;
}

/// Call `f(position, group)` for every group id of every row.
pub(crate) fn for_each_group(
    groups: &Block,
    mut f: impl FnMut(usize, usize) -> QuarryResult<()>,
) -> QuarryResult<()> {
    let ids = groups.ints()?;
    for p in 0..groups.position_count() {
        let first = groups.first_value_index(p);
        for i in first..first + groups.value_count(p) {
            f(p, ids.get(i) as usize)?;
        }
    }
    Ok(())
}

pub(crate) fn check_positions(groups: &Block, blocks: &[Block]) -> QuarryResult<()> {
    match blocks.iter().find(|b| b.position_count() != groups.position_count()) {
        Some(b) => Err(QuarryError::invariant(format!(
            "group ids cover {} positions, input has {}",
            groups.position_count(),
            b.position_count()
        ))),
        None => Ok(()),
    }
}

pub(crate) fn expect_blocks<'a>(name: &str, blocks: &'a [Block], count: usize) -> QuarryResult<&'a [Block]> {
    if blocks.len() != count {
        return Err(QuarryError::invariant(format!(
            "{name} expects {count} blocks, got {}",
            blocks.len()
        )));
    }
    Ok(blocks)
}

/// A raw input block as seen by a numeric aggregator.
#[derive(Debug, Clone, Copy)]
pub enum NumericInput<'a> {
    Int(&'a PrimitiveValues<i32>),
    Long(&'a PrimitiveValues<i64>),
    Double(&'a PrimitiveValues<f64>),
    /// Dynamically typed text, parsed per value.
    Text(BytesRefs<'a>),
    Null,
}

impl<'a> NumericInput<'a> {
    pub(crate) fn of(name: &str, block: &'a Block) -> QuarryResult<Self> {
        Ok(match block.values() {
            Values::Int(v) => Self::Int(v),
            Values::Long(v) => Self::Long(v),
            Values::Double(v) => Self::Double(v),
            Values::Bytes(_) | Values::Ordinals(_) => Self::Text(block.bytes()?),
            Values::Null => Self::Null,
            other => {
                return Err(QuarryError::invariant(format!(
                    "{name} cannot aggregate {} values",
                    other.element_type()
                )))
            }
        })
    }
}

/// Numeric state types.
pub trait NumericValue: Primitive + PartialOrd {
    /// Read value `index` of `input`; `None` skips the value.
    fn read(name: &str, input: &NumericInput<'_>, index: usize, warnings: &Warnings) -> QuarryResult<Option<Self>>;

    fn checked_add(self, other: Self) -> Option<Self>;

    fn to_f64(self) -> f64;
}

fn parse_text<T: std::str::FromStr>(
    name: &str,
    bytes: &[u8],
    element_type: ElementType,
    warnings: &Warnings,
) -> Option<T> {
    let parsed = std::str::from_utf8(bytes).ok().and_then(|s| s.trim().parse().ok());
    if parsed.is_none() {
        let text = String::from_utf8_lossy(bytes);
        warnings.add(
            QuarryError::coercion(format!("{name}: cannot parse [{text}] as {element_type}, value skipped"))
                .to_string(),
        );
    }
    parsed
}

impl NumericValue for i64 {
    fn read(name: &str, input: &NumericInput<'_>, index: usize, warnings: &Warnings) -> QuarryResult<Option<Self>> {
        Ok(match input {
            NumericInput::Int(v) => Some(v.get(index) as i64),
            NumericInput::Long(v) => Some(v.get(index)),
            NumericInput::Double(_) => {
                return Err(QuarryError::invariant(format!("{name} over LONG received DOUBLE input")))
            }
            NumericInput::Text(v) => parse_text(name, v.get(index), ElementType::Long, warnings),
            NumericInput::Null => None,
        })
    }

    fn checked_add(self, other: Self) -> Option<Self> {
        i64::checked_add(self, other)
    }

    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl NumericValue for f64 {
    fn read(name: &str, input: &NumericInput<'_>, index: usize, warnings: &Warnings) -> QuarryResult<Option<Self>> {
        Ok(match input {
            NumericInput::Int(v) => Some(v.get(index) as f64),
            NumericInput::Long(v) => Some(v.get(index) as f64),
            NumericInput::Double(v) => Some(v.get(index)),
            NumericInput::Text(v) => parse_text(name, v.get(index), ElementType::Double, warnings),
            NumericInput::Null => None,
        })
    }

    fn checked_add(self, other: Self) -> Option<Self> {
        Some(self + other)
    }

    fn to_f64(self) -> f64 {
        self
    }
}

/// Call `f(group, value)` for every readable value of every row.
pub(crate) fn for_each_value<T: NumericValue>(
    name: &str,
    groups: &Block,
    input: &Block,
    warnings: &Warnings,
    mut f: impl FnMut(usize, T) -> QuarryResult<()>,
) -> QuarryResult<()> {
    let values = NumericInput::of(name, input)?;
    for_each_group(groups, |p, group| {
        let first = input.first_value_index(p);
        for i in first..first + input.value_count(p) {
            if let Some(v) = T::read(name, &values, i, warnings)? {
                f(group, v)?;
            }
        }
        Ok(())
    })
}
