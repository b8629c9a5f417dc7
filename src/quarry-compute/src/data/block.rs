//! Immutable, reference-counted columns.

use std::fmt;
use std::mem::size_of;
use std::sync::Arc;

use common_error::{QuarryError, QuarryResult};

use super::builder::Primitive;
use super::{BytesRefs, DocColumn, ElementType, OrdinalValues, PrimitiveValues, Scalar, Values};
use crate::memory::{BlockFactory, MemoryReservation};

/// Fixed per-block bookkeeping charged on top of the values.
pub(crate) const BLOCK_OVERHEAD: usize = 64;

struct BlockInner {
    position_count: usize,
    values: Values,
    /// `positions + 1` start offsets, present only when some position is multi-valued.
    first_value_indexes: Option<Vec<u32>>,
    /// Present only when some position is null.
    nulls: Option<Vec<bool>>,
    reservation: MemoryReservation,
}

/// A column of one element type.
///
/// Positions hold zero values (null), one value, or several values that the
/// builder bracketed explicitly. Cloning a block takes another reference;
/// dropping the last reference returns its accounted bytes.
#[derive(Clone)]
pub struct Block {
    inner: Arc<BlockInner>,
}

impl Block {
    pub(crate) fn from_parts(
        position_count: usize,
        values: Values,
        first_value_indexes: Option<Vec<u32>>,
        nulls: Option<Vec<bool>>,
        mut reservation: MemoryReservation,
    ) -> QuarryResult<Self> {
        let bytes = BLOCK_OVERHEAD
            + values.ram_bytes()
            + first_value_indexes.as_ref().map_or(0, |f| f.len() * size_of::<u32>())
            + nulls.as_ref().map_or(0, Vec::len);
        reservation.resize_to(bytes)?;
        Ok(Self {
            inner: Arc::new(BlockInner {
                position_count,
                values,
                first_value_indexes,
                nulls,
                reservation,
            }),
        })
    }

    pub fn element_type(&self) -> ElementType {
        self.inner.values.element_type()
    }

    pub fn position_count(&self) -> usize {
        self.inner.position_count
    }

    /// Underlying representation.
    pub fn values(&self) -> &Values {
        &self.inner.values
    }

    pub fn is_null(&self, position: usize) -> bool {
        matches!(self.inner.values, Values::Null)
            || self.inner.nulls.as_ref().is_some_and(|n| n[position])
    }

    pub fn may_have_nulls(&self) -> bool {
        matches!(self.inner.values, Values::Null) || self.inner.nulls.is_some()
    }

    pub fn may_have_multivalued(&self) -> bool {
        self.inner.first_value_indexes.is_some()
    }

    /// Index of the first value stored for `position`.
    pub fn first_value_index(&self, position: usize) -> usize {
        match &self.inner.first_value_indexes {
            Some(fvi) => fvi[position] as usize,
            None => position,
        }
    }

    /// Number of values at `position`: 0 when null, otherwise 1 or N.
    pub fn value_count(&self, position: usize) -> usize {
        if self.is_null(position) {
            return 0;
        }
        match &self.inner.first_value_indexes {
            Some(fvi) => (fvi[position + 1] - fvi[position]) as usize,
            None => 1,
        }
    }

    /// Number of non-null values across all positions.
    pub fn total_value_count(&self) -> usize {
        (0..self.position_count()).map(|p| self.value_count(p)).sum()
    }

    pub fn booleans(&self) -> QuarryResult<&PrimitiveValues<bool>> {
        self.primitives::<bool>()
    }

    pub fn ints(&self) -> QuarryResult<&PrimitiveValues<i32>> {
        self.primitives::<i32>()
    }

    pub fn longs(&self) -> QuarryResult<&PrimitiveValues<i64>> {
        self.primitives::<i64>()
    }

    pub fn doubles(&self) -> QuarryResult<&PrimitiveValues<f64>> {
        self.primitives::<f64>()
    }

    /// Typed view over a fixed-width block.
    pub fn primitives<T: Primitive>(&self) -> QuarryResult<&PrimitiveValues<T>> {
        T::view(&self.inner.values).ok_or_else(|| type_mismatch(T::ELEMENT_TYPE, self.element_type()))
    }

    /// View over byte strings, plain or dictionary encoded.
    pub fn bytes(&self) -> QuarryResult<BytesRefs<'_>> {
        match &self.inner.values {
            Values::Bytes(v) => Ok(BytesRefs::Plain(v)),
            Values::Ordinals(v) => Ok(BytesRefs::Ordinals(v)),
            other => Err(type_mismatch(ElementType::BytesRef, other.element_type())),
        }
    }

    /// Ordinals, only for dictionary-encoded blocks.
    pub fn ordinals(&self) -> QuarryResult<&OrdinalValues> {
        match &self.inner.values {
            Values::Ordinals(v) => Ok(v),
            Values::Bytes(_) => Err(QuarryError::invariant("BYTES_REF block is not dictionary encoded")),
            other => Err(type_mismatch(ElementType::BytesRef, other.element_type())),
        }
    }

    pub fn docs(&self) -> QuarryResult<&DocColumn> {
        match &self.inner.values {
            Values::Doc(v) => Ok(v),
            other => Err(type_mismatch(ElementType::Doc, other.element_type())),
        }
    }

    /// The value stored at `value_index`.
    pub fn value(&self, value_index: usize) -> Scalar {
        match &self.inner.values {
            Values::Boolean(v) => Scalar::Boolean(v.get(value_index)),
            Values::Int(v) => Scalar::Int(v.get(value_index)),
            Values::Long(v) => Scalar::Long(v.get(value_index)),
            Values::Double(v) => Scalar::Double(v.get(value_index)),
            Values::Bytes(v) => Scalar::Bytes(v.get(value_index).to_vec()),
            Values::Ordinals(v) => Scalar::Bytes(v.term(value_index).to_vec()),
            Values::Doc(v) => Scalar::Doc(v.get(value_index)),
            Values::Null => Scalar::Null,
        }
    }

    /// All values at `position`; empty when null.
    pub fn values_at(&self, position: usize) -> Vec<Scalar> {
        let first = self.first_value_index(position);
        (first..first + self.value_count(position))
            .map(|i| self.value(i))
            .collect()
    }

    /// The vector view, when every position holds exactly one value.
    pub fn as_vector(&self) -> Option<Vector> {
        let is_vector = !self.may_have_nulls() && !self.may_have_multivalued();
        is_vector.then(|| Vector {
            block: self.clone(),
        })
    }

    pub fn is_vector(&self) -> bool {
        !self.may_have_nulls() && !self.may_have_multivalued()
    }

    /// A new block holding `positions` of this one, in that order.
    pub fn filter(&self, positions: &[usize], factory: &BlockFactory) -> QuarryResult<Block> {
        match &self.inner.values {
            Values::Null => factory.constant_null(positions.len()),
            Values::Doc(docs) => {
                let mut builder = factory.doc_builder(positions.len())?;
                for &p in positions {
                    builder.append(docs.get(p))?;
                }
                builder.build()
            }
            Values::Ordinals(ords) if !self.may_have_multivalued() => {
                let mut builder = factory.ordinals_builder(Arc::clone(ords.dictionary()), positions.len())?;
                for &p in positions {
                    if self.is_null(p) {
                        builder.append_null()?;
                    } else {
                        builder.append_ord(ords.ord(p))?;
                    }
                }
                builder.build()
            }
            _ => {
                let mut builder = factory.builder(self.element_type(), positions.len())?;
                for &p in positions {
                    builder.copy_from(self, p)?;
                }
                builder.build()
            }
        }
    }

    /// Live references to this block.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Bytes charged to the accountant for this block.
    pub fn ram_bytes(&self) -> usize {
        self.inner.reservation.size()
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("element_type", &self.element_type())
            .field("positions", &self.position_count())
            .field("nulls", &self.may_have_nulls())
            .field("multivalued", &self.may_have_multivalued())
            .finish()
    }
}

/// A block with exactly one non-null value per position.
#[derive(Debug, Clone)]
pub struct Vector {
    block: Block,
}

impl Vector {
    pub fn position_count(&self) -> usize {
        self.block.position_count()
    }

    pub fn element_type(&self) -> ElementType {
        self.block.element_type()
    }

    /// Backed by a single repeated value.
    pub fn is_constant(&self) -> bool {
        self.block.values().is_constant()
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    pub fn into_block(self) -> Block {
        self.block
    }
}

pub(crate) fn type_mismatch(expected: ElementType, actual: ElementType) -> QuarryError {
    QuarryError::invariant(format!("expected {expected} block, got {actual}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Dictionary;
    use crate::memory::{AccountantRef, LimitedAccountant, MemoryAccountant};

    fn factory() -> (AccountantRef, BlockFactory) {
        let accountant: AccountantRef = Arc::new(LimitedAccountant::unlimited());
        (Arc::clone(&accountant), BlockFactory::new(accountant))
    }

    #[test]
    fn test_multivalued_and_null_positions() {
        let (_, factory) = factory();
        let mut builder = factory.long_builder(4).unwrap();
        builder.append_value(1).unwrap();
        builder.append_null().unwrap();
        builder.begin_position_entry().unwrap();
        builder.append_value(2).unwrap();
        builder.append_value(3).unwrap();
        builder.end_position_entry().unwrap();
        builder.append_value(4).unwrap();
        let block = builder.build().unwrap();

        assert_eq!(block.position_count(), 4);
        assert!(block.is_null(1));
        assert_eq!(block.value_count(1), 0);
        assert_eq!(block.value_count(2), 2);
        assert_eq!(block.values_at(2), vec![Scalar::Long(2), Scalar::Long(3)]);
        assert_eq!(block.values_at(3), vec![Scalar::Long(4)]);
        assert_eq!(block.total_value_count(), 4);
        assert!(block.as_vector().is_none());
    }

    #[test]
    fn test_single_valued_builds_vector() {
        let (_, factory) = factory();
        let mut builder = factory.double_builder(3).unwrap();
        builder.begin_position_entry().unwrap();
        builder.append_value(1.5).unwrap();
        builder.end_position_entry().unwrap();
        builder.append_value(2.5).unwrap();
        let block = builder.build().unwrap();
        assert!(!block.may_have_multivalued());
        let vector = block.as_vector().unwrap();
        assert_eq!(vector.position_count(), 2);
        assert!(!vector.is_constant());
    }

    #[test]
    fn test_typed_view_mismatch_is_invariant_violation() {
        let (_, factory) = factory();
        let block = factory.long_vector(vec![1, 2]).unwrap();
        assert!(block.ints().unwrap_err().is_invariant_violation());
        assert!(block.bytes().unwrap_err().is_invariant_violation());
        assert_eq!(block.longs().unwrap().get(1), 2);
    }

    #[test]
    fn test_release_returns_bytes() {
        let (accountant, factory) = factory();
        let block = factory.long_vector((0..100).collect()).unwrap();
        assert!(accountant.used() >= 800);
        let copy = block.clone();
        assert_eq!(block.ref_count(), 2);
        drop(block);
        assert!(accountant.used() >= 800);
        drop(copy);
        assert_eq!(accountant.used(), 0);
    }

    #[test]
    fn test_filter_keeps_ordinals_encoding() {
        let (_, factory) = factory();
        let dict = Arc::new(Dictionary::from_terms(["a", "b", "c"]));
        let block = factory.ordinals_vector(vec![2, 0, 1], dict).unwrap();
        let filtered = block.filter(&[2, 0], &factory).unwrap();
        assert_eq!(filtered.ordinals().unwrap().ords(), &[1, 2]);
        assert_eq!(filtered.bytes().unwrap().get(0), b"b");
    }

    #[test]
    fn test_filter_multivalued() {
        let (_, factory) = factory();
        let mut builder = factory.bytes_builder(3).unwrap();
        builder.append_value(b"x").unwrap();
        builder.begin_position_entry().unwrap();
        builder.append_value(b"y").unwrap();
        builder.append_value(b"z").unwrap();
        builder.end_position_entry().unwrap();
        builder.append_null().unwrap();
        let block = builder.build().unwrap();

        let filtered = block.filter(&[2, 1], &factory).unwrap();
        assert!(filtered.is_null(0));
        assert_eq!(filtered.values_at(1), vec![Scalar::from("y"), Scalar::from("z")]);
    }

    #[test]
    fn test_constant_vector() {
        let (_, factory) = factory();
        let block = factory.constant_long(7, 1000).unwrap();
        assert!(block.as_vector().unwrap().is_constant());
        assert_eq!(block.longs().unwrap().get(999), 7);
        assert!(block.ram_bytes() < 1000);
    }
}
