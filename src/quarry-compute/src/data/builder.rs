//! Block builders.
//!
//! A builder accumulates positions and produces an immutable [`Block`].
//! Multi-valued positions are bracketed with `begin_position_entry` /
//! `end_position_entry`; a bracket holding a single value is stored as a
//! plain value and an empty bracket as null. `build()` drops the
//! multi-value index and null mask when they carry no information, so a
//! single-valued non-null block always exposes itself as a vector.

use std::fmt;
use std::mem::size_of;
use std::sync::Arc;

use common_error::{QuarryError, QuarryResult};

use super::{Block, BytesValues, Dictionary, DocColumn, DocRef, ElementType, OrdinalValues, PrimitiveValues, Scalar, Values};
use crate::memory::MemoryReservation;

/// Fixed-width element types with a dense block representation.
pub trait Primitive: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    const ELEMENT_TYPE: ElementType;

    fn view(values: &Values) -> Option<&PrimitiveValues<Self>>;

    fn wrap(values: PrimitiveValues<Self>) -> Values;

    fn to_scalar(self) -> Scalar;

    fn from_scalar(value: &Scalar) -> Option<Self>;
}

macro_rules! impl_primitive {
    ($ty:ty, $variant:ident) => {
        impl Primitive for $ty {
            const ELEMENT_TYPE: ElementType = ElementType::$variant;

            fn view(values: &Values) -> Option<&PrimitiveValues<Self>> {
                match values {
                    Values::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn wrap(values: PrimitiveValues<Self>) -> Values {
                Values::$variant(values)
            }

            fn to_scalar(self) -> Scalar {
                Scalar::$variant(self)
            }

            fn from_scalar(value: &Scalar) -> Option<Self> {
                match value {
                    Scalar::$variant(v) => Some(*v),
                    _ => None,
                }
            }
        }
    };
}

impl_primitive!(bool, Boolean);
impl_primitive!(i32, Int);
impl_primitive!(i64, Long);
impl_primitive!(f64, Double);

/// Grow `reservation` so it covers `needed` bytes. Growth doubles, capped
/// at what the accountant still has, so appends stay amortized and the
/// refusal happens at the append that would exceed the limit.
fn reserve_ahead(reservation: &mut MemoryReservation, needed: usize) -> QuarryResult<()> {
    let size = reservation.size();
    if needed <= size {
        return Ok(());
    }
    let headroom = size.saturating_add(reservation.accountant().available());
    let target = needed.max(size.saturating_mul(2).min(headroom));
    reservation.resize_to(target)
}

/// Position bookkeeping shared by the builders.
///
/// Null positions occupy one placeholder value so that, without
/// multi-valued positions, value index equals position.
#[derive(Debug, Default)]
struct PositionTracker {
    first_value_indexes: Vec<u32>,
    nulls: Vec<bool>,
    has_nulls: bool,
    has_multi: bool,
    entry_start: Option<usize>,
}

impl PositionTracker {
    fn with_capacity(positions: usize) -> Self {
        Self {
            first_value_indexes: Vec::with_capacity(positions + 1),
            nulls: Vec::with_capacity(positions),
            ..Self::default()
        }
    }

    fn position_count(&self) -> usize {
        self.nulls.len()
    }

    /// Bytes needed once one more position is recorded.
    fn ram_bytes(&self) -> usize {
        (self.nulls.len() + 2) * (size_of::<u32>() + size_of::<bool>())
    }

    fn push(&mut self, start: usize, null: bool) {
        self.first_value_indexes.push(start as u32);
        self.nulls.push(null);
        self.has_nulls |= null;
    }

    /// Record a plain value about to be written at `value_count`.
    fn value(&mut self, value_count: usize) {
        if self.entry_start.is_none() {
            self.push(value_count, false);
        }
    }

    fn begin(&mut self, value_count: usize) {
        self.entry_start = Some(value_count);
    }

    /// True when closing now needs a null placeholder.
    fn open_entry_is_empty(&self, value_count: usize) -> bool {
        self.entry_start == Some(value_count)
    }

    /// Close an open entry. Returns true when the entry was empty and the
    /// caller must write a null placeholder.
    fn close(&mut self, value_count: usize) -> bool {
        match self.entry_start.take() {
            None => false,
            Some(start) => {
                let n = value_count - start;
                self.push(start, n == 0);
                self.has_multi |= n > 1;
                n == 0
            }
        }
    }

    fn finish(mut self, value_count: usize) -> (usize, Option<Vec<u32>>, Option<Vec<bool>>) {
        let positions = self.nulls.len();
        let first_value_indexes = if self.has_multi {
            self.first_value_indexes.push(value_count as u32);
            Some(self.first_value_indexes)
        } else {
            None
        };
        let nulls = self.has_nulls.then_some(self.nulls);
        (positions, first_value_indexes, nulls)
    }
}

/// Builder for boolean, int, long and double blocks.
#[derive(Debug)]
pub struct PrimitiveBlockBuilder<T> {
    values: Vec<T>,
    tracker: PositionTracker,
    reservation: MemoryReservation,
}

impl<T: Primitive> PrimitiveBlockBuilder<T> {
    pub(crate) fn new(reservation: MemoryReservation, estimated_positions: usize) -> Self {
        Self {
            values: Vec::with_capacity(estimated_positions),
            tracker: PositionTracker::with_capacity(estimated_positions),
            reservation,
        }
    }

    fn charge(&mut self, values: usize) -> QuarryResult<()> {
        let needed = (self.values.len() + values) * size_of::<T>() + self.tracker.ram_bytes();
        reserve_ahead(&mut self.reservation, needed)
    }

    pub fn append_value(&mut self, value: T) -> QuarryResult<()> {
        self.charge(1)?;
        self.tracker.value(self.values.len());
        self.values.push(value);
        Ok(())
    }

    pub fn append_null(&mut self) -> QuarryResult<()> {
        self.end_position_entry()?;
        self.charge(1)?;
        self.tracker.push(self.values.len(), true);
        self.values.push(T::default());
        Ok(())
    }

    pub fn begin_position_entry(&mut self) -> QuarryResult<()> {
        self.end_position_entry()?;
        self.tracker.begin(self.values.len());
        Ok(())
    }

    pub fn end_position_entry(&mut self) -> QuarryResult<()> {
        if self.tracker.open_entry_is_empty(self.values.len()) {
            self.charge(1)?;
        }
        if self.tracker.close(self.values.len()) {
            self.values.push(T::default());
        }
        Ok(())
    }

    pub fn position_count(&self) -> usize {
        self.tracker.position_count()
    }

    /// Bytes currently reserved for this builder.
    pub fn reserved_bytes(&self) -> usize {
        self.reservation.size()
    }

    pub fn build(mut self) -> QuarryResult<Block> {
        self.end_position_entry()?;
        let (positions, fvi, nulls) = self.tracker.finish(self.values.len());
        Block::from_parts(positions, T::wrap(PrimitiveValues::Dense(self.values)), fvi, nulls, self.reservation)
    }
}

/// Builder for plain byte-string blocks.
#[derive(Debug)]
pub struct BytesBlockBuilder {
    data: Vec<u8>,
    offsets: Vec<usize>,
    tracker: PositionTracker,
    reservation: MemoryReservation,
}

impl BytesBlockBuilder {
    pub(crate) fn new(reservation: MemoryReservation, estimated_positions: usize) -> Self {
        let mut offsets = Vec::with_capacity(estimated_positions + 1);
        offsets.push(0);
        Self {
            data: Vec::new(),
            offsets,
            tracker: PositionTracker::with_capacity(estimated_positions),
            reservation,
        }
    }

    fn value_count(&self) -> usize {
        self.offsets.len() - 1
    }

    fn charge(&mut self, value_len: usize) -> QuarryResult<()> {
        let needed = self.data.len()
            + value_len
            + (self.offsets.len() + 1) * size_of::<usize>()
            + self.tracker.ram_bytes();
        reserve_ahead(&mut self.reservation, needed)
    }

    pub fn append_value(&mut self, value: &[u8]) -> QuarryResult<()> {
        self.charge(value.len())?;
        self.tracker.value(self.value_count());
        self.data.extend_from_slice(value);
        self.offsets.push(self.data.len());
        Ok(())
    }

    pub fn append_null(&mut self) -> QuarryResult<()> {
        self.end_position_entry()?;
        self.charge(0)?;
        self.tracker.push(self.value_count(), true);
        self.offsets.push(self.data.len());
        Ok(())
    }

    pub fn begin_position_entry(&mut self) -> QuarryResult<()> {
        self.end_position_entry()?;
        self.tracker.begin(self.value_count());
        Ok(())
    }

    pub fn end_position_entry(&mut self) -> QuarryResult<()> {
        if self.tracker.open_entry_is_empty(self.value_count()) {
            self.charge(0)?;
        }
        if self.tracker.close(self.value_count()) {
            self.offsets.push(self.data.len());
        }
        Ok(())
    }

    pub fn position_count(&self) -> usize {
        self.tracker.position_count()
    }

    pub fn build(mut self) -> QuarryResult<Block> {
        self.end_position_entry()?;
        let value_count = self.value_count();
        let (positions, fvi, nulls) = self.tracker.finish(value_count);
        let values = Values::Bytes(BytesValues::Dense {
            data: self.data,
            offsets: self.offsets,
        });
        Block::from_parts(positions, values, fvi, nulls, self.reservation)
    }
}

/// Builder for dictionary-encoded byte-string blocks.
#[derive(Debug)]
pub struct OrdinalsBlockBuilder {
    ords: Vec<u32>,
    dictionary: Arc<Dictionary>,
    tracker: PositionTracker,
    reservation: MemoryReservation,
}

impl OrdinalsBlockBuilder {
    pub(crate) fn new(reservation: MemoryReservation, dictionary: Arc<Dictionary>, estimated_positions: usize) -> Self {
        Self {
            ords: Vec::with_capacity(estimated_positions),
            dictionary,
            tracker: PositionTracker::with_capacity(estimated_positions),
            reservation,
        }
    }

    fn charge(&mut self) -> QuarryResult<()> {
        let needed = (self.ords.len() + 1) * size_of::<u32>() + self.tracker.ram_bytes();
        reserve_ahead(&mut self.reservation, needed)
    }

    /// Append an ordinal; it must address the builder's dictionary.
    pub fn append_ord(&mut self, ord: u32) -> QuarryResult<()> {
        if ord as usize >= self.dictionary.len() {
            return Err(QuarryError::invariant(format!(
                "ordinal {ord} out of range for dictionary of {} terms",
                self.dictionary.len()
            )));
        }
        self.charge()?;
        self.tracker.value(self.ords.len());
        self.ords.push(ord);
        Ok(())
    }

    pub fn append_null(&mut self) -> QuarryResult<()> {
        self.end_position_entry()?;
        self.charge()?;
        self.tracker.push(self.ords.len(), true);
        self.ords.push(0);
        Ok(())
    }

    pub fn begin_position_entry(&mut self) -> QuarryResult<()> {
        self.end_position_entry()?;
        self.tracker.begin(self.ords.len());
        Ok(())
    }

    pub fn end_position_entry(&mut self) -> QuarryResult<()> {
        if self.tracker.open_entry_is_empty(self.ords.len()) {
            self.charge()?;
        }
        if self.tracker.close(self.ords.len()) {
            self.ords.push(0);
        }
        Ok(())
    }

    pub fn position_count(&self) -> usize {
        self.tracker.position_count()
    }

    pub fn build(mut self) -> QuarryResult<Block> {
        self.end_position_entry()?;
        let (positions, fvi, nulls) = self.tracker.finish(self.ords.len());
        let values = Values::Ordinals(OrdinalValues::new(self.ords, self.dictionary));
        Block::from_parts(positions, values, fvi, nulls, self.reservation)
    }
}

/// Builder for document reference blocks. Doc blocks are always vectors.
#[derive(Debug)]
pub struct DocBlockBuilder {
    shards: Vec<u32>,
    segments: Vec<u32>,
    docs: Vec<u32>,
    reservation: MemoryReservation,
}

impl DocBlockBuilder {
    pub(crate) fn new(reservation: MemoryReservation, estimated_positions: usize) -> Self {
        Self {
            shards: Vec::with_capacity(estimated_positions),
            segments: Vec::with_capacity(estimated_positions),
            docs: Vec::with_capacity(estimated_positions),
            reservation,
        }
    }

    pub fn append(&mut self, doc: DocRef) -> QuarryResult<()> {
        reserve_ahead(&mut self.reservation, (self.docs.len() + 1) * 3 * size_of::<u32>())?;
        self.shards.push(doc.shard);
        self.segments.push(doc.segment);
        self.docs.push(doc.doc);
        Ok(())
    }

    pub fn position_count(&self) -> usize {
        self.docs.len()
    }

    pub fn build(self) -> QuarryResult<Block> {
        let positions = self.docs.len();
        let values = Values::Doc(DocColumn::new(self.shards, self.segments, self.docs));
        Block::from_parts(positions, values, None, None, self.reservation)
    }
}

/// Builder for blocks whose positions are all null.
#[derive(Debug)]
pub struct NullBlockBuilder {
    positions: usize,
    reservation: MemoryReservation,
}

impl NullBlockBuilder {
    pub(crate) fn new(reservation: MemoryReservation) -> Self {
        Self {
            positions: 0,
            reservation,
        }
    }

    pub fn append_null(&mut self) {
        self.positions += 1;
    }

    pub fn build(self) -> QuarryResult<Block> {
        Block::from_parts(self.positions, Values::Null, None, None, self.reservation)
    }
}

/// A builder chosen at runtime by element type.
#[derive(Debug)]
pub enum AnyBlockBuilder {
    Boolean(PrimitiveBlockBuilder<bool>),
    Int(PrimitiveBlockBuilder<i32>),
    Long(PrimitiveBlockBuilder<i64>),
    Double(PrimitiveBlockBuilder<f64>),
    Bytes(BytesBlockBuilder),
    Doc(DocBlockBuilder),
    Null(NullBlockBuilder),
}

impl AnyBlockBuilder {
    pub fn element_type(&self) -> ElementType {
        match self {
            Self::Boolean(_) => ElementType::Boolean,
            Self::Int(_) => ElementType::Int,
            Self::Long(_) => ElementType::Long,
            Self::Double(_) => ElementType::Double,
            Self::Bytes(_) => ElementType::BytesRef,
            Self::Doc(_) => ElementType::Doc,
            Self::Null(_) => ElementType::Null,
        }
    }

    pub fn position_count(&self) -> usize {
        match self {
            Self::Boolean(b) => b.position_count(),
            Self::Int(b) => b.position_count(),
            Self::Long(b) => b.position_count(),
            Self::Double(b) => b.position_count(),
            Self::Bytes(b) => b.position_count(),
            Self::Doc(b) => b.position_count(),
            Self::Null(b) => b.positions,
        }
    }

    pub fn append_null(&mut self) -> QuarryResult<()> {
        match self {
            Self::Boolean(b) => b.append_null()?,
            Self::Int(b) => b.append_null()?,
            Self::Long(b) => b.append_null()?,
            Self::Double(b) => b.append_null()?,
            Self::Bytes(b) => b.append_null()?,
            Self::Null(b) => b.append_null(),
            Self::Doc(_) => return Err(QuarryError::invariant("DOC blocks cannot hold nulls")),
        }
        Ok(())
    }

    pub fn begin_position_entry(&mut self) -> QuarryResult<()> {
        match self {
            Self::Boolean(b) => b.begin_position_entry(),
            Self::Int(b) => b.begin_position_entry(),
            Self::Long(b) => b.begin_position_entry(),
            Self::Double(b) => b.begin_position_entry(),
            Self::Bytes(b) => b.begin_position_entry(),
            Self::Doc(_) | Self::Null(_) => Ok(()),
        }
    }

    pub fn end_position_entry(&mut self) -> QuarryResult<()> {
        match self {
            Self::Boolean(b) => b.end_position_entry(),
            Self::Int(b) => b.end_position_entry(),
            Self::Long(b) => b.end_position_entry(),
            Self::Double(b) => b.end_position_entry(),
            Self::Bytes(b) => b.end_position_entry(),
            Self::Doc(_) | Self::Null(_) => Ok(()),
        }
    }

    /// Append one value; a value of another element type is a defect.
    pub fn append_scalar(&mut self, value: &Scalar) -> QuarryResult<()> {
        let element_type = self.element_type();
        match (self, value) {
            (builder, Scalar::Null) => builder.append_null()?,
            (Self::Boolean(b), Scalar::Boolean(v)) => b.append_value(*v)?,
            (Self::Int(b), Scalar::Int(v)) => b.append_value(*v)?,
            (Self::Long(b), Scalar::Long(v)) => b.append_value(*v)?,
            (Self::Double(b), Scalar::Double(v)) => b.append_value(*v)?,
            (Self::Bytes(b), Scalar::Bytes(v)) => b.append_value(v)?,
            (Self::Doc(b), Scalar::Doc(v)) => b.append(*v)?,
            (_, other) => {
                return Err(QuarryError::invariant(format!(
                    "cannot append {} value to {element_type} builder",
                    other.element_type()
                )))
            }
        }
        Ok(())
    }

    /// Copy every value at `position` of `block`, keeping its shape.
    pub fn copy_from(&mut self, block: &Block, position: usize) -> QuarryResult<()> {
        if block.is_null(position) {
            return self.append_null();
        }
        let first = block.first_value_index(position);
        let count = block.value_count(position);
        if count == 1 {
            return self.append_scalar(&block.value(first));
        }
        self.begin_position_entry()?;
        for i in first..first + count {
            self.append_scalar(&block.value(i))?;
        }
        self.end_position_entry()
    }

    pub fn build(self) -> QuarryResult<Block> {
        match self {
            Self::Boolean(b) => b.build(),
            Self::Int(b) => b.build(),
            Self::Long(b) => b.build(),
            Self::Double(b) => b.build(),
            Self::Bytes(b) => b.build(),
            Self::Doc(b) => b.build(),
            Self::Null(b) => b.build(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{AccountantRef, BlockFactory, LimitedAccountant, MemoryAccountant};

    fn factory() -> BlockFactory {
        BlockFactory::new(Arc::new(LimitedAccountant::unlimited()))
    }

    #[test]
    fn test_empty_entry_is_null() {
        let factory = factory();
        let mut builder = factory.int_builder(2).unwrap();
        builder.begin_position_entry().unwrap();
        builder.end_position_entry().unwrap();
        builder.append_value(5).unwrap();
        let block = builder.build().unwrap();
        assert!(block.is_null(0));
        assert_eq!(block.values_at(1), vec![Scalar::Int(5)]);
    }

    #[test]
    fn test_begin_closes_open_entry() {
        let factory = factory();
        let mut builder = factory.long_builder(2).unwrap();
        builder.begin_position_entry().unwrap();
        builder.append_value(1).unwrap();
        builder.append_value(2).unwrap();
        builder.begin_position_entry().unwrap();
        builder.append_value(3).unwrap();
        let block = builder.build().unwrap();
        assert_eq!(block.position_count(), 2);
        assert_eq!(block.value_count(0), 2);
        assert_eq!(block.value_count(1), 1);
    }

    #[test]
    fn test_any_builder_type_mismatch() {
        let factory = factory();
        let mut builder = factory.builder(ElementType::Long, 1).unwrap();
        let err = builder.append_scalar(&Scalar::from("nope")).unwrap_err();
        assert!(err.is_invariant_violation());
        builder.append_scalar(&Scalar::Long(1)).unwrap();
        builder.append_scalar(&Scalar::Null).unwrap();
        let block = builder.build().unwrap();
        assert_eq!(block.position_count(), 2);
    }

    #[test]
    fn test_ordinal_out_of_range() {
        let factory = factory();
        let dict = Arc::new(Dictionary::from_terms(["a"]));
        let mut builder = factory.ordinals_builder(dict, 1).unwrap();
        assert!(builder.append_ord(1).unwrap_err().is_invariant_violation());
        builder.append_ord(0).unwrap();
        assert_eq!(builder.build().unwrap().bytes().unwrap().get(0), b"a");
    }

    #[test]
    fn test_refused_builder_reserves_nothing() {
        let accountant: AccountantRef = Arc::new(LimitedAccountant::new(1024));
        let factory = BlockFactory::new(Arc::clone(&accountant));
        assert!(factory.long_builder(10_000).unwrap_err().is_resource_exhausted());
        assert_eq!(accountant.used(), 0);

        let builder = factory.long_builder(10).unwrap();
        assert!(accountant.used() > 0);
        drop(builder);
        assert_eq!(accountant.used(), 0);
    }

    #[test]
    fn test_appends_are_accounted_as_they_grow() {
        let accountant: AccountantRef = Arc::new(LimitedAccountant::new(4096));
        let factory = BlockFactory::new(Arc::clone(&accountant));
        let mut builder = factory.long_builder(1).unwrap();
        let mut appended = 0usize;
        let err = loop {
            match builder.append_value(appended as i64) {
                Ok(()) => appended += 1,
                Err(e) => break e,
            }
            assert!(accountant.used() >= appended * size_of::<i64>());
            assert_eq!(accountant.used(), builder.reserved_bytes());
            assert!(appended < 100_000, "builder never tripped");
        };
        assert!(err.is_resource_exhausted(), "{err}");
        assert!(appended > 0 && appended * size_of::<i64>() <= 4096);
        assert!(accountant.used() <= 4096);
        assert_eq!(builder.position_count(), appended);

        let block = builder.build().unwrap();
        assert_eq!(block.position_count(), appended);
        assert_eq!(accountant.used(), block.ram_bytes());
        drop(block);
        assert_eq!(accountant.used(), 0);
    }

    #[test]
    fn test_bytes_appends_trip_at_the_limit() {
        let accountant: AccountantRef = Arc::new(LimitedAccountant::new(1024));
        let factory = BlockFactory::new(Arc::clone(&accountant));
        let mut builder = factory.bytes_builder(1).unwrap();
        let value = [7u8; 100];
        let mut appended = 0;
        while builder.append_value(&value).is_ok() {
            appended += 1;
            assert!(appended < 100, "builder never tripped");
        }
        assert!(appended >= 1);
        assert!(accountant.used() <= 1024);
        drop(builder);
        assert_eq!(accountant.used(), 0);
    }
}
