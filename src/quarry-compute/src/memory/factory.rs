//! The single constructor of accounted blocks.

use std::mem::size_of;
use std::sync::Arc;

use common_error::QuarryResult;

use super::{AccountantRef, LimitedAccountant, MemoryReservation};
use crate::data::{
    AnyBlockBuilder, Block, BytesBlockBuilder, BytesValues, Dictionary, DocBlockBuilder, DocRef, ElementType,
    NullBlockBuilder, OrdinalsBlockBuilder, Primitive, PrimitiveBlockBuilder, PrimitiveValues, Values,
};

/// Creates builders and constant blocks, reserving their bytes against a
/// shared accountant. Builders reserve their estimate up front, grow the
/// reservation as appends outrun it and reconcile to the exact size on
/// `build()`.
#[derive(Debug, Clone)]
pub struct BlockFactory {
    accountant: AccountantRef,
}

impl BlockFactory {
    pub fn new(accountant: AccountantRef) -> Self {
        Self { accountant }
    }

    /// A factory over a fresh unlimited accountant.
    pub fn unlimited() -> Self {
        Self::new(Arc::new(LimitedAccountant::unlimited()))
    }

    pub fn accountant(&self) -> &AccountantRef {
        &self.accountant
    }

    /// Reserve bytes for operator-owned state.
    pub fn reserve(&self, bytes: usize, label: &'static str) -> QuarryResult<MemoryReservation> {
        MemoryReservation::try_new(Arc::clone(&self.accountant), bytes, label)
    }

    pub fn primitive_builder<T: Primitive>(&self, estimated_positions: usize) -> QuarryResult<PrimitiveBlockBuilder<T>> {
        let reservation = self.reserve(estimated_positions * size_of::<T>(), "block builder")?;
        Ok(PrimitiveBlockBuilder::new(reservation, estimated_positions))
    }

    pub fn boolean_builder(&self, estimated_positions: usize) -> QuarryResult<PrimitiveBlockBuilder<bool>> {
        self.primitive_builder(estimated_positions)
    }

    pub fn int_builder(&self, estimated_positions: usize) -> QuarryResult<PrimitiveBlockBuilder<i32>> {
        self.primitive_builder(estimated_positions)
    }

    pub fn long_builder(&self, estimated_positions: usize) -> QuarryResult<PrimitiveBlockBuilder<i64>> {
        self.primitive_builder(estimated_positions)
    }

    pub fn double_builder(&self, estimated_positions: usize) -> QuarryResult<PrimitiveBlockBuilder<f64>> {
        self.primitive_builder(estimated_positions)
    }

    pub fn bytes_builder(&self, estimated_positions: usize) -> QuarryResult<BytesBlockBuilder> {
        let reservation = self.reserve(estimated_positions * (size_of::<usize>() + 16), "bytes builder")?;
        Ok(BytesBlockBuilder::new(reservation, estimated_positions))
    }

    pub fn ordinals_builder(
        &self,
        dictionary: Arc<Dictionary>,
        estimated_positions: usize,
    ) -> QuarryResult<OrdinalsBlockBuilder> {
        let reservation = self.reserve(estimated_positions * size_of::<u32>(), "ordinals builder")?;
        Ok(OrdinalsBlockBuilder::new(reservation, dictionary, estimated_positions))
    }

    pub fn doc_builder(&self, estimated_positions: usize) -> QuarryResult<DocBlockBuilder> {
        let reservation = self.reserve(estimated_positions * 3 * size_of::<u32>(), "doc builder")?;
        Ok(DocBlockBuilder::new(reservation, estimated_positions))
    }

    /// A builder for `element_type`.
    pub fn builder(&self, element_type: ElementType, estimated_positions: usize) -> QuarryResult<AnyBlockBuilder> {
        Ok(match element_type {
            ElementType::Boolean => AnyBlockBuilder::Boolean(self.primitive_builder(estimated_positions)?),
            ElementType::Int => AnyBlockBuilder::Int(self.primitive_builder(estimated_positions)?),
            ElementType::Long => AnyBlockBuilder::Long(self.primitive_builder(estimated_positions)?),
            ElementType::Double => AnyBlockBuilder::Double(self.primitive_builder(estimated_positions)?),
            ElementType::BytesRef => AnyBlockBuilder::Bytes(self.bytes_builder(estimated_positions)?),
            ElementType::Doc => AnyBlockBuilder::Doc(self.doc_builder(estimated_positions)?),
            ElementType::Null => AnyBlockBuilder::Null(NullBlockBuilder::new(self.reserve(0, "null builder")?)),
        })
    }

    /// A vector repeating `value` over `positions`.
    pub fn constant<T: Primitive>(&self, value: T, positions: usize) -> QuarryResult<Block> {
        let values = T::wrap(PrimitiveValues::Constant { value, len: positions });
        Block::from_parts(positions, values, None, None, self.reserve(0, "constant block")?)
    }

    pub fn constant_boolean(&self, value: bool, positions: usize) -> QuarryResult<Block> {
        self.constant(value, positions)
    }

    pub fn constant_int(&self, value: i32, positions: usize) -> QuarryResult<Block> {
        self.constant(value, positions)
    }

    pub fn constant_long(&self, value: i64, positions: usize) -> QuarryResult<Block> {
        self.constant(value, positions)
    }

    pub fn constant_double(&self, value: f64, positions: usize) -> QuarryResult<Block> {
        self.constant(value, positions)
    }

    pub fn constant_bytes(&self, value: &[u8], positions: usize) -> QuarryResult<Block> {
        let values = Values::Bytes(BytesValues::Constant {
            value: value.to_vec(),
            len: positions,
        });
        Block::from_parts(positions, values, None, None, self.reserve(0, "constant block")?)
    }

    /// A block whose every position is null.
    pub fn constant_null(&self, positions: usize) -> QuarryResult<Block> {
        Block::from_parts(positions, Values::Null, None, None, self.reserve(0, "constant block")?)
    }

    /// A dense vector taking ownership of `values`.
    pub fn vector<T: Primitive>(&self, values: Vec<T>) -> QuarryResult<Block> {
        let positions = values.len();
        let reservation = self.reserve(positions * size_of::<T>(), "vector")?;
        Block::from_parts(positions, T::wrap(PrimitiveValues::Dense(values)), None, None, reservation)
    }

    pub fn int_vector(&self, values: Vec<i32>) -> QuarryResult<Block> {
        self.vector(values)
    }

    pub fn long_vector(&self, values: Vec<i64>) -> QuarryResult<Block> {
        self.vector(values)
    }

    pub fn double_vector(&self, values: Vec<f64>) -> QuarryResult<Block> {
        self.vector(values)
    }

    pub fn boolean_vector(&self, values: Vec<bool>) -> QuarryResult<Block> {
        self.vector(values)
    }

    pub fn bytes_vector<I, B>(&self, values: I) -> QuarryResult<Block>
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let values: Vec<B> = values.into_iter().collect();
        let mut builder = self.bytes_builder(values.len())?;
        for value in &values {
            builder.append_value(value.as_ref())?;
        }
        builder.build()
    }

    pub fn ordinals_vector(&self, ords: Vec<u32>, dictionary: Arc<Dictionary>) -> QuarryResult<Block> {
        let mut builder = self.ordinals_builder(dictionary, ords.len())?;
        for ord in ords {
            builder.append_ord(ord)?;
        }
        builder.build()
    }

    /// Doc vector over one segment.
    pub fn doc_vector(&self, shard: u32, segment: u32, docs: &[u32]) -> QuarryResult<Block> {
        let mut builder = self.doc_builder(docs.len())?;
        for &doc in docs {
            builder.append(DocRef::new(shard, segment, doc))?;
        }
        builder.build()
    }
}
