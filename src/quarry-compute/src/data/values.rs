//! Backing storage of blocks, one representation per element type.

use std::mem::size_of;
use std::sync::Arc;

use super::{Dictionary, DocRef, ElementType};

/// Fixed-width values, dense or a single repeated value.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveValues<T> {
    Dense(Vec<T>),
    Constant { value: T, len: usize },
}

impl<T: Copy> PrimitiveValues<T> {
    /// The value at `index` (a value index, not a position).
    pub fn get(&self, index: usize) -> T {
        match self {
            Self::Dense(values) => values[index],
            Self::Constant { value, .. } => *value,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Dense(values) => values.len(),
            Self::Constant { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Self::Constant { .. })
    }

    fn ram_bytes(&self) -> usize {
        match self {
            Self::Dense(values) => values.len() * size_of::<T>(),
            Self::Constant { .. } => size_of::<T>(),
        }
    }
}

/// Variable-length byte strings.
#[derive(Debug, Clone, PartialEq)]
pub enum BytesValues {
    /// Concatenated bytes; value `i` spans `offsets[i]..offsets[i + 1]`.
    Dense { data: Vec<u8>, offsets: Vec<usize> },
    Constant { value: Vec<u8>, len: usize },
}

impl BytesValues {
    pub fn get(&self, index: usize) -> &[u8] {
        match self {
            Self::Dense { data, offsets } => &data[offsets[index]..offsets[index + 1]],
            Self::Constant { value, .. } => value,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Dense { offsets, .. } => offsets.len().saturating_sub(1),
            Self::Constant { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ram_bytes(&self) -> usize {
        match self {
            Self::Dense { data, offsets } => data.len() + offsets.len() * size_of::<usize>(),
            Self::Constant { value, .. } => value.len(),
        }
    }
}

/// Dictionary-encoded byte strings: ordinals into a shared dictionary.
#[derive(Debug, Clone, PartialEq)]
pub struct OrdinalValues {
    ords: Vec<u32>,
    dictionary: Arc<Dictionary>,
}

impl OrdinalValues {
    pub(crate) fn new(ords: Vec<u32>, dictionary: Arc<Dictionary>) -> Self {
        Self { ords, dictionary }
    }

    pub fn ord(&self, index: usize) -> u32 {
        self.ords[index]
    }

    pub fn ords(&self) -> &[u32] {
        &self.ords
    }

    /// The term stored at value `index`.
    pub fn term(&self, index: usize) -> &[u8] {
        self.dictionary.lookup(self.ords[index]).unwrap_or(&[])
    }

    pub fn dictionary(&self) -> &Arc<Dictionary> {
        &self.dictionary
    }

    pub fn len(&self) -> usize {
        self.ords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ords.is_empty()
    }
}

/// Column of document references, stored as three parallel arrays.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DocColumn {
    shards: Vec<u32>,
    segments: Vec<u32>,
    docs: Vec<u32>,
}

impl DocColumn {
    pub(crate) fn new(shards: Vec<u32>, segments: Vec<u32>, docs: Vec<u32>) -> Self {
        Self {
            shards,
            segments,
            docs,
        }
    }

    pub fn get(&self, index: usize) -> DocRef {
        DocRef::new(self.shards[index], self.segments[index], self.docs[index])
    }

    pub fn docs(&self) -> &[u32] {
        &self.docs
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// `(shard, segment)` if every reference points into the same segment.
    pub fn single_segment(&self) -> Option<(u32, u32)> {
        let first = (*self.shards.first()?, *self.segments.first()?);
        let same = self.shards.iter().all(|s| *s == first.0) && self.segments.iter().all(|s| *s == first.1);
        same.then_some(first)
    }

    /// Single segment with non-decreasing doc ids, readable without sorting.
    pub fn is_single_segment_sorted(&self) -> bool {
        self.single_segment().is_some() && self.docs.windows(2).all(|w| w[0] <= w[1])
    }
}

/// Values of one block, tagged by representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Values {
    Boolean(PrimitiveValues<bool>),
    Int(PrimitiveValues<i32>),
    Long(PrimitiveValues<i64>),
    Double(PrimitiveValues<f64>),
    Bytes(BytesValues),
    Ordinals(OrdinalValues),
    Doc(DocColumn),
    Null,
}

impl Values {
    pub fn element_type(&self) -> ElementType {
        match self {
            Self::Boolean(_) => ElementType::Boolean,
            Self::Int(_) => ElementType::Int,
            Self::Long(_) => ElementType::Long,
            Self::Double(_) => ElementType::Double,
            Self::Bytes(_) | Self::Ordinals(_) => ElementType::BytesRef,
            Self::Doc(_) => ElementType::Doc,
            Self::Null => ElementType::Null,
        }
    }

    pub(crate) fn is_constant(&self) -> bool {
        match self {
            Self::Boolean(v) => v.is_constant(),
            Self::Int(v) => v.is_constant(),
            Self::Long(v) => v.is_constant(),
            Self::Double(v) => v.is_constant(),
            Self::Bytes(v) => matches!(v, BytesValues::Constant { .. }),
            Self::Null => true,
            Self::Ordinals(_) | Self::Doc(_) => false,
        }
    }

    pub(crate) fn ram_bytes(&self) -> usize {
        match self {
            Self::Boolean(v) => v.ram_bytes(),
            Self::Int(v) => v.ram_bytes(),
            Self::Long(v) => v.ram_bytes(),
            Self::Double(v) => v.ram_bytes(),
            Self::Bytes(v) => v.ram_bytes(),
            // The dictionary is owned by the segment, only the ordinals count.
            Self::Ordinals(v) => v.ords.len() * size_of::<u32>(),
            Self::Doc(v) => v.len() * 3 * size_of::<u32>(),
            Self::Null => 0,
        }
    }
}

/// Read-only view over byte strings regardless of encoding.
#[derive(Debug, Clone, Copy)]
pub enum BytesRefs<'a> {
    Plain(&'a BytesValues),
    Ordinals(&'a OrdinalValues),
}

impl<'a> BytesRefs<'a> {
    pub fn get(&self, index: usize) -> &'a [u8] {
        match *self {
            Self::Plain(values) => values.get(index),
            Self::Ordinals(values) => values.term(index),
        }
    }

    /// The ordinals, when dictionary encoded.
    pub fn ordinals(&self) -> Option<&'a OrdinalValues> {
        match *self {
            Self::Plain(_) => None,
            Self::Ordinals(values) => Some(values),
        }
    }
}
