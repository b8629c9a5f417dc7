//! Column loading: bridges storage doc values into blocks.
//!
//! A [`ColumnLoader`] is a per-field factory. For each segment it builds a
//! stateful [`ColumnReader`] that turns a batch of non-decreasing document
//! ids into a block. Keyword columns can also expose their ordinals so
//! grouping can skip hashing.

mod doc_values;
mod field_data;
pub mod memory;
mod readers;

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use common_error::{QuarryError, QuarryResult};

pub use doc_values::{
    double_to_sortable_long, sortable_long_to_double, FieldDocValues, NumericDocValues, SegmentDocValues,
    SingletonSortedSet, SortedBinaryDocValues, SortedDocValues, SortedNumericDocValues, SortedSetDocValues, ToDouble,
    LONG_TO_DOUBLE, SORTABLE_LONG_TO_DOUBLE,
};
pub use field_data::{
    BytesFieldData, DocValuesFieldData, DoubleValues, LongValues, NumericDoubleValues, NumericFieldData, OrdinalTerms,
    SortedNumericDoubleValues,
};
use readers::{
    AsBoolean, AsDouble, AsInt, AsLong, BytesReader, Convert, NullsReader, NumericReader, OrdinalsReader,
    SingletonNumericReader, SingletonOrdinalsReader,
};

use crate::data::{AnyBlockBuilder, Block, ElementType, Primitive};
use crate::memory::BlockFactory;

/// Stateful, single-threaded reader over one column of one segment.
pub trait ColumnReader: Send + fmt::Debug {
    /// The last document served, `None` before the first read.
    fn doc_id(&self) -> Option<u32>;

    /// Thread that built this reader.
    fn creation_thread(&self) -> ThreadId;

    /// Read `docs` (non-decreasing) into a block with one position per doc.
    fn read_values(&mut self, factory: &BlockFactory, docs: &[u32]) -> QuarryResult<Block>;

    /// Append `doc`'s values as one position of `builder`.
    fn read_values_from_single_doc(&mut self, doc: u32, builder: &mut AnyBlockBuilder) -> QuarryResult<()>;
}

/// Whether `reader` may serve a batch starting at `starting_doc` on this thread.
pub fn can_reuse(reader: &dyn ColumnReader, starting_doc: u32) -> bool {
    reader.creation_thread() == thread::current().id() && reader.doc_id().map_or(true, |d| d <= starting_doc)
}

/// Per-field reader factory supplied for each column a query loads.
pub trait ColumnLoader: Send + Sync + fmt::Debug {
    /// Element type of the blocks this loader produces.
    fn element_type(&self) -> ElementType;

    /// Build a reader over `segment`.
    fn reader(&self, segment: &dyn SegmentDocValues) -> QuarryResult<Box<dyn ColumnReader>>;

    /// Whether [`ordinals`](Self::ordinals) is available.
    fn supports_ordinals(&self) -> bool {
        false
    }

    /// The field's dictionary ordinals over `segment`.
    fn ordinals(&self, _segment: &dyn SegmentDocValues) -> QuarryResult<Box<dyn SortedSetDocValues>> {
        Err(QuarryError::not_implemented(format!("{self:?} does not support ordinals")))
    }
}

/// Shared handle to a loader.
pub type LoaderRef = Arc<dyn ColumnLoader>;

/// The segments of one shard, addressed by `DocRef::segment`.
#[derive(Clone, Default)]
pub struct ShardContext {
    segments: Vec<Arc<dyn SegmentDocValues>>,
}

impl ShardContext {
    pub fn new(segments: Vec<Arc<dyn SegmentDocValues>>) -> Self {
        Self { segments }
    }

    pub fn segment(&self, index: u32) -> QuarryResult<&Arc<dyn SegmentDocValues>> {
        self.segments
            .get(index as usize)
            .ok_or_else(|| QuarryError::invalid_argument(format!("no segment {index}")))
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn segments(&self) -> &[Arc<dyn SegmentDocValues>] {
        &self.segments
    }
}

impl fmt::Debug for ShardContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardContext")
            .field("segments", &self.segments.len())
            .finish()
    }
}

/// Where a numeric loader gets its per-segment values.
#[derive(Clone)]
enum NumericSource {
    Longs(Arc<dyn NumericFieldData>),
    Doubles(Arc<dyn NumericFieldData>),
}

impl NumericSource {
    fn long_values(&self, segment: &dyn SegmentDocValues) -> QuarryResult<Option<LongValues>> {
        match self {
            NumericSource::Longs(data) => data.long_values(segment),
            NumericSource::Doubles(data) => Ok(data.double_values(segment)?.map(DoubleValues::into_sortable_longs)),
        }
    }
}

impl fmt::Debug for NumericSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumericSource::Longs(data) | NumericSource::Doubles(data) => write!(f, "{data:?}"),
        }
    }
}

struct NumericLoader<T, C> {
    source: NumericSource,
    converter: C,
    _type: PhantomData<fn() -> T>,
}

impl<T: Primitive, C: Convert<T>> ColumnLoader for NumericLoader<T, C> {
    fn element_type(&self) -> ElementType {
        T::ELEMENT_TYPE
    }

    fn reader(&self, segment: &dyn SegmentDocValues) -> QuarryResult<Box<dyn ColumnReader>> {
        Ok(match self.source.long_values(segment)? {
            None => Box::new(NullsReader::new(T::ELEMENT_TYPE)),
            Some(LongValues::Single(values)) => Box::new(SingletonNumericReader::new(values, self.converter)),
            Some(LongValues::Multi(values)) => Box::new(NumericReader::new(values, self.converter)),
        })
    }
}

impl<T: Primitive, C: fmt::Debug> fmt::Debug for NumericLoader<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Loader[{:?}]", T::ELEMENT_TYPE, self.source)
    }
}

fn numeric<T: Primitive, C: Convert<T>>(source: NumericSource, converter: C) -> LoaderRef {
    Arc::new(NumericLoader {
        source,
        converter,
        _type: PhantomData::<fn() -> T>,
    })
}

fn from_doc_values(field: &str) -> NumericSource {
    NumericSource::Longs(Arc::new(DocValuesFieldData::new(field)))
}

/// Long values of `field`.
pub fn longs(field: &str) -> LoaderRef {
    numeric::<i64, _>(from_doc_values(field), AsLong)
}

/// Int values of `field`; a stored value outside the int range is a coercion error.
pub fn ints(field: &str) -> LoaderRef {
    numeric::<i32, _>(from_doc_values(field), AsInt)
}

/// Double values of `field`, decoded with `to_double`.
pub fn doubles(field: &str, to_double: ToDouble) -> LoaderRef {
    numeric::<f64, _>(from_doc_values(field), AsDouble(to_double))
}

/// Boolean values of `field`, stored as 0/1 longs.
pub fn booleans(field: &str) -> LoaderRef {
    numeric::<bool, _>(from_doc_values(field), AsBoolean)
}

/// Long values from field data.
pub fn longs_from_field_data(data: Arc<dyn NumericFieldData>) -> LoaderRef {
    numeric::<i64, _>(NumericSource::Longs(data), AsLong)
}

/// Double values from field data.
pub fn doubles_from_field_data(data: Arc<dyn NumericFieldData>) -> LoaderRef {
    numeric::<f64, _>(NumericSource::Doubles(data), AsDouble(SORTABLE_LONG_TO_DOUBLE))
}

/// Boolean values from long field data, 0 is false.
pub fn booleans_from_field_data(data: Arc<dyn NumericFieldData>) -> LoaderRef {
    numeric::<bool, _>(NumericSource::Longs(data), AsBoolean)
}

#[derive(Debug)]
struct OrdinalsLoader {
    field: String,
}

impl ColumnLoader for OrdinalsLoader {
    fn element_type(&self) -> ElementType {
        ElementType::BytesRef
    }

    fn reader(&self, segment: &dyn SegmentDocValues) -> QuarryResult<Box<dyn ColumnReader>> {
        Ok(match segment.doc_values(&self.field)? {
            None => Box::new(NullsReader::new(ElementType::BytesRef)),
            Some(FieldDocValues::Sorted(values)) => Box::new(SingletonOrdinalsReader::new(values)),
            Some(FieldDocValues::SortedSet(values)) => Box::new(OrdinalsReader::new(values)),
            Some(other) => {
                return Err(QuarryError::type_error(format!(
                    "field [{}] has {} doc values, expected ordinals",
                    self.field,
                    other.kind()
                )))
            }
        })
    }

    fn supports_ordinals(&self) -> bool {
        true
    }

    fn ordinals(&self, segment: &dyn SegmentDocValues) -> QuarryResult<Box<dyn SortedSetDocValues>> {
        match segment.doc_values(&self.field)? {
            Some(FieldDocValues::Sorted(values)) => Ok(Box::new(SingletonSortedSet::new(values))),
            Some(FieldDocValues::SortedSet(values)) => Ok(values),
            Some(other) => Err(QuarryError::type_error(format!(
                "field [{}] has {} doc values, expected ordinals",
                self.field,
                other.kind()
            ))),
            None => Ok(Box::new(EmptySortedSet::default())),
        }
    }
}

/// Ordinals of a field no document in the segment has.
#[derive(Default)]
struct EmptySortedSet {
    dictionary: Arc<crate::data::Dictionary>,
}

impl SortedSetDocValues for EmptySortedSet {
    fn advance_exact(&mut self, _doc: u32) -> QuarryResult<bool> {
        Ok(false)
    }

    fn doc_value_count(&self) -> usize {
        0
    }

    fn next_ord(&mut self) -> u32 {
        0
    }

    fn dictionary(&self) -> &Arc<crate::data::Dictionary> {
        &self.dictionary
    }
}

/// Keyword values of `field`, read as ordinals over the segment dictionary.
pub fn bytes_from_ordinals(field: &str) -> LoaderRef {
    Arc::new(OrdinalsLoader {
        field: field.to_string(),
    })
}

#[derive(Debug)]
struct BytesLoader {
    data: Arc<dyn BytesFieldData>,
}

impl ColumnLoader for BytesLoader {
    fn element_type(&self) -> ElementType {
        ElementType::BytesRef
    }

    fn reader(&self, segment: &dyn SegmentDocValues) -> QuarryResult<Box<dyn ColumnReader>> {
        Ok(match self.data.bytes_values(segment)? {
            None => Box::new(NullsReader::new(ElementType::BytesRef)),
            Some(values) => Box::new(BytesReader::new(values)),
        })
    }
}

/// Byte-string values of `field` read without a dictionary. Keyword fields
/// are read term by term.
pub fn bytes_from_doc_values(field: &str) -> LoaderRef {
    bytes_from_field_data(Arc::new(DocValuesFieldData::new(field)))
}

/// Byte-string values from field data.
pub fn bytes_from_field_data(data: Arc<dyn BytesFieldData>) -> LoaderRef {
    Arc::new(BytesLoader { data })
}

#[derive(Debug)]
struct NullsLoader;

impl ColumnLoader for NullsLoader {
    fn element_type(&self) -> ElementType {
        ElementType::Null
    }

    fn reader(&self, _segment: &dyn SegmentDocValues) -> QuarryResult<Box<dyn ColumnReader>> {
        Ok(Box::new(NullsReader::new(ElementType::Null)))
    }
}

/// A column with no values at all.
pub fn nulls() -> LoaderRef {
    Arc::new(NullsLoader)
}
