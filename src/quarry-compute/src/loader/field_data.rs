//! Field data: per-segment values that do not come from a column's own doc
//! values shape.
//!
//! A field-data source hands out numbers as longs or doubles and any field
//! as byte strings, whatever the storage underneath. [`DocValuesFieldData`]
//! is the source backed by a field's doc values; keyword ordinals are turned
//! into their terms through the segment dictionary.

use std::fmt;

use common_error::{QuarryError, QuarryResult};

use super::doc_values::{
    double_to_sortable_long, FieldDocValues, NumericDocValues, SegmentDocValues, SingletonSortedSet,
    SortedBinaryDocValues, SortedNumericDocValues, SortedSetDocValues, ToDouble, SORTABLE_LONG_TO_DOUBLE,
};

/// Single-valued doubles.
pub trait NumericDoubleValues: Send {
    fn advance_exact(&mut self, doc: u32) -> QuarryResult<bool>;
    fn double_value(&self) -> f64;
}

/// Multi-valued doubles, ascending within a document.
pub trait SortedNumericDoubleValues: Send {
    fn advance_exact(&mut self, doc: u32) -> QuarryResult<bool>;
    fn doc_value_count(&self) -> usize;
    fn next_value(&mut self) -> f64;
}

/// Long field data of one segment.
pub enum LongValues {
    Single(Box<dyn NumericDocValues>),
    Multi(Box<dyn SortedNumericDocValues>),
}

/// Double field data of one segment.
pub enum DoubleValues {
    Single(Box<dyn NumericDoubleValues>),
    Multi(Box<dyn SortedNumericDoubleValues>),
}

impl DoubleValues {
    /// Re-encode as sortable longs so the long readers can serve doubles.
    pub(super) fn into_sortable_longs(self) -> LongValues {
        match self {
            DoubleValues::Single(inner) => LongValues::Single(Box::new(SortableSingle(inner))),
            DoubleValues::Multi(inner) => LongValues::Multi(Box::new(SortableMulti(inner))),
        }
    }
}

/// Numeric field data. `None` means no document in the segment has the field.
pub trait NumericFieldData: Send + Sync + fmt::Debug {
    fn long_values(&self, segment: &dyn SegmentDocValues) -> QuarryResult<Option<LongValues>>;

    fn double_values(&self, segment: &dyn SegmentDocValues) -> QuarryResult<Option<DoubleValues>>;
}

/// Byte-string field data. `None` means no document in the segment has the field.
pub trait BytesFieldData: Send + Sync + fmt::Debug {
    fn bytes_values(&self, segment: &dyn SegmentDocValues) -> QuarryResult<Option<Box<dyn SortedBinaryDocValues>>>;
}

/// Field data read from a field's doc values.
#[derive(Clone)]
pub struct DocValuesFieldData {
    field: String,
    to_double: ToDouble,
}

impl fmt::Debug for DocValuesFieldData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.field)
    }
}

impl DocValuesFieldData {
    /// Numeric longs are decoded to doubles as sortable bits.
    pub fn new(field: &str) -> Self {
        Self {
            field: field.to_string(),
            to_double: SORTABLE_LONG_TO_DOUBLE,
        }
    }

    pub fn with_to_double(mut self, to_double: ToDouble) -> Self {
        self.to_double = to_double;
        self
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    fn mismatch(&self, found: &FieldDocValues, expected: &str) -> QuarryError {
        QuarryError::type_error(format!(
            "field [{}] has {} doc values, expected {expected}",
            self.field,
            found.kind()
        ))
    }
}

impl NumericFieldData for DocValuesFieldData {
    fn long_values(&self, segment: &dyn SegmentDocValues) -> QuarryResult<Option<LongValues>> {
        Ok(match segment.doc_values(&self.field)? {
            None => None,
            Some(FieldDocValues::Numeric(values)) => Some(LongValues::Single(values)),
            Some(FieldDocValues::SortedNumeric(values)) => Some(LongValues::Multi(values)),
            Some(other) => return Err(self.mismatch(&other, "numeric")),
        })
    }

    fn double_values(&self, segment: &dyn SegmentDocValues) -> QuarryResult<Option<DoubleValues>> {
        let to_double = self.to_double;
        Ok(self.long_values(segment)?.map(|values| match values {
            LongValues::Single(inner) => DoubleValues::Single(Box::new(DecodedSingle { inner, to_double })),
            LongValues::Multi(inner) => DoubleValues::Multi(Box::new(DecodedMulti { inner, to_double })),
        }))
    }
}

impl BytesFieldData for DocValuesFieldData {
    fn bytes_values(&self, segment: &dyn SegmentDocValues) -> QuarryResult<Option<Box<dyn SortedBinaryDocValues>>> {
        Ok(match segment.doc_values(&self.field)? {
            None => None,
            Some(FieldDocValues::Binary(values)) => Some(values),
            Some(FieldDocValues::Sorted(values)) => {
                Some(Box::new(OrdinalTerms::new(Box::new(SingletonSortedSet::new(values)))))
            }
            Some(FieldDocValues::SortedSet(values)) => Some(Box::new(OrdinalTerms::new(values))),
            Some(other) => return Err(self.mismatch(&other, "binary or ordinals")),
        })
    }
}

/// Keyword ordinals read back as their dictionary terms.
pub struct OrdinalTerms {
    ordinals: Box<dyn SortedSetDocValues>,
}

impl OrdinalTerms {
    pub fn new(ordinals: Box<dyn SortedSetDocValues>) -> Self {
        Self { ordinals }
    }
}

impl SortedBinaryDocValues for OrdinalTerms {
    fn advance_exact(&mut self, doc: u32) -> QuarryResult<bool> {
        self.ordinals.advance_exact(doc)
    }

    fn doc_value_count(&self) -> usize {
        self.ordinals.doc_value_count()
    }

    fn next_value(&mut self) -> &[u8] {
        let ord = self.ordinals.next_ord();
        self.ordinals.dictionary().lookup(ord).unwrap_or_default()
    }
}

struct DecodedSingle {
    inner: Box<dyn NumericDocValues>,
    to_double: ToDouble,
}

impl NumericDoubleValues for DecodedSingle {
    fn advance_exact(&mut self, doc: u32) -> QuarryResult<bool> {
        self.inner.advance_exact(doc)
    }

    fn double_value(&self) -> f64 {
        (self.to_double)(self.inner.long_value())
    }
}

struct DecodedMulti {
    inner: Box<dyn SortedNumericDocValues>,
    to_double: ToDouble,
}

impl SortedNumericDoubleValues for DecodedMulti {
    fn advance_exact(&mut self, doc: u32) -> QuarryResult<bool> {
        self.inner.advance_exact(doc)
    }

    fn doc_value_count(&self) -> usize {
        self.inner.doc_value_count()
    }

    fn next_value(&mut self) -> f64 {
        (self.to_double)(self.inner.next_value())
    }
}

struct SortableSingle(Box<dyn NumericDoubleValues>);

impl NumericDocValues for SortableSingle {
    fn advance_exact(&mut self, doc: u32) -> QuarryResult<bool> {
        self.0.advance_exact(doc)
    }

    fn long_value(&self) -> i64 {
        double_to_sortable_long(self.0.double_value())
    }
}

struct SortableMulti(Box<dyn SortedNumericDoubleValues>);

impl SortedNumericDocValues for SortableMulti {
    fn advance_exact(&mut self, doc: u32) -> QuarryResult<bool> {
        self.0.advance_exact(doc)
    }

    fn doc_value_count(&self) -> usize {
        self.0.doc_value_count()
    }

    fn next_value(&mut self) -> i64 {
        double_to_sortable_long(self.0.next_value())
    }
}
