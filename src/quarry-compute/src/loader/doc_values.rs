//! Capabilities the storage layer supplies per segment.
//!
//! These mirror forward-only doc-values iterators: `advance_exact(doc)`
//! positions the iterator on `doc` and reports whether it has a value.
//! Targets must not go backwards.

use std::sync::Arc;

use common_error::QuarryResult;

use crate::data::Dictionary;

/// One segment of a shard.
pub trait SegmentDocValues: Send + Sync {
    /// One past the largest document id.
    fn max_doc(&self) -> u32;

    /// A fresh iterator over `field`, or `None` if no document has it.
    fn doc_values(&self, field: &str) -> QuarryResult<Option<FieldDocValues>>;
}

/// Iterator shapes a field can expose.
pub enum FieldDocValues {
    /// At most one long per document.
    Numeric(Box<dyn NumericDocValues>),
    /// Any number of longs per document, ascending.
    SortedNumeric(Box<dyn SortedNumericDocValues>),
    /// At most one ordinal per document.
    Sorted(Box<dyn SortedDocValues>),
    /// Any number of ordinals per document, ascending.
    SortedSet(Box<dyn SortedSetDocValues>),
    /// Any number of byte strings per document.
    Binary(Box<dyn SortedBinaryDocValues>),
}

impl FieldDocValues {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Numeric(_) => "numeric",
            Self::SortedNumeric(_) => "sorted_numeric",
            Self::Sorted(_) => "sorted",
            Self::SortedSet(_) => "sorted_set",
            Self::Binary(_) => "binary",
        }
    }
}

pub trait NumericDocValues: Send {
    fn advance_exact(&mut self, doc: u32) -> QuarryResult<bool>;
    fn long_value(&self) -> i64;
}

pub trait SortedNumericDocValues: Send {
    fn advance_exact(&mut self, doc: u32) -> QuarryResult<bool>;
    fn doc_value_count(&self) -> usize;
    fn next_value(&mut self) -> i64;
}

pub trait SortedDocValues: Send {
    fn advance_exact(&mut self, doc: u32) -> QuarryResult<bool>;
    fn ord_value(&self) -> u32;
    fn dictionary(&self) -> &Arc<Dictionary>;
}

pub trait SortedSetDocValues: Send {
    fn advance_exact(&mut self, doc: u32) -> QuarryResult<bool>;
    fn doc_value_count(&self) -> usize;
    fn next_ord(&mut self) -> u32;
    fn dictionary(&self) -> &Arc<Dictionary>;
}

pub trait SortedBinaryDocValues: Send {
    fn advance_exact(&mut self, doc: u32) -> QuarryResult<bool>;
    fn doc_value_count(&self) -> usize;
    fn next_value(&mut self) -> &[u8];
}

/// Presents a single-valued ordinals iterator as a multi-valued one.
pub struct SingletonSortedSet {
    inner: Box<dyn SortedDocValues>,
    pending: bool,
}

impl SingletonSortedSet {
    pub fn new(inner: Box<dyn SortedDocValues>) -> Self {
        Self { inner, pending: false }
    }
}

impl SortedSetDocValues for SingletonSortedSet {
    fn advance_exact(&mut self, doc: u32) -> QuarryResult<bool> {
        self.pending = self.inner.advance_exact(doc)?;
        Ok(self.pending)
    }

    fn doc_value_count(&self) -> usize {
        1
    }

    fn next_ord(&mut self) -> u32 {
        self.pending = false;
        self.inner.ord_value()
    }

    fn dictionary(&self) -> &Arc<Dictionary> {
        self.inner.dictionary()
    }
}

/// Order-preserving mapping of doubles onto longs.
pub fn double_to_sortable_long(value: f64) -> i64 {
    let bits = value.to_bits() as i64;
    bits ^ ((bits >> 63) & 0x7fff_ffff_ffff_ffff)
}

/// Inverse of [`double_to_sortable_long`].
pub fn sortable_long_to_double(value: i64) -> f64 {
    let bits = value ^ ((value >> 63) & 0x7fff_ffff_ffff_ffff);
    f64::from_bits(bits as u64)
}

/// Turns a stored long into a double.
pub type ToDouble = fn(i64) -> f64;

/// Doubles stored as sortable longs.
pub const SORTABLE_LONG_TO_DOUBLE: ToDouble = sortable_long_to_double;

/// Integral values read as doubles.
pub const LONG_TO_DOUBLE: ToDouble = |v| v as f64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sortable_long_preserves_order() {
        let values = [f64::NEG_INFINITY, -10.5, -0.0, 0.0, 1e-9, 3.25, f64::MAX];
        let encoded: Vec<i64> = values.iter().map(|v| double_to_sortable_long(*v)).collect();
        assert!(encoded.windows(2).all(|w| w[0] <= w[1]));
        for (v, e) in values.iter().zip(&encoded) {
            assert_eq!(sortable_long_to_double(*e).to_bits(), v.to_bits());
        }
    }
}
