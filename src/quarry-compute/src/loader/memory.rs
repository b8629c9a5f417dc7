//! In-memory segment implementing the doc-values capabilities.
//!
//! Used by tests and demos in place of a real columnar store. A field whose
//! documents all hold at most one value is exposed through the singleton
//! iterator shapes, like a real store would.

use std::collections::HashMap;
use std::sync::Arc;

use common_error::{QuarryError, QuarryResult};

use super::doc_values::{
    double_to_sortable_long, FieldDocValues, NumericDocValues, SegmentDocValues, SortedBinaryDocValues,
    SortedDocValues, SortedNumericDocValues, SortedSetDocValues,
};
use crate::data::Dictionary;

#[derive(Debug, Clone)]
enum MemoryField {
    Numeric(Arc<Vec<Vec<i64>>>),
    Keyword {
        dictionary: Arc<Dictionary>,
        ords: Arc<Vec<Vec<u32>>>,
    },
    Binary(Arc<Vec<Vec<Vec<u8>>>>),
}

/// A segment whose columns live in memory, one `Vec` of values per document.
#[derive(Debug, Clone, Default)]
pub struct InMemorySegment {
    max_doc: u32,
    fields: HashMap<String, MemoryField>,
}

impl InMemorySegment {
    pub fn new(max_doc: u32) -> Self {
        Self {
            max_doc,
            fields: HashMap::new(),
        }
    }

    /// Add a long field; values are sorted per document.
    pub fn with_longs(mut self, field: &str, mut values: Vec<Vec<i64>>) -> Self {
        for doc in &mut values {
            doc.sort_unstable();
        }
        self.fields
            .insert(field.to_string(), MemoryField::Numeric(Arc::new(values)));
        self
    }

    /// Add a double field, stored as sortable longs.
    pub fn with_doubles(self, field: &str, values: Vec<Vec<f64>>) -> Self {
        let encoded = values
            .into_iter()
            .map(|doc| doc.into_iter().map(double_to_sortable_long).collect())
            .collect();
        self.with_longs(field, encoded)
    }

    /// Add a keyword field backed by a segment dictionary.
    pub fn with_keywords<S: AsRef<str>>(mut self, field: &str, values: Vec<Vec<S>>) -> Self {
        let dictionary = Dictionary::from_terms(values.iter().flatten().map(|s| s.as_ref().as_bytes()));
        let ords = values
            .iter()
            .map(|doc| {
                let mut ords: Vec<u32> = doc
                    .iter()
                    .filter_map(|s| dictionary.ord_of(s.as_ref().as_bytes()))
                    .collect();
                ords.sort_unstable();
                ords.dedup();
                ords
            })
            .collect();
        self.fields.insert(
            field.to_string(),
            MemoryField::Keyword {
                dictionary: Arc::new(dictionary),
                ords: Arc::new(ords),
            },
        );
        self
    }

    /// Add a binary field with no dictionary.
    pub fn with_binary<B: AsRef<[u8]>>(mut self, field: &str, values: Vec<Vec<B>>) -> Self {
        let values = values
            .into_iter()
            .map(|doc| doc.into_iter().map(|v| v.as_ref().to_vec()).collect())
            .collect();
        self.fields
            .insert(field.to_string(), MemoryField::Binary(Arc::new(values)));
        self
    }
}

impl SegmentDocValues for InMemorySegment {
    fn max_doc(&self) -> u32 {
        self.max_doc
    }

    fn doc_values(&self, field: &str) -> QuarryResult<Option<FieldDocValues>> {
        let Some(stored) = self.fields.get(field) else {
            return Ok(None);
        };
        let max_doc = self.max_doc;
        Ok(Some(match stored {
            MemoryField::Numeric(values) => {
                let cursor = Cursor::new(Arc::clone(values), max_doc);
                if values.iter().all(|d| d.len() <= 1) {
                    FieldDocValues::Numeric(Box::new(cursor))
                } else {
                    FieldDocValues::SortedNumeric(Box::new(cursor))
                }
            }
            MemoryField::Keyword { dictionary, ords } => {
                let cursor = OrdCursor {
                    inner: Cursor::new(Arc::clone(ords), max_doc),
                    dictionary: Arc::clone(dictionary),
                };
                if ords.iter().all(|d| d.len() <= 1) {
                    FieldDocValues::Sorted(Box::new(cursor))
                } else {
                    FieldDocValues::SortedSet(Box::new(cursor))
                }
            }
            MemoryField::Binary(values) => FieldDocValues::Binary(Box::new(Cursor::new(Arc::clone(values), max_doc))),
        }))
    }
}

/// Forward-only position over per-document values.
struct Cursor<T> {
    values: Arc<Vec<Vec<T>>>,
    max_doc: u32,
    doc: usize,
    next: usize,
}

impl<T> Cursor<T> {
    fn new(values: Arc<Vec<Vec<T>>>, max_doc: u32) -> Self {
        Self {
            values,
            max_doc,
            doc: 0,
            next: 0,
        }
    }

    fn advance(&mut self, doc: u32) -> QuarryResult<bool> {
        if doc >= self.max_doc {
            return Err(QuarryError::storage(format!(
                "doc {doc} out of range, max_doc is {}",
                self.max_doc
            )));
        }
        self.doc = doc as usize;
        self.next = 0;
        Ok(self.current().is_some_and(|v| !v.is_empty()))
    }

    fn current(&self) -> Option<&Vec<T>> {
        self.values.get(self.doc)
    }

    fn count(&self) -> usize {
        self.current().map_or(0, Vec::len)
    }

    fn take(&mut self) -> Option<&T> {
        let index = self.next;
        self.next += 1;
        self.values.get(self.doc).and_then(|v| v.get(index))
    }
}

impl NumericDocValues for Cursor<i64> {
    fn advance_exact(&mut self, doc: u32) -> QuarryResult<bool> {
        self.advance(doc)
    }

    fn long_value(&self) -> i64 {
        self.current().and_then(|v| v.first()).copied().unwrap_or_default()
    }
}

impl SortedNumericDocValues for Cursor<i64> {
    fn advance_exact(&mut self, doc: u32) -> QuarryResult<bool> {
        self.advance(doc)
    }

    fn doc_value_count(&self) -> usize {
        self.count()
    }

    fn next_value(&mut self) -> i64 {
        self.take().copied().unwrap_or_default()
    }
}

impl SortedBinaryDocValues for Cursor<Vec<u8>> {
    fn advance_exact(&mut self, doc: u32) -> QuarryResult<bool> {
        self.advance(doc)
    }

    fn doc_value_count(&self) -> usize {
        self.count()
    }

    fn next_value(&mut self) -> &[u8] {
        self.take().map_or(&[][..], Vec::as_slice)
    }
}

struct OrdCursor {
    inner: Cursor<u32>,
    dictionary: Arc<Dictionary>,
}

impl SortedDocValues for OrdCursor {
    fn advance_exact(&mut self, doc: u32) -> QuarryResult<bool> {
        self.inner.advance(doc)
    }

    fn ord_value(&self) -> u32 {
        self.inner.current().and_then(|v| v.first()).copied().unwrap_or_default()
    }

    fn dictionary(&self) -> &Arc<Dictionary> {
        &self.dictionary
    }
}

impl SortedSetDocValues for OrdCursor {
    fn advance_exact(&mut self, doc: u32) -> QuarryResult<bool> {
        self.inner.advance(doc)
    }

    fn doc_value_count(&self) -> usize {
        self.inner.count()
    }

    fn next_ord(&mut self) -> u32 {
        self.inner.take().copied().unwrap_or_default()
    }

    fn dictionary(&self) -> &Arc<Dictionary> {
        &self.dictionary
    }
}
