//! Column reader implementations.
//!
//! Singleton readers serve statically single-valued columns and never open
//! position entries. General readers wrap a document's values in an entry
//! only when it has more than one.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use common_error::{QuarryError, QuarryResult};

use super::doc_values::{
    NumericDocValues, SortedBinaryDocValues, SortedDocValues, SortedNumericDocValues, SortedSetDocValues, ToDouble,
};
use super::ColumnReader;
use crate::data::{AnyBlockBuilder, Block, Dictionary, ElementType, Primitive, Scalar};
use crate::memory::BlockFactory;

/// Last-served document and owning thread, shared by every reader.
#[derive(Debug)]
pub(crate) struct ReaderState {
    last_doc: Option<u32>,
    thread: ThreadId,
}

impl ReaderState {
    pub(crate) fn new() -> Self {
        Self {
            last_doc: None,
            thread: thread::current().id(),
        }
    }

    /// Move to `doc`, refusing to go backwards.
    pub(crate) fn advance(&mut self, doc: u32) -> QuarryResult<()> {
        if let Some(last) = self.last_doc {
            if doc < last {
                return Err(QuarryError::invariant(format!(
                    "docs within same block must be in order: {doc} after {last}"
                )));
            }
        }
        self.last_doc = Some(doc);
        Ok(())
    }
}

/// Conversion from a stored long into the block's element type.
pub(crate) trait Convert<T>: Copy + Send + Sync + fmt::Debug + 'static {
    fn convert(&self, raw: i64) -> QuarryResult<T>;
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct AsLong;

impl Convert<i64> for AsLong {
    fn convert(&self, raw: i64) -> QuarryResult<i64> {
        Ok(raw)
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct AsInt;

impl Convert<i32> for AsInt {
    fn convert(&self, raw: i64) -> QuarryResult<i32> {
        i32::try_from(raw).map_err(|_| QuarryError::coercion(format!("{raw} out of int range")))
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct AsBoolean;

impl Convert<bool> for AsBoolean {
    fn convert(&self, raw: i64) -> QuarryResult<bool> {
        Ok(raw != 0)
    }
}

#[derive(Clone, Copy)]
pub(crate) struct AsDouble(pub(crate) ToDouble);

impl fmt::Debug for AsDouble {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AsDouble")
    }
}

impl Convert<f64> for AsDouble {
    fn convert(&self, raw: i64) -> QuarryResult<f64> {
        Ok((self.0)(raw))
    }
}

pub(crate) struct SingletonNumericReader<T, C> {
    values: Box<dyn NumericDocValues>,
    converter: C,
    state: ReaderState,
    _type: PhantomData<fn() -> T>,
}

impl<T: Primitive, C: Convert<T>> SingletonNumericReader<T, C> {
    pub(crate) fn new(values: Box<dyn NumericDocValues>, converter: C) -> Self {
        Self {
            values,
            converter,
            state: ReaderState::new(),
            _type: PhantomData,
        }
    }

    fn read(&mut self, doc: u32) -> QuarryResult<Option<T>> {
        self.state.advance(doc)?;
        if self.values.advance_exact(doc)? {
            Ok(Some(self.converter.convert(self.values.long_value())?))
        } else {
            Ok(None)
        }
    }
}

impl<T: Primitive, C: Convert<T>> ColumnReader for SingletonNumericReader<T, C> {
    fn doc_id(&self) -> Option<u32> {
        self.state.last_doc
    }

    fn creation_thread(&self) -> ThreadId {
        self.state.thread
    }

    fn read_values(&mut self, factory: &BlockFactory, docs: &[u32]) -> QuarryResult<Block> {
        let mut builder = factory.primitive_builder::<T>(docs.len())?;
        for &doc in docs {
            match self.read(doc)? {
                Some(value) => builder.append_value(value)?,
                None => builder.append_null()?,
            }
        }
        builder.build()
    }

    fn read_values_from_single_doc(&mut self, doc: u32, builder: &mut AnyBlockBuilder) -> QuarryResult<()> {
        match self.read(doc)? {
            Some(value) => builder.append_scalar(&value.to_scalar()),
            None => builder.append_null(),
        }
    }
}

impl<T, C: fmt::Debug> fmt::Debug for SingletonNumericReader<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SingletonNumericReader({:?})", self.converter)
    }
}

pub(crate) struct NumericReader<T, C> {
    values: Box<dyn SortedNumericDocValues>,
    converter: C,
    state: ReaderState,
    scratch: Vec<T>,
}

impl<T: Primitive, C: Convert<T>> NumericReader<T, C> {
    pub(crate) fn new(values: Box<dyn SortedNumericDocValues>, converter: C) -> Self {
        Self {
            values,
            converter,
            state: ReaderState::new(),
            scratch: Vec::new(),
        }
    }

    /// Load `doc`'s values into `scratch`.
    fn read(&mut self, doc: u32) -> QuarryResult<()> {
        self.state.advance(doc)?;
        self.scratch.clear();
        if self.values.advance_exact(doc)? {
            for _ in 0..self.values.doc_value_count() {
                let raw = self.values.next_value();
                self.scratch.push(self.converter.convert(raw)?);
            }
        }
        Ok(())
    }
}

impl<T: Primitive, C: Convert<T>> ColumnReader for NumericReader<T, C> {
    fn doc_id(&self) -> Option<u32> {
        self.state.last_doc
    }

    fn creation_thread(&self) -> ThreadId {
        self.state.thread
    }

    fn read_values(&mut self, factory: &BlockFactory, docs: &[u32]) -> QuarryResult<Block> {
        let mut builder = factory.primitive_builder::<T>(docs.len())?;
        for &doc in docs {
            self.read(doc)?;
            match self.scratch.as_slice() {
                [] => builder.append_null()?,
                [value] => builder.append_value(*value)?,
                values => {
                    builder.begin_position_entry()?;
                    for value in values {
                        builder.append_value(*value)?;
                    }
                    builder.end_position_entry()?;
                }
            }
        }
        builder.build()
    }

    fn read_values_from_single_doc(&mut self, doc: u32, builder: &mut AnyBlockBuilder) -> QuarryResult<()> {
        self.read(doc)?;
        match self.scratch.as_slice() {
            [] => builder.append_null(),
            [value] => builder.append_scalar(&value.to_scalar()),
            values => {
                builder.begin_position_entry()?;
                for value in values {
                    builder.append_scalar(&value.to_scalar())?;
                }
                builder.end_position_entry()?;
                Ok(())
            }
        }
    }
}

impl<T, C: fmt::Debug> fmt::Debug for NumericReader<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NumericReader({:?})", self.converter)
    }
}

/// Emits an ordinals vector straight from a single-valued keyword column.
pub(crate) struct SingletonOrdinalsReader {
    ordinals: Box<dyn SortedDocValues>,
    state: ReaderState,
}

impl SingletonOrdinalsReader {
    pub(crate) fn new(ordinals: Box<dyn SortedDocValues>) -> Self {
        Self {
            ordinals,
            state: ReaderState::new(),
        }
    }

    fn read(&mut self, doc: u32) -> QuarryResult<Option<u32>> {
        self.state.advance(doc)?;
        Ok(self.ordinals.advance_exact(doc)?.then(|| self.ordinals.ord_value()))
    }
}

impl ColumnReader for SingletonOrdinalsReader {
    fn doc_id(&self) -> Option<u32> {
        self.state.last_doc
    }

    fn creation_thread(&self) -> ThreadId {
        self.state.thread
    }

    fn read_values(&mut self, factory: &BlockFactory, docs: &[u32]) -> QuarryResult<Block> {
        let dictionary = Arc::clone(self.ordinals.dictionary());
        let mut builder = factory.ordinals_builder(dictionary, docs.len())?;
        for &doc in docs {
            match self.read(doc)? {
                Some(ord) => builder.append_ord(ord)?,
                None => builder.append_null()?,
            }
        }
        builder.build()
    }

    fn read_values_from_single_doc(&mut self, doc: u32, builder: &mut AnyBlockBuilder) -> QuarryResult<()> {
        match self.read(doc)? {
            Some(ord) => append_term(builder, self.ordinals.dictionary(), ord),
            None => builder.append_null(),
        }
    }
}

impl fmt::Debug for SingletonOrdinalsReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SingletonOrdinalsReader")
    }
}

pub(crate) struct OrdinalsReader {
    ordinals: Box<dyn SortedSetDocValues>,
    state: ReaderState,
    scratch: Vec<u32>,
}

impl OrdinalsReader {
    pub(crate) fn new(ordinals: Box<dyn SortedSetDocValues>) -> Self {
        Self {
            ordinals,
            state: ReaderState::new(),
            scratch: Vec::new(),
        }
    }

    fn read(&mut self, doc: u32) -> QuarryResult<()> {
        self.state.advance(doc)?;
        self.scratch.clear();
        if self.ordinals.advance_exact(doc)? {
            for _ in 0..self.ordinals.doc_value_count() {
                let ord = self.ordinals.next_ord();
                self.scratch.push(ord);
            }
        }
        Ok(())
    }
}

impl ColumnReader for OrdinalsReader {
    fn doc_id(&self) -> Option<u32> {
        self.state.last_doc
    }

    fn creation_thread(&self) -> ThreadId {
        self.state.thread
    }

    fn read_values(&mut self, factory: &BlockFactory, docs: &[u32]) -> QuarryResult<Block> {
        let dictionary = Arc::clone(self.ordinals.dictionary());
        let mut builder = factory.ordinals_builder(dictionary, docs.len())?;
        for &doc in docs {
            self.read(doc)?;
            match self.scratch.as_slice() {
                [] => builder.append_null()?,
                [ord] => builder.append_ord(*ord)?,
                ords => {
                    builder.begin_position_entry()?;
                    for ord in ords {
                        builder.append_ord(*ord)?;
                    }
                    builder.end_position_entry()?;
                }
            }
        }
        builder.build()
    }

    fn read_values_from_single_doc(&mut self, doc: u32, builder: &mut AnyBlockBuilder) -> QuarryResult<()> {
        self.read(doc)?;
        let dictionary = self.ordinals.dictionary();
        match self.scratch.as_slice() {
            [] => builder.append_null(),
            [ord] => append_term(builder, dictionary, *ord),
            ords => {
                builder.begin_position_entry()?;
                for ord in ords {
                    append_term(builder, dictionary, *ord)?;
                }
                builder.end_position_entry()?;
                Ok(())
            }
        }
    }
}

impl fmt::Debug for OrdinalsReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OrdinalsReader")
    }
}

fn append_term(builder: &mut AnyBlockBuilder, dictionary: &Dictionary, ord: u32) -> QuarryResult<()> {
    let term = dictionary
        .lookup(ord)
        .ok_or_else(|| QuarryError::invariant(format!("ordinal {ord} missing from dictionary")))?;
    builder.append_scalar(&Scalar::Bytes(term.to_vec()))
}

pub(crate) struct BytesReader {
    values: Box<dyn SortedBinaryDocValues>,
    state: ReaderState,
    scratch: Vec<Vec<u8>>,
}

impl BytesReader {
    pub(crate) fn new(values: Box<dyn SortedBinaryDocValues>) -> Self {
        Self {
            values,
            state: ReaderState::new(),
            scratch: Vec::new(),
        }
    }

    fn read(&mut self, doc: u32) -> QuarryResult<()> {
        self.state.advance(doc)?;
        self.scratch.clear();
        if self.values.advance_exact(doc)? {
            for _ in 0..self.values.doc_value_count() {
                let value = self.values.next_value().to_vec();
                self.scratch.push(value);
            }
        }
        Ok(())
    }
}

impl ColumnReader for BytesReader {
    fn doc_id(&self) -> Option<u32> {
        self.state.last_doc
    }

    fn creation_thread(&self) -> ThreadId {
        self.state.thread
    }

    fn read_values(&mut self, factory: &BlockFactory, docs: &[u32]) -> QuarryResult<Block> {
        let mut builder = factory.bytes_builder(docs.len())?;
        for &doc in docs {
            self.read(doc)?;
            match self.scratch.as_slice() {
                [] => builder.append_null()?,
                [value] => builder.append_value(value)?,
                values => {
                    builder.begin_position_entry()?;
                    for value in values {
                        builder.append_value(value)?;
                    }
                    builder.end_position_entry()?;
                }
            }
        }
        builder.build()
    }

    fn read_values_from_single_doc(&mut self, doc: u32, builder: &mut AnyBlockBuilder) -> QuarryResult<()> {
        self.read(doc)?;
        match self.scratch.len() {
            0 => builder.append_null(),
            1 => builder.append_scalar(&Scalar::Bytes(self.scratch[0].clone())),
            _ => {
                builder.begin_position_entry()?;
                for value in &self.scratch {
                    builder.append_scalar(&Scalar::Bytes(value.clone()))?;
                }
                builder.end_position_entry()?;
                Ok(())
            }
        }
    }
}

impl fmt::Debug for BytesReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BytesReader")
    }
}

/// Reader for a column absent from the segment: every position is null.
#[derive(Debug)]
pub(crate) struct NullsReader {
    element_type: ElementType,
    state: ReaderState,
}

impl NullsReader {
    pub(crate) fn new(element_type: ElementType) -> Self {
        Self {
            element_type,
            state: ReaderState::new(),
        }
    }
}

impl ColumnReader for NullsReader {
    fn doc_id(&self) -> Option<u32> {
        self.state.last_doc
    }

    fn creation_thread(&self) -> ThreadId {
        self.state.thread
    }

    fn read_values(&mut self, factory: &BlockFactory, docs: &[u32]) -> QuarryResult<Block> {
        for &doc in docs {
            self.state.advance(doc)?;
        }
        if self.element_type == ElementType::Null {
            return factory.constant_null(docs.len());
        }
        let mut builder = factory.builder(self.element_type, docs.len())?;
        for _ in docs {
            builder.append_null()?;
        }
        builder.build()
    }

    fn read_values_from_single_doc(&mut self, doc: u32, builder: &mut AnyBlockBuilder) -> QuarryResult<()> {
        self.state.advance(doc)?;
        builder.append_null()
    }
}
