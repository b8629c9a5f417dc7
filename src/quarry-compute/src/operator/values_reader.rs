//! Loads field values for the documents of a doc channel.

use std::fmt;

use ahash::AHashMap;
use common_error::QuarryResult;
use log::trace;

use super::{not_accepting, Operator};
use crate::data::{Block, DocColumn, Page};
use crate::loader::{can_reuse, ColumnReader, LoaderRef, ShardContext};
use crate::memory::BlockFactory;

/// Column readers keyed by shard, segment and loader, rebuilt whenever the
/// cached one cannot serve the next doc on this thread.
#[derive(Default)]
pub struct ReaderCache {
    readers: AHashMap<(u32, u32, usize), Box<dyn ColumnReader>>,
    built: usize,
}

impl ReaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A reader able to serve `starting_doc`.
    pub fn reader(
        &mut self,
        shards: &[ShardContext],
        loaders: &[LoaderRef],
        (shard, segment, loader): (u32, u32, usize),
        starting_doc: u32,
    ) -> QuarryResult<&mut Box<dyn ColumnReader>> {
        let key = (shard, segment, loader);
        let reusable = self
            .readers
            .get(&key)
            .is_some_and(|r| can_reuse(r.as_ref(), starting_doc));
        if !reusable {
            let context = shards.get(shard as usize).ok_or_else(|| {
                common_error::QuarryError::invalid_argument(format!("no shard {shard}"))
            })?;
            let values = context.segment(segment)?;
            let loader_ref = loaders.get(loader).ok_or_else(|| {
                common_error::QuarryError::invalid_argument(format!("no loader {loader}"))
            })?;
            trace!("building reader for shard {shard} segment {segment} loader {loader}");
            self.readers.insert(key, loader_ref.reader(values.as_ref())?);
            self.built += 1;
        }
        self.readers
            .get_mut(&key)
            .ok_or_else(|| common_error::QuarryError::internal("reader vanished from cache"))
    }

    /// Readers built so far, counting rebuilds.
    pub fn readers_built(&self) -> usize {
        self.built
    }

    pub fn clear(&mut self) {
        self.readers.clear();
    }
}

impl fmt::Debug for ReaderCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderCache")
            .field("cached", &self.readers.len())
            .field("built", &self.built)
            .finish()
    }
}

/// Appends one block per loader to each page, holding the values of the
/// documents referenced by `doc_channel`.
///
/// Pages whose docs are sorted within one segment are read in bulk. Other
/// pages are read row by row in (shard, segment, doc) order and the result
/// is permuted back to the page's order.
#[derive(Debug)]
pub struct ValuesSourceReaderOperator {
    factory: BlockFactory,
    shards: Vec<ShardContext>,
    loaders: Vec<LoaderRef>,
    doc_channel: usize,
    cache: ReaderCache,
    pending: Option<Page>,
    finished: bool,
}

impl ValuesSourceReaderOperator {
    pub fn new(factory: BlockFactory, shards: Vec<ShardContext>, loaders: Vec<LoaderRef>, doc_channel: usize) -> Self {
        Self {
            factory,
            shards,
            loaders,
            doc_channel,
            cache: ReaderCache::new(),
            pending: None,
            finished: false,
        }
    }

    pub fn reader_cache(&self) -> &ReaderCache {
        &self.cache
    }

    fn load(&mut self, page: Page) -> QuarryResult<Page> {
        let docs = page.block(self.doc_channel)?.docs()?;
        let blocks = if let Some((shard, segment)) = docs.single_segment().filter(|_| docs.is_single_segment_sorted()) {
            self.read_sorted(docs, shard, segment)?
        } else {
            self.read_unsorted(docs)?
        };
        blocks.into_iter().try_fold(page, Page::append_block)
    }

    fn read_sorted(&mut self, docs: &DocColumn, shard: u32, segment: u32) -> QuarryResult<Vec<Block>> {
        let ids = docs.docs();
        let first = ids.first().copied().unwrap_or(0);
        (0..self.loaders.len())
            .map(|loader| {
                let reader = self.cache.reader(&self.shards, &self.loaders, (shard, segment, loader), first)?;
                reader.read_values(&self.factory, ids)
            })
            .collect()
    }

    fn read_unsorted(&mut self, docs: &DocColumn) -> QuarryResult<Vec<Block>> {
        let mut order: Vec<usize> = (0..docs.len()).collect();
        order.sort_by_key(|&p| docs.get(p));
        let mut inverse = vec![0; order.len()];
        for (sorted, &p) in order.iter().enumerate() {
            inverse[p] = sorted;
        }

        let mut blocks = Vec::with_capacity(self.loaders.len());
        for loader in 0..self.loaders.len() {
            let mut builder = self.factory.builder(self.loaders[loader].element_type(), order.len())?;
            for &p in &order {
                let doc = docs.get(p);
                let reader = self
                    .cache
                    .reader(&self.shards, &self.loaders, (doc.shard, doc.segment, loader), doc.doc)?;
                reader.read_values_from_single_doc(doc.doc, &mut builder)?;
            }
            let sorted = builder.build()?;
            blocks.push(sorted.filter(&inverse, &self.factory)?);
        }
        Ok(blocks)
    }
}

impl Operator for ValuesSourceReaderOperator {
    fn name(&self) -> &'static str {
        "ValuesSourceReaderOperator"
    }

    fn needs_input(&self) -> bool {
        !self.finished && self.pending.is_none()
    }

    fn add_input(&mut self, page: Page) -> QuarryResult<()> {
        if !self.needs_input() {
            return Err(not_accepting(self.name()));
        }
        self.pending = Some(page);
        Ok(())
    }

    fn finish(&mut self) {
        self.finished = true;
    }

    fn is_finished(&self) -> bool {
        self.finished && self.pending.is_none()
    }

    fn get_output(&mut self) -> QuarryResult<Option<Page>> {
        match self.pending.take() {
            Some(page) => self.load(page).map(Some),
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        self.pending = None;
        self.cache.clear();
    }

    fn display(&self) -> String {
        let fields: Vec<String> = self.loaders.iter().map(|l| format!("{l:?}")).collect();
        format!("ValuesSourceReaderOperator[fields = [{}]]", fields.join(", "))
    }
}
