//! Source operators: canned pages and matched documents.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use common_error::{QuarryError, QuarryResult};
use log::debug;

use super::context::DriverContext;
use super::{BoxedOperator, Operator};
use crate::data::{DocRef, Page};
use crate::loader::ShardContext;
use crate::memory::BlockFactory;

/// Emits a fixed list of pages.
#[derive(Debug)]
pub struct LocalSourceOperator {
    pages: VecDeque<Page>,
    finished: bool,
}

impl LocalSourceOperator {
    pub fn from_pages(pages: Vec<Page>) -> Self {
        Self {
            pages: pages.into(),
            finished: false,
        }
    }

    /// Single-channel pages of longs, `page_size` rows each.
    pub fn longs(factory: &BlockFactory, values: &[i64], page_size: usize) -> QuarryResult<Self> {
        let pages = values
            .chunks(page_size.max(1))
            .map(|chunk| Page::new(vec![factory.long_vector(chunk.to_vec())?]))
            .collect::<QuarryResult<Vec<_>>>()?;
        Ok(Self::from_pages(pages))
    }

    /// Single-channel pages of byte strings, `page_size` rows each.
    pub fn bytes<B: AsRef<[u8]>>(factory: &BlockFactory, values: &[B], page_size: usize) -> QuarryResult<Self> {
        let pages = values
            .chunks(page_size.max(1))
            .map(|chunk| Page::new(vec![factory.bytes_vector(chunk)?]))
            .collect::<QuarryResult<Vec<_>>>()?;
        Ok(Self::from_pages(pages))
    }
}

impl Operator for LocalSourceOperator {
    fn name(&self) -> &'static str {
        "LocalSourceOperator"
    }

    fn needs_input(&self) -> bool {
        false
    }

    fn add_input(&mut self, _page: Page) -> QuarryResult<()> {
        Err(QuarryError::invariant("source operators take no input"))
    }

    fn finish(&mut self) {
        self.finished = true;
    }

    fn is_finished(&self) -> bool {
        self.finished || self.pages.is_empty()
    }

    fn get_output(&mut self) -> QuarryResult<Option<Page>> {
        if self.finished {
            return Ok(None);
        }
        Ok(self.pages.pop_front())
    }

    fn close(&mut self) {
        self.pages.clear();
    }
}

/// Query predicate supplied by the search layer.
pub trait DocMatcher: Send + Sync {
    fn matches(&self, doc: DocRef) -> bool;
}

impl<F> DocMatcher for F
where
    F: Fn(DocRef) -> bool + Send + Sync,
{
    fn matches(&self, doc: DocRef) -> bool {
        self(doc)
    }
}

/// Matches every live document.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchAll;

impl DocMatcher for MatchAll {
    fn matches(&self, _doc: DocRef) -> bool {
        true
    }
}

/// Creates one source operator per driver.
pub trait SourceOperatorFactory: Send + Sync {
    fn get(&self, ctx: &DriverContext) -> QuarryResult<BoxedOperator>;

    fn describe(&self) -> String;
}

/// A doc range of one segment handed to a single driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slice {
    shard: u32,
    segment: u32,
    min_doc: u32,
    max_doc: u32,
}

type SliceQueue = Arc<Mutex<VecDeque<Slice>>>;

/// Splits every segment of every shard into slices and shares them among
/// the operators it creates, so `task_concurrency` drivers can scan in
/// parallel.
pub struct DocSourceFactory {
    matcher: Arc<dyn DocMatcher>,
    task_concurrency: usize,
    page_size: usize,
    slices: SliceQueue,
}

impl DocSourceFactory {
    pub fn new(
        shards: &[ShardContext],
        matcher: Arc<dyn DocMatcher>,
        task_concurrency: usize,
        page_size: usize,
    ) -> QuarryResult<Self> {
        if task_concurrency == 0 {
            return Err(QuarryError::invalid_argument("task_concurrency must be positive"));
        }
        if page_size == 0 {
            return Err(QuarryError::invalid_argument("page_size must be positive"));
        }
        let total: usize = shards
            .iter()
            .flat_map(|s| s.segments())
            .map(|s| s.max_doc() as usize)
            .sum();
        let slice_size = page_size.max(total.div_ceil(task_concurrency));

        let mut slices = VecDeque::new();
        for (shard, context) in shards.iter().enumerate() {
            for (segment, values) in context.segments().iter().enumerate() {
                let max_doc = values.max_doc() as usize;
                let mut start = 0;
                while start < max_doc {
                    let end = (start + slice_size).min(max_doc);
                    slices.push_back(Slice {
                        shard: shard as u32,
                        segment: segment as u32,
                        min_doc: start as u32,
                        max_doc: end as u32,
                    });
                    start = end;
                }
            }
        }
        debug!("doc source: {} docs in {} slices of {slice_size}", total, slices.len());
        Ok(Self {
            matcher,
            task_concurrency,
            page_size,
            slices: Arc::new(Mutex::new(slices)),
        })
    }

    pub fn task_concurrency(&self) -> usize {
        self.task_concurrency
    }

    /// Slices not yet claimed by an operator.
    pub fn remaining_slices(&self) -> usize {
        self.slices.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl fmt::Debug for DocSourceFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocSourceFactory")
            .field("task_concurrency", &self.task_concurrency)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl SourceOperatorFactory for DocSourceFactory {
    fn get(&self, ctx: &DriverContext) -> QuarryResult<BoxedOperator> {
        Ok(Box::new(DocSourceOperator {
            factory: ctx.block_factory().clone(),
            matcher: Arc::clone(&self.matcher),
            slices: Arc::clone(&self.slices),
            page_size: self.page_size,
            current: None,
            finished: false,
        }))
    }

    fn describe(&self) -> String {
        format!(
            "DocSourceOperator[concurrency = {}, page_size = {}]",
            self.task_concurrency, self.page_size
        )
    }
}

/// Emits pages with one doc vector of matching documents.
///
/// Every page covers a single segment with ascending doc ids.
pub struct DocSourceOperator {
    factory: BlockFactory,
    matcher: Arc<dyn DocMatcher>,
    slices: SliceQueue,
    page_size: usize,
    /// The claimed slice and the next doc to test.
    current: Option<(Slice, u32)>,
    finished: bool,
}

impl DocSourceOperator {
    fn next_slice(&mut self) -> Option<(Slice, u32)> {
        if let Some(current) = self.current.take() {
            return Some(current);
        }
        let slice = self.slices.lock().unwrap_or_else(PoisonError::into_inner).pop_front()?;
        Some((slice, slice.min_doc))
    }
}

impl fmt::Debug for DocSourceOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocSourceOperator")
            .field("page_size", &self.page_size)
            .field("current", &self.current)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl Operator for DocSourceOperator {
    fn name(&self) -> &'static str {
        "DocSourceOperator"
    }

    fn needs_input(&self) -> bool {
        false
    }

    fn add_input(&mut self, _page: Page) -> QuarryResult<()> {
        Err(QuarryError::invariant("source operators take no input"))
    }

    fn finish(&mut self) {
        self.finished = true;
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn get_output(&mut self) -> QuarryResult<Option<Page>> {
        if self.finished {
            return Ok(None);
        }
        let Some((slice, mut doc)) = self.next_slice() else {
            self.finished = true;
            return Ok(None);
        };
        let mut docs = Vec::with_capacity(self.page_size.min((slice.max_doc - doc) as usize));
        while doc < slice.max_doc && docs.len() < self.page_size {
            if self.matcher.matches(DocRef::new(slice.shard, slice.segment, doc)) {
                docs.push(doc);
            }
            doc += 1;
        }
        if doc < slice.max_doc {
            self.current = Some((slice, doc));
        }
        if docs.is_empty() {
            return Ok(None);
        }
        let block = self.factory.doc_vector(slice.shard, slice.segment, &docs)?;
        Page::new(vec![block]).map(Some)
    }

    fn close(&mut self) {
        self.finished = true;
        self.current = None;
    }

    fn display(&self) -> String {
        format!("DocSourceOperator[page_size = {}]", self.page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::memory::InMemorySegment;
    use crate::loader::SegmentDocValues;

    fn shard(sizes: &[u32]) -> ShardContext {
        ShardContext::new(
            sizes
                .iter()
                .map(|&n| Arc::new(InMemorySegment::new(n)) as Arc<dyn SegmentDocValues>)
                .collect(),
        )
    }

    fn drain(op: &mut BoxedOperator) -> Vec<DocRef> {
        let mut out = Vec::new();
        while !op.is_finished() {
            if let Some(page) = op.get_output().unwrap() {
                let docs = page.block(0).unwrap().docs().unwrap().clone();
                out.extend((0..docs.len()).map(|i| docs.get(i)));
            }
        }
        out
    }

    #[test]
    fn test_local_source_chunks_longs() {
        let factory = BlockFactory::unlimited();
        let values: Vec<i64> = (0..10).collect();
        let mut source = LocalSourceOperator::longs(&factory, &values, 4).unwrap();
        let sizes: Vec<usize> = std::iter::from_fn(|| source.get_output().unwrap())
            .map(|p| p.position_count())
            .collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert!(source.is_finished());
        assert!(source.add_input(Page::new(vec![factory.constant_long(1, 1).unwrap()]).unwrap()).is_err());
    }

    #[test]
    fn test_doc_source_splits_and_filters() {
        let shards = vec![shard(&[10, 3]), shard(&[5])];
        let even = |doc: DocRef| doc.doc % 2 == 0;
        let factory = DocSourceFactory::new(&shards, Arc::new(even), 2, 4).unwrap();
        // 18 docs over 2 tasks: slices of 9.
        assert_eq!(factory.remaining_slices(), 4);

        let ctx = DriverContext::new(BlockFactory::unlimited());
        let mut first = factory.get(&ctx).unwrap();
        let mut second = factory.get(&ctx).unwrap();
        let mut docs = drain(&mut first);
        docs.extend(drain(&mut second));
        docs.sort_by_key(|d| (d.shard, d.segment, d.doc));
        let expected: Vec<DocRef> = [(0, 0, 10), (0, 1, 3), (1, 0, 5)]
            .into_iter()
            .flat_map(|(shard, segment, n)| (0..n).filter(|d| d % 2 == 0).map(move |d| DocRef::new(shard, segment, d)))
            .collect();
        assert_eq!(docs, expected);
        assert_eq!(factory.remaining_slices(), 0);
    }

    #[test]
    fn test_doc_source_rejects_zero_concurrency() {
        assert!(DocSourceFactory::new(&[], Arc::new(MatchAll), 0, 10).is_err());
    }
}
