//! Grouping on a dictionary-encoded keyword column by segment ordinal.

use std::collections::BTreeMap;
use std::fmt;

use common_error::{QuarryError, QuarryResult};
use log::debug;

use super::context::DriverContext;
use super::hash_aggregation::HashAggregationOperator;
use super::values_reader::ValuesSourceReaderOperator;
use super::{not_accepting, Operator};
use crate::aggregation::{AggregatorMode, AggregatorSpec, GroupingAggregator};
use crate::data::{Block, DocColumn, ElementType, Page};
use crate::grouping::GroupSpec;
use crate::loader::{LoaderRef, ShardContext, SortedSetDocValues};
use crate::memory::TrackedArray;

/// Group id reserved for documents without a key.
const NULL_GROUP: u32 = 0;

/// Per-segment state of the ordinals path. Group ids are `ord + 1`.
struct SegmentState {
    ordinals: Box<dyn SortedSetDocValues>,
    last_doc: Option<u32>,
    seen: TrackedArray<bool>,
    aggregators: Vec<GroupingAggregator>,
}

impl fmt::Debug for SegmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentState")
            .field("terms", &self.ordinals.dictionary().len())
            .field("last_doc", &self.last_doc)
            .finish()
    }
}

/// The fallback path: load the key, then hash it.
#[derive(Debug)]
struct ValuesAggregator {
    reader: ValuesSourceReaderOperator,
    hash: HashAggregationOperator,
}

/// Groups rows by a keyword column and emits INITIAL-mode intermediate
/// state keyed by the term bytes.
///
/// Pages whose docs are sorted within one segment are grouped by ordinal
/// when the key loader exposes ordinals. Any other page falls back to
/// loading the key and hashing it. Both paths merge into a single result
/// on finish.
#[derive(Debug)]
pub struct OrdinalsGroupingOperator {
    ctx: DriverContext,
    key_loader: LoaderRef,
    shards: Vec<ShardContext>,
    doc_channel: usize,
    aggregators: Vec<AggregatorSpec>,
    segments: BTreeMap<(u32, u32), SegmentState>,
    fallback: Option<ValuesAggregator>,
    finished: bool,
    emitted: bool,
}

impl OrdinalsGroupingOperator {
    pub fn new(
        ctx: DriverContext,
        key_loader: LoaderRef,
        shards: Vec<ShardContext>,
        doc_channel: usize,
        aggregators: Vec<AggregatorSpec>,
    ) -> QuarryResult<Self> {
        if key_loader.element_type() != ElementType::BytesRef {
            return Err(QuarryError::invalid_argument(format!(
                "ordinals grouping needs a BYTES_REF key, got {}",
                key_loader.element_type()
            )));
        }
        if let Some(spec) = aggregators.iter().find(|s| s.mode != AggregatorMode::Initial) {
            return Err(QuarryError::invalid_argument(format!(
                "ordinals grouping runs aggregators in Initial mode, got {:?}",
                spec.mode
            )));
        }
        // Validates channel counts up front.
        for spec in &aggregators {
            GroupingAggregator::new(spec, ctx.block_factory())?;
        }
        Ok(Self {
            ctx,
            key_loader,
            shards,
            doc_channel,
            aggregators,
            segments: BTreeMap::new(),
            fallback: None,
            finished: false,
            emitted: false,
        })
    }

    /// Segments grouped through the ordinals path so far.
    pub fn ordinal_segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Whether any page went through the load-and-hash path.
    pub fn used_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    fn add_ordinals_page(&mut self, page: &Page, docs: &DocColumn, shard: u32, segment: u32) -> QuarryResult<()> {
        let factory = self.ctx.block_factory().clone();
        let state = match self.segments.entry((shard, segment)) {
            std::collections::btree_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::btree_map::Entry::Vacant(e) => {
                let values = shard_segment(&self.shards, shard, segment)?;
                let aggregators = self
                    .aggregators
                    .iter()
                    .map(|spec| GroupingAggregator::new(spec, &factory))
                    .collect::<QuarryResult<Vec<_>>>()?;
                e.insert(SegmentState {
                    ordinals: self.key_loader.ordinals(values)?,
                    last_doc: None,
                    seen: TrackedArray::new(factory.accountant().clone(), "ordinals_seen"),
                    aggregators,
                })
            }
        };

        let ids = docs.docs();
        if ids.first().zip(state.last_doc).is_some_and(|(&first, last)| first < last) {
            let values = shard_segment(&self.shards, shard, segment)?;
            state.ordinals = self.key_loader.ordinals(values)?;
        }

        let mut groups = factory.int_builder(ids.len())?;
        for &doc in ids {
            let count = if state.ordinals.advance_exact(doc)? {
                state.ordinals.doc_value_count()
            } else {
                0
            };
            match count {
                0 => {
                    mark_seen(&mut state.seen, NULL_GROUP)?;
                    groups.append_value(NULL_GROUP as i32)?;
                }
                1 => {
                    let group = state.ordinals.next_ord() + 1;
                    mark_seen(&mut state.seen, group)?;
                    groups.append_value(group as i32)?;
                }
                _ => {
                    groups.begin_position_entry()?;
                    for _ in 0..count {
                        let group = state.ordinals.next_ord() + 1;
                        mark_seen(&mut state.seen, group)?;
                        groups.append_value(group as i32)?;
                    }
                    groups.end_position_entry()?;
                }
            }
        }
        state.last_doc = ids.last().copied().or(state.last_doc);

        let groups = groups.build()?;
        for aggregator in &mut state.aggregators {
            aggregator.process_page(&groups, page, self.ctx.warnings())?;
        }
        Ok(())
    }

    fn add_fallback_page(&mut self, page: Page) -> QuarryResult<()> {
        if self.fallback.is_none() {
            let key_channel = page.block_count();
            debug!("ordinals grouping falls back to hashing on channel {key_channel}");
            self.fallback = Some(ValuesAggregator {
                reader: ValuesSourceReaderOperator::new(
                    self.ctx.block_factory().clone(),
                    self.shards.clone(),
                    vec![self.key_loader.clone()],
                    self.doc_channel,
                ),
                hash: HashAggregationOperator::new(
                    &[GroupSpec::new(key_channel, ElementType::BytesRef)],
                    &self.aggregators,
                    self.ctx.clone(),
                )?,
            });
        }
        let Some(fallback) = self.fallback.as_mut() else {
            return Err(QuarryError::internal("fallback aggregator missing"));
        };
        fallback.reader.add_input(page)?;
        if let Some(loaded) = fallback.reader.get_output()? {
            fallback.hash.add_input(loaded)?;
        }
        Ok(())
    }

    /// Emit every segment's groups and the fallback's groups into one
    /// intermediate merge keyed by term bytes.
    fn merge(&mut self) -> QuarryResult<Page> {
        let factory = self.ctx.block_factory().clone();
        let mut offset = 1;
        let mut merge_specs = Vec::with_capacity(self.aggregators.len());
        for spec in &self.aggregators {
            let merged = AggregatorSpec::intermediate(spec.function, AggregatorMode::Intermediate, offset, &factory);
            offset += merged.channels.len();
            merge_specs.push(merged);
        }
        let mut merge = HashAggregationOperator::new(
            &[GroupSpec::new(0, ElementType::BytesRef)],
            &merge_specs,
            self.ctx.clone(),
        )?;

        for (key, state) in std::mem::take(&mut self.segments) {
            let selected: Vec<u32> = (0..state.seen.len() as u32).filter(|&g| state.seen.get(g as usize)).collect();
            let dictionary = state.ordinals.dictionary();
            let mut keys = factory.bytes_builder(selected.len())?;
            for &group in &selected {
                if group == NULL_GROUP {
                    keys.append_null()?;
                } else {
                    let term = dictionary.lookup(group - 1).ok_or_else(|| {
                        QuarryError::invariant(format!("ordinal {} missing from segment {key:?}", group - 1))
                    })?;
                    keys.append_value(term)?;
                }
            }
            let mut blocks: Vec<Block> = vec![keys.build()?];
            for aggregator in &state.aggregators {
                blocks.extend(aggregator.evaluate(&selected, &factory)?);
            }
            merge.add_input(Page::with_position_count(selected.len(), blocks)?)?;
        }

        if let Some(mut fallback) = self.fallback.take() {
            fallback.hash.finish();
            while let Some(page) = fallback.hash.get_output()? {
                merge.add_input(page)?;
            }
            fallback.reader.close();
            fallback.hash.close();
        }

        merge.finish();
        let out = merge.get_output()?;
        merge.close();
        out.ok_or_else(|| QuarryError::internal("intermediate merge produced no page"))
    }
}

fn shard_segment(
    shards: &[ShardContext],
    shard: u32,
    segment: u32,
) -> QuarryResult<&dyn crate::loader::SegmentDocValues> {
    let context = shards
        .get(shard as usize)
        .ok_or_else(|| QuarryError::invalid_argument(format!("no shard {shard}")))?;
    Ok(context.segment(segment)?.as_ref())
}

fn mark_seen(seen: &mut TrackedArray<bool>, group: u32) -> QuarryResult<()> {
    seen.grow_to(group as usize + 1)?;
    seen.set(group as usize, true)
}

impl Operator for OrdinalsGroupingOperator {
    fn name(&self) -> &'static str {
        "OrdinalsGroupingOperator"
    }

    fn needs_input(&self) -> bool {
        !self.finished
    }

    fn add_input(&mut self, page: Page) -> QuarryResult<()> {
        if self.finished {
            return Err(not_accepting(self.name()));
        }
        let docs = page.block(self.doc_channel)?.docs()?;
        match docs.single_segment() {
            Some((shard, segment)) if self.key_loader.supports_ordinals() && docs.is_single_segment_sorted() => {
                self.add_ordinals_page(&page, docs, shard, segment)
            }
            _ => self.add_fallback_page(page),
        }
    }

    fn finish(&mut self) {
        self.finished = true;
    }

    fn is_finished(&self) -> bool {
        self.finished && self.emitted
    }

    fn get_output(&mut self) -> QuarryResult<Option<Page>> {
        if !self.finished || self.emitted {
            return Ok(None);
        }
        self.emitted = true;
        self.merge().map(Some)
    }

    fn close(&mut self) {
        self.emitted = true;
        self.segments.clear();
        if let Some(mut fallback) = self.fallback.take() {
            fallback.reader.close();
            fallback.hash.close();
        }
    }

    fn display(&self) -> String {
        let aggregators: Vec<String> = self.aggregators.iter().map(|s| format!("{:?}", s.function)).collect();
        format!(
            "OrdinalsGroupingOperator[key = {:?}, aggregators = [{}]]",
            self.key_loader,
            aggregators.join(", ")
        )
    }
}
