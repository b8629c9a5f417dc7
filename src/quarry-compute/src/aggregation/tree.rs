//! Row-at-a-time bucket aggregators and their partial/final reduction.
//!
//! An [`Aggregator`] collects rows into buckets addressed by an owning
//! bucket ordinal, so sub-aggregators nest: a filters aggregator with `n`
//! filters hands its children bucket `owning * n + filter`. Results come
//! back as [`InternalAggregation`] values which reduce across partitions.
//!
//! [`AdaptingAggregator`] wraps a delegate and rewrites its results. The
//! wrapper stores the logical parent itself and builds the delegate's
//! sub-aggregators with the wrapper as their parent, so profiles show the
//! tree that was requested rather than the one that executes.

use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;
use common_display::TreeNode;
use common_error::{QuarryError, QuarryResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::data::{Page, Scalar};
use crate::memory::{BlockFactory, TrackedArray};

/// A row predicate of a filters aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    MatchAll,
    /// Some value of `channel` equals `value`.
    Term { channel: usize, value: Scalar },
    /// Some numeric value of `channel` lies in `[from, to)`.
    Range {
        channel: usize,
        from: Option<f64>,
        to: Option<f64>,
    },
}

impl Filter {
    pub fn matches(&self, page: &Page, position: usize) -> QuarryResult<bool> {
        Ok(match self {
            Self::MatchAll => true,
            Self::Term { channel, value } => page.block(*channel)?.values_at(position).contains(value),
            Self::Range { channel, from, to } => page
                .block(*channel)?
                .values_at(position)
                .iter()
                .filter_map(Scalar::as_f64)
                .any(|v| from.map_or(true, |f| v >= f) && to.map_or(true, |t| v < t)),
        })
    }
}

/// One bucket of a multi-bucket result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
    pub key: String,
    pub doc_count: i64,
    pub aggregations: Vec<InternalAggregation>,
}

/// A range bucket with its bounds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeBucket {
    pub key: String,
    pub from: Option<f64>,
    pub to: Option<f64>,
    pub doc_count: i64,
    pub aggregations: Vec<InternalAggregation>,
}

/// Shard-level result of one aggregator for one owning bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InternalAggregation {
    Filters { name: String, buckets: Vec<Bucket> },
    Range { name: String, buckets: Vec<RangeBucket> },
    Sum { name: String, value: f64 },
}

/// Reduction settings and the bucket budget of one reduce phase.
#[derive(Debug, Clone)]
pub struct ReduceContext {
    final_reduce: bool,
    max_buckets: usize,
    buckets: usize,
}

impl ReduceContext {
    /// A partial reduce: merges without charging buckets.
    pub fn partial() -> Self {
        Self {
            final_reduce: false,
            max_buckets: usize::MAX,
            buckets: 0,
        }
    }

    /// The final reduce, failing once more than `max_buckets` are built.
    pub fn final_reduce(max_buckets: usize) -> Self {
        Self {
            final_reduce: true,
            max_buckets,
            buckets: 0,
        }
    }

    pub fn is_final(&self) -> bool {
        self.final_reduce
    }

    /// Buckets charged so far.
    pub fn bucket_count(&self) -> usize {
        self.buckets
    }

    fn consume_buckets(&mut self, count: usize) -> QuarryResult<()> {
        if !self.final_reduce {
            return Ok(());
        }
        self.buckets += count;
        if self.buckets > self.max_buckets {
            return Err(QuarryError::execution(format!(
                "too many buckets: {} exceeds the limit of {}",
                self.buckets, self.max_buckets
            )));
        }
        Ok(())
    }
}

impl InternalAggregation {
    pub fn name(&self) -> &str {
        match self {
            Self::Filters { name, .. } | Self::Range { name, .. } | Self::Sum { name, .. } => name,
        }
    }

    /// Merge results of the same aggregator from several partitions.
    pub fn reduce(parts: Vec<InternalAggregation>, ctx: &mut ReduceContext) -> QuarryResult<InternalAggregation> {
        let mut parts = parts.into_iter();
        let first = parts
            .next()
            .ok_or_else(|| QuarryError::invalid_argument("nothing to reduce"))?;
        let rest: Vec<_> = parts.collect();
        if let Some(other) = rest.iter().find(|p| p.name() != first.name()) {
            return Err(QuarryError::invalid_argument(format!(
                "cannot reduce [{}] with [{}]",
                first.name(),
                other.name()
            )));
        }
        match first {
            Self::Sum { name, value } => {
                let mut total = value;
                for part in rest {
                    match part {
                        Self::Sum { value, .. } => total += value,
                        other => return Err(mismatch(&name, &other)),
                    }
                }
                Ok(Self::Sum { name, value: total })
            }
            Self::Filters { name, buckets } => {
                let mut all = vec![buckets];
                for part in rest {
                    match part {
                        Self::Filters { buckets, .. } => all.push(buckets),
                        other => return Err(mismatch(&name, &other)),
                    }
                }
                let merged = merge_buckets(all, |b| (b.key.clone(), b.doc_count, b.aggregations), ctx)?
                    .into_iter()
                    .map(|(key, doc_count, aggregations)| Bucket {
                        key,
                        doc_count,
                        aggregations,
                    })
                    .collect();
                Ok(Self::Filters { name, buckets: merged })
            }
            Self::Range { name, buckets } => {
                let bounds: AHashMap<String, (Option<f64>, Option<f64>)> =
                    buckets.iter().map(|b| (b.key.clone(), (b.from, b.to))).collect();
                let mut all = vec![buckets];
                for part in rest {
                    match part {
                        Self::Range { buckets, .. } => all.push(buckets),
                        other => return Err(mismatch(&name, &other)),
                    }
                }
                let merged = merge_buckets(all, |b| (b.key.clone(), b.doc_count, b.aggregations), ctx)?
                    .into_iter()
                    .map(|(key, doc_count, aggregations)| {
                        let (from, to) = bounds.get(&key).copied().unwrap_or((None, None));
                        RangeBucket {
                            key,
                            from,
                            to,
                            doc_count,
                            aggregations,
                        }
                    })
                    .collect();
                Ok(Self::Range { name, buckets: merged })
            }
        }
    }
}

fn mismatch(name: &str, other: &InternalAggregation) -> QuarryError {
    QuarryError::invalid_argument(format!("[{name}] has mixed result types, found {other:?}"))
}

/// Merge bucket lists by key, keeping first-seen key order and reducing
/// the sub-aggregations of equal keys.
fn merge_buckets<B>(
    lists: Vec<Vec<B>>,
    split: impl Fn(B) -> (String, i64, Vec<InternalAggregation>),
    ctx: &mut ReduceContext,
) -> QuarryResult<Vec<(String, i64, Vec<InternalAggregation>)>> {
    let mut order: Vec<String> = Vec::new();
    let mut merged: AHashMap<String, (i64, Vec<Vec<InternalAggregation>>)> = AHashMap::new();
    for bucket in lists.into_iter().flatten() {
        let (key, doc_count, aggs) = split(bucket);
        let entry = merged.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            (0, Vec::new())
        });
        entry.0 += doc_count;
        entry.1.push(aggs);
    }
    ctx.consume_buckets(order.len())?;

    let mut out = Vec::with_capacity(order.len());
    for key in order {
        let Some((doc_count, sub_lists)) = merged.remove(&key) else {
            continue;
        };
        out.push((key, doc_count, reduce_sub_aggregations(sub_lists, ctx)?));
    }
    Ok(out)
}

/// Reduce per-bucket sub-aggregation lists by aggregation name.
fn reduce_sub_aggregations(
    lists: Vec<Vec<InternalAggregation>>,
    ctx: &mut ReduceContext,
) -> QuarryResult<Vec<InternalAggregation>> {
    let mut order: Vec<String> = Vec::new();
    let mut by_name: AHashMap<String, Vec<InternalAggregation>> = AHashMap::new();
    for agg in lists.into_iter().flatten() {
        let name = agg.name().to_string();
        by_name
            .entry(name.clone())
            .or_insert_with(|| {
                order.push(name);
                Vec::new()
            })
            .push(agg);
    }
    order
        .into_iter()
        .filter_map(|name| by_name.remove(&name))
        .map(|parts| InternalAggregation::reduce(parts, ctx))
        .collect()
}

/// Profile view of an aggregator tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileNode {
    pub label: String,
    pub debug: Map<String, Value>,
    pub children: Vec<ProfileNode>,
}

impl TreeNode for ProfileNode {
    fn name(&self) -> &str {
        &self.label
    }

    fn children(&self) -> Vec<&dyn TreeNode> {
        self.children.iter().map(|c| c as &dyn TreeNode).collect()
    }

    fn details(&self) -> Option<String> {
        (!self.debug.is_empty()).then(|| Value::Object(self.debug.clone()).to_string())
    }
}

/// A row-at-a-time bucket collector.
pub trait Aggregator: Send + fmt::Debug {
    fn name(&self) -> &str;

    /// Short type name used in profiles.
    fn type_name(&self) -> &'static str;

    /// Name of the logical parent, `None` at the top level.
    fn parent(&self) -> Option<&str>;

    fn sub_aggregators(&self) -> &[Box<dyn Aggregator>];

    /// Collect row `position` of `page` into `owning_bucket`.
    fn collect(&mut self, page: &Page, position: usize, owning_bucket: usize) -> QuarryResult<()>;

    /// One result per owning bucket.
    fn build_results(&self, owning_buckets: &[usize]) -> QuarryResult<Vec<InternalAggregation>>;

    /// The result for a bucket that collected nothing.
    fn build_empty(&self) -> QuarryResult<InternalAggregation>;

    fn collect_debug_info(&self, _info: &mut Map<String, Value>) {}

    fn profile(&self) -> ProfileNode {
        let mut debug = Map::new();
        self.collect_debug_info(&mut debug);
        ProfileNode {
            label: format!("{}[{}]", self.type_name(), self.name()),
            debug,
            children: self.sub_aggregators().iter().map(|a| a.profile()).collect(),
        }
    }
}

/// Aggregation request tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AggregationBuilder {
    Filters {
        name: String,
        filters: Vec<(String, Filter)>,
        #[serde(default)]
        subs: Vec<AggregationBuilder>,
    },
    Range {
        name: String,
        channel: usize,
        ranges: Vec<RangeSpec>,
        #[serde(default)]
        subs: Vec<AggregationBuilder>,
    },
    Sum {
        name: String,
        channel: usize,
    },
}

/// One requested range, `[from, to)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeSpec {
    pub key: Option<String>,
    pub from: Option<f64>,
    pub to: Option<f64>,
}

impl RangeSpec {
    pub fn new(from: Option<f64>, to: Option<f64>) -> Self {
        Self { key: None, from, to }
    }

    /// The explicit key, or `from-to` with `*` for an open end.
    pub fn key(&self) -> String {
        if let Some(key) = &self.key {
            return key.clone();
        }
        let bound = |b: Option<f64>| b.map_or_else(|| "*".to_string(), |v| v.to_string());
        format!("{}-{}", bound(self.from), bound(self.to))
    }
}

impl AggregationBuilder {
    pub fn name(&self) -> &str {
        match self {
            Self::Filters { name, .. } | Self::Range { name, .. } | Self::Sum { name, .. } => name,
        }
    }

    /// Build the aggregator with `parent` as its logical parent.
    pub fn build(&self, parent: Option<&str>, factory: &BlockFactory) -> QuarryResult<Box<dyn Aggregator>> {
        Ok(match self {
            Self::Filters { name, filters, subs } => {
                let subs = build_all(subs, Some(name), factory)?;
                Box::new(FiltersAggregator::new(name, parent, filters.clone(), subs, factory)?)
            }
            Self::Range {
                name,
                channel,
                ranges,
                subs,
            } => Box::new(range_aggregator(name, parent, *channel, ranges.clone(), subs, factory)?),
            Self::Sum { name, channel } => Box::new(SumAggregator::new(name, parent, *channel, factory)),
        })
    }
}

fn build_all(
    builders: &[AggregationBuilder],
    parent: Option<&str>,
    factory: &BlockFactory,
) -> QuarryResult<Vec<Box<dyn Aggregator>>> {
    builders.iter().map(|b| b.build(parent, factory)).collect()
}

/// One bucket per filter; a row lands in every filter it matches.
#[derive(Debug)]
pub struct FiltersAggregator {
    name: String,
    parent: Option<String>,
    filters: Vec<(String, Filter)>,
    subs: Vec<Box<dyn Aggregator>>,
    doc_counts: TrackedArray<i64>,
}

impl FiltersAggregator {
    pub fn new(
        name: &str,
        parent: Option<&str>,
        filters: Vec<(String, Filter)>,
        subs: Vec<Box<dyn Aggregator>>,
        factory: &BlockFactory,
    ) -> QuarryResult<Self> {
        if filters.is_empty() {
            return Err(QuarryError::invalid_argument(format!("[{name}] needs at least one filter")));
        }
        Ok(Self {
            name: name.to_string(),
            parent: parent.map(str::to_string),
            filters,
            subs,
            doc_counts: TrackedArray::new(Arc::clone(factory.accountant()), "filters aggregator"),
        })
    }

    fn bucket_ord(&self, owning_bucket: usize, filter: usize) -> usize {
        owning_bucket * self.filters.len() + filter
    }
}

impl Aggregator for FiltersAggregator {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_name(&self) -> &'static str {
        "filters"
    }

    fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    fn sub_aggregators(&self) -> &[Box<dyn Aggregator>] {
        &self.subs
    }

    fn collect(&mut self, page: &Page, position: usize, owning_bucket: usize) -> QuarryResult<()> {
        for filter in 0..self.filters.len() {
            if !self.filters[filter].1.matches(page, position)? {
                continue;
            }
            let ord = self.bucket_ord(owning_bucket, filter);
            self.doc_counts.update(ord, |c| c + 1)?;
            for sub in &mut self.subs {
                sub.collect(page, position, ord)?;
            }
        }
        Ok(())
    }

    fn build_results(&self, owning_buckets: &[usize]) -> QuarryResult<Vec<InternalAggregation>> {
        let ords: Vec<usize> = owning_buckets
            .iter()
            .flat_map(|&owning| (0..self.filters.len()).map(move |f| (owning, f)))
            .map(|(owning, f)| self.bucket_ord(owning, f))
            .collect();
        let mut sub_results = self
            .subs
            .iter()
            .map(|sub| sub.build_results(&ords).map(Vec::into_iter))
            .collect::<QuarryResult<Vec<_>>>()?;

        let mut ord_iter = ords.iter();
        let mut results = Vec::with_capacity(owning_buckets.len());
        for _ in owning_buckets {
            let mut buckets = Vec::with_capacity(self.filters.len());
            for (key, _) in &self.filters {
                let Some(&ord) = ord_iter.next() else {
                    return Err(QuarryError::internal("bucket ordinals exhausted"));
                };
                let aggregations = sub_results
                    .iter_mut()
                    .map(|r| r.next().ok_or_else(|| QuarryError::internal("missing sub-aggregation result")))
                    .collect::<QuarryResult<Vec<_>>>()?;
                buckets.push(Bucket {
                    key: key.clone(),
                    doc_count: self.doc_counts.get(ord),
                    aggregations,
                });
            }
            results.push(InternalAggregation::Filters {
                name: self.name.clone(),
                buckets,
            });
        }
        Ok(results)
    }

    fn build_empty(&self) -> QuarryResult<InternalAggregation> {
        let buckets = self
            .filters
            .iter()
            .map(|(key, _)| -> QuarryResult<Bucket> {
                Ok(Bucket {
                    key: key.clone(),
                    doc_count: 0,
                    aggregations: self.subs.iter().map(|s| s.build_empty()).collect::<QuarryResult<_>>()?,
                })
            })
            .collect::<QuarryResult<_>>()?;
        Ok(InternalAggregation::Filters {
            name: self.name.clone(),
            buckets,
        })
    }

    fn collect_debug_info(&self, info: &mut Map<String, Value>) {
        info.insert("filters".to_string(), Value::from(self.filters.len()));
    }
}

/// Sum of a numeric channel per owning bucket.
#[derive(Debug)]
pub struct SumAggregator {
    name: String,
    parent: Option<String>,
    channel: usize,
    sums: TrackedArray<f64>,
}

impl SumAggregator {
    pub fn new(name: &str, parent: Option<&str>, channel: usize, factory: &BlockFactory) -> Self {
        Self {
            name: name.to_string(),
            parent: parent.map(str::to_string),
            channel,
            sums: TrackedArray::new(Arc::clone(factory.accountant()), "sum aggregator"),
        }
    }
}

impl Aggregator for SumAggregator {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_name(&self) -> &'static str {
        "sum"
    }

    fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    fn sub_aggregators(&self) -> &[Box<dyn Aggregator>] {
        &[]
    }

    fn collect(&mut self, page: &Page, position: usize, owning_bucket: usize) -> QuarryResult<()> {
        let block = page.block(self.channel)?;
        let mut total = 0.0;
        for value in block.values_at(position) {
            total += value.as_f64().ok_or_else(|| {
                QuarryError::invariant(format!("sum [{}] cannot add {} values", self.name, value.element_type()))
            })?;
        }
        self.sums.update(owning_bucket, |s| s + total)
    }

    fn build_results(&self, owning_buckets: &[usize]) -> QuarryResult<Vec<InternalAggregation>> {
        Ok(owning_buckets
            .iter()
            .map(|&b| InternalAggregation::Sum {
                name: self.name.clone(),
                value: self.sums.get(b),
            })
            .collect())
    }

    fn build_empty(&self) -> QuarryResult<InternalAggregation> {
        Ok(InternalAggregation::Sum {
            name: self.name.clone(),
            value: 0.0,
        })
    }
}

/// Rewrites a delegate's results into another result type.
pub trait Adapter: Send + fmt::Debug {
    fn type_name(&self) -> &'static str;

    fn adapt(&self, delegate_result: InternalAggregation) -> QuarryResult<InternalAggregation>;
}

/// Collects through a delegate aggregator and adapts what it builds.
///
/// The delegate reports the same parent as this aggregator; its
/// sub-aggregators were built with this aggregator as their parent.
#[derive(Debug)]
pub struct AdaptingAggregator<A: Adapter> {
    parent: Option<String>,
    delegate: Box<dyn Aggregator>,
    adapter: A,
}

impl<A: Adapter> AdaptingAggregator<A> {
    /// `delegate` receives the sub-aggregators, built with this
    /// aggregator's `name` as their parent.
    pub fn new(
        name: &str,
        parent: Option<&str>,
        subs: &[AggregationBuilder],
        factory: &BlockFactory,
        adapter: A,
        delegate: impl FnOnce(Vec<Box<dyn Aggregator>>) -> QuarryResult<Box<dyn Aggregator>>,
    ) -> QuarryResult<Self> {
        let subs = build_all(subs, Some(name), factory)?;
        let delegate = delegate(subs)?;
        if delegate.parent() != parent {
            return Err(QuarryError::invariant(format!(
                "delegate of [{name}] has parent {:?}, expected {parent:?}",
                delegate.parent()
            )));
        }
        Ok(Self {
            parent: parent.map(str::to_string),
            delegate,
            adapter,
        })
    }

    pub fn delegate(&self) -> &dyn Aggregator {
        self.delegate.as_ref()
    }
}

impl<A: Adapter> Aggregator for AdaptingAggregator<A> {
    fn name(&self) -> &str {
        self.delegate.name()
    }

    fn type_name(&self) -> &'static str {
        self.adapter.type_name()
    }

    fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    fn sub_aggregators(&self) -> &[Box<dyn Aggregator>] {
        self.delegate.sub_aggregators()
    }

    fn collect(&mut self, page: &Page, position: usize, owning_bucket: usize) -> QuarryResult<()> {
        self.delegate.collect(page, position, owning_bucket)
    }

    fn build_results(&self, owning_buckets: &[usize]) -> QuarryResult<Vec<InternalAggregation>> {
        self.delegate
            .build_results(owning_buckets)?
            .into_iter()
            .map(|r| self.adapter.adapt(r))
            .collect()
    }

    fn build_empty(&self) -> QuarryResult<InternalAggregation> {
        self.adapter.adapt(self.delegate.build_empty()?)
    }

    fn collect_debug_info(&self, info: &mut Map<String, Value>) {
        info.insert("delegate".to_string(), Value::from(self.delegate.type_name()));
        let mut delegate_debug = Map::new();
        self.delegate.collect_debug_info(&mut delegate_debug);
        info.insert("delegate_debug".to_string(), Value::Object(delegate_debug));
    }
}

/// Turns the buckets of a filters aggregation over ranges back into range
/// buckets.
#[derive(Debug, Clone)]
pub struct RangeAdapter {
    ranges: Vec<RangeSpec>,
}

impl Adapter for RangeAdapter {
    fn type_name(&self) -> &'static str {
        "range"
    }

    fn adapt(&self, delegate_result: InternalAggregation) -> QuarryResult<InternalAggregation> {
        let InternalAggregation::Filters { name, buckets } = delegate_result else {
            return Err(QuarryError::invariant(format!(
                "range adapter expects filters results, got {delegate_result:?}"
            )));
        };
        if buckets.len() != self.ranges.len() {
            return Err(QuarryError::invariant(format!(
                "[{name}] built {} buckets for {} ranges",
                buckets.len(),
                self.ranges.len()
            )));
        }
        let buckets = buckets
            .into_iter()
            .zip(&self.ranges)
            .map(|(bucket, range)| RangeBucket {
                key: bucket.key,
                from: range.from,
                to: range.to,
                doc_count: bucket.doc_count,
                aggregations: bucket.aggregations,
            })
            .collect();
        Ok(InternalAggregation::Range { name, buckets })
    }
}

/// A range aggregation executed as a filters aggregation with one range
/// filter per requested range.
pub fn range_aggregator(
    name: &str,
    parent: Option<&str>,
    channel: usize,
    ranges: Vec<RangeSpec>,
    subs: &[AggregationBuilder],
    factory: &BlockFactory,
) -> QuarryResult<AdaptingAggregator<RangeAdapter>> {
    let filters: Vec<(String, Filter)> = ranges
        .iter()
        .map(|r| {
            (
                r.key(),
                Filter::Range {
                    channel,
                    from: r.from,
                    to: r.to,
                },
            )
        })
        .collect();
    AdaptingAggregator::new(name, parent, subs, factory, RangeAdapter { ranges }, |subs| {
        Ok(Box::new(FiltersAggregator::new(name, parent, filters, subs, factory)?) as Box<dyn Aggregator>)
    })
}

#[cfg(test)]
mod tests {
    use common_display::DisplayTree;

    use super::*;

    fn page(factory: &BlockFactory) -> Page {
        Page::new(vec![
            factory.long_vector(vec![1, 5, 12, 30]).unwrap(),
            factory.double_vector(vec![1.0, 2.0, 3.0, 4.0]).unwrap(),
        ])
        .unwrap()
    }

    fn range_request() -> AggregationBuilder {
        AggregationBuilder::Range {
            name: "price".to_string(),
            channel: 0,
            ranges: vec![RangeSpec::new(None, Some(10.0)), RangeSpec::new(Some(10.0), None)],
            subs: vec![AggregationBuilder::Sum {
                name: "total".to_string(),
                channel: 1,
            }],
        }
    }

    fn collect_all(agg: &mut dyn Aggregator, page: &Page) {
        for p in 0..page.position_count() {
            agg.collect(page, p, 0).unwrap();
        }
    }

    #[test]
    fn test_range_adapts_filters_results() {
        let factory = BlockFactory::unlimited();
        let mut agg = range_request().build(Some("outer"), &factory).unwrap();
        collect_all(agg.as_mut(), &page(&factory));

        let results = agg.build_results(&[0]).unwrap();
        let InternalAggregation::Range { name, buckets } = &results[0] else {
            panic!("expected range result, got {results:?}");
        };
        assert_eq!(name, "price");
        assert_eq!(buckets[0].key, "*-10");
        assert_eq!(buckets[0].doc_count, 2);
        assert_eq!(buckets[1].to, None);
        assert_eq!(
            buckets[1].aggregations,
            vec![InternalAggregation::Sum {
                name: "total".to_string(),
                value: 7.0
            }]
        );
    }

    #[test]
    fn test_adapting_keeps_logical_parents() {
        let factory = BlockFactory::unlimited();
        let agg = range_request().build(Some("outer"), &factory).unwrap();
        assert_eq!(agg.parent(), Some("outer"));
        assert_eq!(agg.sub_aggregators()[0].parent(), Some("price"));

        let profile = agg.profile();
        assert_eq!(profile.label, "range[price]");
        assert_eq!(profile.debug["delegate"], Value::from("filters"));
        assert_eq!(profile.debug["delegate_debug"]["filters"], Value::from(2));
        assert_eq!(profile.children[0].label, "sum[total]");
        let rendered = DisplayTree::new(&profile).to_string();
        assert!(rendered.starts_with("range[price] ("));
        assert!(rendered.ends_with("└─ sum[total]\n"));
    }

    #[test]
    fn test_reduce_merges_and_guards_buckets() {
        let factory = BlockFactory::unlimited();
        let request = range_request();
        let mut left = request.build(None, &factory).unwrap();
        let mut right = request.build(None, &factory).unwrap();
        let data = page(&factory);
        collect_all(left.as_mut(), &data);
        collect_all(right.as_mut(), &data);
        let parts = vec![
            left.build_results(&[0]).unwrap().remove(0),
            right.build_results(&[0]).unwrap().remove(0),
        ];

        let mut partial = ReduceContext::partial();
        let merged = InternalAggregation::reduce(parts.clone(), &mut partial).unwrap();
        assert_eq!(partial.bucket_count(), 0);
        let InternalAggregation::Range { buckets, .. } = &merged else {
            panic!("expected range result");
        };
        assert_eq!(buckets[1].doc_count, 4);
        assert_eq!(
            buckets[1].aggregations[0],
            InternalAggregation::Sum {
                name: "total".to_string(),
                value: 14.0
            }
        );

        let mut tight = ReduceContext::final_reduce(1);
        let err = InternalAggregation::reduce(parts.clone(), &mut tight).unwrap_err();
        assert!(err.to_string().contains("too many buckets"));
        let mut roomy = ReduceContext::final_reduce(10);
        InternalAggregation::reduce(parts, &mut roomy).unwrap();
        assert_eq!(roomy.bucket_count(), 2);
    }

    #[test]
    fn test_empty_result_and_term_filter() {
        let factory = BlockFactory::unlimited();
        let filters = AggregationBuilder::Filters {
            name: "f".to_string(),
            filters: vec![(
                "five".to_string(),
                Filter::Term {
                    channel: 0,
                    value: Scalar::Long(5),
                },
            )],
            subs: vec![],
        };
        let mut agg = filters.build(None, &factory).unwrap();
        let InternalAggregation::Filters { buckets, .. } = agg.build_empty().unwrap() else {
            panic!("expected filters result");
        };
        assert_eq!(buckets[0].doc_count, 0);
        collect_all(agg.as_mut(), &page(&factory));
        let InternalAggregation::Filters { buckets, .. } = agg.build_results(&[0]).unwrap().remove(0) else {
            panic!("expected filters result");
        };
        assert_eq!(buckets[0].doc_count, 1);
    }

    #[test]
    fn test_empty_result_is_adapted_or_fails() {
        let factory = BlockFactory::unlimited();
        let agg = range_request().build(None, &factory).unwrap();
        let InternalAggregation::Range { buckets, .. } = agg.build_empty().unwrap() else {
            panic!("expected range result");
        };
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].doc_count, 0);
        assert_eq!(
            buckets[1].aggregations,
            vec![InternalAggregation::Sum {
                name: "total".to_string(),
                value: 0.0
            }]
        );

        // a delegate whose results the adapter cannot read
        let adapter = RangeAdapter {
            ranges: vec![RangeSpec::new(None, Some(1.0))],
        };
        let broken = AdaptingAggregator::new("price", None, &[], &factory, adapter, |_| {
            Ok(Box::new(SumAggregator::new("price", None, 0, &factory)) as Box<dyn Aggregator>)
        })
        .unwrap();
        let err = broken.build_empty().unwrap_err();
        assert!(err.is_invariant_violation());
    }
}
