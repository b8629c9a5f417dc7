//! Grouping and aggregation across modes and grouping strategies.

use std::collections::HashMap;
use std::sync::Arc;

use proptest::prelude::*;
use quarry_compute::aggregation::{AggregateFunction, AggregatorMode, AggregatorSpec};
use quarry_compute::data::{ElementType, Page, Scalar};
use quarry_compute::grouping::GroupSpec;
use quarry_compute::loader::memory::InMemorySegment;
use quarry_compute::loader::{self, LoaderRef, SegmentDocValues, ShardContext};
use quarry_compute::memory::BlockFactory;
use quarry_compute::operator::{
    DocSourceFactory, Driver, DriverContext, HashAggregationOperator, LocalSourceOperator, MatchAll, Operator,
    OrdinalsGroupingOperator, PageConsumerOperator, SourceOperatorFactory,
};

const FUNCTIONS: [AggregateFunction; 5] = [
    AggregateFunction::CountAll,
    AggregateFunction::SumLong,
    AggregateFunction::MinLong,
    AggregateFunction::MaxLong,
    AggregateFunction::Avg,
];

/// Rows keyed by the debug rendering of their key values.
type Rows = HashMap<String, Vec<Vec<Scalar>>>;

fn key_of(values: &[Scalar]) -> String {
    format!("{values:?}")
}

fn input_page(factory: &BlockFactory, rows: &[(Option<i64>, i64)]) -> Page {
    let mut keys = factory.long_builder(rows.len()).unwrap();
    for (key, _) in rows {
        match key {
            Some(k) => keys.append_value(*k).unwrap(),
            None => keys.append_null().unwrap(),
        }
    }
    let values = factory.long_vector(rows.iter().map(|(_, v)| *v).collect()).unwrap();
    Page::new(vec![keys.build().unwrap(), values]).unwrap()
}

fn raw_specs(mode: AggregatorMode) -> Vec<AggregatorSpec> {
    FUNCTIONS
        .iter()
        .map(|&f| {
            let channels = if f.raw_input_count() == 0 { vec![] } else { vec![1] };
            AggregatorSpec::new(f, mode, channels)
        })
        .collect()
}

fn state_specs(mode: AggregatorMode, factory: &BlockFactory) -> Vec<AggregatorSpec> {
    let mut offset = 1;
    FUNCTIONS
        .iter()
        .map(|&f| {
            let spec = AggregatorSpec::intermediate(f, mode, offset, factory);
            offset += spec.channels.len();
            spec
        })
        .collect()
}

fn run(op: &mut dyn Operator, pages: Vec<Page>) -> Vec<Page> {
    for page in pages {
        op.add_input(page).unwrap();
    }
    op.finish();
    let mut out = Vec::new();
    while let Some(page) = op.get_output().unwrap() {
        out.push(page);
    }
    assert!(op.is_finished());
    out
}

/// Key values to the remaining columns of each row.
fn rows_by_key(pages: &[Page]) -> Rows {
    let mut rows = Rows::new();
    for page in pages {
        for p in 0..page.position_count() {
            let key = key_of(&page.block(0).unwrap().values_at(p));
            let values = page.blocks()[1..].iter().map(|b| b.values_at(p)).collect();
            assert!(rows.insert(key, values).is_none(), "duplicate group");
        }
    }
    rows
}

fn hash_aggregation(specs: &[AggregatorSpec], factory: &BlockFactory) -> HashAggregationOperator {
    HashAggregationOperator::new(
        &[GroupSpec::new(0, ElementType::Long)],
        specs,
        DriverContext::new(factory.clone()),
    )
    .unwrap()
}

fn single_pass(input: &[(Option<i64>, i64)], chunk: usize) -> Rows {
    let factory = BlockFactory::unlimited();
    let pages = input.chunks(chunk).map(|c| input_page(&factory, c)).collect();
    let mut op = hash_aggregation(&raw_specs(AggregatorMode::Single), &factory);
    rows_by_key(&run(&mut op, pages))
}

fn split_passes(input: &[(Option<i64>, i64)], chunk: usize) -> Rows {
    let factory = BlockFactory::unlimited();
    let mut partials = Vec::new();
    for part in input.chunks(chunk) {
        let mut initial = hash_aggregation(&raw_specs(AggregatorMode::Initial), &factory);
        partials.extend(run(&mut initial, vec![input_page(&factory, part)]));
    }
    let mut intermediate = hash_aggregation(&state_specs(AggregatorMode::Intermediate, &factory), &factory);
    let merged = run(&mut intermediate, partials);
    let mut last = hash_aggregation(&state_specs(AggregatorMode::Final, &factory), &factory);
    rows_by_key(&run(&mut last, merged))
}

proptest! {
    #[test]
    fn test_grouping_is_complete(
        input in prop::collection::vec((prop::option::weighted(0.8, -6i64..6), -1000i64..1000), 0..200),
        chunk in 1usize..40,
    ) {
        let rows = single_pass(&input, chunk);
        let mut expected: HashMap<Option<i64>, i64> = HashMap::new();
        for (key, _) in &input {
            *expected.entry(*key).or_default() += 1;
        }
        prop_assert_eq!(rows.len(), expected.len());
        for (key, count) in expected {
            let key = key_of(&key.map(Scalar::Long).into_iter().collect::<Vec<_>>());
            prop_assert_eq!(&rows[&key][0], &vec![Scalar::Long(count)]);
        }
    }

    #[test]
    fn test_intermediate_merge_matches_single_pass(
        input in prop::collection::vec((prop::option::weighted(0.8, -6i64..6), -1000i64..1000), 1..200),
        chunk in 1usize..40,
    ) {
        prop_assert_eq!(split_passes(&input, chunk), single_pass(&input, chunk));
    }
}

#[test]
fn test_single_mode_values() {
    let input = [(Some(1), 4), (Some(2), 10), (Some(1), -2), (None, 7)];
    let rows = single_pass(&input, 3);
    let one = &rows[&key_of(&[Scalar::Long(1)])];
    assert_eq!(
        one,
        &vec![
            vec![Scalar::Long(2)],
            vec![Scalar::Long(2)],
            vec![Scalar::Long(-2)],
            vec![Scalar::Long(4)],
            vec![Scalar::Double(1.0)],
        ]
    );
    assert_eq!(rows[&key_of(&[])][1], vec![Scalar::Long(7)]);
}

#[test]
fn test_text_values_coerce_with_warnings() {
    let factory = BlockFactory::unlimited();
    let ctx = DriverContext::new(factory.clone());
    let mut op = HashAggregationOperator::new(
        &[],
        &[AggregatorSpec::new(AggregateFunction::SumLong, AggregatorMode::Single, vec![0])],
        ctx.clone(),
    )
    .unwrap();
    let mut source = LocalSourceOperator::bytes(&factory, &["40", "oops", "2"], 2).unwrap();
    let mut input = Vec::new();
    while let Some(page) = source.get_output().unwrap() {
        input.push(page);
    }
    let out = run(&mut op, input);
    assert_eq!(out[0].block(0).unwrap().values_at(0), vec![Scalar::Long(42)]);
    assert_eq!(ctx.warnings().count(), 1);
}

fn keyword_shards() -> Vec<ShardContext> {
    let first = InMemorySegment::new(6)
        .with_keywords("k", vec![vec!["b"], vec!["a"], vec![], vec!["a", "c"], vec!["b"], vec!["d"]])
        .with_longs("n", (1..=6).map(|v| vec![v]).collect());
    let second = InMemorySegment::new(4)
        .with_keywords("k", vec![vec!["d"], vec!["a"], vec!["e"], vec![]])
        .with_longs("n", (10..14).map(|v| vec![v]).collect());
    vec![ShardContext::new(vec![
        Arc::new(first) as Arc<dyn SegmentDocValues>,
        Arc::new(second) as Arc<dyn SegmentDocValues>,
    ])]
}

/// Group docs by keyword through the driver, then finalize the counts.
fn keyword_counts(key_loader: LoaderRef, page_size: usize) -> HashMap<String, i64> {
    let factory = BlockFactory::unlimited();
    let shards = keyword_shards();
    let source_factory = DocSourceFactory::new(&shards, Arc::new(MatchAll), 1, page_size).unwrap();
    let ctx = DriverContext::new(factory.clone());
    let source = source_factory.get(&ctx).unwrap();
    let grouping = OrdinalsGroupingOperator::new(
        ctx.clone(),
        key_loader,
        shards,
        0,
        vec![AggregatorSpec::new(AggregateFunction::CountAll, AggregatorMode::Initial, vec![])],
    )
    .unwrap();
    let final_count = HashAggregationOperator::new(
        &[GroupSpec::new(0, ElementType::BytesRef)],
        &[AggregatorSpec::intermediate(AggregateFunction::CountAll, AggregatorMode::Final, 1, &factory)],
        ctx.clone(),
    )
    .unwrap();
    let (sink, pages) = PageConsumerOperator::collecting();
    let mut driver = Driver::new(ctx, source, vec![Box::new(grouping), Box::new(final_count)], Box::new(sink));
    while !driver.is_finished() {
        driver.run_for(64).unwrap();
    }
    let pages = pages.lock().unwrap();
    rows_by_key(&pages)
        .into_iter()
        .map(|(k, v)| (k, v[0][0].as_i64().unwrap()))
        .collect()
}

#[test]
fn test_ordinals_grouping_matches_hash_grouping() {
    for page_size in [1, 3, 100] {
        let by_ordinal = keyword_counts(loader::bytes_from_ordinals("k"), page_size);
        let by_hash = keyword_counts(loader::bytes_from_doc_values("k"), page_size);
        assert_eq!(by_ordinal, by_hash);
        assert_eq!(by_ordinal[&key_of(&[Scalar::from("a")])], 3);
        assert_eq!(by_ordinal[&key_of(&[Scalar::from("d")])], 2);
        assert_eq!(by_ordinal[&key_of(&[])], 2);
        assert_eq!(by_ordinal.len(), 6);
    }
}
