//! Every accounted byte is released on success, failure and cancellation.

use std::sync::Arc;

use quarry_compute::aggregation::{AggregateFunction, AggregatorMode, AggregatorSpec};
use quarry_compute::data::{ElementType, Page};
use quarry_compute::grouping::GroupSpec;
use quarry_compute::memory::{BlockFactory, LimitedAccountant, MemoryAccountant, TrackedArray};
use quarry_compute::operator::{
    CancellationHandle, Driver, DriverContext, HashAggregationOperator, LocalSourceOperator, PageConsumerOperator,
};
use quarry_compute::topn::{SortOrder, TopNEncoder, TopNOperator};

fn source_pages(rows: i64) -> Vec<Page> {
    let factory = BlockFactory::unlimited();
    (0..rows)
        .collect::<Vec<_>>()
        .chunks(128)
        .map(|chunk| {
            let keys = chunk.iter().map(|v| v % 97).collect();
            Page::new(vec![
                factory.long_vector(keys).unwrap(),
                factory.long_vector(chunk.to_vec()).unwrap(),
            ])
            .unwrap()
        })
        .collect()
}

fn pipeline(factory: &BlockFactory, ctx: DriverContext, rows: i64) -> (Driver, Arc<std::sync::Mutex<Vec<Page>>>) {
    let aggregation = HashAggregationOperator::new(
        &[GroupSpec::new(0, ElementType::Long)],
        &[
            AggregatorSpec::new(AggregateFunction::SumLong, AggregatorMode::Single, vec![1]),
            AggregatorSpec::new(AggregateFunction::CountAll, AggregatorMode::Single, vec![]),
        ],
        ctx.clone(),
    )
    .unwrap();
    let top = TopNOperator::new(
        factory.clone(),
        5,
        vec![ElementType::Long, ElementType::Long, ElementType::Long],
        vec![TopNEncoder::DefaultSortable, TopNEncoder::DefaultSortable, TopNEncoder::Unsortable],
        vec![SortOrder::new(1, false, true)],
        2,
    )
    .unwrap();
    let (sink, pages) = PageConsumerOperator::collecting();
    let source = LocalSourceOperator::from_pages(source_pages(rows));
    let driver = Driver::new(ctx, Box::new(source), vec![Box::new(aggregation), Box::new(top)], Box::new(sink));
    (driver, pages)
}

#[test]
fn test_success_releases_everything_once_output_is_dropped() {
    let accountant = Arc::new(LimitedAccountant::new(1 << 24));
    let factory = BlockFactory::new(accountant.clone());
    let (mut driver, pages) = pipeline(&factory, DriverContext::new(factory.clone()), 10_000);
    while !driver.is_finished() {
        driver.run_for(32).unwrap();
    }
    {
        let pages = pages.lock().unwrap();
        assert_eq!(pages.iter().map(Page::position_count).sum::<usize>(), 5);
        assert!(accountant.used() > 0);
    }
    drop(driver);
    pages.lock().unwrap().clear();
    assert_eq!(accountant.used(), 0);
}

#[test]
fn test_breaker_trip_fails_driver_without_leaking() {
    let accountant = Arc::new(LimitedAccountant::new(2048));
    let factory = BlockFactory::new(accountant.clone());
    let (mut driver, pages) = pipeline(&factory, DriverContext::new(factory.clone()), 10_000);
    let err = loop {
        match driver.run_for(32) {
            Ok(_) => assert!(!driver.is_finished(), "pipeline should not fit in the budget"),
            Err(e) => break e,
        }
    };
    assert!(err.is_resource_exhausted(), "{err}");
    assert!(driver.is_finished());
    assert!(accountant.trip_count() > 0);
    assert!(pages.lock().unwrap().is_empty());
    assert_eq!(accountant.used(), 0);
}

#[test]
fn test_cancelled_driver_releases_partial_state() {
    let accountant = Arc::new(LimitedAccountant::new(1 << 24));
    let factory = BlockFactory::new(accountant.clone());
    let (cancel, rx) = CancellationHandle::new();
    let ctx = DriverContext::new(factory.clone()).with_cancellation(rx);
    let (mut driver, _pages) = pipeline(&factory, ctx, 10_000);
    driver.run_for(3).unwrap();
    assert!(accountant.used() > 0);
    cancel.cancel();
    let err = driver.run_for(1).unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(accountant.used(), 0);
}

#[test]
fn test_refused_growth_is_all_or_nothing() {
    let accountant = Arc::new(LimitedAccountant::new(256));
    let mut array: TrackedArray<i64> = TrackedArray::new(accountant.clone(), "test");
    array.grow_to(8).unwrap();
    let before = accountant.used();
    assert!(array.grow_to(10_000).unwrap_err().is_resource_exhausted());
    assert_eq!(accountant.used(), before);
    assert_eq!(array.ram_bytes(), before);
    drop(array);
    assert_eq!(accountant.used(), 0);
}
