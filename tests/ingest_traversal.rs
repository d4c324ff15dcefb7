// tests/ingest_traversal.rs
use market_asset_sync::ingest::config::default_filters;
use market_asset_sync::ingest::error::SourceError;
use market_asset_sync::ingest::filters::FilterSet;
use market_asset_sync::ingest::mapper::AssetMapper;
use market_asset_sync::ingest::providers::ScriptedSource;
use market_asset_sync::ingest::traversal::{
    collect_all, current_prices, BatchStream, TraversalEnd, TraversalOptions,
};
use market_asset_sync::ingest::types::RawItem;

fn mapper() -> AssetMapper {
    AssetMapper::new("https://img/", FilterSet::compile(&default_filters()).unwrap())
}

fn opts(batch_size: usize) -> TraversalOptions {
    TraversalOptions {
        batch_size,
        max_consecutive_errors: 3,
    }
}

/// `n` priced items named `<prefix> <i>` for i in `from..from+n`.
fn items(prefix: &str, from: usize, n: usize) -> Vec<RawItem> {
    (from..from + n)
        .map(|i| RawItem::named(format!("{prefix} {i}")).with_price_text("$0.50"))
        .collect()
}

fn transient() -> SourceError {
    SourceError::transient(3, "HTTP 404 Not Found")
}

#[tokio::test]
async fn empty_page_ends_traversal_and_flushes_tail() {
    let mut src = ScriptedSource::new(10);
    for p in 0..5 {
        src = src.page("", p * 10, items("A", p as usize * 10, 10), 1000);
    }
    let m = mapper();
    let mut stream = BatchStream::new(&src, &m, "", 0, opts(20));

    let mut batches = Vec::new();
    while let Some(b) = stream.next_batch().await.unwrap() {
        batches.push(b);
    }

    let sizes: Vec<_> = batches.iter().map(|b| b.records.len()).collect();
    assert_eq!(sizes, [20, 20, 10]);
    let numbers: Vec<_> = batches.iter().map(|b| b.batch_number).collect();
    assert_eq!(numbers, [1, 2, 3]);
    assert_eq!(batches[0].next_offset, 20);
    assert_eq!(batches[0].total_batches, 50);
    assert_eq!(stream.outcome(), Some(&TraversalEnd::Exhausted));
    assert_eq!(src.offsets(), [0, 10, 20, 30, 40, 50]);
    assert_eq!(stream.processed(), 50);
}

#[tokio::test]
async fn reaching_total_stops_without_extra_request() {
    let src = ScriptedSource::new(10)
        .page("", 0, items("B", 0, 10), 25)
        .page("", 10, items("B", 10, 10), 25)
        .page("", 20, items("B", 20, 5), 25);
    let m = mapper();
    let (records, end) = collect_all(&src, &m, "", 0, opts(500)).await.unwrap();

    assert_eq!(records.len(), 25);
    assert_eq!(end, TraversalEnd::ReachedTotal);
    assert_eq!(src.offsets(), [0, 10, 20]);
}

#[tokio::test]
async fn filtered_items_still_count_toward_total() {
    let mut page = items("Sticker | C", 0, 8);
    page.push(RawItem::named("Sticker Slab | C 1"));
    page.push(RawItem::named("Sticker Slab | C 2"));
    let src = ScriptedSource::new(10).page("Sticker |", 0, page, 10);
    let m = mapper();

    let mut stream = BatchStream::new(&src, &m, "Sticker |", 0, opts(500));
    let batch = stream.next_batch().await.unwrap().expect("one batch");
    assert_eq!(batch.records.len(), 8);
    assert!(stream.next_batch().await.unwrap().is_none());
    assert_eq!(stream.outcome(), Some(&TraversalEnd::ReachedTotal));
    assert_eq!(stream.filtered().get("sticker-slab-charms"), Some(&2));
    assert_eq!(src.call_count(), 1);
}

#[tokio::test]
async fn consecutive_failures_stop_with_partial_results() {
    let src = ScriptedSource::new(10)
        .page("", 0, items("D", 0, 10), 100)
        .fail("", 10, transient())
        .fail("", 20, SourceError::Api { offset: 20 })
        .fail("", 30, transient());
    let m = mapper();
    let (records, end) = collect_all(&src, &m, "", 0, opts(500)).await.unwrap();

    assert_eq!(records.len(), 10, "records before the failures are kept");
    assert!(matches!(end, TraversalEnd::ErrorBudgetExhausted { last_error: SourceError::Transient { .. } }));
    assert_eq!(src.offsets(), [0, 10, 20, 30]);
}

#[tokio::test]
async fn a_success_resets_the_failure_streak() {
    let src = ScriptedSource::new(10)
        .page("", 0, items("E", 0, 10), 40)
        .fail("", 10, transient())
        .fail("", 20, transient())
        .page("", 30, items("E", 30, 10), 40)
        .fail("", 40, transient())
        .fail("", 50, transient())
        .fail("", 60, transient());
    let m = mapper();
    let (records, end) = collect_all(&src, &m, "", 0, opts(500)).await.unwrap();

    assert_eq!(records.len(), 20);
    // the page at 30 restarts the streak, so it takes three more failures to stop
    assert_eq!(src.offsets(), [0, 10, 20, 30, 40, 50, 60]);
    assert!(matches!(end, TraversalEnd::ErrorBudgetExhausted { .. }));
}

#[tokio::test]
async fn partial_batch_points_back_to_the_failed_streak() {
    let src = ScriptedSource::new(10)
        .page("", 0, items("F", 0, 1), 100)
        .fail("", 10, transient())
        .page("", 20, items("F", 20, 1), 100)
        .fail("", 30, transient())
        .fail("", 40, transient())
        .fail("", 50, transient());
    let m = mapper();
    let mut stream = BatchStream::new(&src, &m, "", 0, opts(500));

    let batch = stream.next_batch().await.unwrap().expect("partial batch");
    assert_eq!(batch.records.len(), 2);
    assert_eq!(batch.next_offset, 30, "pages 30..60 were never fetched");
    assert_eq!(stream.offset(), 50);
    assert_eq!(stream.resume_offset(), 30);
    assert!(stream.next_batch().await.unwrap().is_none());
}

#[tokio::test]
async fn critical_error_aborts_and_discards_pending() {
    let src = ScriptedSource::new(10)
        .page("", 0, items("F", 0, 10), 100)
        .fail("", 10, SourceError::critical(429, "Too Many Requests"));
    let m = mapper();
    let mut stream = BatchStream::new(&src, &m, "", 0, opts(500));

    let err = stream.next_batch().await.unwrap_err();
    assert!(err.is_critical());
    assert!(stream.next_batch().await.unwrap().is_none(), "dead after a critical error");
    assert_eq!(src.call_count(), 2);
}

#[tokio::test]
async fn stream_starts_at_the_given_offset() {
    let src = ScriptedSource::new(10)
        .page("", 30, items("G", 30, 10), 40);
    let m = mapper();
    let (records, end) = collect_all(&src, &m, "", 30, opts(500)).await.unwrap();
    assert_eq!(src.offsets(), [30, 40]);
    assert_eq!(records.len(), 10);
    assert_eq!(end, TraversalEnd::Exhausted);
}

#[tokio::test]
async fn first_observed_total_stays_authoritative() {
    let src = ScriptedSource::new(10)
        .page("", 0, items("H", 0, 10), 20)
        .page("", 10, items("H", 10, 10), 35)
        .page("", 20, items("H", 20, 10), 35);
    let m = mapper();
    let mut stream = BatchStream::new(&src, &m, "", 0, opts(500));
    while stream.next_batch().await.unwrap().is_some() {}

    assert_eq!(stream.total_count(), Some(20));
    assert_eq!(stream.outcome(), Some(&TraversalEnd::ReachedTotal));
    assert_eq!(src.offsets(), [0, 10]);
}

#[tokio::test]
async fn current_prices_lists_priced_records() {
    let mut page = items("I", 0, 2);
    page.push(RawItem::named("I unpriced"));
    let src = ScriptedSource::new(10).page("", 0, page, 3);
    let m = mapper();
    let prices = current_prices(&src, &m, opts(500)).await.unwrap();
    assert_eq!(
        prices,
        vec![("I 0".to_string(), 0.5), ("I 1".to_string(), 0.5)]
    );
}
