// tests/metrics_ingest.rs
#![cfg(feature = "strict-metrics")]
use market_asset_sync::ingest::config::SyncConfig;
use market_asset_sync::ingest::error::SourceError;
use market_asset_sync::ingest::providers::{ProviderRegistry, ScriptedSource};
use market_asset_sync::ingest::store::InMemoryAssetStore;
use market_asset_sync::ingest::sync_log::MemorySyncLog;
use market_asset_sync::ingest::{SyncOrchestrator, SyncRequest};
use market_asset_sync::metrics::Metrics;
use std::sync::Arc;

#[tokio::test]
async fn metrics_exposed_after_sync() {
    // Installs the global recorder for this test binary
    let metrics = Metrics::init().expect("recorder");

    let src = ScriptedSource::new(10)
        .named_page("", 0, &["Chroma Case", "Sticker | Foo"], 100)
        .fail("", 10, SourceError::transient(3, "timeout"))
        .fail("", 20, SourceError::transient(3, "timeout"))
        .fail("", 30, SourceError::transient(3, "timeout"));
    let orch = SyncOrchestrator::new(
        SyncConfig::default(),
        ProviderRegistry::new("scripted", Arc::new(src)),
        Arc::new(InMemoryAssetStore::new()),
        Arc::new(MemorySyncLog::new()),
    )
    .expect("orchestrator");
    let outcome = orch.start_sync(SyncRequest::default()).await;
    assert!(outcome.report().is_some_and(|r| r.success));

    // Scrape metrics text and check series presence by substring
    let out = metrics.handle.render();
    assert!(out.contains("ingest_sync_runs_total"));
    assert!(out.contains(r#"status="completed""#));
    assert!(out.contains("ingest_records_upserted_total"));
    assert!(out.contains("ingest_page_errors_total 3"));
    assert!(out.contains("ingest_last_sync_ts"));
}
