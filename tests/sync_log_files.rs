// tests/sync_log_files.rs
use market_asset_sync::ingest::sync_log::{
    EntryStatus, FileSyncLog, RunStatus, SyncEnd, SyncLog, SyncLogEntry, SyncProgress, SyncSummary,
};
use market_asset_sync::ingest::types::AssetRecord;

fn end(status: RunStatus, error: Option<&str>) -> SyncEnd {
    SyncEnd {
        created: 3,
        updated: 1,
        errors: 0,
        unique_count: 4,
        pages: 2,
        status,
        error_message: error.map(str::to_string),
    }
}

#[tokio::test]
async fn run_timeline_and_summary_land_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let log = FileSyncLog::new(dir.path().join("logs"));

    let id = log.start("Steam Market").await;
    log.log_progress(
        &id,
        SyncProgress {
            pages: 1,
            total_items: 4,
            unique_items: 4,
            sample: vec![AssetRecord::new("Chroma Case").with_price(1.12)],
        },
    )
    .await;
    let summary = log.end(&id, end(RunStatus::Failed, Some("critical upstream status 429"))).await;

    let raw = std::fs::read_to_string(dir.path().join("logs").join(format!("{id}.json"))).unwrap();
    let entries: Vec<SyncLogEntry> = serde_json::from_str(&raw).unwrap();
    let statuses: Vec<_> = entries.iter().map(|e| e.status).collect();
    assert_eq!(
        statuses,
        [EntryStatus::Started, EntryStatus::InProgress, EntryStatus::Failed]
    );
    assert_eq!(entries[1].sample_data.as_ref().map(Vec::len), Some(1));
    assert_eq!(entries[2].error.as_deref(), Some("critical upstream status 429"));
    assert_eq!(entries[2].pages, 2, "terminal entry keeps the run's page count");

    let raw = std::fs::read_to_string(dir.path().join("logs").join(format!("{id}-summary.json"))).unwrap();
    let on_disk: SyncSummary = serde_json::from_str(&raw).unwrap();
    assert_eq!(on_disk, summary);
    assert_eq!(on_disk.total_processed, 4);
    assert_eq!(on_disk.provider, "Steam Market");
}

#[tokio::test]
async fn recent_syncs_returns_newest_runs_first() {
    let dir = tempfile::tempdir().unwrap();
    let log = FileSyncLog::new(dir.path());

    let mut ids = Vec::new();
    for _ in 0..3 {
        let id = log.start("Steam Market").await;
        log.end(&id, end(RunStatus::Completed, None)).await;
        ids.push(id);
    }

    let recent = log.recent_syncs(2).await;
    let got: Vec<_> = recent.iter().map(|e| e.sync_id.clone()).collect();
    assert_eq!(got, [ids[2].clone(), ids[1].clone()]);
    assert!(recent.iter().all(|e| e.status == EntryStatus::Completed));
}

#[tokio::test]
async fn missing_directory_has_no_history() {
    let dir = tempfile::tempdir().unwrap();
    let log = FileSyncLog::new(dir.path().join("never-created"));
    assert!(log.recent_syncs(10).await.is_empty());
}
