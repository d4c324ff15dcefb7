// src/ingest/mod.rs
pub mod config;
pub mod error;
pub mod filters;
pub mod mapper;
pub mod orchestrator;
pub mod providers;
pub mod rate_limiter;
pub mod store;
pub mod sync_log;
pub mod traversal;
pub mod types;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

pub use config::{load_sync_config_default, load_sync_config_from, SyncConfig};
pub use error::{ConfigError, PersistenceError, SourceError, SyncError};
pub use orchestrator::{SyncOrchestrator, SyncOutcome, SyncReport, SyncRequest, SyncStatus};
pub use types::{AssetRecord, CategoryConfig, MarketSource, ResumePoint};

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "ingest_pages_fetched_total",
            "Upstream pages fetched successfully."
        );
        describe_counter!(
            "ingest_http_retries_total",
            "HTTP attempts retried after a non-critical failure."
        );
        describe_counter!(
            "ingest_critical_errors_total",
            "Critical upstream statuses that aborted a run."
        );
        describe_counter!(
            "ingest_page_errors_total",
            "Pages skipped after retries were exhausted."
        );
        describe_counter!(
            "ingest_filtered_total",
            "Records excluded by filter rules, by rule id."
        );
        describe_counter!(
            "ingest_records_upserted_total",
            "Records written to the store, by action."
        );
        describe_counter!(
            "ingest_persist_errors_total",
            "Per-record persistence errors, by category."
        );
        describe_counter!("ingest_sync_runs_total", "Finished sync runs, by status.");
        describe_histogram!("ingest_fetch_ms", "Upstream request latency in milliseconds.");
        describe_gauge!(
            "ingest_last_sync_ts",
            "Unix ts of the last completed sync."
        );
    });
}
