// src/ingest/orchestrator.rs
//! Drives one sync run end to end: plan → traverse → write → journal.
//!
//! At most one run is active per orchestrator. A second start request is
//! answered with [`SyncOutcome::Rejected`] and never touches the active run.

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::ingest::config::{ExhaustionPolicy, SyncConfig};
use crate::ingest::error::{ConfigError, SyncError};
use crate::ingest::filters::FilterSet;
use crate::ingest::mapper::AssetMapper;
use crate::ingest::providers::{ProviderInfo, ProviderRegistry};
use crate::ingest::store::{AssetStore, BatchResult, BatchWriter};
use crate::ingest::sync_log::{RunStatus, SyncEnd, SyncLog, SyncLogEntry, SyncProgress};
use crate::ingest::traversal::{plan_segments, BatchStream, TraversalEnd, TraversalOptions};
use crate::ingest::types::{CategoryConfig, MarketSource, ResumePoint};

pub const ALREADY_RUNNING: &str = "Sync already running";

/// Records attached to each progress entry.
const PROGRESS_SAMPLE: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRequest {
    /// Category ids; empty means a full-catalog pass.
    pub categories: Vec<String>,
    pub resume: Option<ResumePoint>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub success: bool,
    pub status: RunStatus,
    pub sync_id: String,
    pub total_created: u64,
    pub total_updated: u64,
    pub total_errors: u64,
    pub duplicates: u64,
    pub unique_count: u64,
    pub last_processed_offset: u64,
    /// Set on failure: pass it back to pick up where the run stopped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_point: Option<ResumePoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Rejected { message: String },
    Finished(SyncReport),
}

impl SyncOutcome {
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            Self::Finished(r) => Some(r),
            Self::Rejected { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_running: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync_count: u64,
}

/// Exclusive right to run a sync; released on drop.
pub struct RunPermit {
    flag: Arc<AtomicBool>,
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        tracing::debug!(target: "ingest", "sync flag released");
    }
}

/// Mutable counters of the active run.
#[derive(Default)]
struct RunState {
    created: u64,
    updated: u64,
    errors: u64,
    duplicates: u64,
    batches: u64,
    items: u64,
    seen: HashSet<String>,
    last_offset: u64,
    position: ResumePoint,
}

impl RunState {
    fn absorb(&mut self, r: &BatchResult) {
        self.created += r.created;
        self.updated += r.updated;
        self.errors += r.errors;
        self.duplicates += r.duplicates;
    }
}

pub struct SyncOrchestrator {
    providers: ProviderRegistry,
    store: Arc<dyn AssetStore>,
    sync_log: Arc<dyn SyncLog>,
    mapper: AssetMapper,
    config: SyncConfig,
    running: Arc<AtomicBool>,
    last_sync_at: Mutex<Option<DateTime<Utc>>>,
    last_sync_count: AtomicU64,
}

impl SyncOrchestrator {
    pub fn new(
        config: SyncConfig,
        providers: ProviderRegistry,
        store: Arc<dyn AssetStore>,
        sync_log: Arc<dyn SyncLog>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let mapper = AssetMapper::new(
            config.source.icon_base_url.clone(),
            FilterSet::compile(&config.filters)?,
        );
        crate::ingest::ensure_metrics_described();
        Ok(Self {
            providers,
            store,
            sync_log,
            mapper,
            config,
            running: Arc::new(AtomicBool::new(false)),
            last_sync_at: Mutex::new(None),
            last_sync_count: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn store(&self) -> &Arc<dyn AssetStore> {
        &self.store
    }

    pub fn categories(&self) -> Vec<CategoryConfig> {
        self.config.categories_by_priority()
    }

    pub fn available_providers(&self) -> Vec<ProviderInfo> {
        self.providers.available()
    }

    pub async fn recent_syncs(&self, limit: usize) -> Vec<SyncLogEntry> {
        self.sync_log.recent_syncs(limit).await
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            is_running: self.is_running(),
            last_sync_at: *self.last_sync_at.lock().unwrap_or_else(|p| p.into_inner()),
            last_sync_count: self.last_sync_count.load(Ordering::Relaxed),
        }
    }

    /// Claim the single run slot, `None` if a run is active.
    pub fn try_acquire(&self) -> Option<RunPermit> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunPermit {
                flag: Arc::clone(&self.running),
            })
    }

    pub async fn start_sync(&self, req: SyncRequest) -> SyncOutcome {
        match self.try_acquire() {
            Some(permit) => SyncOutcome::Finished(self.run(permit, req).await),
            None => {
                tracing::warn!(target: "ingest", "sync already running, skipping");
                SyncOutcome::Rejected {
                    message: ALREADY_RUNNING.to_string(),
                }
            }
        }
    }

    /// Run a sync under an acquired permit. Always journals an end entry.
    pub async fn run(&self, permit: RunPermit, req: SyncRequest) -> SyncReport {
        let started = Instant::now();
        let source = self.providers.current();
        let sync_id = self.sync_log.start(source.name()).await;

        let mode = if req.categories.is_empty() {
            "all".to_string()
        } else {
            format!("priority ({})", req.categories.join(", "))
        };
        tracing::info!(
            target: "ingest",
            %sync_id,
            provider = source.name(),
            %mode,
            resume = ?req.resume,
            "starting asset sync"
        );

        let mut state = RunState {
            last_offset: req.resume.as_ref().map_or(0, |r| r.offset),
            position: req.resume.clone().unwrap_or_default(),
            ..RunState::default()
        };
        let result = self.traverse(source.as_ref(), &sync_id, &req, &mut state).await;

        let (status, error_message) = match &result {
            Ok(()) => (RunStatus::Completed, None),
            Err(e) => (RunStatus::Failed, Some(e.to_string())),
        };
        self.last_sync_count
            .store(state.created + state.updated, Ordering::Relaxed);
        if status == RunStatus::Completed {
            let now = Utc::now();
            *self.last_sync_at.lock().unwrap_or_else(|p| p.into_inner()) = Some(now);
            gauge!("ingest_last_sync_ts").set(now.timestamp() as f64);
        }
        counter!("ingest_sync_runs_total", "status" => status.as_str()).increment(1);

        self.sync_log
            .end(
                &sync_id,
                SyncEnd {
                    created: state.created,
                    updated: state.updated,
                    errors: state.errors,
                    unique_count: state.seen.len() as u64,
                    pages: state.batches,
                    status,
                    error_message: error_message.clone(),
                },
            )
            .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        let resume_point = match &result {
            Ok(()) => {
                tracing::info!(
                    target: "ingest",
                    %sync_id,
                    created = state.created,
                    updated = state.updated,
                    errors = state.errors,
                    duplicates = state.duplicates,
                    final_offset = state.last_offset,
                    duration_ms,
                    "asset sync completed"
                );
                None
            }
            Err(e) => {
                tracing::error!(
                    target: "ingest",
                    %sync_id,
                    error = %e,
                    offset = state.last_offset,
                    category = state.position.category_id.as_deref().unwrap_or("all"),
                    duration_ms,
                    "asset sync failed; resume from the reported offset"
                );
                Some(state.position.clone())
            }
        };
        drop(permit);

        SyncReport {
            success: status == RunStatus::Completed,
            status,
            sync_id,
            total_created: state.created,
            total_updated: state.updated,
            total_errors: state.errors,
            duplicates: state.duplicates,
            unique_count: state.seen.len() as u64,
            last_processed_offset: state.last_offset,
            resume_point,
            error_message,
            duration_ms,
        }
    }

    async fn traverse(
        &self,
        source: &dyn MarketSource,
        sync_id: &str,
        req: &SyncRequest,
        state: &mut RunState,
    ) -> Result<(), SyncError> {
        let segments = plan_segments(&self.config.categories, &req.categories, req.resume.as_ref())?;
        let opts = TraversalOptions::from_config(&self.config);
        let writer = BatchWriter::new(self.store.as_ref(), self.config.sync.write_mode);
        let n = segments.len();

        for (i, seg) in segments.iter().enumerate() {
            let label = seg.category_id().unwrap_or("all");
            state.last_offset = seg.start_offset;
            state.position = ResumePoint {
                category_id: seg.category_id().map(str::to_string),
                offset: seg.start_offset,
            };
            if let Some(cat) = &seg.category {
                tracing::info!(
                    target: "ingest",
                    category = %cat.name,
                    priority = cat.priority,
                    "[{}/{}] syncing category",
                    i + 1,
                    n
                );
            }

            let mut stream = BatchStream::for_segment(source, &self.mapper, seg, opts);
            while let Some(batch) = stream.next_batch().await? {
                let result = writer.write_batch(&batch.records, &mut state.seen).await;
                state.absorb(&result);
                state.batches += 1;
                state.items += batch.records.len() as u64;
                // A partial batch can end well short of `batch_number * batch_size`.
                state.last_offset = (seg.start_offset + batch.batch_number * opts.batch_size as u64)
                    .min(batch.next_offset);
                state.position.offset = state.last_offset;
                self.last_sync_count
                    .store(state.created + state.updated, Ordering::Relaxed);

                self.sync_log
                    .log_progress(
                        sync_id,
                        SyncProgress {
                            pages: state.batches,
                            total_items: state.items,
                            unique_items: state.seen.len() as u64,
                            sample: batch.records.iter().take(PROGRESS_SAMPLE).cloned().collect(),
                        },
                    )
                    .await;

                tracing::info!(
                    target: "ingest",
                    category = label,
                    batch = batch.batch_number,
                    total_batches = batch.total_batches,
                    offset = state.last_offset,
                    created = state.created,
                    updated = state.updated,
                    errors = state.errors,
                    "batch saved"
                );
            }

            if let Some(TraversalEnd::ErrorBudgetExhausted { last_error }) = stream.outcome() {
                match self.config.retry.exhaustion_policy {
                    ExhaustionPolicy::Complete => {
                        tracing::warn!(
                            target: "ingest",
                            category = label,
                            offset = state.last_offset,
                            error = %last_error,
                            "error budget exhausted, keeping partial results"
                        );
                    }
                    ExhaustionPolicy::Fail => {
                        state.last_offset = state.last_offset.min(stream.resume_offset());
                        state.position.offset = state.last_offset;
                        return Err(SyncError::ErrorBudgetExhausted {
                            failures: opts.max_consecutive_errors,
                            offset: state.last_offset,
                            message: last_error.to_string(),
                        });
                    }
                }
            }
            if !stream.filtered().is_empty() {
                tracing::info!(target: "ingest", category = label, filtered = ?stream.filtered(), "filter breakdown");
            }
        }
        Ok(())
    }
}
