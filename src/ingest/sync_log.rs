// src/ingest/sync_log.rs
//! Append-only journal of sync runs.
//!
//! Every run gets an id from [`SyncLog::start`]; progress and the final
//! outcome are appended under that id so a run's timeline can be rebuilt
//! afterwards. Journal failures are logged and never interrupt a sync.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use crate::ingest::types::AssetRecord;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Started,
    InProgress,
    Completed,
    Failed,
    Stopped,
}

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

impl From<RunStatus> for EntryStatus {
    fn from(s: RunStatus) -> Self {
        match s {
            RunStatus::Completed => Self::Completed,
            RunStatus::Failed => Self::Failed,
            RunStatus::Stopped => Self::Stopped,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncLogEntry {
    pub timestamp: DateTime<Utc>,
    pub sync_id: String,
    pub provider: String,
    pub status: EntryStatus,
    pub pages: u64,
    pub total_items: u64,
    pub unique_items: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<u64>,
    /// Milliseconds since the run started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_data: Option<Vec<AssetRecord>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncProgress {
    pub pages: u64,
    pub total_items: u64,
    pub unique_items: u64,
    pub sample: Vec<AssetRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncEnd {
    pub created: u64,
    pub updated: u64,
    pub errors: u64,
    pub unique_count: u64,
    /// Batches written over the whole run.
    pub pages: u64,
    pub status: RunStatus,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub sync_id: String,
    pub provider: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Milliseconds.
    pub duration: u64,
    pub total_processed: u64,
    pub created: u64,
    pub updated: u64,
    pub errors: u64,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[async_trait]
pub trait SyncLog: Send + Sync {
    async fn start(&self, provider: &str) -> String;
    async fn log_progress(&self, sync_id: &str, progress: SyncProgress);
    async fn end(&self, sync_id: &str, end: SyncEnd) -> SyncSummary;
    /// Last entry of each of the newest `limit` runs, newest first.
    async fn recent_syncs(&self, limit: usize) -> Vec<SyncLogEntry>;
}

/// Progress entries keep at most this many sample records.
const SAMPLE_LIMIT: usize = 5;

/// `sync-<unix millis>`, bumped past the previous id when the clock repeats.
pub fn next_sync_id(now: DateTime<Utc>) -> String {
    static LAST: AtomicI64 = AtomicI64::new(0);
    let ms = now.timestamp_millis();
    let prev = LAST
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(ms.max(last + 1)))
        .unwrap_or(ms);
    format!("sync-{}", ms.max(prev + 1))
}

#[derive(Debug, Clone)]
struct ActiveRun {
    provider: String,
    started_at: DateTime<Utc>,
}

/// Bookkeeping shared by every journal backend.
#[derive(Default)]
struct RunBook {
    active: Mutex<HashMap<String, ActiveRun>>,
}

impl RunBook {
    fn open(&self, provider: &str) -> SyncLogEntry {
        let now = Utc::now();
        let sync_id = next_sync_id(now);
        self.active.lock().unwrap_or_else(|p| p.into_inner()).insert(
            sync_id.clone(),
            ActiveRun {
                provider: provider.to_string(),
                started_at: now,
            },
        );
        SyncLogEntry {
            timestamp: now,
            sync_id,
            provider: provider.to_string(),
            status: EntryStatus::Started,
            pages: 0,
            total_items: 0,
            unique_items: 0,
            created: None,
            updated: None,
            errors: None,
            duration: None,
            error: None,
            sample_data: None,
        }
    }

    fn lookup(&self, sync_id: &str) -> ActiveRun {
        match self
            .active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(sync_id)
        {
            Some(run) => run.clone(),
            None => {
                tracing::warn!(target: "ingest", %sync_id, "journal entry for unknown sync id");
                ActiveRun {
                    provider: "unknown".to_string(),
                    started_at: Utc::now(),
                }
            }
        }
    }

    fn progress(&self, sync_id: &str, p: SyncProgress) -> SyncLogEntry {
        let run = self.lookup(sync_id);
        let now = Utc::now();
        let mut sample = p.sample;
        sample.truncate(SAMPLE_LIMIT);
        SyncLogEntry {
            timestamp: now,
            sync_id: sync_id.to_string(),
            provider: run.provider,
            status: EntryStatus::InProgress,
            pages: p.pages,
            total_items: p.total_items,
            unique_items: p.unique_items,
            created: None,
            updated: None,
            errors: None,
            duration: Some(millis_between(run.started_at, now)),
            error: None,
            sample_data: Some(sample),
        }
    }

    fn close(&self, sync_id: &str, end: SyncEnd) -> (SyncLogEntry, SyncSummary) {
        let run = self.lookup(sync_id);
        self.active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(sync_id);
        let now = Utc::now();
        let duration = millis_between(run.started_at, now);
        let entry = SyncLogEntry {
            timestamp: now,
            sync_id: sync_id.to_string(),
            provider: run.provider.clone(),
            status: end.status.into(),
            pages: end.pages,
            total_items: end.created + end.updated,
            unique_items: end.unique_count,
            created: Some(end.created),
            updated: Some(end.updated),
            errors: Some(end.errors),
            duration: Some(duration),
            error: end.error_message.clone(),
            sample_data: None,
        };
        let summary = SyncSummary {
            sync_id: sync_id.to_string(),
            provider: run.provider,
            start_time: run.started_at,
            end_time: now,
            duration,
            total_processed: end.created + end.updated,
            created: end.created,
            updated: end.updated,
            errors: end.errors,
            status: end.status,
            error_message: end.error_message,
        };
        (entry, summary)
    }
}

fn millis_between(a: DateTime<Utc>, b: DateTime<Utc>) -> u64 {
    (b - a).num_milliseconds().max(0) as u64
}

/// Journal kept in memory; used in tests and when no log directory is wanted.
#[derive(Default)]
pub struct MemorySyncLog {
    book: RunBook,
    entries: Mutex<BTreeMap<String, Vec<SyncLogEntry>>>,
    summaries: Mutex<Vec<SyncSummary>>,
}

impl MemorySyncLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self, sync_id: &str) -> Vec<SyncLogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(sync_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn summaries(&self) -> Vec<SyncSummary> {
        self.summaries.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn append(&self, entry: SyncLogEntry) {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(entry.sync_id.clone())
            .or_default()
            .push(entry);
    }
}

#[async_trait]
impl SyncLog for MemorySyncLog {
    async fn start(&self, provider: &str) -> String {
        let entry = self.book.open(provider);
        let id = entry.sync_id.clone();
        self.append(entry);
        id
    }

    async fn log_progress(&self, sync_id: &str, progress: SyncProgress) {
        let entry = self.book.progress(sync_id, progress);
        self.append(entry);
    }

    async fn end(&self, sync_id: &str, end: SyncEnd) -> SyncSummary {
        let (entry, summary) = self.book.close(sync_id, end);
        self.append(entry);
        self.summaries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(summary.clone());
        summary
    }

    async fn recent_syncs(&self, limit: usize) -> Vec<SyncLogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .rev()
            .take(limit)
            .filter_map(|v| v.last().cloned())
            .collect()
    }
}

/// Journal persisted as `<dir>/<sync_id>.json` (array of entries) plus
/// `<dir>/<sync_id>-summary.json`.
pub struct FileSyncLog {
    dir: PathBuf,
    book: RunBook,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileSyncLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            book: RunBook::default(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn log_path(&self, sync_id: &str) -> PathBuf {
        self.dir.join(format!("{sync_id}.json"))
    }

    async fn append(&self, entry: &SyncLogEntry) {
        let _guard = self.write_lock.lock().await;
        let path = self.log_path(&entry.sync_id);
        if let Err(e) = append_entry(&self.dir, &path, entry).await {
            tracing::error!(target: "ingest", path = %path.display(), error = %e, "failed to write sync log");
        }
    }
}

async fn append_entry(dir: &Path, path: &Path, entry: &SyncLogEntry) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let mut entries: Vec<SyncLogEntry> = match tokio::fs::read_to_string(path).await {
        Ok(s) => serde_json::from_str(&s)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    entries.push(entry.clone());
    tokio::fs::write(path, serde_json::to_vec_pretty(&entries)?).await?;
    Ok(())
}

async fn read_last_entry(path: &Path) -> anyhow::Result<Option<SyncLogEntry>> {
    let s = tokio::fs::read_to_string(path).await?;
    let mut entries: Vec<SyncLogEntry> = serde_json::from_str(&s)?;
    Ok(entries.pop())
}

#[async_trait]
impl SyncLog for FileSyncLog {
    async fn start(&self, provider: &str) -> String {
        let entry = self.book.open(provider);
        self.append(&entry).await;
        tracing::info!(target: "ingest", path = %self.log_path(&entry.sync_id).display(), "sync log started");
        entry.sync_id
    }

    async fn log_progress(&self, sync_id: &str, progress: SyncProgress) {
        let entry = self.book.progress(sync_id, progress);
        self.append(&entry).await;
    }

    async fn end(&self, sync_id: &str, end: SyncEnd) -> SyncSummary {
        let (entry, summary) = self.book.close(sync_id, end);
        self.append(&entry).await;

        let path = self.dir.join(format!("{sync_id}-summary.json"));
        let written = match serde_json::to_vec_pretty(&summary) {
            Ok(bytes) => tokio::fs::write(&path, bytes).await.map_err(anyhow::Error::from),
            Err(e) => Err(e.into()),
        };
        match written {
            Ok(()) => tracing::info!(
                target: "ingest",
                path = %path.display(),
                status = summary.status.as_str(),
                duration_ms = summary.duration,
                "sync summary written"
            ),
            Err(e) => tracing::error!(target: "ingest", path = %path.display(), error = %e, "failed to write sync summary"),
        }
        summary
    }

    async fn recent_syncs(&self, limit: usize) -> Vec<SyncLogEntry> {
        let mut names = Vec::new();
        match tokio::fs::read_dir(&self.dir).await {
            Ok(mut rd) => loop {
                match rd.next_entry().await {
                    Ok(Some(e)) => {
                        let name = e.file_name().to_string_lossy().into_owned();
                        if name.ends_with(".json") && !name.ends_with("-summary.json") {
                            names.push(name);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!(target: "ingest", error = %e, "failed to list sync logs");
                        break;
                    }
                }
            },
            Err(e) => {
                tracing::debug!(target: "ingest", dir = %self.dir.display(), error = %e, "no sync log directory");
                return Vec::new();
            }
        }
        names.sort();

        let mut out = Vec::new();
        for name in names.iter().rev().take(limit) {
            match read_last_entry(&self.dir.join(name)).await {
                Ok(Some(entry)) => out.push(entry),
                Ok(None) => {}
                Err(e) => tracing::error!(target: "ingest", file = %name, error = %e, "failed to read sync log"),
            }
        }
        out
    }
}
