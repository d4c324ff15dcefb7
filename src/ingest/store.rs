// src/ingest/store.rs
//! Persistence contract and the batch writer built on it.
//!
//! Stores are keyed by the exact record name; every write path must leave at
//! most one stored row per name, which is what makes re-running a page safe.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::ingest::config::WriteMode;
use crate::ingest::error::PersistenceError;
use crate::ingest::types::AssetRecord;

/// Below this gap between `created_at` and `updated_at` a write counts as a create.
pub const CREATED_EPSILON_MS: i64 = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAsset {
    pub name: String,
    pub icon_url: Option<String>,
    pub current_price: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredAsset {
    /// Inferred from timestamps; an update landing within the epsilon of the
    /// create is reported as a create.
    pub fn was_created(&self) -> bool {
        (self.updated_at - self.created_at).num_milliseconds().abs() < CREATED_EPSILON_MS
    }
}

#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn find_by_name(&self, name: &str) -> Result<Option<StoredAsset>, PersistenceError>;

    /// Create if absent, else update. `None` fields keep their stored values.
    async fn upsert_by_name(&self, record: &AssetRecord) -> Result<StoredAsset, PersistenceError>;

    /// Fails with a unique violation when the name exists.
    async fn create(&self, record: &AssetRecord) -> Result<StoredAsset, PersistenceError>;

    /// Fails with "record not found" when the name is absent.
    async fn update(&self, record: &AssetRecord) -> Result<StoredAsset, PersistenceError>;

    async fn count(&self) -> Result<u64, PersistenceError>;
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Process-local store. Also the default backend of the service binary.
pub struct InMemoryAssetStore {
    rows: Mutex<HashMap<String, StoredAsset>>,
    failures: Mutex<HashMap<String, PersistenceError>>,
    clock: Clock,
}

impl Default for InMemoryAssetStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAssetStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the timestamp source (tests use a stepping clock).
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Make every write of `name` fail with `err`.
    pub fn fail_writes_for(&self, name: &str, err: PersistenceError) {
        self.failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(name.to_string(), err);
    }

    pub fn snapshot(&self) -> Vec<StoredAsset> {
        let rows = self.rows.lock().unwrap_or_else(|p| p.into_inner());
        let mut out: Vec<_> = rows.values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    fn injected_failure(&self, name: &str) -> Result<(), PersistenceError> {
        match self
            .failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
        {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn insert_new(&self, rows: &mut HashMap<String, StoredAsset>, record: &AssetRecord) -> StoredAsset {
        let now = (self.clock)();
        let row = StoredAsset {
            name: record.name.clone(),
            icon_url: record.icon_url.clone(),
            current_price: record.current_price,
            created_at: now,
            updated_at: now,
        };
        rows.insert(record.name.clone(), row.clone());
        row
    }

    fn apply_update(&self, row: &mut StoredAsset, record: &AssetRecord) -> StoredAsset {
        if record.icon_url.is_some() {
            row.icon_url = record.icon_url.clone();
        }
        if record.current_price.is_some() {
            row.current_price = record.current_price;
        }
        row.updated_at = (self.clock)();
        row.clone()
    }
}

#[async_trait]
impl AssetStore for InMemoryAssetStore {
    async fn find_by_name(&self, name: &str) -> Result<Option<StoredAsset>, PersistenceError> {
        Ok(self
            .rows
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .cloned())
    }

    async fn upsert_by_name(&self, record: &AssetRecord) -> Result<StoredAsset, PersistenceError> {
        self.injected_failure(&record.name)?;
        let mut rows = self.rows.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(row) = rows.get_mut(&record.name) {
            return Ok(self.apply_update(row, record));
        }
        Ok(self.insert_new(&mut rows, record))
    }

    async fn create(&self, record: &AssetRecord) -> Result<StoredAsset, PersistenceError> {
        self.injected_failure(&record.name)?;
        let mut rows = self.rows.lock().unwrap_or_else(|p| p.into_inner());
        if rows.contains_key(&record.name) {
            return Err(PersistenceError::with_code(
                "23505",
                format!("unique constraint failed on name `{}`", record.name),
            ));
        }
        Ok(self.insert_new(&mut rows, record))
    }

    async fn update(&self, record: &AssetRecord) -> Result<StoredAsset, PersistenceError> {
        self.injected_failure(&record.name)?;
        let mut rows = self.rows.lock().unwrap_or_else(|p| p.into_inner());
        match rows.get_mut(&record.name) {
            Some(row) => Ok(self.apply_update(row, record)),
            None => Err(PersistenceError::with_code(
                "02000",
                format!("no asset named `{}`", record.name),
            )),
        }
    }

    async fn count(&self) -> Result<u64, PersistenceError> {
        Ok(self.rows.lock().unwrap_or_else(|p| p.into_inner()).len() as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Created,
    Updated,
    Skipped,
}

/// Per-record outcome, kept only in detailed mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncAssetDetail {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_price: Option<f64>,
    pub action: SyncAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub created: u64,
    pub updated: u64,
    pub errors: u64,
    /// Records whose name was already seen earlier in the run (or batch).
    pub duplicates: u64,
    pub errors_by_category: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<SyncAssetDetail>,
}

impl BatchResult {
    fn error(&mut self, category: &str) {
        self.errors += 1;
        *self.errors_by_category.entry(category.to_string()).or_insert(0) += 1;
        counter!("ingest_persist_errors_total", "category" => category.to_string()).increment(1);
    }

    fn detail(&mut self, rec: &AssetRecord, action: SyncAction, error: Option<String>) {
        self.details.push(SyncAssetDetail {
            name: rec.name.clone(),
            icon_url: rec.icon_url.clone(),
            current_price: rec.current_price,
            action,
            error,
        });
    }
}

/// Writes batches to an [`AssetStore`]. Never fails as a whole: each record's
/// error is caught, categorized, and counted.
pub struct BatchWriter<'a> {
    store: &'a dyn AssetStore,
    mode: WriteMode,
}

impl<'a> BatchWriter<'a> {
    pub fn new(store: &'a dyn AssetStore, mode: WriteMode) -> Self {
        Self { store, mode }
    }

    /// `seen` carries names across batches of the same run.
    pub async fn write_batch(&self, records: &[AssetRecord], seen: &mut HashSet<String>) -> BatchResult {
        let detailed = self.mode == WriteMode::Detailed;
        let mut result = BatchResult::default();
        let mut in_batch: HashSet<&str> = HashSet::new();
        let mut to_write: Vec<&AssetRecord> = Vec::with_capacity(records.len());

        for rec in records {
            if !rec.has_valid_name() {
                tracing::warn!(target: "ingest", "skipping asset with empty name");
                result.error("empty_name");
                if detailed {
                    result.detail(rec, SyncAction::Skipped, Some("empty name".into()));
                }
                continue;
            }
            let new_in_run = seen.insert(rec.name.clone());
            let new_in_batch = in_batch.insert(rec.name.as_str());
            if !new_in_run {
                result.duplicates += 1;
                tracing::trace!(target: "ingest", name = %rec.name, "duplicate name");
            }
            if !detailed && !new_in_batch {
                continue;
            }
            to_write.push(rec);
        }

        for rec in to_write {
            if detailed {
                self.write_detailed(rec, &mut result).await;
            } else {
                self.write_fast(rec, &mut result).await;
            }
        }

        if !result.errors_by_category.is_empty() {
            tracing::warn!(
                target: "ingest",
                errors = result.errors,
                breakdown = ?result.errors_by_category,
                "batch finished with errors"
            );
        }
        if result.duplicates > 0 {
            let rate = result.duplicates as f64 * 100.0 / records.len().max(1) as f64;
            if detailed {
                tracing::warn!(
                    target: "ingest",
                    duplicates = result.duplicates,
                    "{rate:.1}% duplicate names in batch, likely unstable sorting in the data source"
                );
            } else {
                tracing::debug!(target: "ingest", duplicates = result.duplicates, "{rate:.1}% duplicate names in batch");
            }
        }
        counter!("ingest_records_upserted_total", "action" => "created").increment(result.created);
        counter!("ingest_records_upserted_total", "action" => "updated").increment(result.updated);
        result
    }

    async fn write_fast(&self, rec: &AssetRecord, result: &mut BatchResult) {
        match self.store.upsert_by_name(rec).await {
            Ok(row) if row.was_created() => result.created += 1,
            Ok(_) => result.updated += 1,
            Err(e) => {
                tracing::error!(target: "ingest", name = %rec.name, error = %e, "upsert failed");
                result.error(&e.category());
            }
        }
    }

    async fn write_detailed(&self, rec: &AssetRecord, result: &mut BatchResult) {
        let outcome = match self.store.find_by_name(&rec.name).await {
            Ok(Some(_)) => self.store.update(rec).await.map(|_| SyncAction::Updated),
            Ok(None) => self.store.create(rec).await.map(|_| SyncAction::Created),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(action) => {
                if action == SyncAction::Created {
                    result.created += 1;
                } else {
                    result.updated += 1;
                }
                tracing::debug!(target: "ingest", name = %rec.name, ?action, "asset written");
                result.detail(rec, action, None);
            }
            Err(e) => {
                tracing::error!(target: "ingest", name = %rec.name, error = %e, "write failed");
                result.error(&e.category());
                result.detail(rec, SyncAction::Skipped, Some(e.to_string()));
            }
        }
    }
}
