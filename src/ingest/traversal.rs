// src/ingest/traversal.rs
//! Pull-based pagination over a [`MarketSource`].
//!
//! A [`BatchStream`] walks one query from a start offset, maps and filters
//! every page, and hands out fixed-size batches on demand. It is finite and
//! not restartable: resuming means building a new stream with an explicit
//! offset.

use metrics::counter;
use std::collections::BTreeMap;
use std::time::Instant;

use crate::ingest::config::SyncConfig;
use crate::ingest::error::{SourceError, SyncError};
use crate::ingest::mapper::AssetMapper;
use crate::ingest::types::{AssetRecord, CategoryConfig, MarketSource, ResumePoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraversalOptions {
    pub batch_size: usize,
    pub max_consecutive_errors: u32,
}

impl TraversalOptions {
    pub fn from_config(cfg: &SyncConfig) -> Self {
        Self {
            batch_size: cfg.sync.batch_size.max(1),
            max_consecutive_errors: cfg.retry.max_consecutive_errors.max(1),
        }
    }
}

/// Records flushed together to persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetBatch {
    pub records: Vec<AssetRecord>,
    /// 1-based within the stream.
    pub batch_number: u64,
    /// Estimate derived from the first-observed total.
    pub total_batches: u64,
    pub category: Option<String>,
    /// First offset not yet fetched successfully. Resuming here loses nothing.
    pub next_offset: u64,
}

/// Why a stream stopped producing pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraversalEnd {
    /// The source returned an empty page.
    Exhausted,
    /// Items received reached the first-observed total.
    ReachedTotal,
    /// Consecutive page failures hit the cap; partial results were kept.
    ErrorBudgetExhausted { last_error: SourceError },
}

pub struct BatchStream<'a> {
    source: &'a dyn MarketSource,
    mapper: &'a AssetMapper,
    opts: TraversalOptions,
    query: String,
    category: Option<String>,
    start_offset: u64,
    offset: u64,
    total_count: Option<u64>,
    processed: u64,
    pages: u64,
    consecutive_errors: u32,
    /// Offset of the first page in the current failure streak.
    streak_start: Option<u64>,
    batch_number: u64,
    pending: Vec<AssetRecord>,
    filtered: BTreeMap<String, usize>,
    outcome: Option<TraversalEnd>,
    aborted: bool,
    announced: bool,
    started: Instant,
}

impl<'a> BatchStream<'a> {
    pub fn new(
        source: &'a dyn MarketSource,
        mapper: &'a AssetMapper,
        query: impl Into<String>,
        start_offset: u64,
        opts: TraversalOptions,
    ) -> Self {
        Self {
            source,
            mapper,
            opts,
            query: query.into(),
            category: None,
            start_offset,
            offset: start_offset,
            total_count: None,
            processed: 0,
            pages: 0,
            consecutive_errors: 0,
            streak_start: None,
            batch_number: 0,
            pending: Vec::new(),
            filtered: BTreeMap::new(),
            outcome: None,
            aborted: false,
            announced: false,
            started: Instant::now(),
        }
    }

    pub fn for_segment(
        source: &'a dyn MarketSource,
        mapper: &'a AssetMapper,
        segment: &TraversalSegment,
        opts: TraversalOptions,
    ) -> Self {
        let mut s = Self::new(source, mapper, segment.query(), segment.start_offset, opts);
        s.category = segment.category_id().map(str::to_string);
        s
    }

    /// Next batch, `Ok(None)` once the stream is finished.
    ///
    /// A critical source error is returned as-is; the stream is dead afterwards
    /// and any records accumulated since the last batch are dropped.
    pub async fn next_batch(&mut self) -> Result<Option<AssetBatch>, SourceError> {
        if self.aborted {
            return Ok(None);
        }
        if !self.announced {
            self.announced = true;
            tracing::info!(
                target: "ingest",
                category = self.label(),
                query = %self.query,
                offset = self.start_offset,
                batch_size = self.opts.batch_size,
                "starting traversal"
            );
        }

        while self.outcome.is_none() {
            match self.source.fetch_page(&self.query, self.offset).await {
                Ok(page) => {
                    self.consecutive_errors = 0;
                    self.streak_start = None;
                    let total = self.observe_total(page.total_count);

                    if page.items.is_empty() {
                        tracing::warn!(
                            target: "ingest",
                            category = self.label(),
                            offset = self.offset,
                            "no items returned, ending traversal"
                        );
                        self.outcome = Some(TraversalEnd::Exhausted);
                        break;
                    }

                    self.pages += 1;
                    self.processed += page.items.len() as u64;
                    let mapped = self.mapper.map_and_filter_counted(&page.items);
                    for (rule, n) in mapped.filtered {
                        *self.filtered.entry(rule).or_insert(0) += n;
                    }
                    self.pending.extend(mapped.kept);
                    self.offset += self.source.page_size();

                    tracing::debug!(
                        target: "ingest",
                        category = self.label(),
                        processed = self.processed,
                        total,
                        elapsed_s = self.started.elapsed().as_secs_f64(),
                        "progress"
                    );

                    if self.processed >= total {
                        tracing::info!(target: "ingest", category = self.label(), total, "reached total count");
                        self.outcome = Some(TraversalEnd::ReachedTotal);
                    }
                    if self.pending.len() >= self.opts.batch_size {
                        return Ok(Some(self.flush()));
                    }
                }
                Err(e) if e.is_critical() => {
                    tracing::error!(
                        target: "ingest",
                        category = self.label(),
                        offset = self.offset,
                        error = %e,
                        dropped = self.pending.len(),
                        "critical source error, aborting traversal"
                    );
                    self.pending.clear();
                    self.aborted = true;
                    return Err(e);
                }
                Err(e) => {
                    self.consecutive_errors += 1;
                    self.streak_start = self.streak_start.or(Some(self.offset));
                    counter!("ingest_page_errors_total").increment(1);
                    tracing::error!(
                        target: "ingest",
                        category = self.label(),
                        offset = self.offset,
                        consecutive = self.consecutive_errors,
                        max = self.opts.max_consecutive_errors,
                        error = %e,
                        "page fetch failed"
                    );
                    if self.consecutive_errors >= self.opts.max_consecutive_errors {
                        tracing::error!(
                            target: "ingest",
                            category = self.label(),
                            processed = self.processed,
                            "stopping after consecutive errors"
                        );
                        self.outcome = Some(TraversalEnd::ErrorBudgetExhausted { last_error: e });
                        break;
                    }
                    tracing::warn!(target: "ingest", category = self.label(), "skipping to next offset");
                    self.offset += self.source.page_size();
                }
            }
        }

        if self.pending.is_empty() {
            tracing::info!(
                target: "ingest",
                category = self.label(),
                processed = self.processed,
                pages = self.pages,
                elapsed_s = self.started.elapsed().as_secs_f64(),
                "traversal finished"
            );
            return Ok(None);
        }
        Ok(Some(self.flush()))
    }

    fn observe_total(&mut self, reported: u64) -> u64 {
        match self.total_count {
            Some(first) => {
                if first != reported {
                    tracing::warn!(
                        target: "ingest",
                        category = self.label(),
                        first_total = first,
                        reported_total = reported,
                        offset = self.offset,
                        "total count drifted, keeping first observed value"
                    );
                }
                first
            }
            None => {
                tracing::info!(
                    target: "ingest",
                    category = self.label(),
                    total = reported,
                    estimated_pages = reported.div_ceil(self.source.page_size().max(1)),
                    "total items"
                );
                self.total_count = Some(reported);
                reported
            }
        }
    }

    fn flush(&mut self) -> AssetBatch {
        self.batch_number += 1;
        let basis = self.total_count.unwrap_or(self.processed).max(self.processed);
        let total_batches = basis
            .div_ceil(self.opts.batch_size as u64)
            .max(self.batch_number);
        let records = std::mem::take(&mut self.pending);
        tracing::info!(
            target: "ingest",
            category = self.label(),
            batch = self.batch_number,
            total_batches,
            records = records.len(),
            "batch ready"
        );
        AssetBatch {
            records,
            batch_number: self.batch_number,
            total_batches,
            category: self.category.clone(),
            next_offset: self.resume_offset(),
        }
    }

    fn label(&self) -> &str {
        self.category.as_deref().unwrap_or("all")
    }

    pub fn outcome(&self) -> Option<&TraversalEnd> {
        self.outcome.as_ref()
    }

    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Where a later run should pick up: the start of an unbroken failure
    /// streak if the stream is in one, otherwise the next offset to request.
    pub fn resume_offset(&self) -> u64 {
        self.streak_start.unwrap_or(self.offset)
    }

    /// Raw items received (before filtering).
    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn pages(&self) -> u64 {
        self.pages
    }

    pub fn total_count(&self) -> Option<u64> {
        self.total_count
    }

    pub fn filtered(&self) -> &BTreeMap<String, usize> {
        &self.filtered
    }
}

/// One query pass of a sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversalSegment {
    pub category: Option<CategoryConfig>,
    pub start_offset: u64,
}

impl TraversalSegment {
    pub fn full_catalog(start_offset: u64) -> Self {
        Self {
            category: None,
            start_offset,
        }
    }

    pub fn query(&self) -> &str {
        self.category.as_ref().map_or("", |c| c.search_query.as_str())
    }

    pub fn category_id(&self) -> Option<&str> {
        self.category.as_ref().map(|c| c.id.as_str())
    }
}

/// Order the selected categories by priority and apply the resume point.
///
/// No selection means one full-catalog pass. A resume point naming a category
/// skips everything before it; one without a category applies its offset to
/// the first segment. Later segments always start at 0.
pub fn plan_segments(
    configured: &[CategoryConfig],
    selected: &[String],
    resume: Option<&ResumePoint>,
) -> Result<Vec<TraversalSegment>, SyncError> {
    let offset = resume.map_or(0, |r| r.offset);
    let resume_category = resume.and_then(|r| r.category_id.as_deref());

    if selected.is_empty() {
        if let Some(id) = resume_category {
            return Err(SyncError::ResumeOutsidePlan(id.to_string()));
        }
        return Ok(vec![TraversalSegment::full_catalog(offset)]);
    }

    let mut plan: Vec<CategoryConfig> = Vec::with_capacity(selected.len());
    for id in selected {
        let cat = configured
            .iter()
            .find(|c| &c.id == id)
            .ok_or_else(|| SyncError::UnknownCategory(id.clone()))?;
        if !plan.iter().any(|c| c.id == cat.id) {
            plan.push(cat.clone());
        }
    }
    plan.sort_by_key(|c| c.priority);

    let skip = match resume_category {
        Some(id) => plan
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| SyncError::ResumeOutsidePlan(id.to_string()))?,
        None => 0,
    };

    Ok(plan
        .into_iter()
        .skip(skip)
        .enumerate()
        .map(|(i, c)| TraversalSegment {
            category: Some(c),
            start_offset: if i == 0 { offset } else { 0 },
        })
        .collect())
}

/// Drain a whole traversal into memory.
pub async fn collect_all(
    source: &dyn MarketSource,
    mapper: &AssetMapper,
    query: &str,
    start_offset: u64,
    opts: TraversalOptions,
) -> Result<(Vec<AssetRecord>, TraversalEnd), SourceError> {
    let mut stream = BatchStream::new(source, mapper, query, start_offset, opts);
    let mut out = Vec::new();
    while let Some(batch) = stream.next_batch().await? {
        out.extend(batch.records);
    }
    let end = stream.outcome().cloned().unwrap_or(TraversalEnd::Exhausted);
    Ok((out, end))
}

/// `(name, price)` for every priced record in the full catalog.
pub async fn current_prices(
    source: &dyn MarketSource,
    mapper: &AssetMapper,
    opts: TraversalOptions,
) -> Result<Vec<(String, f64)>, SourceError> {
    let (records, _) = collect_all(source, mapper, "", 0, opts).await?;
    Ok(records
        .into_iter()
        .filter_map(|r| r.current_price.map(|p| (r.name, p)))
        .collect())
}
