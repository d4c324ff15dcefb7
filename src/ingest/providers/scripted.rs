// src/ingest/providers/scripted.rs
// --- Test helper ---
//
// Replays canned responses keyed by (query, offset). A key with several queued
// responses pops them in order and then keeps returning the last one; an
// unknown key answers with an empty page, which ends a traversal.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::ingest::error::SourceError;
use crate::ingest::types::{MarketSource, RawItem, SourcePage};

type Key = (String, u64);

pub struct ScriptedSource {
    page_size: u64,
    delay: Option<Duration>,
    script: Mutex<HashMap<Key, VecDeque<Result<SourcePage, SourceError>>>>,
    pub calls: Mutex<Vec<Key>>,
}

impl ScriptedSource {
    pub fn new(page_size: u64) -> Self {
        Self {
            page_size,
            delay: None,
            script: Mutex::new(HashMap::new()),
            calls: Mutex::new(vec![]),
        }
    }

    /// Sleep this long inside every fetch (lets tests observe a running sync).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn page(self, query: &str, offset: u64, items: Vec<RawItem>, total_count: u64) -> Self {
        self.push(
            query,
            offset,
            Ok(SourcePage {
                items,
                total_count,
                offset,
            }),
        )
    }

    /// Convenience: items named `names`, each priced at `$1.00`.
    pub fn named_page(self, query: &str, offset: u64, names: &[&str], total_count: u64) -> Self {
        let items = names
            .iter()
            .map(|n| RawItem::named(*n).with_price_text("$1.00"))
            .collect();
        self.page(query, offset, items, total_count)
    }

    pub fn fail(self, query: &str, offset: u64, err: SourceError) -> Self {
        self.push(query, offset, Err(err))
    }

    fn push(self, query: &str, offset: u64, resp: Result<SourcePage, SourceError>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry((query.to_string(), offset))
            .or_default()
            .push_back(resp);
        self
    }

    /// Offsets requested so far, in call order.
    pub fn offsets(&self) -> Vec<u64> {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|(_, o)| *o)
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

#[async_trait]
impl MarketSource for ScriptedSource {
    async fn fetch_page(&self, query: &str, offset: u64) -> Result<SourcePage, SourceError> {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((query.to_string(), offset));
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }

        let mut script = self.script.lock().unwrap_or_else(|p| p.into_inner());
        match script.get_mut(&(query.to_string(), offset)) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_else(|| empty(offset)),
            Some(queue) => queue.front().cloned().unwrap_or_else(|| empty(offset)),
            None => empty(offset),
        }
    }

    fn page_size(&self) -> u64 {
        self.page_size
    }

    fn name(&self) -> &str {
        "Scripted"
    }
}

fn empty(offset: u64) -> Result<SourcePage, SourceError> {
    Ok(SourcePage {
        items: vec![],
        total_count: 0,
        offset,
    })
}
