// src/ingest/providers/mod.rs
pub mod scripted;
pub mod steam_market;

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::ingest::error::ConfigError;
use crate::ingest::types::MarketSource;

pub use scripted::ScriptedSource;
pub use steam_market::SteamMarketClient;

/// Registry key of the built-in Steam Community Market source.
pub const STEAM_MARKET: &str = "steam_market";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProviderInfo {
    pub kind: String,
    pub name: String,
}

/// Named market sources with one selected as current.
pub struct ProviderRegistry {
    sources: BTreeMap<String, Arc<dyn MarketSource>>,
    current: RwLock<(String, Arc<dyn MarketSource>)>,
}

impl ProviderRegistry {
    /// The initial source becomes the current one.
    pub fn new(kind: impl Into<String>, source: Arc<dyn MarketSource>) -> Self {
        let kind = kind.into();
        let mut sources = BTreeMap::new();
        sources.insert(kind.clone(), Arc::clone(&source));
        Self {
            sources,
            current: RwLock::new((kind, source)),
        }
    }

    pub fn register(&mut self, kind: impl Into<String>, source: Arc<dyn MarketSource>) {
        let kind = kind.into();
        tracing::info!(target: "ingest", provider = %kind, name = source.name(), "provider registered");
        let cur = self
            .current
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if cur.0 == kind {
            cur.1 = Arc::clone(&source);
        }
        self.sources.insert(kind, source);
    }

    pub fn set_current(&self, kind: &str) -> Result<(), ConfigError> {
        let source = self
            .sources
            .get(kind)
            .ok_or_else(|| ConfigError::UnknownProvider(kind.to_string()))?;
        let mut cur = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *cur = (kind.to_string(), Arc::clone(source));
        tracing::info!(target: "ingest", provider = %kind, "current provider switched");
        Ok(())
    }

    pub fn current_kind(&self) -> String {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .0
            .clone()
    }

    pub fn current(&self) -> Arc<dyn MarketSource> {
        let cur = self
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&cur.1)
    }

    pub fn available(&self) -> Vec<ProviderInfo> {
        self.sources
            .iter()
            .map(|(kind, s)| ProviderInfo {
                kind: kind.clone(),
                name: s.name().to_string(),
            })
            .collect()
    }
}
