// src/ingest/types.rs
use serde::{Deserialize, Serialize};

use crate::ingest::error::SourceError;

/// Canonical unit of ingestion. `name` is the natural key used for upserts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssetRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    /// `None` means the source had no parseable price; `Some(0.0)` is a real price.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_price: Option<f64>,
}

impl AssetRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            icon_url: None,
            current_price: None,
        }
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.current_price = Some(price);
        self
    }

    pub fn with_icon(mut self, url: impl Into<String>) -> Self {
        self.icon_url = Some(url.into());
        self
    }

    /// Records whose name is blank after trimming are never persisted.
    pub fn has_valid_name(&self) -> bool {
        !self.name.trim().is_empty()
    }
}

/// Nested description block of an upstream listing item.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawAssetDescription {
    #[serde(default)]
    pub market_hash_name: Option<String>,
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// One item as returned by the upstream search endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawItem {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub asset_description: Option<RawAssetDescription>,
    #[serde(default)]
    pub sell_price: Option<u64>,
    #[serde(default)]
    pub sell_price_text: Option<String>,
}

impl RawItem {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_price_text(mut self, text: impl Into<String>) -> Self {
        self.sell_price_text = Some(text.into());
        self
    }
}

/// One fetch result. `total_count` is only authoritative once the first
/// non-empty page of a traversal has been seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourcePage {
    pub items: Vec<RawItem>,
    pub total_count: u64,
    pub offset: u64,
}

/// Static, priority-ordered partition of the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CategoryConfig {
    pub id: String,
    pub name: String,
    #[serde(alias = "search_query")]
    pub search_query: String,
    pub priority: u32,
}

/// Where a run should pick up. A bare offset (no category) applies to the
/// first traversal segment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResumePoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    pub offset: u64,
}

impl ResumePoint {
    pub fn at_offset(offset: u64) -> Self {
        Self {
            category_id: None,
            offset,
        }
    }

    pub fn in_category(category_id: impl Into<String>, offset: u64) -> Self {
        Self {
            category_id: Some(category_id.into()),
            offset,
        }
    }
}

/// Paginated upstream listing. Implementations own retry and rate limiting;
/// a critical error must be returned without exhausting retries.
#[async_trait::async_trait]
pub trait MarketSource: Send + Sync {
    async fn fetch_page(&self, query: &str, offset: u64) -> Result<SourcePage, SourceError>;
    fn page_size(&self) -> u64;
    fn name(&self) -> &str;
}
