// src/ingest/config.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::ingest::error::ConfigError;
use crate::ingest::filters::{FilterRule, FilterSet};
use crate::ingest::types::CategoryConfig;

const ENV_PATH: &str = "INGEST_CONFIG_PATH";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortColumn {
    /// Alphabetical; the most stable order for pagination.
    Name,
    Price,
    Quantity,
    Popular,
}

impl SortColumn {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Price => "price",
            Self::Quantity => "quantity",
            Self::Popular => "popular",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// What a run reports when consecutive page failures hit the cap.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExhaustionPolicy {
    /// Best effort: keep partial results and report `completed`.
    #[default]
    Complete,
    /// Stop the run and report `failed` with the resume offset.
    Fail,
}

/// How a batch is written to the store.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// One upsert per record; in-batch duplicates dropped before writing.
    #[default]
    Fast,
    /// Lookup then create/update; duplicates written again, per-record details kept.
    Detailed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
    pub app_id: u32,
    pub page_size: u64,
    pub sort_column: SortColumn,
    pub sort_direction: SortDirection,
    pub icon_base_url: String,
    /// Env var whose value is sent as the Cookie header.
    pub cookies_env: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://steamcommunity.com/market/search/render/".to_string(),
            app_id: 730,
            page_size: 10,
            sort_column: SortColumn::Name,
            sort_direction: SortDirection::Asc,
            icon_base_url: "https://community.cloudflare.steamstatic.com/economy/image/"
                .to_string(),
            cookies_env: "STEAM_COOKIES".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests_per_minute: u32,
    pub rate_window_ms: u64,
    pub min_jitter_ms: u64,
    pub max_jitter_ms: u64,
    /// Extra wait after the oldest request leaves a full window.
    pub safety_margin_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 120,
            rate_window_ms: 60_000,
            min_jitter_ms: 0,
            max_jitter_ms: 500,
            safety_margin_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub max_consecutive_errors: u32,
    pub retry_base_delay_ms: u64,
    pub exhaustion_policy: ExhaustionPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_consecutive_errors: 3,
            retry_base_delay_ms: 2_000,
            exhaustion_policy: ExhaustionPolicy::Complete,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_ms: u64,
    pub critical_status_codes: Vec<u16>,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            critical_status_codes: vec![403, 429, 500, 502, 503, 504],
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36"
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub write_mode: WriteMode,
    pub log_dir: PathBuf,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            write_mode: WriteMode::Fast,
            log_dir: PathBuf::from("logs/syncs"),
        }
    }
}

/// Full ingestion configuration. Every section is optional in files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    pub source: SourceConfig,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
    pub http: HttpConfig,
    pub sync: BatchConfig,
    pub filters: Vec<FilterRule>,
    pub categories: Vec<CategoryConfig>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            http: HttpConfig::default(),
            sync: BatchConfig::default(),
            filters: default_filters(),
            categories: default_categories(),
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.source.page_size == 0 {
            return Err(ConfigError::Invalid {
                field: "source.page_size",
                reason: "must be greater than zero".into(),
            });
        }
        if self.sync.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "sync.batch_size",
                reason: "must be greater than zero".into(),
            });
        }
        if self.rate_limit.max_requests_per_minute == 0 {
            return Err(ConfigError::Invalid {
                field: "rate_limit.max_requests_per_minute",
                reason: "must be greater than zero".into(),
            });
        }
        if self.rate_limit.max_jitter_ms < self.rate_limit.min_jitter_ms {
            return Err(ConfigError::Invalid {
                field: "rate_limit.max_jitter_ms",
                reason: format!(
                    "{} is below min_jitter_ms {}",
                    self.rate_limit.max_jitter_ms, self.rate_limit.min_jitter_ms
                ),
            });
        }

        FilterSet::compile(&self.filters)?;

        let mut ids = HashSet::new();
        for c in &self.categories {
            if !ids.insert(c.id.as_str()) {
                return Err(ConfigError::DuplicateCategory(c.id.clone()));
            }
        }
        Ok(())
    }

    /// Categories sorted by ascending priority.
    pub fn categories_by_priority(&self) -> Vec<CategoryConfig> {
        let mut out = self.categories.clone();
        out.sort_by_key(|c| c.priority);
        out
    }
}

pub fn default_filters() -> Vec<FilterRule> {
    vec![FilterRule {
        id: "sticker-slab-charms".to_string(),
        description: "Exclude Sticker Slab items (they are charms, not stickers)".to_string(),
        pattern: r"^Sticker Slab \|".to_string(),
        reason: "Sticker Slab items are charms that duplicate sticker names".to_string(),
    }]
}

pub fn default_categories() -> Vec<CategoryConfig> {
    [
        ("stickers", "Stickers", "Sticker |", 1),
        ("cases", "Cases", "Case", 2),
        ("charms", "Charms", "Charm |", 3),
        ("graffiti", "Graffiti", "Graffiti |", 4),
        ("patches", "Patches", "Patch |", 5),
    ]
    .into_iter()
    .map(|(id, name, q, p)| CategoryConfig {
        id: id.to_string(),
        name: name.to_string(),
        search_query: q.to_string(),
        priority: p,
    })
    .collect()
}

/// Load config from an explicit path. Supports TOML or JSON formats.
pub fn load_sync_config_from(path: &Path) -> Result<SyncConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading ingest config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let cfg = parse_config(&content, ext.as_str())
        .with_context(|| format!("parsing ingest config {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load config using env var + fallbacks:
/// 1) $INGEST_CONFIG_PATH
/// 2) config/ingest.toml
/// 3) config/ingest.json
/// 4) built-in defaults
pub fn load_sync_config_default() -> Result<SyncConfig> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_sync_config_from(&pb);
        } else {
            return Err(anyhow!("INGEST_CONFIG_PATH points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/ingest.toml");
    if toml_p.exists() {
        return load_sync_config_from(&toml_p);
    }
    let json_p = PathBuf::from("config/ingest.json");
    if json_p.exists() {
        return load_sync_config_from(&json_p);
    }
    Ok(SyncConfig::default())
}

fn parse_config(s: &str, hint_ext: &str) -> Result<SyncConfig> {
    match hint_ext {
        "toml" => return toml::from_str(s).context("invalid TOML"),
        "json" => return serde_json::from_str(s).context("invalid JSON"),
        _ => {}
    }
    // Unknown extension: sniff JSON first, then TOML.
    if s.trim_start().starts_with('{') {
        if let Ok(v) = serde_json::from_str(s) {
            return Ok(v);
        }
    }
    toml::from_str(s).map_err(|e| anyhow!("unsupported ingest config format: {e}"))
}
