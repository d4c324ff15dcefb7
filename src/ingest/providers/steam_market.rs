// src/ingest/providers/steam_market.rs
use async_trait::async_trait;
use metrics::{counter, histogram};
use reqwest::{header, Client};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::ingest::config::{HttpConfig, RetryConfig, SortColumn, SortDirection, SourceConfig, SyncConfig};
use crate::ingest::error::{ConfigError, SourceError};
use crate::ingest::filters::FilterSet;
use crate::ingest::mapper::AssetMapper;
use crate::ingest::rate_limiter::RateLimiter;
use crate::ingest::types::{AssetRecord, MarketSource, RawItem, SourcePage};

/// Payload of the market search endpoint (`norender=1`).
#[derive(Debug, Deserialize)]
struct MarketResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    total_count: u64,
    #[serde(default)]
    results: Option<Vec<RawItem>>,
}

/// Paginated client for the Steam Community Market search listing.
pub struct SteamMarketClient {
    http: Client,
    source: SourceConfig,
    retry: RetryConfig,
    http_cfg: HttpConfig,
    limiter: Arc<RateLimiter>,
    mapper: AssetMapper,
    cookies: String,
}

impl SteamMarketClient {
    pub const NAME: &'static str = "Steam Market";

    pub fn from_config(cfg: &SyncConfig) -> Result<Self, ConfigError> {
        let limiter = Arc::new(RateLimiter::new(cfg.rate_limit.clone()));
        Self::with_rate_limiter(cfg, limiter)
    }

    /// Build with an externally owned limiter (shared across clients of the same host).
    pub fn with_rate_limiter(cfg: &SyncConfig, limiter: Arc<RateLimiter>) -> Result<Self, ConfigError> {
        crate::ingest::ensure_metrics_described();

        let filters = FilterSet::compile(&cfg.filters)?;
        let http = Client::builder()
            .user_agent(cfg.http.user_agent.clone())
            .timeout(Duration::from_millis(cfg.http.timeout_ms))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        let cookies = std::env::var(&cfg.source.cookies_env).unwrap_or_default();

        Ok(Self {
            http,
            source: cfg.source.clone(),
            retry: cfg.retry.clone(),
            http_cfg: cfg.http.clone(),
            limiter,
            mapper: AssetMapper::new(cfg.source.icon_base_url.clone(), filters),
            cookies,
        })
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    fn query_params(
        &self,
        query: &str,
        start: u64,
        count: u64,
        sort_column: SortColumn,
        sort_dir: SortDirection,
    ) -> Vec<(&'static str, String)> {
        vec![
            ("query", query.to_string()),
            ("start", start.to_string()),
            ("count", count.to_string()),
            ("search_descriptions", "0".to_string()),
            ("sort_column", sort_column.as_str().to_string()),
            ("sort_dir", sort_dir.as_str().to_string()),
            ("appid", self.source.app_id.to_string()),
            ("norender", "1".to_string()),
        ]
    }

    fn is_critical(&self, status: u16) -> bool {
        self.http_cfg.critical_status_codes.contains(&status)
    }

    /// Linear backoff: the n-th failed attempt waits `n * retry_base_delay_ms`.
    fn backoff_delay(&self, failed_attempts: u32) -> Duration {
        Duration::from_millis(
            self.retry
                .retry_base_delay_ms
                .saturating_mul(u64::from(failed_attempts)),
        )
    }

    async fn fetch_with_retry(
        &self,
        params: &[(&'static str, String)],
        max_retries: u32,
    ) -> Result<MarketResponse, SourceError> {
        let attempts = max_retries.max(1);
        let mut last_error = String::from("no attempt made");

        for attempt in 0..attempts {
            self.limiter.wait_for_rate_limit().await;
            tracing::trace!(target: "ingest", attempt = attempt + 1, attempts, "http request");

            let t0 = Instant::now();
            let sent = self
                .http
                .get(&self.source.base_url)
                .query(params)
                .header(header::ACCEPT, "application/json")
                .header(header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
                .header(header::COOKIE, self.cookies.as_str())
                .header(header::REFERER, "https://steamcommunity.com/market/")
                .header(header::ORIGIN, "https://steamcommunity.com")
                .send()
                .await;

            match sent {
                Ok(resp) => {
                    self.limiter.record_request().await;
                    histogram!("ingest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

                    let status = resp.status();
                    if !status.is_success() {
                        let code = status.as_u16();
                        if self.is_critical(code) {
                            tracing::error!(
                                target: "ingest",
                                status = code,
                                "critical upstream status, stopping sync"
                            );
                            counter!("ingest_critical_errors_total").increment(1);
                            return Err(SourceError::critical(code, status.to_string()));
                        }
                        last_error = format!("HTTP {status}");
                        tracing::warn!(target: "ingest", status = code, attempt = attempt + 1, "upstream error status");
                    } else {
                        match resp.json::<MarketResponse>().await {
                            Ok(body) => {
                                tracing::trace!(
                                    target: "ingest",
                                    success = body.success,
                                    results = body.results.as_ref().map_or(0, Vec::len),
                                    total_count = body.total_count,
                                    "response decoded"
                                );
                                return Ok(body);
                            }
                            Err(e) => {
                                last_error = SourceError::Decode(e.to_string()).to_string();
                                tracing::warn!(target: "ingest", error = %e, attempt = attempt + 1, "undecodable response");
                            }
                        }
                    }
                }
                Err(e) => {
                    self.limiter.release().await;
                    last_error = if e.is_timeout() {
                        format!("timeout: {e}")
                    } else {
                        e.to_string()
                    };
                    tracing::warn!(target: "ingest", error = %e, attempt = attempt + 1, "no response from upstream");
                }
            }

            if attempt + 1 < attempts {
                let wait = self.backoff_delay(attempt + 1);
                tracing::warn!(
                    target: "ingest",
                    wait_ms = wait.as_millis() as u64,
                    next_attempt = attempt + 2,
                    attempts,
                    "retrying"
                );
                counter!("ingest_http_retries_total").increment(1);
                tokio::time::sleep(wait).await;
            }
        }

        tracing::error!(target: "ingest", attempts, error = %last_error, "max retries exceeded");
        Err(SourceError::transient(attempts, last_error))
    }

    /// Ad-hoc search sorted by popularity. Never fails: errors yield an empty list.
    pub async fn search_assets(&self, query: &str, limit: u64) -> Vec<AssetRecord> {
        if query.chars().count() < 2 {
            return Vec::new();
        }
        let params = self.query_params(
            query,
            0,
            limit.min(100),
            SortColumn::Popular,
            SortDirection::Desc,
        );
        match self.fetch_with_retry(&params, 2).await {
            Ok(body) if body.success => {
                let items = body.results.unwrap_or_default();
                self.mapper.map_and_filter(&items)
            }
            Ok(_) => {
                tracing::warn!(target: "ingest", %query, "search returned no results");
                Vec::new()
            }
            Err(e) => {
                tracing::error!(target: "ingest", %query, error = %e, "search failed");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl MarketSource for SteamMarketClient {
    async fn fetch_page(&self, query: &str, offset: u64) -> Result<SourcePage, SourceError> {
        let params = self.query_params(
            query,
            offset,
            self.source.page_size,
            self.source.sort_column,
            self.source.sort_direction,
        );
        let body = self.fetch_with_retry(&params, self.retry.max_retries).await?;
        if !body.success {
            tracing::error!(target: "ingest", offset, "upstream returned success=false");
            return Err(SourceError::Api { offset });
        }
        counter!("ingest_pages_fetched_total").increment(1);
        Ok(SourcePage {
            items: body.results.unwrap_or_default(),
            total_count: body.total_count,
            offset,
        })
    }

    fn page_size(&self) -> u64 {
        self.source.page_size
    }

    fn name(&self) -> &str {
        Self::NAME
    }
}
