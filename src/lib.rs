// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod api;
pub mod ingest;
pub mod metrics;

use std::sync::Arc;

use anyhow::Context;
use shuttle_axum::axum::Router;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::ingest::config::SyncConfig;
use crate::ingest::orchestrator::SyncOrchestrator;
use crate::ingest::providers::{ProviderRegistry, SteamMarketClient, STEAM_MARKET};
use crate::ingest::store::InMemoryAssetStore;
use crate::ingest::sync_log::FileSyncLog;

// Convenient access to the router builder: `crate_root::api::router` and `crate_root::router`
pub use crate::api::router;

/// Wire the production orchestrator: Steam Market source, in-process store,
/// file journal under `sync.log_dir`.
pub fn build_orchestrator(config: SyncConfig) -> anyhow::Result<Arc<SyncOrchestrator>> {
    let client = SteamMarketClient::from_config(&config).context("building market client")?;
    let providers = ProviderRegistry::new(STEAM_MARKET, Arc::new(client));
    let sync_log = FileSyncLog::new(config.sync.log_dir.clone());
    let orch = SyncOrchestrator::new(
        config,
        providers,
        Arc::new(InMemoryAssetStore::new()),
        Arc::new(sync_log),
    )
    .context("invalid sync configuration")?;
    Ok(Arc::new(orch))
}

/// Admin router over an orchestrator (no `/metrics`; the binary merges that in).
pub fn app(orchestrator: Arc<SyncOrchestrator>) -> Router {
    api::router(api::AppState::new(orchestrator))
}

/// Compact console logs, JSON when `LOG_FORMAT=json`. For binaries; a
/// subscriber that is already installed wins.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("market_asset_sync=info,ingest=info,warn"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
