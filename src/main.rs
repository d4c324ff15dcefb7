//! Market Asset Sync: binary entrypoint
//! Boots the Axum admin server: sync trigger, status, history, and `/metrics`.
//!
//! See `README.md` for quickstart and configuration.

use shuttle_axum::ShuttleAxum;

use market_asset_sync::ingest::config::load_sync_config_default;
use market_asset_sync::metrics::Metrics;

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    // This enables INGEST_CONFIG_PATH / STEAM_COOKIES from .env.
    let _ = dotenvy::dotenv();

    market_asset_sync::init_tracing();

    let config = load_sync_config_default()?;
    tracing::info!(
        categories = config.categories.len(),
        batch_size = config.sync.batch_size,
        log_dir = %config.sync.log_dir.display(),
        "ingest config loaded"
    );

    let metrics = Metrics::init()?;
    let orchestrator = market_asset_sync::build_orchestrator(config)?;
    let router = market_asset_sync::app(orchestrator).merge(metrics.router());

    Ok(router.into())
}
