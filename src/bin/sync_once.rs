//! Runs a single sync in the foreground and prints the JSON report.
//!
//! Env: SYNC_CATEGORIES (comma list), SYNC_OFFSET, SYNC_RESUME_CATEGORY,
//! plus everything the service reads (INGEST_CONFIG_PATH, STEAM_COOKIES, RUST_LOG).

use anyhow::Context;
use market_asset_sync::ingest::config::load_sync_config_default;
use market_asset_sync::ingest::{ResumePoint, SyncOutcome, SyncRequest};

fn request_from_env() -> anyhow::Result<SyncRequest> {
    let categories = std::env::var("SYNC_CATEGORIES")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    let offset = match std::env::var("SYNC_OFFSET") {
        Ok(v) => Some(v.trim().parse::<u64>().context("SYNC_OFFSET must be a number")?),
        Err(_) => None,
    };
    let category_id = std::env::var("SYNC_RESUME_CATEGORY")
        .ok()
        .filter(|s| !s.trim().is_empty());

    let resume = (offset.is_some() || category_id.is_some()).then(|| ResumePoint {
        category_id,
        offset: offset.unwrap_or(0),
    });
    Ok(SyncRequest { categories, resume })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    market_asset_sync::init_tracing();

    let config = load_sync_config_default()?;
    let orchestrator = market_asset_sync::build_orchestrator(config)?;
    let req = request_from_env()?;

    match orchestrator.start_sync(req).await {
        SyncOutcome::Finished(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.success {
                std::process::exit(1);
            }
        }
        SyncOutcome::Rejected { message } => {
            eprintln!("{message}");
            std::process::exit(2);
        }
    }
    Ok(())
}
