// src/api.rs
// Admin surface over the sync orchestrator. Runs are started in the
// background; callers poll /assets/sync/status and /assets/sync/history.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shuttle_axum::axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::ingest::error::ConfigError;
use crate::ingest::orchestrator::{SyncOrchestrator, SyncRequest, SyncStatus, ALREADY_RUNNING};
use crate::ingest::providers::ProviderInfo;
use crate::ingest::sync_log::SyncLogEntry;
use crate::ingest::traversal::plan_segments;
use crate::ingest::types::{CategoryConfig, ResumePoint};

const DEFAULT_HISTORY_LIMIT: usize = 10;
const MAX_HISTORY_LIMIT: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SyncOrchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/assets/sync", post(start_sync))
        .route("/assets/sync/status", get(sync_status))
        .route("/assets/sync/history", get(sync_history))
        .route("/assets/categories", get(categories))
        .route("/assets/providers", get(providers))
        .route("/assets/providers/{kind}", patch(switch_provider))
        .route("/assets/count", get(asset_count))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct SyncQuery {
    /// Comma-separated category ids.
    #[serde(default)]
    categories: Option<String>,
    #[serde(default)]
    offset: Option<u64>,
    #[serde(default)]
    resume_category: Option<String>,
}

impl SyncQuery {
    fn into_request(self) -> SyncRequest {
        let categories = self
            .categories
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        let resume_category = self.resume_category.filter(|c| !c.trim().is_empty());
        let resume = if self.offset.is_some() || resume_category.is_some() {
            Some(ResumePoint {
                category_id: resume_category,
                offset: self.offset.unwrap_or(0),
            })
        } else {
            None
        };
        SyncRequest { categories, resume }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncStarted {
    message: &'static str,
    status: &'static str,
    categories: Vec<String>,
    start_offset: u64,
}

#[derive(Serialize)]
struct SyncRejected {
    message: String,
    status: SyncStatus,
}

async fn start_sync(State(state): State<AppState>, Query(q): Query<SyncQuery>) -> Response {
    let orch = state.orchestrator;
    let req = q.into_request();

    if let Err(e) = plan_segments(&orch.config().categories, &req.categories, req.resume.as_ref()) {
        let body = serde_json::json!({ "message": e.to_string() });
        return (StatusCode::BAD_REQUEST, Json(body)).into_response();
    }

    let Some(permit) = orch.try_acquire() else {
        let body = SyncRejected {
            message: ALREADY_RUNNING.to_string(),
            status: orch.status(),
        };
        return (StatusCode::CONFLICT, Json(body)).into_response();
    };

    let started = SyncStarted {
        message: "Sync started",
        status: "started",
        categories: req.categories.clone(),
        start_offset: req.resume.as_ref().map_or(0, |r| r.offset),
    };

    let bg = Arc::clone(&orch);
    tokio::spawn(async move {
        let report = bg.run(permit, req).await;
        tracing::info!(
            target: "ingest",
            sync_id = %report.sync_id,
            success = report.success,
            last_offset = report.last_processed_offset,
            "background sync finished"
        );
    });

    (StatusCode::ACCEPTED, Json(started)).into_response()
}

async fn sync_status(State(state): State<AppState>) -> Json<SyncStatus> {
    Json(state.orchestrator.status())
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn sync_history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> Json<Vec<SyncLogEntry>> {
    let limit = q
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    Json(state.orchestrator.recent_syncs(limit).await)
}

async fn categories(State(state): State<AppState>) -> Json<Vec<CategoryConfig>> {
    Json(state.orchestrator.categories())
}

#[derive(Serialize)]
struct ProvidersOut {
    current: String,
    available: Vec<ProviderInfo>,
}

async fn providers(State(state): State<AppState>) -> Json<ProvidersOut> {
    let orch = &state.orchestrator;
    Json(ProvidersOut {
        current: orch.providers().current_kind(),
        available: orch.available_providers(),
    })
}

/// Runs already in flight keep the source they started with.
async fn switch_provider(State(state): State<AppState>, Path(kind): Path<String>) -> Response {
    let orch = &state.orchestrator;
    match orch.providers().set_current(&kind) {
        Ok(()) => {
            let body = serde_json::json!({
                "message": format!("Switched to provider: {kind}"),
                "current": orch.providers().current_kind(),
                "name": orch.providers().current().name(),
            });
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e @ ConfigError::UnknownProvider(_)) => {
            let body = serde_json::json!({ "message": e.to_string() });
            (StatusCode::NOT_FOUND, Json(body)).into_response()
        }
        Err(e) => {
            let body = serde_json::json!({ "message": e.to_string() });
            (StatusCode::BAD_REQUEST, Json(body)).into_response()
        }
    }
}

async fn asset_count(State(state): State<AppState>) -> Response {
    match state.orchestrator.store().count().await {
        Ok(count) => Json(serde_json::json!({ "count": count })).into_response(),
        Err(e) => {
            tracing::error!(target: "ingest", error = %e, "asset count failed");
            let body = serde_json::json!({ "message": e.to_string() });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_splits_categories_and_builds_resume_point() {
        let q = SyncQuery {
            categories: Some("stickers, cases,,".into()),
            offset: Some(500),
            resume_category: Some("cases".into()),
        };
        let req = q.into_request();
        assert_eq!(req.categories, ["stickers", "cases"]);
        assert_eq!(req.resume, Some(ResumePoint::in_category("cases", 500)));

        let req = SyncQuery::default().into_request();
        assert!(req.categories.is_empty());
        assert_eq!(req.resume, None);
    }
}
