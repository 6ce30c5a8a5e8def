//! HTTP handlers for the read API.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use serde::Serialize;
use sonic_logs::LogRecord;
use sonic_store::{DEFAULT_HISTORY_LIMIT, HistoryQuery, TrafficStats};

use crate::context::PipelineContext;
use crate::error::ServerResult;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Status message.
    pub status: String,
    /// Connected live viewers.
    pub viewers: usize,
}

/// Handle GET /api/health - health check endpoint.
pub async fn health_check(State(ctx): State<Arc<PipelineContext>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        viewers: ctx.hub().viewer_count().await,
    })
}

/// Handle GET /api/history - newest records first.
///
/// `limit` may lower the page size but never raise it.
pub async fn get_history(
    State(ctx): State<Arc<PipelineContext>>,
    Query(mut query): Query<HistoryQuery>,
) -> ServerResult<Json<Vec<LogRecord>>> {
    query.limit = query.limit.min(DEFAULT_HISTORY_LIMIT);
    let records = ctx.store().history(&query).await?;
    Ok(Json(records))
}

/// Handle GET /api/stats - page views and unique addresses.
pub async fn get_stats(
    State(ctx): State<Arc<PipelineContext>>,
) -> ServerResult<Json<TrafficStats>> {
    Ok(Json(ctx.store().stats().await?))
}

/// Handle GET /api/devices.
pub async fn list_devices(
    State(ctx): State<Arc<PipelineContext>>,
) -> ServerResult<Json<Vec<String>>> {
    Ok(Json(ctx.store().devices().await?))
}

/// Handle GET /api/tags.
pub async fn list_tags(State(ctx): State<Arc<PipelineContext>>) -> ServerResult<Json<Vec<String>>> {
    Ok(Json(ctx.store().tags().await?))
}
