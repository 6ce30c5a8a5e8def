//! Route configuration.

use std::sync::Arc;

use axum::routing::{Router, any, get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::context::PipelineContext;
use crate::handlers::{get_history, get_stats, health_check, list_devices, list_tags};
use crate::ingest::{receive_batch, receive_batch_for_device, receive_event, receive_push};
use crate::viewer::ws_upgrade;

/// Create the application router.
///
/// Paths outside the API fall back to files under the configured static
/// directory.
pub fn create_router(ctx: Arc<PipelineContext>) -> Router {
    let static_files = ServeDir::new(&ctx.config().static_dir);

    let api_routes = Router::new()
        // Read API
        .route("/health", get(health_check))
        .route("/history", get(get_history))
        .route("/stats", get(get_stats))
        .route("/devices", get(list_devices))
        .route("/tags", get(list_tags))
        // Ingestion
        .route("/log/batch", post(receive_batch))
        .route("/log/batch/", post(receive_batch))
        .route("/log/batch/{*device_id}", post(receive_batch_for_device))
        .route("/log/push/", any(receive_push))
        .route("/log/push/{*device_id}", any(receive_push));

    Router::new()
        .nest("/api", api_routes)
        // Live feed
        .route("/ws", get(ws_upgrade))
        // Single-event receiver
        .route("/log/", any(receive_event))
        .route("/log/{*device_id}", any(receive_event))
        .fallback_service(static_files)
        .with_state(ctx)
        .layer(build_cors_layer())
        .layer(TraceLayer::new_for_http())
}

fn build_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}
