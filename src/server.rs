use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use wirestats::{Reporter, StatsLayer};

use crate::handlers;
use crate::AppState;

/// Builds the full Axum `Router`; every route is measured by [`StatsLayer`].
pub fn create_router(state: Arc<AppState>, reporter: Reporter) -> Router {
    Router::new()
        // ── Key-value proxy ─────────────────────────────────────
        .route(
            "/api/kv/:key",
            get(handlers::kv::get_value).put(handlers::kv::put_value),
        )
        // ── Statistics ──────────────────────────────────────────
        .route("/api/stats", get(handlers::stats::get_snapshot))
        .route("/api/stats/logs", get(handlers::stats::get_logs))
        .route("/api/stats/stream", get(handlers::stats::snapshot_stream))
        .route("/api/metrics", get(handlers::stats::get_metrics))
        // ── Load generator ──────────────────────────────────────
        .route("/api/load/start", post(handlers::load::start_load))
        .route("/api/load/stop", post(handlers::load::stop_load))
        .route("/api/load/status", get(handlers::load::load_status))
        .with_state(state)
        // ── Global middleware (applied bottom-up) ───────────────
        .layer(StatsLayer::new(reporter))
        .layer(CorsLayer::permissive())
}
