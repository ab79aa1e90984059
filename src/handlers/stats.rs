use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use wirestats::engine::EngineSnapshot;
use wirestats::Snapshot;

use crate::AppState;

use super::AppError;

const DEFAULT_LOG_COUNT: i64 = 20;

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub count: Option<i64>,
}

// ─── GET /api/stats ──────────────────────────────────────────────

pub async fn get_snapshot(State(state): State<Arc<AppState>>) -> Json<Snapshot> {
    Json(state.aggregator.last_snapshot())
}

// ─── GET /api/stats/logs?count=N ─────────────────────────────────
/// Most recent transaction log lines, oldest first. A negative count, or one
/// above `MAX_LOG_QUERY`, is a bad request.

pub async fn get_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<String>>, AppError> {
    let count = query.count.unwrap_or(DEFAULT_LOG_COUNT);
    Ok(Json(state.aggregator.latest_log_messages(count)?))
}

// ─── GET /api/stats/stream ───────────────────────────────────────
/// Server-Sent Events endpoint pushing the last snapshot every 500 ms.

pub async fn snapshot_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let interval = tokio::time::interval(Duration::from_millis(500));

    let stream = IntervalStream::new(interval).map(move |_| {
        let snapshot = state.aggregator.last_snapshot();
        let json = serde_json::to_string(&snapshot).unwrap_or_default();
        Ok(Event::default().data(json))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

// ─── GET /api/metrics ────────────────────────────────────────────
/// Counters and latency percentiles per series.

pub async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<EngineSnapshot> {
    Json(state.engine.snapshot())
}
