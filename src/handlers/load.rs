use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::AppState;

use super::AppError;

// ─── Request / response types ────────────────────────────────────

/// Overrides for the configured load-generator defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoadRequest {
    pub concurrency: Option<u32>,
    pub duration_secs: Option<u64>,
    pub read_pct: Option<u8>,
}

#[derive(Debug, Serialize)]
pub struct LoadStatus {
    pub running: bool,
    pub message: String,
}

// ─── POST /api/load/start ────────────────────────────────────────

pub async fn start_load(
    State(state): State<Arc<AppState>>,
    body: Option<Json<LoadRequest>>,
) -> Result<Json<LoadStatus>, AppError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let concurrency = req.concurrency.unwrap_or(state.config.load_concurrency);
    let duration_secs = req.duration_secs.unwrap_or(state.config.load_duration_secs);
    let read_pct = req.read_pct.unwrap_or(state.config.read_pct);

    if concurrency == 0 || concurrency > 500 {
        return Err(AppError::BadRequest(
            "concurrency must be between 1 and 500".into(),
        ));
    }
    if duration_secs == 0 || duration_secs > 300 {
        return Err(AppError::BadRequest(
            "duration_secs must be between 1 and 300".into(),
        ));
    }
    if read_pct > 100 {
        return Err(AppError::BadRequest(
            "read_pct must be between 0 and 100".into(),
        ));
    }

    // Guard: only one run at a time
    if state
        .load_running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(AppError::AlreadyRunning);
    }

    state.engine.reset();

    let msg = format!(
        "Started: {} workers × {}s, {}% reads / {}% writes",
        concurrency,
        duration_secs,
        read_pct,
        100u8.saturating_sub(read_pct),
    );

    let handle = tokio::spawn(crate::load_generator::run(
        state.load_running.clone(),
        state.kv.clone(),
        state.config.upstreams.clone(),
        concurrency,
        duration_secs,
        read_pct,
    ));

    *state.load_handle.lock().await = Some(handle);

    Ok(Json(LoadStatus {
        running: true,
        message: msg,
    }))
}

// ─── POST /api/load/stop ─────────────────────────────────────────

pub async fn stop_load(State(state): State<Arc<AppState>>) -> Json<LoadStatus> {
    if !state.load_running.load(Ordering::SeqCst) {
        return Json(LoadStatus {
            running: false,
            message: "No load run in progress".into(),
        });
    }

    state.stop_load().await;

    Json(LoadStatus {
        running: false,
        message: "Load run stopped".into(),
    })
}

// ─── GET /api/load/status ────────────────────────────────────────

pub async fn load_status(State(state): State<Arc<AppState>>) -> Json<LoadStatus> {
    let running = state.load_running.load(Ordering::SeqCst);
    Json(LoadStatus {
        running,
        message: if running {
            "Load run in progress".into()
        } else {
            "Idle".into()
        },
    })
}
