use axum::{
    extract::{Path, State},
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use wirestats::{KvRequest, KvRoundTrip};

use crate::AppState;

use super::AppError;

#[derive(Debug, Serialize)]
pub struct KvEntry {
    pub key: String,
    pub value: String,
    pub upstream: String,
}

// ─── GET /api/kv/:key ────────────────────────────────────────────

pub async fn get_value(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<KvEntry>, AppError> {
    let upstream = state.upstream_for(&key).to_owned();
    let res = state
        .kv
        .round_trip(KvRequest::new(upstream.as_str(), "GET", [key.clone()]))
        .await?;

    let reply = res.collect().await?;
    match reply.into_iter().next() {
        Some(value) if !value.is_empty() => Ok(Json(KvEntry {
            key,
            value: String::from_utf8_lossy(&value).into_owned(),
            upstream,
        })),
        _ => Err(AppError::NotFound(format!("key {key} not found"))),
    }
}

// ─── PUT /api/kv/:key ────────────────────────────────────────────

pub async fn put_value(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    body: Bytes,
) -> Result<Json<KvEntry>, AppError> {
    if body.is_empty() {
        return Err(AppError::BadRequest("value must not be empty".into()));
    }

    let upstream = state.upstream_for(&key).to_owned();
    let value = String::from_utf8_lossy(&body).into_owned();
    let res = state
        .kv
        .round_trip(KvRequest::new(
            upstream.as_str(),
            "SET",
            [Bytes::from(key.clone()), body],
        ))
        .await?;
    res.collect().await?;

    Ok(Json(KvEntry {
        key,
        value,
        upstream,
    }))
}
