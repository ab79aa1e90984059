pub mod kv;
pub mod load;
pub mod stats;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use wirestats::{StatsError, TransportError};

// ─── Unified error type ──────────────────────────────────────────

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    Upstream(TransportError),
    BadRequest(String),
    AlreadyRunning,
}

impl From<TransportError> for AppError {
    fn from(err: TransportError) -> Self {
        Self::Upstream(err)
    }
}

impl From<StatsError> for AppError {
    fn from(err: StatsError) -> Self {
        match err {
            StatsError::InvalidArgument(msg) => Self::BadRequest(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Upstream(err) => {
                let status = match &err {
                    TransportError::Network { .. } => StatusCode::BAD_GATEWAY,
                    TransportError::Response(_) => StatusCode::UNPROCESSABLE_ENTITY,
                };
                (status, format!("redis: {err}"))
            }
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::AlreadyRunning => (StatusCode::CONFLICT, "load generator already running".into()),
        };

        let body = serde_json::json!({
            "error":  message,
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}
