//! HTTP trigger surface gateway.
//!
//! Each sibling module owns its handlers and exports one subrouter; this
//! gateway merges them and attaches the shared [`AppContext`]. Error types
//! from the library are turned into status codes here and nowhere else.
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::json;

use crate::error::{DiaryError, GridError, PipelineError};
use crate::AppContext;

mod diary;
mod health;
mod location;
mod tiles;

// ---

pub fn router(ctx: AppContext) -> Router {
    // ---
    Router::new()
        .merge(location::router())
        .merge(diary::router())
        .merge(tiles::router())
        .merge(health::router())
        .with_state(ctx)
}

/// A failed request: status plus a JSON `{"error": ...}` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // ---
        if self.status.is_server_error() {
            tracing::error!("{} - {}", self.status, self.message);
        } else {
            tracing::debug!("{} - {}", self.status, self.message);
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<GridError> for ApiError {
    fn from(e: GridError) -> Self {
        let status = match e {
            GridError::MalformedCell(_) => StatusCode::BAD_REQUEST,
            GridError::InvalidCoordinates { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            GridError::UnsupportedResolution(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, format!("storage failure: {e}"))
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        // ---
        match e {
            PipelineError::InvalidLocation(grid) => grid.into(),
            PipelineError::SourcesExhausted(_) => Self::new(StatusCode::BAD_GATEWAY, e.to_string()),
            PipelineError::Storage(db) => db.into(),
            PipelineError::Cancelled { .. } => Self::new(StatusCode::GATEWAY_TIMEOUT, e.to_string()),
        }
    }
}

impl From<DiaryError> for ApiError {
    fn from(e: DiaryError) -> Self {
        // ---
        match e {
            DiaryError::ScoreOutOfRange(_) => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
            }
            DiaryError::Location(grid) => grid.into(),
            DiaryError::Storage(db) => db.into(),
        }
    }
}
