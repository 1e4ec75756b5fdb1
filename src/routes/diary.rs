use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::ApiError;
use crate::models::DiaryEntry;
use crate::personal::DiaryLocation;
use crate::AppContext;

// ---

pub fn router() -> Router<AppContext> {
    // ---
    Router::new().route("/diary", get(list).post(record))
}

#[derive(Debug, Deserialize)]
struct DiaryReport {
    feeling_score: i64,
    symptoms: Option<String>,
    #[serde(flatten)]
    location: DiaryLocation,
}

#[derive(Debug, Serialize)]
struct Recorded {
    entry: DiaryEntry,
    threshold: f64,
}

async fn record(
    State(ctx): State<AppContext>,
    Json(report): Json<DiaryReport>,
) -> Result<(StatusCode, Json<Recorded>), ApiError> {
    // ---
    info!("POST /diary - feeling_score={}", report.feeling_score);

    let entry = ctx
        .personal
        .record_diary_entry(
            ctx.store.as_ref(),
            &ctx.grid,
            report.feeling_score,
            report.symptoms,
            &report.location,
        )
        .await?;

    let recorded = Recorded {
        entry,
        threshold: ctx.personal.threshold(),
    };
    Ok((StatusCode::CREATED, Json(recorded)))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<u32>,
}

async fn list(
    State(ctx): State<AppContext>,
    Query(params): Query<ListQuery>,
) -> Result<Json<Vec<DiaryEntry>>, ApiError> {
    // ---
    let entries = ctx.store.list_diary_entries(params.limit).await?;
    info!("GET /diary - returning {} entries", entries.len());
    Ok(Json(entries))
}
