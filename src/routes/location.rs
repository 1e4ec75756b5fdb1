use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use tracing::info;

use super::ApiError;
use crate::pipeline::{UpdateOutcome, UpdateRequest};
use crate::AppContext;

// ---

pub fn router() -> Router<AppContext> {
    // ---
    Router::new().route("/location", post(handler))
}

/// A location report from the device.
#[derive(Debug, Deserialize)]
struct LocationReport {
    lat: f64,
    lon: f64,
    #[serde(default)]
    force: bool,
}

async fn handler(
    State(ctx): State<AppContext>,
    Json(report): Json<LocationReport>,
) -> Result<Json<UpdateOutcome>, ApiError> {
    // ---
    info!(
        "POST /location - lat={} lon={} force={}",
        report.lat, report.lon, report.force
    );

    // Only remember locations the grid accepts, so the periodic refresh
    // never retries a bad one.
    ctx.grid.cell_id_for(report.lat, report.lon)?;
    ctx.tracker.record(report.lat, report.lon);

    let request = UpdateRequest {
        lat: report.lat,
        lon: report.lon,
        force: report.force,
    };
    let outcome = ctx.pipeline.run_with_deadline(request, ctx.run_deadline).await?;
    Ok(Json(outcome))
}
