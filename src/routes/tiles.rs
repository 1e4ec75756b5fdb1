//! Read-only views over stored tiles, history and the personal threshold.

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::ApiError;
use crate::hexgrid::{CellId, GeoPoint};
use crate::models::{HistoryRecord, Tile};
use crate::AppContext;

const DEFAULT_HISTORY_LIMIT: u32 = 100;

// ---

pub fn router() -> Router<AppContext> {
    // ---
    Router::new()
        .route("/tiles", get(tiles_near))
        .route("/tiles/{cell_id}", get(tile_by_id))
        .route("/history", get(history))
        .route("/threshold", get(threshold))
}

/// A tile as drawn on the map.
#[derive(Debug, Serialize)]
struct TileView {
    #[serde(flatten)]
    tile: Tile,
    boundary: Vec<GeoPoint>,
    personal_percent: f64,
}

impl TileView {
    fn new(ctx: &AppContext, tile: Tile) -> Self {
        Self {
            boundary: ctx.grid.boundary_of(&tile.cell_id),
            personal_percent: ctx.personal.personal_risk_percent(&tile),
            tile,
        }
    }
}

async fn tile_by_id(
    State(ctx): State<AppContext>,
    Path(cell_id): Path<String>,
) -> Result<Json<TileView>, ApiError> {
    // ---
    let cell = CellId::parse(&cell_id)?;
    let tile = ctx
        .store
        .get_tile(&cell)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("no tile for {cell}")))?;
    Ok(Json(TileView::new(&ctx, tile)))
}

#[derive(Debug, Deserialize)]
struct NearQuery {
    lat: f64,
    lon: f64,
}

/// Stored tiles of the cell under the point and its first ring.
async fn tiles_near(
    State(ctx): State<AppContext>,
    Query(params): Query<NearQuery>,
) -> Result<Json<Vec<TileView>>, ApiError> {
    // ---
    let center = ctx.grid.cell_id_for(params.lat, params.lon)?;
    let mut cells = ctx.grid.neighbors_of(&center, 1);
    cells.push(center);

    let tiles = ctx.store.get_tiles(&cells).await?;
    info!("GET /tiles - {} of {} cells have tiles", tiles.len(), cells.len());
    Ok(Json(tiles.into_iter().map(|t| TileView::new(&ctx, t)).collect()))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    cell_id: Option<String>,
    limit: Option<u32>,
}

async fn history(
    State(ctx): State<AppContext>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<Vec<HistoryRecord>>, ApiError> {
    // ---
    let cell = params.cell_id.as_deref().map(CellId::parse).transpose()?;
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let records = ctx.store.query_history(cell.as_ref(), limit).await?;
    Ok(Json(records))
}

#[derive(Debug, Serialize)]
struct ThresholdView {
    threshold: f64,
    default_threshold: f64,
    min_threshold: f64,
}

async fn threshold(State(ctx): State<AppContext>) -> Json<ThresholdView> {
    // ---
    let params = ctx.personal.params();
    Json(ThresholdView {
        threshold: ctx.personal.threshold(),
        default_threshold: params.default_threshold,
        min_threshold: params.min_threshold,
    })
}
