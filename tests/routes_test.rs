//! HTTP trigger surface, driven in-process through the router.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use tower::ServiceExt;

use pollenflow::{
    config, routes, schema, AirQualityProbe, AppContext, PollenChain, PollenReading,
    PollenSource, SourceError, SqliteTileStore,
};

const MOSCOW: (f64, f64) = (55.7558, 37.6173);

// ---

struct Fixed(Option<PollenReading>);

#[async_trait]
impl PollenSource for Fixed {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn fetch_pollen(&self, _lat: f64, _lon: f64) -> Result<PollenReading, SourceError> {
        self.0.ok_or(SourceError::Status {
            source_name: "fixed",
            status: 500,
        })
    }
}

async fn app_with(reading: Option<PollenReading>) -> (Router, AppContext) {
    // ---
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    schema::apply_migrations(&pool).await.unwrap();

    let cfg = config::load_from(|_| None).unwrap();
    let sources: Vec<Arc<dyn PollenSource>> = vec![Arc::new(Fixed(reading))];
    let ctx = AppContext::with_sources(
        &cfg,
        Arc::new(SqliteTileStore::new(pool)),
        PollenChain::new(sources, cfg.source_timeout),
        AirQualityProbe::new(None, cfg.source_timeout),
    )
    .unwrap();

    (routes::router(ctx.clone()), ctx)
}

async fn app() -> (Router, AppContext) {
    app_with(Some(PollenReading {
        tree: 3.0,
        grass: 2.0,
        weed: 1.0,
    }))
    .await
}

async fn send(app: &Router, request: Request<Body>) -> Result<(StatusCode, Value)> {
    // ---
    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, body))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn moscow_report(force: bool) -> Value {
    json!({ "lat": MOSCOW.0, "lon": MOSCOW.1, "force": force })
}

#[tokio::test]
async fn health_is_ok() -> Result<()> {
    // ---
    let (app, _) = app().await;
    let (status, body) = send(&app, get("/health")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn location_report_updates_then_skips() -> Result<()> {
    // ---
    let (app, ctx) = app().await;

    let (status, body) = send(&app, post("/location", moscow_report(false))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "updated");
    assert_eq!(body["tile"]["risk_level"], 210.0);
    assert_eq!(body["notified"], true);

    let (status, body) = send(&app, post("/location", json!({ "lat": MOSCOW.0, "lon": MOSCOW.1 }))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "skipped");

    let last = ctx.tracker.last().expect("location recorded");
    assert_eq!((last.lat, last.lon), MOSCOW);
    Ok(())
}

#[tokio::test]
async fn invalid_location_is_unprocessable_and_not_recorded() -> Result<()> {
    // ---
    let (app, ctx) = app().await;
    let (status, body) = send(&app, post("/location", json!({ "lat": 123.0, "lon": 0.0 }))).await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("invalid coordinates"));
    assert!(ctx.tracker.last().is_none());
    Ok(())
}

#[tokio::test]
async fn exhausted_sources_are_bad_gateway() -> Result<()> {
    // ---
    let (app, _) = app_with(None).await;
    let (status, _) = send(&app, post("/location", moscow_report(false))).await?;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let (status, body) = send(&app, get("/history")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
    Ok(())
}

#[tokio::test]
async fn tiles_are_served_with_boundary_and_percent() -> Result<()> {
    // ---
    let (app, ctx) = app().await;
    send(&app, post("/location", moscow_report(false))).await?;
    let cell = ctx.grid.cell_id_for(MOSCOW.0, MOSCOW.1)?;

    let (status, body) = send(&app, get(&format!("/tiles/{cell}"))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cell_id"], cell.to_string());
    assert_eq!(body["boundary"].as_array().unwrap().len(), 6);
    assert_eq!(body["personal_percent"], 100.0);

    let uri = format!("/tiles?lat={}&lon={}", MOSCOW.0, MOSCOW.1);
    let (status, body) = send(&app, get(&uri)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    Ok(())
}

#[tokio::test]
async fn unknown_and_malformed_tiles() -> Result<()> {
    // ---
    let (app, ctx) = app().await;
    let elsewhere = ctx.grid.cell_id_for(-33.8688, 151.2093)?;

    let (status, _) = send(&app, get(&format!("/tiles/{elsewhere}"))).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, get("/tiles/not-a-cell")).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn history_is_filtered_and_limited() -> Result<()> {
    // ---
    let (app, ctx) = app().await;
    send(&app, post("/location", moscow_report(false))).await?;
    send(&app, post("/location", moscow_report(true))).await?;
    let cell = ctx.grid.cell_id_for(MOSCOW.0, MOSCOW.1)?;

    let (status, body) = send(&app, get(&format!("/history?cell_id={cell}"))).await?;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows[0]["id"].as_i64() > rows[1]["id"].as_i64());

    let (_, body) = send(&app, get("/history?limit=1")).await?;
    assert_eq!(body.as_array().unwrap().len(), 1);
    Ok(())
}

#[tokio::test]
async fn diary_round_trip_and_validation() -> Result<()> {
    // ---
    let (app, _) = app().await;

    let bad = json!({ "feeling_score": 7, "lat": MOSCOW.0, "lon": MOSCOW.1 });
    let (status, _) = send(&app, post("/diary", bad)).await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let entry = json!({
        "feeling_score": 2,
        "symptoms": "itchy eyes",
        "lat": MOSCOW.0,
        "lon": MOSCOW.1
    });
    let (status, body) = send(&app, post("/diary", entry)).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["entry"]["feeling_score"], 2);
    assert_eq!(body["threshold"], 150.0);

    let (status, body) = send(&app, get("/diary?limit=10")).await?;
    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["symptoms"], "itchy eyes");
    Ok(())
}

#[tokio::test]
async fn threshold_reports_current_and_bounds() -> Result<()> {
    // ---
    let (app, _) = app().await;
    let (status, body) = send(&app, get("/threshold")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["threshold"], 150.0);
    assert_eq!(body["min_threshold"], 50.0);
    Ok(())
}
