//! Hex-grid pollen risk engine.
//!
//! This is the module gateway (EMBP): sibling modules stay private to each
//! other's internals and talk only through what is re-exported here. The
//! binary in `main.rs` builds one [`AppContext`] and hands it to the
//! `routes` gateway and the periodic refresh.
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::SqlitePool;

pub mod config;
pub mod error;
pub mod events;
pub mod hexgrid;
pub mod models;
pub mod personal;
pub mod pipeline;
pub mod refresh;
pub mod risk;
pub mod routes;
pub mod schema;
pub mod sources;
pub mod store;

pub use config::Config;
pub use error::{DiaryError, GridError, PipelineError, SourceError};
pub use events::{HighRiskEvent, Notifier};
pub use hexgrid::{CellId, GeoPoint, HexGrid};
pub use models::{DiaryEntry, HistoryRecord, NewDiaryEntry, PollenReading, Tile};
pub use personal::{DiaryLocation, PersonalRiskAdapter, ThresholdParams};
pub use pipeline::{PipelineSettings, UpdateOutcome, UpdatePipeline, UpdateRequest};
pub use refresh::LocationTracker;
pub use risk::{RiskBreakdown, RiskParams};
pub use sources::{AirQualityProbe, AirQualitySource, PollenChain, PollenSource};
pub use store::{SqliteTileStore, TileStore};

// ---

/// Every long-lived component of the service, built once at startup.
///
/// Cloning is cheap; all members are shared handles.
#[derive(Clone)]
pub struct AppContext {
    pub grid: Arc<HexGrid>,
    pub store: Arc<dyn TileStore>,
    pub pipeline: Arc<UpdatePipeline>,
    pub personal: Arc<PersonalRiskAdapter>,
    pub tracker: Arc<LocationTracker>,
    pub notifier: Notifier,
    pub run_deadline: Duration,
}

impl AppContext {
    /// Wire the production sources and the SQLite store from configuration.
    pub fn from_config(cfg: &Config, pool: SqlitePool) -> Result<Self> {
        // ---
        let http = sources::http_client(cfg.source_timeout)?;

        let google = sources::GooglePollenClient::new(
            http.clone(),
            cfg.google_api_key.clone(),
            cfg.source_timeout,
        )
        .with_base_url(&cfg.google_pollen_url);
        let tomorrow = sources::TomorrowClient::new(
            http.clone(),
            cfg.tomorrow_api_key.clone(),
            cfg.source_timeout,
        )
        .with_base_url(&cfg.tomorrow_url);
        let air = sources::GoogleAirQualityClient::new(
            http,
            cfg.google_api_key.clone(),
            cfg.source_timeout,
        )
        .with_base_url(&cfg.google_air_quality_url);

        let pollen_sources: Vec<Arc<dyn PollenSource>> = vec![Arc::new(google), Arc::new(tomorrow)];
        let air_source: Arc<dyn AirQualitySource> = Arc::new(air);

        Self::with_sources(
            cfg,
            Arc::new(SqliteTileStore::new(pool)),
            PollenChain::new(pollen_sources, cfg.source_timeout),
            AirQualityProbe::new(Some(air_source), cfg.source_timeout),
        )
    }

    /// Wire the service around caller-supplied store and sources.
    pub fn with_sources(
        cfg: &Config,
        store: Arc<dyn TileStore>,
        pollen: PollenChain,
        air: AirQualityProbe,
    ) -> Result<Self> {
        // ---
        let grid = Arc::new(HexGrid::new(cfg.h3_resolution)?);
        let personal = Arc::new(PersonalRiskAdapter::new(cfg.threshold.clone()));
        let notifier = Notifier::new();

        let pipeline = Arc::new(UpdatePipeline::new(
            Arc::clone(&grid),
            Arc::clone(&store),
            pollen,
            air,
            cfg.risk.clone(),
            Arc::clone(&personal),
            notifier.clone(),
            cfg.pipeline.clone(),
        ));

        Ok(Self {
            grid,
            store,
            pipeline,
            personal,
            tracker: Arc::new(LocationTracker::default()),
            notifier,
            run_deadline: cfg.run_deadline,
        })
    }
}
