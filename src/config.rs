//! Configuration loader for the `pollenflow` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). By consolidating configuration logic here, we
//! avoid scattering `env::var` calls throughout the codebase.
use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::hexgrid::DEFAULT_RESOLUTION;
use crate::personal::ThresholdParams;
use crate::pipeline::PipelineSettings;
use crate::risk::RiskParams;
use crate::sources;

/// Parse an optional environment variable into `$ty` with a default value.
macro_rules! parse_env {
    ($lookup:expr, $var_name:expr, $ty:ty, $default:expr) => {
        $lookup($var_name)
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Read an optional string environment variable, treating blank as unset.
macro_rules! optional_env {
    ($lookup:expr, $var_name:expr) => {
        $lookup($var_name).filter(|v: &String| !v.trim().is_empty())
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// SQLite connection string.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// Address the HTTP trigger surface binds to.
    pub listen_addr: String,

    pub google_api_key: Option<String>,
    pub tomorrow_api_key: Option<String>,

    pub google_pollen_url: String,
    pub google_air_quality_url: String,
    pub tomorrow_url: String,

    /// Per-request timeout for every external source.
    pub source_timeout: Duration,

    /// Periodic refresh cadence; `None` disables the refresh loop.
    pub refresh_interval: Option<Duration>,

    /// Deadline after which an externally triggered run is abandoned.
    pub run_deadline: Duration,

    pub h3_resolution: u8,
    pub pipeline: PipelineSettings,
    pub risk: RiskParams,
    pub threshold: ThresholdParams,
}

/// Load configuration from environment variables with defaults.
///
/// Optional:
/// - `DATABASE_URL` – SQLite connection string (default: `sqlite://pollen.sqlite?mode=rwc`)
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `LISTEN_ADDR` – bind address (default: `0.0.0.0:8080`)
/// - `GOOGLE_API_KEY`, `TOMORROW_API_KEY` – source credentials
/// - `STALENESS_SECS` (3600), `HIGH_RISK_PERCENT` (80), `REFRESH_INTERVAL_SECS`
///   (3600, 0 disables), `RUN_DEADLINE_SECS` (30), `SOURCE_TIMEOUT_SECS` (10)
/// - risk and threshold constants, see [`load_from`]
///
/// Returns an error if any variable is present but invalid.
pub fn load_from_env() -> Result<Config> {
    load_from(|name| env::var(name).ok())
}

/// Same as [`load_from_env`] with an explicit variable lookup.
pub fn load_from<F>(lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    // ---
    let db_url = optional_env!(lookup, "DATABASE_URL")
        .unwrap_or_else(|| "sqlite://pollen.sqlite?mode=rwc".to_string());
    let db_pool_max = parse_env!(lookup, "DB_POOL_MAX", u32, 5);
    let listen_addr =
        optional_env!(lookup, "LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string());

    let risk_defaults = RiskParams::default();
    let risk = RiskParams {
        tree_weight: parse_env!(lookup, "TREE_WEIGHT", f64, risk_defaults.tree_weight),
        grass_weight: parse_env!(lookup, "GRASS_WEIGHT", f64, risk_defaults.grass_weight),
        weed_weight: parse_env!(lookup, "WEED_WEIGHT", f64, risk_defaults.weed_weight),
        index_scale: parse_env!(lookup, "INDEX_SCALE", f64, risk_defaults.index_scale),
        aqi_impact_factor: parse_env!(
            lookup,
            "AQI_IMPACT_FACTOR",
            f64,
            risk_defaults.aqi_impact_factor
        ),
        wind_factor: parse_env!(lookup, "WIND_FACTOR", f64, risk_defaults.wind_factor),
    };
    risk.validate().map_err(|e| anyhow!("Invalid risk configuration: {}", e))?;

    let threshold_defaults = ThresholdParams::default();
    let threshold = ThresholdParams {
        default_threshold: parse_env!(
            lookup,
            "DEFAULT_RISK_THRESHOLD",
            f64,
            threshold_defaults.default_threshold
        ),
        min_threshold: parse_env!(
            lookup,
            "MIN_RISK_THRESHOLD",
            f64,
            threshold_defaults.min_threshold
        ),
        margin: parse_env!(lookup, "THRESHOLD_MARGIN", f64, threshold_defaults.margin),
        ..threshold_defaults
    };
    let bounded = threshold.default_threshold.is_finite()
        && threshold.min_threshold > 0.0
        && threshold.default_threshold >= threshold.min_threshold;
    if !bounded {
        return Err(anyhow!(
            "Risk thresholds must satisfy 0 < MIN_RISK_THRESHOLD <= DEFAULT_RISK_THRESHOLD"
        ));
    }
    if !threshold.margin.is_finite() || threshold.margin <= 0.0 {
        return Err(anyhow!("THRESHOLD_MARGIN must be positive, got {}", threshold.margin));
    }

    let high_risk_percent = parse_env!(lookup, "HIGH_RISK_PERCENT", f64, 80.0);
    if !high_risk_percent.is_finite() {
        return Err(anyhow!("HIGH_RISK_PERCENT must be finite, got {}", high_risk_percent));
    }

    let refresh_secs = parse_env!(lookup, "REFRESH_INTERVAL_SECS", u64, 3600);

    Ok(Config {
        db_url,
        db_pool_max,
        listen_addr,
        google_api_key: optional_env!(lookup, "GOOGLE_API_KEY"),
        tomorrow_api_key: optional_env!(lookup, "TOMORROW_API_KEY"),
        google_pollen_url: optional_env!(lookup, "GOOGLE_POLLEN_URL")
            .unwrap_or_else(|| sources::google::POLLEN_URL.to_string()),
        google_air_quality_url: optional_env!(lookup, "GOOGLE_AIR_QUALITY_URL")
            .unwrap_or_else(|| sources::google::AIR_QUALITY_URL.to_string()),
        tomorrow_url: optional_env!(lookup, "TOMORROW_URL")
            .unwrap_or_else(|| sources::tomorrow::REALTIME_URL.to_string()),
        source_timeout: Duration::from_secs(parse_env!(lookup, "SOURCE_TIMEOUT_SECS", u64, 10)),
        refresh_interval: (refresh_secs > 0).then(|| Duration::from_secs(refresh_secs)),
        run_deadline: Duration::from_secs(parse_env!(lookup, "RUN_DEADLINE_SECS", u64, 30)),
        h3_resolution: parse_env!(lookup, "H3_RESOLUTION", u8, DEFAULT_RESOLUTION),
        pipeline: PipelineSettings {
            staleness: Duration::from_secs(parse_env!(lookup, "STALENESS_SECS", u64, 3600)),
            high_risk_percent,
            ..PipelineSettings::default()
        },
        risk,
        threshold,
    })
}

fn mask(secret: &Option<String>) -> &'static str {
    if secret.is_some() {
        "****"
    } else {
        "<unset>"
    }
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// API keys are masked; everything else is shown as loaded.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL          : {}", self.db_url);
        tracing::info!("  DB_POOL_MAX           : {}", self.db_pool_max);
        tracing::info!("  LISTEN_ADDR           : {}", self.listen_addr);
        tracing::info!("  GOOGLE_API_KEY        : {}", mask(&self.google_api_key));
        tracing::info!("  TOMORROW_API_KEY      : {}", mask(&self.tomorrow_api_key));
        tracing::info!("  SOURCE_TIMEOUT_SECS   : {}", self.source_timeout.as_secs());
        tracing::info!("  STALENESS_SECS        : {}", self.pipeline.staleness.as_secs());
        tracing::info!("  HIGH_RISK_PERCENT     : {}", self.pipeline.high_risk_percent);
        tracing::info!(
            "  REFRESH_INTERVAL_SECS : {}",
            self.refresh_interval.map_or(0, |d| d.as_secs())
        );
        tracing::info!("  RUN_DEADLINE_SECS     : {}", self.run_deadline.as_secs());
        tracing::info!("  H3_RESOLUTION         : {}", self.h3_resolution);
        tracing::info!("  RISK                  : {:?}", self.risk);
        tracing::info!("  THRESHOLD             : {:?}", self.threshold);
    }
}
