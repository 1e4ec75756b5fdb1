//! Google Pollen and Air Quality API clients.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{send_json, AirQualitySource, PollenSource};
use crate::error::SourceError;
use crate::models::PollenReading;

pub const POLLEN_URL: &str = "https://pollen.googleapis.com/v1/forecast:lookup";
pub const AIR_QUALITY_URL: &str = "https://airquality.googleapis.com/v1/currentConditions:lookup";

// ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForecastResponse {
    #[serde(default)]
    daily_info: Vec<DailyInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DailyInfo {
    #[serde(default)]
    pollen_type_info: Vec<PollenTypeInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PollenTypeInfo {
    code: String,
    index_info: Option<IndexInfo>,
}

#[derive(Debug, Deserialize)]
struct IndexInfo {
    value: Option<f64>,
}

impl DailyInfo {
    fn to_reading(&self) -> PollenReading {
        // ---
        let mut reading = PollenReading::default();
        for info in &self.pollen_type_info {
            let value = info.index_info.as_ref().and_then(|i| i.value).unwrap_or(0.0);
            match info.code.as_str() {
                "TREE" => reading.tree = value,
                "GRASS" => reading.grass = value,
                "WEED" => reading.weed = value,
                other => tracing::trace!("Ignoring pollen type {}", other),
            }
        }
        reading
    }
}

/// Primary pollen source.
#[derive(Debug, Clone)]
pub struct GooglePollenClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    timeout: Duration,
}

impl GooglePollenClient {
    pub fn new(http: reqwest::Client, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            http,
            api_key: api_key
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
            base_url: POLLEN_URL.to_string(),
            timeout,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl PollenSource for GooglePollenClient {
    fn name(&self) -> &'static str {
        "google-pollen"
    }

    async fn fetch_pollen(&self, lat: f64, lon: f64) -> Result<PollenReading, SourceError> {
        // ---
        let source_name = self.name();
        let key = self
            .api_key
            .as_deref()
            .ok_or(SourceError::NotConfigured { source_name })?;

        let request = self.http.get(&self.base_url).query(&[
            ("location.latitude", lat.to_string()),
            ("location.longitude", lon.to_string()),
            ("key", key.to_string()),
            ("days", "1".to_string()),
        ]);

        let forecast: ForecastResponse = send_json(source_name, request, self.timeout).await?;
        let today = forecast.daily_info.first().ok_or_else(|| SourceError::Decode {
            source_name,
            message: "response has no dailyInfo".to_string(),
        })?;

        Ok(today.to_reading())
    }
}

#[derive(Debug, Deserialize)]
struct AirQualityResponse {
    #[serde(default)]
    indexes: Vec<AirQualityIndex>,
}

#[derive(Debug, Deserialize)]
struct AirQualityIndex {
    code: String,
    aqi: Option<i64>,
}

impl AirQualityResponse {
    /// The universal index when present, otherwise the first one reported.
    fn preferred_aqi(&self) -> Option<u32> {
        // ---
        self.indexes
            .iter()
            .find(|i| i.code == "uaqi")
            .or_else(|| self.indexes.first())
            .and_then(|i| i.aqi)
            .map(|aqi| u32::try_from(aqi.max(0)).unwrap_or(u32::MAX))
    }
}

/// Air-quality source.
#[derive(Debug, Clone)]
pub struct GoogleAirQualityClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    timeout: Duration,
}

impl GoogleAirQualityClient {
    pub fn new(http: reqwest::Client, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            http,
            api_key: api_key
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
            base_url: AIR_QUALITY_URL.to_string(),
            timeout,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl AirQualitySource for GoogleAirQualityClient {
    fn name(&self) -> &'static str {
        "google-air-quality"
    }

    async fn fetch_air_quality(&self, lat: f64, lon: f64) -> Result<Option<u32>, SourceError> {
        // ---
        let source_name = self.name();
        let key = self
            .api_key
            .as_deref()
            .ok_or(SourceError::NotConfigured { source_name })?;

        let request = self
            .http
            .post(&self.base_url)
            .query(&[("key", key)])
            .json(&json!({ "location": { "latitude": lat, "longitude": lon } }));

        let response: AirQualityResponse = send_json(source_name, request, self.timeout).await?;
        Ok(response.preferred_aqi())
    }
}
