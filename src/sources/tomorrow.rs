//! Tomorrow.io realtime client, the pollen fallback source.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{send_json, PollenSource};
use crate::error::SourceError;
use crate::models::PollenReading;

pub const REALTIME_URL: &str = "https://api.tomorrow.io/v4/weather/realtime";

// ---

#[derive(Debug, Deserialize)]
struct RealtimeResponse {
    data: RealtimeData,
}

#[derive(Debug, Deserialize)]
struct RealtimeData {
    values: RealtimeValues,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeValues {
    tree_index: Option<f64>,
    grass_index: Option<f64>,
    weed_index: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct TomorrowClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    timeout: Duration,
}

impl TomorrowClient {
    pub fn new(http: reqwest::Client, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            http,
            api_key: api_key
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
            base_url: REALTIME_URL.to_string(),
            timeout,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl PollenSource for TomorrowClient {
    fn name(&self) -> &'static str {
        "tomorrow"
    }

    async fn fetch_pollen(&self, lat: f64, lon: f64) -> Result<PollenReading, SourceError> {
        // ---
        let source_name = self.name();
        let key = self
            .api_key
            .as_deref()
            .ok_or(SourceError::NotConfigured { source_name })?;

        let request = self.http.get(&self.base_url).query(&[
            ("location", format!("{lat},{lon}")),
            ("apikey", key.to_string()),
            ("fields", "treeIndex,grassIndex,weedIndex".to_string()),
        ]);

        let response: RealtimeResponse = send_json(source_name, request, self.timeout).await?;
        let values = response.data.values;

        Ok(PollenReading {
            tree: values.tree_index.unwrap_or(0.0),
            grass: values.grass_index.unwrap_or(0.0),
            weed: values.weed_index.unwrap_or(0.0),
        })
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> TomorrowClient {
        TomorrowClient::new(
            reqwest::Client::new(),
            Some(" tomorrow-key\n".to_string()),
            Duration::from_secs(5),
        )
        .with_base_url(format!("{}/v4/weather/realtime", server.uri()))
    }

    #[tokio::test]
    async fn absent_values_default_to_zero() {
        // ---
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/weather/realtime"))
            .and(query_param("apikey", "tomorrow-key"))
            .and(query_param("location", "48.85,2.35"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "values": { "treeIndex": 3, "grassIndex": null } }
            })))
            .mount(&server)
            .await;

        let reading = client(&server).fetch_pollen(48.85, 2.35).await.unwrap();
        assert_eq!(reading, PollenReading { tree: 3.0, grass: 0.0, weed: 0.0 });
    }

    #[tokio::test]
    async fn malformed_body_is_decode_failure() {
        // ---
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "unexpected": true })))
            .mount(&server)
            .await;

        let err = client(&server).fetch_pollen(0.0, 0.0).await.unwrap_err();
        assert!(matches!(err, SourceError::Decode { .. }));
    }

    #[tokio::test]
    async fn server_error_is_failure() {
        // ---
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = client(&server).fetch_pollen(0.0, 0.0).await.unwrap_err();
        assert!(matches!(err, SourceError::Status { status: 429, .. }));
    }
}
