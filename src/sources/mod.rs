//! External pollen and air-quality sources.
//!
//! Pollen is a hard requirement: [`PollenChain`] tries each configured source
//! in order and fails only when all of them have. Air quality is best effort:
//! [`AirQualityProbe`] turns any failure into "unavailable".

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::SourceError;
use crate::models::PollenReading;

pub mod google;
pub mod tomorrow;

pub use google::{GoogleAirQualityClient, GooglePollenClient};
pub use tomorrow::TomorrowClient;

// ---

#[async_trait]
pub trait PollenSource: Send + Sync {
    /// Short stable name used in logs and errors.
    fn name(&self) -> &'static str;

    async fn fetch_pollen(&self, lat: f64, lon: f64) -> Result<PollenReading, SourceError>;
}

#[async_trait]
pub trait AirQualitySource: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` is the source saying it has no index for this location.
    async fn fetch_air_quality(&self, lat: f64, lon: f64) -> Result<Option<u32>, SourceError>;
}

/// Pollen sources in fallback order.
#[derive(Clone)]
pub struct PollenChain {
    sources: Vec<Arc<dyn PollenSource>>,
    timeout: Duration,
}

impl PollenChain {
    pub fn new(sources: Vec<Arc<dyn PollenSource>>, timeout: Duration) -> Self {
        Self { sources, timeout }
    }

    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// First successful reading, or every failure in the order tried.
    pub async fn fetch(&self, lat: f64, lon: f64) -> Result<(PollenReading, &'static str), SourceError> {
        // ---
        let mut failures = Vec::with_capacity(self.sources.len());

        for source in &self.sources {
            let name = source.name();
            debug!("Fetching pollen from {}", name);

            let outcome = tokio::time::timeout(self.timeout, source.fetch_pollen(lat, lon))
                .await
                .unwrap_or(Err(SourceError::Timeout {
                    source_name: name,
                    after: self.timeout,
                }));

            match outcome {
                Ok(reading) => {
                    if !failures.is_empty() {
                        info!("Pollen served by fallback source {}", name);
                    }
                    return Ok((reading.sanitized(), name));
                }
                Err(e) => {
                    warn!("Pollen source {} failed, trying next: {}", name, e);
                    failures.push(e);
                }
            }
        }

        Err(SourceError::Exhausted(failures))
    }
}

/// Best-effort air-quality lookup.
#[derive(Clone)]
pub struct AirQualityProbe {
    source: Option<Arc<dyn AirQualitySource>>,
    timeout: Duration,
}

impl AirQualityProbe {
    pub fn new(source: Option<Arc<dyn AirQualitySource>>, timeout: Duration) -> Self {
        Self { source, timeout }
    }

    /// Never fails: errors and timeouts degrade to `None`.
    pub async fn fetch(&self, lat: f64, lon: f64) -> Option<u32> {
        // ---
        let source = self.source.as_ref()?;

        match tokio::time::timeout(self.timeout, source.fetch_air_quality(lat, lon)).await {
            Ok(Ok(aqi)) => aqi,
            Ok(Err(e)) => {
                warn!("Air quality unavailable, continuing without it: {}", e);
                None
            }
            Err(_) => {
                warn!(
                    "Air quality source {} timed out after {:?}, continuing without it",
                    source.name(),
                    self.timeout
                );
                None
            }
        }
    }
}

/// Build the shared HTTP client for all sources.
pub fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    // ---
    reqwest::Client::builder()
        .gzip(true)
        .brotli(true)
        .deflate(true)
        .timeout(timeout)
        .build()
}

/// Send a request and decode a JSON body, mapping every failure mode.
async fn send_json<T: DeserializeOwned>(
    source_name: &'static str,
    request: RequestBuilder,
    timeout: Duration,
) -> Result<T, SourceError> {
    // ---
    let response = request
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| transport_error(source_name, e, timeout))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        debug!("{} error body: {}", source_name, body);
        return Err(SourceError::Status {
            source_name,
            status: status.as_u16(),
        });
    }

    response.json::<T>().await.map_err(|e| {
        if e.is_timeout() {
            transport_error(source_name, e, timeout)
        } else {
            SourceError::Decode {
                source_name,
                message: e.to_string(),
            }
        }
    })
}

fn transport_error(source_name: &'static str, e: reqwest::Error, timeout: Duration) -> SourceError {
    // ---
    if e.is_timeout() {
        SourceError::Timeout {
            source_name,
            after: timeout,
        }
    } else {
        SourceError::Transport {
            source_name,
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        name: &'static str,
        reading: Option<PollenReading>,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn ok(name: &'static str, tree: f64) -> Arc<Self> {
            Arc::new(Self {
                name,
                reading: Some(PollenReading {
                    tree,
                    grass: 1.0,
                    weed: 1.0,
                }),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                reading: None,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PollenSource for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn fetch_pollen(&self, _lat: f64, _lon: f64) -> Result<PollenReading, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reading.ok_or(SourceError::Status {
                source_name: self.name,
                status: 500,
            })
        }
    }

    struct Stalled;

    #[async_trait]
    impl PollenSource for Stalled {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn fetch_pollen(&self, _lat: f64, _lon: f64) -> Result<PollenReading, SourceError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(PollenReading::default())
        }
    }

    #[async_trait]
    impl AirQualitySource for Stalled {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn fetch_air_quality(&self, _lat: f64, _lon: f64) -> Result<Option<u32>, SourceError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Some(10))
        }
    }

    struct BrokenAir;

    #[async_trait]
    impl AirQualitySource for BrokenAir {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn fetch_air_quality(&self, _lat: f64, _lon: f64) -> Result<Option<u32>, SourceError> {
            Err(SourceError::Status {
                source_name: "broken",
                status: 403,
            })
        }
    }

    #[tokio::test]
    async fn primary_success_skips_fallback() {
        // ---
        let primary = Fixed::ok("primary", 3.0);
        let secondary = Fixed::ok("secondary", 1.0);
        let sources: Vec<Arc<dyn PollenSource>> = vec![primary.clone(), secondary.clone()];
        let chain = PollenChain::new(sources, Duration::from_secs(1));

        let (reading, name) = chain.fetch(0.0, 0.0).await.unwrap();
        assert_eq!(name, "primary");
        assert_eq!(reading.tree, 3.0);
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn falls_back_in_order() {
        // ---
        let primary = Fixed::failing("primary");
        let secondary = Fixed::ok("secondary", 2.0);
        let sources: Vec<Arc<dyn PollenSource>> = vec![primary.clone(), secondary.clone()];
        let chain = PollenChain::new(sources, Duration::from_secs(1));

        let (reading, name) = chain.fetch(0.0, 0.0).await.unwrap();
        assert_eq!(name, "secondary");
        assert_eq!(reading.tree, 2.0);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_chain_reports_every_failure() {
        // ---
        let sources: Vec<Arc<dyn PollenSource>> = vec![Fixed::failing("a"), Fixed::failing("b")];
        let chain = PollenChain::new(sources, Duration::from_secs(1));

        match chain.fetch(0.0, 0.0).await {
            Err(SourceError::Exhausted(failures)) => assert_eq!(failures.len(), 2),
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_failure_and_falls_back() {
        // ---
        let sources: Vec<Arc<dyn PollenSource>> = vec![Arc::new(Stalled), Fixed::ok("backup", 4.0)];
        let chain = PollenChain::new(sources, Duration::from_secs(5));

        let (reading, name) = chain.fetch(0.0, 0.0).await.unwrap();
        assert_eq!(name, "backup");
        assert_eq!(reading.tree, 4.0);
    }

    #[tokio::test]
    async fn readings_are_sanitized() {
        // ---
        let sources: Vec<Arc<dyn PollenSource>> = vec![Fixed::ok("neg", -3.0)];
        let chain = PollenChain::new(sources, Duration::from_secs(1));
        let (reading, _) = chain.fetch(0.0, 0.0).await.unwrap();
        assert_eq!(reading.tree, 0.0);
    }

    #[tokio::test]
    async fn air_quality_failure_degrades_to_none() {
        // ---
        let probe = AirQualityProbe::new(Some(Arc::new(BrokenAir)), Duration::from_secs(1));
        assert_eq!(probe.fetch(0.0, 0.0).await, None);

        let unconfigured = AirQualityProbe::new(None, Duration::from_secs(1));
        assert_eq!(unconfigured.fetch(0.0, 0.0).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn air_quality_timeout_degrades_to_none() {
        // ---
        let probe = AirQualityProbe::new(Some(Arc::new(Stalled)), Duration::from_secs(2));
        assert_eq!(probe.fetch(0.0, 0.0).await, None);
    }
}
