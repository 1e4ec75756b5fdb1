//! Typed error taxonomy for the risk engine.
//!
//! Input errors come from `hexgrid`, upstream failures from `sources`, and
//! `PipelineError` is what a caller of the update pipeline sees. Binary-level
//! plumbing (startup, config) stays on `anyhow` like `main.rs` always has.

use std::time::Duration;

use thiserror::Error;

use crate::hexgrid::CellId;

// ---

/// Failures of the geo-to-cell mapping.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GridError {
    #[error("invalid coordinates: lat={lat}, lon={lon}")]
    InvalidCoordinates { lat: f64, lon: f64 },

    #[error("malformed cell id: {0}")]
    MalformedCell(String),

    #[error("unsupported grid resolution: {0}")]
    UnsupportedResolution(u8),
}

/// Failure of one external data source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{source_name}: no API key configured")]
    NotConfigured { source_name: &'static str },

    #[error("{source_name}: request failed: {message}")]
    Transport {
        source_name: &'static str,
        message: String,
    },

    #[error("{source_name}: non-success status {status}")]
    Status { source_name: &'static str, status: u16 },

    #[error("{source_name}: could not decode response: {message}")]
    Decode {
        source_name: &'static str,
        message: String,
    },

    #[error("{source_name}: timed out after {after:?}")]
    Timeout {
        source_name: &'static str,
        after: Duration,
    },

    /// Every source of a fallback chain failed, in the order tried.
    #[error("all pollen sources failed: {}", format_failures(.0))]
    Exhausted(Vec<SourceError>),
}

fn format_failures(errors: &[SourceError]) -> String {
    // ---
    if errors.is_empty() {
        return "no sources configured".to_string();
    }
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Why a single update pipeline run failed.
///
/// Every variant leaves previously stored state untouched: the pipeline only
/// writes in its final persist stage, and that stage is one transaction.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cannot resolve location: {0}")]
    InvalidLocation(#[from] GridError),

    #[error(transparent)]
    SourcesExhausted(SourceError),

    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("update for {cell} abandoned after {after:?}")]
    Cancelled { cell: String, after: Duration },
}

impl PipelineError {
    /// Failure of a run cut short by a deadline before its cell was known.
    pub fn cancelled(cell: Option<&CellId>, after: Duration) -> Self {
        // ---
        PipelineError::Cancelled {
            cell: cell.map(|c| c.to_string()).unwrap_or_else(|| "<unresolved>".into()),
            after,
        }
    }
}

/// Failures recording a diary entry.
#[derive(Debug, Error)]
pub enum DiaryError {
    #[error("feeling score must be within 0..=5, got {0}")]
    ScoreOutOfRange(i64),

    #[error(transparent)]
    Location(#[from] GridError),

    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),
}
