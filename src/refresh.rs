//! Periodic refresh trigger.
//!
//! The pipeline does not care when it is invoked. This module is one such
//! invoker: it remembers the last reported location and re-runs a non-forced
//! update for it on a fixed cadence, first at the next whole hour.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::pipeline::{UpdatePipeline, UpdateRequest};

// ---

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    pub at: DateTime<Utc>,
}

/// Last location reported by the device.
#[derive(Debug, Default)]
pub struct LocationTracker {
    last: Mutex<Option<Location>>,
}

impl LocationTracker {
    pub fn record(&self, lat: f64, lon: f64) {
        *self.last.lock() = Some(Location {
            lat,
            lon,
            at: Utc::now(),
        });
    }

    pub fn last(&self) -> Option<Location> {
        *self.last.lock()
    }
}

/// Time from `now` until the next whole hour (a full hour when exactly on it).
pub fn until_next_hour(now: DateTime<Utc>) -> Duration {
    // ---
    let into_hour = u64::from(now.minute()) * 60 + u64::from(now.second());
    let remaining = Duration::from_secs(3600 - into_hour);
    remaining.saturating_sub(Duration::from_nanos(u64::from(now.nanosecond() % 1_000_000_000)))
}

/// One periodic tick: refresh the last known location if there is one.
pub async fn refresh_last_location(
    pipeline: &UpdatePipeline,
    tracker: &LocationTracker,
    deadline: Duration,
) {
    // ---
    let Some(location) = tracker.last() else {
        warn!("No location for periodic refresh");
        return;
    };

    let request = UpdateRequest {
        lat: location.lat,
        lon: location.lon,
        force: false,
    };
    match pipeline.run_with_deadline(request, deadline).await {
        Ok(outcome) if outcome.was_skipped() => info!("Periodic refresh: tile still fresh"),
        Ok(_) => info!("Periodic refresh complete"),
        Err(e) => error!("Periodic refresh failed: {}", e),
    }
}

/// Spawn the refresh loop. Abort the handle to stop it.
pub fn spawn_periodic_refresh(
    pipeline: Arc<UpdatePipeline>,
    tracker: Arc<LocationTracker>,
    interval: Duration,
    deadline: Duration,
) -> JoinHandle<()> {
    // ---
    let first = Instant::now() + until_next_hour(Utc::now());
    info!(
        "Periodic refresh every {:?}, first in {:?}",
        interval,
        first - Instant::now()
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(first, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            refresh_last_location(&pipeline, &tracker, deadline).await;
        }
    })
}
