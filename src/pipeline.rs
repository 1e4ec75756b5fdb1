//! The per-location update pipeline.
//!
//! One run walks `Resolve → CheckFreshness → (Skip | Fetch) → Compute →
//! Persist → NotifyCheck`, strictly in that order. Runs for different cells
//! proceed concurrently; runs for the same cell are serialized from the
//! freshness check through the write, so a run always smooths against the
//! tile the previous run stored.
//!
//! Nothing is written before `Persist`, and `Persist` is a single store
//! transaction. Dropping a run at any point therefore leaves either the old
//! tile or the new tile-plus-history pair, never a mix.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::events::{HighRiskEvent, Notifier};
use crate::hexgrid::{CellId, HexGrid};
use crate::models::Tile;
use crate::personal::PersonalRiskAdapter;
use crate::risk::{RiskBreakdown, RiskParams};
use crate::sources::{AirQualityProbe, PollenChain};
use crate::store::TileStore;

/// Lock table size above which idle per-cell locks are pruned.
const LOCK_TABLE_PRUNE_AT: usize = 256;

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolve,
    CheckFreshness,
    Fetch,
    Compute,
    Persist,
    NotifyCheck,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Resolve => "resolve",
            Stage::CheckFreshness => "check_freshness",
            Stage::Fetch => "fetch",
            Stage::Compute => "compute",
            Stage::Persist => "persist",
            Stage::NotifyCheck => "notify_check",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Tiles younger than this are not refreshed unless forced.
    pub staleness: Duration,

    /// Personal risk above this percentage raises a [`HighRiskEvent`].
    pub high_risk_percent: f64,

    /// Ring of neighbor cells used for spatial smoothing.
    pub neighbor_ring: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            staleness: Duration::from_secs(3600),
            high_risk_percent: 80.0,
            neighbor_ring: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateRequest {
    pub lat: f64,
    pub lon: f64,
    /// Refresh even when the stored tile is still fresh.
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpdateOutcome {
    /// The stored tile was fresh; nothing was fetched or written.
    Skipped { tile: Tile, age_secs: i64 },

    Updated {
        tile: Tile,
        history_id: i64,
        source: &'static str,
        breakdown: RiskBreakdown,
        personal_percent: f64,
        notified: bool,
    },
}

impl UpdateOutcome {
    pub fn tile(&self) -> &Tile {
        match self {
            UpdateOutcome::Skipped { tile, .. } | UpdateOutcome::Updated { tile, .. } => tile,
        }
    }

    pub fn was_skipped(&self) -> bool {
        matches!(self, UpdateOutcome::Skipped { .. })
    }
}

/// Per-cell write serialization.
#[derive(Default)]
pub struct CellLocks {
    locks: parking_lot::Mutex<HashMap<CellId, Arc<Mutex<()>>>>,
}

impl CellLocks {
    /// Wait until no other holder has `cell`, then hold it until the guard drops.
    pub async fn acquire(&self, cell: &CellId) -> OwnedMutexGuard<()> {
        // ---
        let lock = {
            let mut locks = self.locks.lock();
            if locks.len() >= LOCK_TABLE_PRUNE_AT {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            Arc::clone(locks.entry(cell.clone()).or_default())
        };
        lock.lock_owned().await
    }
}

pub struct UpdatePipeline {
    grid: Arc<HexGrid>,
    store: Arc<dyn TileStore>,
    pollen: PollenChain,
    air: AirQualityProbe,
    params: RiskParams,
    personal: Arc<PersonalRiskAdapter>,
    notifier: Notifier,
    settings: PipelineSettings,
    locks: CellLocks,
}

impl UpdatePipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        grid: Arc<HexGrid>,
        store: Arc<dyn TileStore>,
        pollen: PollenChain,
        air: AirQualityProbe,
        params: RiskParams,
        personal: Arc<PersonalRiskAdapter>,
        notifier: Notifier,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            grid,
            store,
            pollen,
            air,
            params,
            personal,
            notifier,
            settings,
            locks: CellLocks::default(),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run one update attempt to completion.
    pub async fn run(&self, request: UpdateRequest) -> Result<UpdateOutcome, PipelineError> {
        // ---
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("update", %run_id, cell = tracing::field::Empty);
        self.run_stages(request).instrument(span).await
    }

    /// Run with a deadline; an expired run is abandoned without a partial write.
    pub async fn run_with_deadline(
        &self,
        request: UpdateRequest,
        deadline: Duration,
    ) -> Result<UpdateOutcome, PipelineError> {
        // ---
        match tokio::time::timeout(deadline, self.run(request)).await {
            Ok(result) => result,
            Err(_) => {
                let cell = self.grid.cell_id_for(request.lat, request.lon).ok();
                warn!("Update abandoned after {:?}", deadline);
                Err(PipelineError::cancelled(cell.as_ref(), deadline))
            }
        }
    }

    async fn run_stages(&self, request: UpdateRequest) -> Result<UpdateOutcome, PipelineError> {
        // ---
        debug!(stage = %Stage::Resolve, "lat={} lon={}", request.lat, request.lon);
        let cell = self.grid.cell_id_for(request.lat, request.lon).map_err(|e| {
            warn!("Skipping update for unresolvable location: {}", e);
            PipelineError::from(e)
        })?;
        tracing::Span::current().record("cell", tracing::field::display(&cell));

        let guard = self.locks.acquire(&cell).await;

        debug!(stage = %Stage::CheckFreshness, force = request.force);
        let previous = self.store.get_tile(&cell).await?;
        if let Some(tile) = previous.as_ref().filter(|_| !request.force) {
            let now = Utc::now();
            let staleness = chrono::Duration::from_std(self.settings.staleness)
                .unwrap_or(chrono::Duration::MAX);
            if tile.is_fresh(now, staleness) {
                let age = tile.age(now);
                info!("Tile is {}s old, skipping update", age.num_seconds());
                return Ok(UpdateOutcome::Skipped {
                    tile: tile.clone(),
                    age_secs: age.num_seconds(),
                });
            }
        }

        debug!(stage = %Stage::Fetch, sources = ?self.pollen.source_names());
        let (pollen, aqi) = tokio::join!(
            self.pollen.fetch(request.lat, request.lon),
            self.air.fetch(request.lat, request.lon)
        );
        let (reading, source) = pollen.map_err(|e| {
            tracing::error!("No pollen data, update aborted: {}", e);
            PipelineError::SourcesExhausted(e)
        })?;

        debug!(stage = %Stage::Compute, ?reading, ?aqi);
        let neighbors = self.grid.neighbors_of(&cell, self.settings.neighbor_ring);
        let neighbor_risks: Vec<f64> = self
            .store
            .get_tiles(&neighbors)
            .await?
            .iter()
            .map(|t| t.risk_level)
            .collect();
        let breakdown = self.params.score(
            &reading,
            aqi,
            previous.as_ref().map(|t| t.risk_level),
            &neighbor_risks,
        );

        debug!(stage = %Stage::Persist, risk = breakdown.final_risk);
        let tile = Tile {
            cell_id: cell.clone(),
            tree_index: reading.tree,
            grass_index: reading.grass,
            weed_index: reading.weed,
            risk_level: breakdown.final_risk,
            air_quality_index: aqi,
            updated_at: Utc::now(),
        };
        let history = self.store.persist_update(&tile).await?;
        drop(guard);

        info!(
            "Tile updated from {}: risk {:.1} (base {:.1}, {} neighbors)",
            source,
            tile.risk_level,
            breakdown.base,
            neighbor_risks.len()
        );

        debug!(stage = %Stage::NotifyCheck);
        let personal_percent = self.personal.personal_risk_percent(&tile);
        let notified = personal_percent > self.settings.high_risk_percent;
        if notified {
            info!("High personal risk: {:.0}%", personal_percent);
            self.notifier.publish(HighRiskEvent {
                id: Uuid::new_v4(),
                cell_id: cell,
                percent: personal_percent,
                risk_level: tile.risk_level,
                at: tile.updated_at,
            });
        }

        Ok(UpdateOutcome::Updated {
            tile,
            history_id: history.id,
            source,
            breakdown,
            personal_percent,
            notified,
        })
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::hexgrid::DEFAULT_RESOLUTION;

    #[test]
    fn stage_names_are_snake_case() {
        // ---
        assert_eq!(Stage::CheckFreshness.to_string(), "check_freshness");
        assert_eq!(Stage::NotifyCheck.to_string(), "notify_check");
    }

    #[tokio::test]
    async fn same_cell_lock_is_exclusive() {
        // ---
        let grid = HexGrid::new(DEFAULT_RESOLUTION).unwrap();
        let cell = grid.cell_id_for(51.5, -0.12).unwrap();
        let locks = CellLocks::default();

        let held = locks.acquire(&cell).await;
        let blocked = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&cell)).await;
        assert!(blocked.is_err());

        drop(held);
        let reacquired = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&cell)).await;
        assert!(reacquired.is_ok());
    }

    #[tokio::test]
    async fn different_cells_do_not_contend() {
        // ---
        let grid = HexGrid::new(DEFAULT_RESOLUTION).unwrap();
        let london = grid.cell_id_for(51.5, -0.12).unwrap();
        let paris = grid.cell_id_for(48.85, 2.35).unwrap();
        let locks = CellLocks::default();

        let _held = locks.acquire(&london).await;
        let other = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&paris)).await;
        assert!(other.is_ok());
    }
}
