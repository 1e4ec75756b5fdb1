//! Adaptive personal risk threshold.
//!
//! The threshold is derived state: it is rebuilt from stored diary entries and
//! tiles whenever asked, and only lives in process memory in between. The
//! store is never written from here.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::DiaryError;
use crate::hexgrid::{CellId, HexGrid};
use crate::models::{DiaryEntry, NewDiaryEntry, Tile, MAX_FEELING_SCORE};
use crate::store::TileStore;

// ---

/// Constants of the threshold adaptation.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdParams {
    /// Threshold used until the diary says otherwise.
    pub default_threshold: f64,

    /// The adapted threshold never drops below this.
    pub min_threshold: f64,

    /// Fraction of the average bad-day risk the threshold is set to.
    pub margin: f64,

    /// Bad-day reports needed before adapting at all.
    pub min_bad_entries: usize,
}

impl Default for ThresholdParams {
    fn default() -> Self {
        Self {
            default_threshold: 150.0,
            min_threshold: 50.0,
            margin: 0.85,
            min_bad_entries: 2,
        }
    }
}

/// New threshold from the diary, or `current` when there is too little signal.
///
/// Only bad days (feeling score below 3) count. Entries whose cell has no
/// resolvable risk are left out of the average rather than counted as zero.
pub fn recompute_threshold<F>(
    params: &ThresholdParams,
    current: f64,
    entries: &[DiaryEntry],
    risk_for: F,
) -> f64
where
    F: Fn(&CellId) -> Option<f64>,
{
    // ---
    let bad_days: Vec<&DiaryEntry> = entries.iter().filter(|e| e.is_bad_day()).collect();
    if bad_days.len() < params.min_bad_entries {
        return current;
    }

    let risks: Vec<f64> = bad_days.iter().filter_map(|e| risk_for(&e.cell_id)).collect();
    if risks.is_empty() {
        debug!("No tiles found for {} bad diary entries", bad_days.len());
        return current;
    }
    if risks.len() < bad_days.len() {
        debug!(
            "Skipped {} bad diary entries without a tile",
            bad_days.len() - risks.len()
        );
    }

    let average = risks.iter().sum::<f64>() / risks.len() as f64;
    params.min_threshold.max(average * params.margin)
}

/// Absolute risk as a percentage of the personal threshold, capped at 100.
pub fn personal_risk_percent(tile: &Tile, threshold: f64) -> f64 {
    (tile.risk_level / threshold * 100.0).min(100.0)
}

/// Where a diary entry was felt: a coordinate or an already known cell.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum DiaryLocation {
    Cell { cell_id: String },
    Coordinates { lat: f64, lon: f64 },
}

impl DiaryLocation {
    fn resolve(&self, grid: &HexGrid) -> Result<CellId, DiaryError> {
        // ---
        let cell = match self {
            DiaryLocation::Cell { cell_id } => CellId::parse(cell_id)?,
            DiaryLocation::Coordinates { lat, lon } => grid.cell_id_for(*lat, *lon)?,
        };
        Ok(cell)
    }
}

/// Holder of the current threshold for one user.
pub struct PersonalRiskAdapter {
    params: ThresholdParams,
    threshold: RwLock<f64>,
    /// Held by one refresh from its diary read through its threshold write.
    refreshing: Mutex<()>,
}

impl PersonalRiskAdapter {
    pub fn new(params: ThresholdParams) -> Self {
        let threshold = RwLock::new(params.default_threshold);
        Self {
            params,
            threshold,
            refreshing: Mutex::new(()),
        }
    }

    pub fn params(&self) -> &ThresholdParams {
        &self.params
    }

    pub fn threshold(&self) -> f64 {
        *self.threshold.read()
    }

    pub fn personal_risk_percent(&self, tile: &Tile) -> f64 {
        personal_risk_percent(tile, self.threshold())
    }

    /// Rebuild the threshold from everything in the store.
    ///
    /// On a storage error the previous threshold is kept. Overlapping calls
    /// run one at a time, so the last one to finish has read the newest diary.
    pub async fn refresh(&self, store: &dyn TileStore) -> Result<f64, sqlx::Error> {
        // ---
        let _refreshing = self.refreshing.lock().await;
        let entries = store.list_diary_entries(None).await?;

        let mut cells: Vec<CellId> = entries
            .iter()
            .filter(|e| e.is_bad_day())
            .map(|e| e.cell_id.clone())
            .collect();
        cells.sort();
        cells.dedup();

        let risks: HashMap<CellId, f64> = store
            .get_tiles(&cells)
            .await?
            .into_iter()
            .map(|t| (t.cell_id, t.risk_level))
            .collect();

        let mut threshold = self.threshold.write();
        let updated = recompute_threshold(&self.params, *threshold, &entries, |cell| {
            risks.get(cell).copied()
        });
        if updated != *threshold {
            info!("Personal risk threshold updated: {:.1} -> {:.1}", *threshold, updated);
        }
        *threshold = updated;
        Ok(updated)
    }

    /// Validate and store a diary entry, then adapt the threshold to it.
    ///
    /// The entry is kept even if the threshold refresh fails afterwards.
    pub async fn record_diary_entry(
        &self,
        store: &dyn TileStore,
        grid: &HexGrid,
        feeling_score: i64,
        symptoms: Option<String>,
        location: &DiaryLocation,
    ) -> Result<DiaryEntry, DiaryError> {
        // ---
        let feeling_score = u8::try_from(feeling_score)
            .ok()
            .filter(|s| *s <= MAX_FEELING_SCORE)
            .ok_or(DiaryError::ScoreOutOfRange(feeling_score))?;
        let cell_id = location.resolve(grid)?;

        let entry = store
            .insert_diary_entry(&NewDiaryEntry {
                date: Utc::now(),
                feeling_score,
                symptoms: symptoms.filter(|s| !s.trim().is_empty()),
                cell_id,
            })
            .await?;
        info!("Diary entry {} recorded for {}", entry.id, entry.cell_id);

        if let Err(e) = self.refresh(store).await {
            warn!("Threshold not refreshed after diary entry: {}", e);
        }
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::hexgrid::DEFAULT_RESOLUTION;

    fn cell(lat: f64) -> CellId {
        HexGrid::new(DEFAULT_RESOLUTION)
            .unwrap()
            .cell_id_for(lat, 10.0)
            .unwrap()
    }

    fn entry(id: i64, score: u8, cell_id: CellId) -> DiaryEntry {
        DiaryEntry {
            id,
            date: Utc::now(),
            feeling_score: score,
            symptoms: None,
            cell_id,
        }
    }

    fn tile(risk_level: f64) -> Tile {
        Tile {
            cell_id: cell(0.0),
            tree_index: 0.0,
            grass_index: 0.0,
            weed_index: 0.0,
            risk_level,
            air_quality_index: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn fewer_than_two_bad_days_keeps_threshold() {
        // ---
        let params = ThresholdParams::default();
        let entries = vec![entry(1, 1, cell(1.0)), entry(2, 4, cell(2.0)), entry(3, 5, cell(3.0))];
        let updated = recompute_threshold(&params, 150.0, &entries, |_| Some(400.0));
        assert_eq!(updated, 150.0);
        assert_eq!(recompute_threshold(&params, 99.0, &[], |_| Some(400.0)), 99.0);
    }

    #[test]
    fn averages_bad_day_risk_with_margin() {
        // ---
        let params = ThresholdParams::default();
        let (a, b) = (cell(1.0), cell(2.0));
        let entries = vec![entry(1, 1, a.clone()), entry(2, 2, b.clone()), entry(3, 5, cell(3.0))];

        let updated = recompute_threshold(&params, 150.0, &entries, |c| {
            if c == &a {
                Some(200.0)
            } else if c == &b {
                Some(300.0)
            } else {
                Some(1000.0)
            }
        });
        assert!((updated - 212.5).abs() < 1e-9);
    }

    #[test]
    fn never_drops_below_floor() {
        // ---
        let params = ThresholdParams::default();
        let entries = vec![entry(1, 0, cell(1.0)), entry(2, 1, cell(2.0))];
        assert_eq!(recompute_threshold(&params, 150.0, &entries, |_| Some(10.0)), 50.0);
        assert_eq!(recompute_threshold(&params, 150.0, &entries, |_| Some(0.0)), 50.0);
    }

    #[test]
    fn unresolvable_entries_are_excluded_not_zeroed() {
        // ---
        let params = ThresholdParams::default();
        let known = cell(1.0);
        let entries = vec![entry(1, 1, known.clone()), entry(2, 2, cell(2.0))];

        let updated = recompute_threshold(&params, 150.0, &entries, |c| (c == &known).then_some(400.0));
        assert!((updated - 340.0).abs() < 1e-9);
    }

    #[test]
    fn no_resolvable_entries_keeps_threshold() {
        // ---
        let params = ThresholdParams::default();
        let entries = vec![entry(1, 1, cell(1.0)), entry(2, 2, cell(2.0))];
        assert_eq!(recompute_threshold(&params, 120.0, &entries, |_| None), 120.0);
    }

    #[test]
    fn percent_is_capped_at_one_hundred() {
        // ---
        assert_eq!(personal_risk_percent(&tile(75.0), 150.0), 50.0);
        assert_eq!(personal_risk_percent(&tile(150.0), 150.0), 100.0);
        assert_eq!(personal_risk_percent(&tile(10_000.0), 150.0), 100.0);
        assert_eq!(personal_risk_percent(&tile(0.0), 150.0), 0.0);
    }

    #[test]
    fn diary_location_accepts_either_shape() {
        // ---
        let by_cell: DiaryLocation = serde_json::from_str(r#"{"cell_id":"abc"}"#).unwrap();
        assert_eq!(by_cell, DiaryLocation::Cell { cell_id: "abc".into() });

        let by_coords: DiaryLocation = serde_json::from_str(r#"{"lat":1.5,"lon":2.5}"#).unwrap();
        assert_eq!(by_coords, DiaryLocation::Coordinates { lat: 1.5, lon: 2.5 });
    }

    #[test]
    fn adapter_starts_at_default() {
        // ---
        let adapter = PersonalRiskAdapter::new(ThresholdParams::default());
        assert_eq!(adapter.threshold(), 150.0);
        assert_eq!(adapter.personal_risk_percent(&tile(120.0)), 80.0);
    }
}
