//! Data models shared by the store, the pipeline and the HTTP surface.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::hexgrid::CellId;

// ---

/// Raw pollen sub-indices from a data source, each conventionally 0–5.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PollenReading {
    pub tree: f64,
    pub grass: f64,
    pub weed: f64,
}

impl PollenReading {
    /// Negative or non-finite values from a source are read as 0.
    pub fn sanitized(self) -> Self {
        // ---
        let clean = |v: f64| if v.is_finite() && v > 0.0 { v } else { 0.0 };
        Self {
            tree: clean(self.tree),
            grass: clean(self.grass),
            weed: clean(self.weed),
        }
    }
}

/// Latest computed risk state of one cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tile {
    // ---
    pub cell_id: CellId,
    pub tree_index: f64,
    pub grass_index: f64,
    pub weed_index: f64,
    pub risk_level: f64,
    pub air_quality_index: Option<u32>,
    pub updated_at: DateTime<Utc>,
}

/// One immutable snapshot of a cell's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct HistoryRecord {
    // ---
    pub id: i64,
    pub cell_id: CellId,
    pub tree_index: f64,
    pub grass_index: f64,
    pub weed_index: f64,
    pub risk_level: f64,
    pub air_quality_index: Option<u32>,
    pub date: DateTime<Utc>,
}

/// A user self-report. `feeling_score` runs from 0 (worst) to 5 (best).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DiaryEntry {
    // ---
    pub id: i64,
    pub date: DateTime<Utc>,
    pub feeling_score: u8,
    pub symptoms: Option<String>,
    pub cell_id: CellId,
}

/// A diary entry before the store assigns its id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDiaryEntry {
    pub date: DateTime<Utc>,
    pub feeling_score: u8,
    pub symptoms: Option<String>,
    pub cell_id: CellId,
}

pub const MAX_FEELING_SCORE: u8 = 5;

/// Diary entries below this score count as bad days.
pub const BAD_FEELING_BELOW: u8 = 3;

impl DiaryEntry {
    pub fn is_bad_day(&self) -> bool {
        self.feeling_score < BAD_FEELING_BELOW
    }
}

/// Simple helpers around tile freshness
impl Tile {
    // ---
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.updated_at
    }

    /// True while the tile is younger than `staleness`. A tile stamped in
    /// the future is never fresh.
    pub fn is_fresh(&self, now: DateTime<Utc>, staleness: Duration) -> bool {
        let age = self.age(now);
        age >= Duration::zero() && age < staleness
    }
}
