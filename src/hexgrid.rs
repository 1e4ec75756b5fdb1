//! Hexagonal grid indexing on top of H3.
//!
//! A [`CellId`] is the lowercase hex form of an H3 cell index, which is stable
//! across restarts and used directly as the storage key for tiles, history
//! rows and diary entries.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use h3o::{CellIndex, LatLng, Resolution};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::GridError;

/// Resolution used for risk tiles (roughly 0.7 km² per cell).
pub const DEFAULT_RESOLUTION: u8 = 8;

// ---

/// Identifier of one hexagonal cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct CellId(String);

impl CellId {
    /// Parse and validate a cell id coming from outside (HTTP, config).
    pub fn parse(raw: &str) -> Result<Self, GridError> {
        // ---
        let index = CellIndex::from_str(raw.trim())
            .map_err(|_| GridError::MalformedCell(raw.to_string()))?;
        Ok(Self::from(index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn index(&self) -> Option<CellIndex> {
        CellIndex::from_str(&self.0).ok()
    }
}

impl From<CellIndex> for CellId {
    fn from(index: CellIndex) -> Self {
        CellId(index.to_string())
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One polygon vertex, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// Geo-to-cell mapping at a fixed resolution, with a boundary cache.
///
/// Boundary polygons never change for a given cell, so they are computed once
/// and shared. The cache is the only mutable state here and is safe to hit
/// from any number of tasks at once.
pub struct HexGrid {
    resolution: Resolution,
    boundaries: RwLock<HashMap<CellId, Arc<[GeoPoint]>>>,
}

impl HexGrid {
    pub fn new(resolution: u8) -> Result<Self, GridError> {
        // ---
        let resolution = Resolution::try_from(resolution)
            .map_err(|_| GridError::UnsupportedResolution(resolution))?;

        Ok(Self {
            resolution,
            boundaries: RwLock::new(HashMap::new()),
        })
    }

    pub fn resolution(&self) -> u8 {
        u8::from(self.resolution)
    }

    /// Map a coordinate to its cell. The same input always yields the same id.
    pub fn cell_id_for(&self, lat: f64, lon: f64) -> Result<CellId, GridError> {
        // ---
        if !lat.is_finite() || !lon.is_finite() || lat.abs() > 90.0 || lon.abs() > 180.0 {
            return Err(GridError::InvalidCoordinates { lat, lon });
        }

        let point = LatLng::new(lat, lon).map_err(|_| GridError::InvalidCoordinates { lat, lon })?;
        Ok(CellId::from(point.to_cell(self.resolution)))
    }

    /// Ordered polygon vertices of a cell, empty when the id is malformed.
    pub fn boundary_of(&self, cell: &CellId) -> Vec<GeoPoint> {
        // ---
        if let Some(cached) = self.boundaries.read().get(cell) {
            return cached.to_vec();
        }

        let Some(index) = cell.index() else {
            return Vec::new();
        };

        let vertices: Arc<[GeoPoint]> = index
            .boundary()
            .iter()
            .map(|ll| GeoPoint {
                lat: ll.lat(),
                lon: ll.lng(),
            })
            .collect();

        self.boundaries
            .write()
            .entry(cell.clone())
            .or_insert(vertices)
            .to_vec()
    }

    /// Cells exactly `ring_distance` steps away, sorted; empty for a malformed id.
    ///
    /// A ring of 1 is the immediate neighborhood: six cells, five around a
    /// pentagon.
    pub fn neighbors_of(&self, cell: &CellId, ring_distance: u32) -> Vec<CellId> {
        // ---
        let Some(index) = cell.index() else {
            return Vec::new();
        };
        if ring_distance == 0 {
            return Vec::new();
        }

        let mut ring: Vec<CellId> = index
            .grid_disk_distances::<Vec<_>>(ring_distance)
            .into_iter()
            .filter(|(_, distance)| *distance == ring_distance)
            .map(|(neighbor, _)| CellId::from(neighbor))
            .collect();
        ring.sort();
        ring.dedup();
        ring
    }

    #[cfg(test)]
    fn cached_boundaries(&self) -> usize {
        self.boundaries.read().len()
    }
}
