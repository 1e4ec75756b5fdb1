//! Risk scoring and the temporal/spatial correction filters.
//!
//! Every stage is a pure function of its inputs. [`RiskParams::score`] chains
//! them in the one order that is valid: base risk, air-quality correction,
//! temporal smoothing against the cell's previous value, then spatial
//! smoothing toward the current neighbor values.
//!
//! No rounding is applied anywhere; scores are carried and stored as `f64`.
//! For example `temporal_smooth(100.0, 200.0, 200.0)` stores `166.666…`.

use serde::Serialize;

use crate::models::PollenReading;

// ---

/// Tunable constants of the risk formula.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskParams {
    pub tree_weight: f64,
    pub grass_weight: f64,
    pub weed_weight: f64,

    /// Multiplier taking a raw 0–5 sub-index onto the 0–500 scale.
    pub index_scale: f64,

    /// Fractional risk increase per AQI point.
    pub aqi_impact_factor: f64,

    /// How far a cell is pulled toward its neighbors' mean (0 = not at all).
    pub wind_factor: f64,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            tree_weight: 0.4,
            grass_weight: 0.3,
            weed_weight: 0.3,
            index_scale: 100.0,
            aqi_impact_factor: 0.005,
            wind_factor: 0.1,
        }
    }
}

/// Intermediate values of one scoring pass, kept for logging and responses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskBreakdown {
    pub base: f64,
    pub air_corrected: f64,
    pub temporal: f64,
    pub final_risk: f64,
}

impl RiskParams {
    /// Check the weights form a proper convex combination.
    pub fn validate(&self) -> Result<(), String> {
        // ---
        let weights = [self.tree_weight, self.grass_weight, self.weed_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(format!("risk weights must be non-negative, got {weights:?}"));
        }

        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > 1e-9 {
            return Err(format!("risk weights must sum to 1.0, got {sum}"));
        }
        if !(0.0..=1.0).contains(&self.wind_factor) {
            return Err(format!("wind factor must be within 0..=1, got {}", self.wind_factor));
        }
        if !self.index_scale.is_finite() || self.index_scale <= 0.0 {
            return Err(format!("index scale must be positive, got {}", self.index_scale));
        }
        if !self.aqi_impact_factor.is_finite() || self.aqi_impact_factor < 0.0 {
            return Err(format!(
                "AQI impact factor must be non-negative, got {}",
                self.aqi_impact_factor
            ));
        }
        Ok(())
    }

    /// Weighted sum of the scaled sub-indices.
    pub fn base_risk(&self, tree: f64, grass: f64, weed: f64) -> f64 {
        // ---
        tree * self.index_scale * self.tree_weight
            + grass * self.index_scale * self.grass_weight
            + weed * self.index_scale * self.weed_weight
    }

    /// `base * (1 + aqi * k)`; an absent AQI leaves the value unchanged.
    pub fn apply_air_quality_correction(&self, base_risk: f64, aqi: Option<u32>) -> f64 {
        // ---
        let aqi = f64::from(aqi.unwrap_or(0));
        base_risk * (1.0 + aqi * self.aqi_impact_factor)
    }

    pub fn spatial_smooth(&self, current_risk: f64, neighbor_risks: &[f64]) -> f64 {
        spatial_smooth(current_risk, neighbor_risks, self.wind_factor)
    }

    /// Run every stage in order.
    ///
    /// Without a previous value the temporal stage is skipped. There is never
    /// an independent "next" sample at update time, so the current value stands
    /// in for it and the filter becomes a 1:2 blend of previous and current.
    pub fn score(
        &self,
        reading: &PollenReading,
        aqi: Option<u32>,
        previous_risk: Option<f64>,
        neighbor_risks: &[f64],
    ) -> RiskBreakdown {
        // ---
        let base = self.base_risk(reading.tree, reading.grass, reading.weed);
        let air_corrected = self.apply_air_quality_correction(base, aqi);

        let temporal = match previous_risk {
            Some(previous) => temporal_smooth(previous, air_corrected, air_corrected),
            None => air_corrected,
        };

        let final_risk = self.spatial_smooth(temporal, neighbor_risks);

        RiskBreakdown {
            base,
            air_corrected,
            temporal,
            final_risk,
        }
    }
}

/// Three-point moving average.
pub fn temporal_smooth(previous: f64, current: f64, next: f64) -> f64 {
    (previous + current + next) / 3.0
}

/// Pull `current_risk` toward the neighbors' mean by `wind_factor`.
/// No neighbors means no change.
pub fn spatial_smooth(current_risk: f64, neighbor_risks: &[f64], wind_factor: f64) -> f64 {
    // ---
    if neighbor_risks.is_empty() {
        return current_risk;
    }
    let mean = neighbor_risks.iter().sum::<f64>() / neighbor_risks.len() as f64;
    current_risk + (mean - current_risk) * wind_factor
}
