//! Matching problem inputs and result records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Driver, DriverId, EquipmentType, Load, LoadId};

/// Revenue basis used for estimated earnings, dollars per loaded mile.
pub const REVENUE_PER_MILE_USD: f64 = 1.80;

/// Per-factor weights in the pairing objective. They are normalized by their
/// sum, so any positive scale works.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchingWeights {
    pub empty_miles: f64,
    pub network: f64,
    pub preference: f64,
    pub hos: f64,
}

impl Default for MatchingWeights {
    fn default() -> Self {
        Self {
            empty_miles: 0.4,
            network: 0.2,
            preference: 0.2,
            hos: 0.2,
        }
    }
}

impl MatchingWeights {
    pub fn total(&self) -> f64 {
        self.empty_miles + self.network + self.preference + self.hos
    }
}

/// Hard constraint attached to an optimization job. `weight` is carried for
/// soft variants of the same constraint; the filters here are hard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizationConstraint {
    MaxWeightLbs { value: f64, weight: f64 },
    MinHosMinutes { value: f64, weight: f64 },
    RequiredEquipment { value: EquipmentType, weight: f64 },
    Region { value: String, weight: f64 },
}

/// One matching run's scope: the loads and drivers in the job's region and
/// window, plus objective weights and the travel-time estimator.
#[derive(Debug, Clone)]
pub struct MatchingProblem {
    pub loads: Vec<Load>,
    pub drivers: Vec<Driver>,
    pub weights: MatchingWeights,
    pub constraints: Vec<OptimizationConstraint>,
    /// Travel-time estimator speed, mph.
    pub speed_mph: f64,
    /// Reference instant for window reachability.
    pub now: DateTime<Utc>,
}

/// Per-factor breakdown of one pairing's efficiency weight. Component values
/// are in [0, 1]; `total` is the weighted blend scaled to [0, 100].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PairScore {
    pub total: f64,
    pub empty_ratio: f64,
    pub empty_component: f64,
    pub network_component: f64,
    pub preference_component: f64,
    pub hos_component: f64,
}

/// One accepted assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadMatch {
    pub driver_id: DriverId,
    pub load_id: LoadId,
    /// Pairing efficiency, [0, 100].
    pub score: f64,
    pub empty_miles: f64,
    pub loaded_miles: f64,
    /// Versus the mean empty miles across this load's feasible drivers.
    pub empty_miles_saved: f64,
    pub network_contribution: f64,
    pub estimated_earnings_usd: f64,
    pub breakdown: PairScore,
}

/// Aggregate outcome of a matching run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NetworkMetrics {
    pub total_loads: usize,
    pub matched_loads: usize,
    pub total_drivers: usize,
    pub matched_drivers: usize,
    pub total_miles: f64,
    pub loaded_miles: f64,
    pub empty_miles: f64,
    pub empty_miles_pct: f64,
    /// Loaded share of assigned miles, [0, 100].
    pub efficiency_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingOutcome {
    pub matches: Vec<LoadMatch>,
    pub metrics: NetworkMetrics,
    /// Set when the run produced no assignment, with the cause.
    pub reason: Option<String>,
}
