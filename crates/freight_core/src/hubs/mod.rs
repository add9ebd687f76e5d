//! Smart Hubs: exchange points where relay handoffs and load swaps happen.
//!
//! This module provides:
//!
//! - **Hub catalogue**: [SmartHub] records behind a spatially indexed
//!   repository
//! - **Discovery**: DBSCAN clustering of historical truck-route points into
//!   potential new hub sites
//! - **Scoring**: Rating hubs against the current network state
//! - **Exchange selection**: Picking the best handoff hub between two routes

pub mod repository;
pub mod discovery;
pub mod scoring;
pub mod exchange;

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::geo::{self, GeoPoint};

pub use discovery::{dbscan, discover_potential_hubs, DbscanParams, DiscoveryConfig, PotentialHub};
pub use exchange::{select_exchange_point, ExchangeCandidate, ExchangeConfig, Route};
pub use repository::{HubFilters, HubPatch, HubRepository, InMemoryHubRepository};
pub use scoring::{score_hub, AmenityWeights, HubScoreWeights, NetworkState};

/// Exclusion radius around existing hubs during discovery (miles).
pub const MIN_HUB_DISTANCE_MILES: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HubId(pub Uuid);

impl HubId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for HubId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FacilityType {
    TruckStop,
    Terminal,
    Warehouse,
    DistributionCenter,
    RestArea,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Amenity {
    Parking,
    Restrooms,
    Food,
    Fuel,
    Maintenance,
    Shower,
    Lodging,
    Security,
}

/// Weekly operating schedule. `open == close` is rejected; `close < open`
/// wraps across midnight and adds 24 h when computing the duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatingHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
    pub weekdays: HashSet<Weekday>,
}

impl OperatingHours {
    pub fn new(
        open: NaiveTime,
        close: NaiveTime,
        weekdays: impl IntoIterator<Item = Weekday>,
    ) -> EngineResult<Self> {
        if open == close {
            return Err(EngineError::Validation(
                "operating hours open and close must differ".into(),
            ));
        }
        Ok(Self {
            open,
            close,
            weekdays: weekdays.into_iter().collect(),
        })
    }

    /// Daily open duration in hours, wrap-around aware.
    pub fn duration_hours(&self) -> f64 {
        let mut secs = (self.close - self.open).num_seconds();
        if secs <= 0 {
            secs += 24 * 3600;
        }
        secs as f64 / 3600.0
    }

    /// Whether the hub is open at the given local time on the given weekday.
    pub fn is_open_at(&self, weekday: Weekday, time: NaiveTime) -> bool {
        if !self.weekdays.contains(&weekday) {
            return false;
        }
        if self.close > self.open {
            time >= self.open && time < self.close
        } else {
            time >= self.open || time < self.close
        }
    }
}

/// Metrics derived by the engine on each completed identification run.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HubOptimizationMetrics {
    pub network_impact: f64,
    pub geographic_coverage: f64,
    pub utilization_rate: f64,
}

/// Operational counters maintained as exchanges happen.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HubPerformanceCounters {
    pub exchange_count: u64,
    /// Fraction of exchanges completed on schedule, [0, 1].
    pub success_rate: f64,
    pub average_wait_time_minutes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartHub {
    pub id: HubId,
    pub name: String,
    pub facility_type: FacilityType,
    pub location: GeoPoint,
    pub amenities: BTreeSet<Amenity>,
    /// Trucks the facility can host simultaneously.
    pub capacity: u32,
    pub operating_hours: OperatingHours,
    /// Overall efficiency, [0, 100].
    pub efficiency_score: f64,
    pub active: bool,
    /// Declared operating region; when present the hub's point must lie
    /// inside it.
    pub operating_region: Option<Vec<GeoPoint>>,
    pub optimization_metrics: HubOptimizationMetrics,
    pub performance: HubPerformanceCounters,
}

impl SmartHub {
    /// Structural validation applied on create and patch.
    pub fn validate(&self) -> EngineResult<()> {
        if !self.location.is_valid() {
            return Err(EngineError::Validation(format!(
                "hub {} has invalid location {:?}",
                self.name, self.location
            )));
        }
        if !(0.0..=100.0).contains(&self.efficiency_score) {
            return Err(EngineError::Validation(format!(
                "hub {} efficiency score {} outside [0, 100]",
                self.name, self.efficiency_score
            )));
        }
        if self.capacity == 0 {
            return Err(EngineError::Validation(format!(
                "hub {} must have non-zero capacity",
                self.name
            )));
        }
        if let Some(region) = &self.operating_region {
            if !geo::point_in_polygon(self.location, region) {
                return Err(EngineError::Validation(format!(
                    "hub {} lies outside its declared operating region",
                    self.name
                )));
            }
        }
        Ok(())
    }
}
