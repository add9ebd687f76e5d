//! Domain model: drivers, loads, positions, and their lifecycles.
//!
//! Entities here are plain records. Drivers and loads are externally owned;
//! the engine reads them through repository traits and only ever writes the
//! assignment produced by a completed matching run. Hours of service is
//! modeled as the aggregate `driving_minutes_remaining` and is consumed
//! read-only.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::geo::GeoPoint;

/// External driver identity (owned by the carrier system).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriverId(pub String);

impl DriverId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for DriverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// External load identity (owned by the freight system).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoadId(pub String);

impl LoadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for LoadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a position fix came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSource {
    Gps,
    Cellular,
    Manual,
}

/// Immutable snapshot of an entity's location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub point: GeoPoint,
    /// Heading in degrees, [0, 360).
    pub heading: f64,
    /// Ground speed in miles per hour.
    pub speed: f64,
    /// Fix accuracy in meters.
    pub accuracy: f64,
    pub timestamp: DateTime<Utc>,
    pub source: PositionSource,
}

/// Trailer/equipment class a load requires and a driver pulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EquipmentType {
    DryVan,
    Reefer,
    Flatbed,
    Tanker,
}

/// Driver routing preferences. `preferred_regions` is soft and priced into
/// the matching weight; `excluded_regions` is hard and removes the pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverPreferences {
    pub preferred_regions: BTreeSet<String>,
    pub excluded_regions: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    pub id: DriverId,
    pub position: Position,
    pub home_base: GeoPoint,
    /// Remaining regulatory driving time in minutes. Replenished by rest
    /// outside the engine; never mutated here.
    pub driving_minutes_remaining: f64,
    pub preferences: DriverPreferences,
    pub equipment: EquipmentType,
    /// Opaque region tag used by repository and job-store indexes.
    pub region: Option<String>,
}

/// Earliest/latest bounds of a stop or a job. `earliest < latest` is required.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub earliest: DateTime<Utc>,
    pub latest: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(earliest: DateTime<Utc>, latest: DateTime<Utc>) -> EngineResult<Self> {
        if earliest >= latest {
            return Err(EngineError::Validation(format!(
                "time window start {earliest} must precede end {latest}"
            )));
        }
        Ok(Self { earliest, latest })
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.earliest && t < self.latest
    }

    pub fn duration_minutes(&self) -> f64 {
        (self.latest - self.earliest).num_seconds() as f64 / 60.0
    }
}

/// A pickup or delivery stop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub location: GeoPoint,
    pub window: TimeWindow,
}

/// Load lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadStatus {
    Pending,
    Available,
    Assigned,
    InTransit,
    Delivered,
    Completed,
    Cancelled,
}

impl LoadStatus {
    /// Legal forward transitions. Completed and Cancelled are terminal.
    pub fn can_transition_to(&self, next: LoadStatus) -> bool {
        use LoadStatus::*;
        matches!(
            (self, next),
            (Pending, Available)
                | (Pending, Cancelled)
                | (Available, Assigned)
                | (Available, Cancelled)
                | (Assigned, InTransit)
                | (Assigned, Available)
                | (Assigned, Cancelled)
                | (InTransit, Delivered)
                | (InTransit, Cancelled)
                | (Delivered, Completed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LoadStatus::Completed | LoadStatus::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Load {
    pub id: LoadId,
    pub pickup: Stop,
    pub delivery: Stop,
    pub weight_lbs: f64,
    pub required_equipment: EquipmentType,
    pub status: LoadStatus,
    /// Set exactly once on the AVAILABLE → ASSIGNED transition.
    pub assigned_driver: Option<DriverId>,
    /// Opaque region tag used by repository and job-store indexes.
    pub region: Option<String>,
}

impl Load {
    /// Great-circle haul length in miles.
    pub fn haul_distance_mi(&self) -> f64 {
        crate::geo::distance_mi(self.pickup.location, self.delivery.location)
    }
}

/// Read access to the driver pool. Any store honoring these queries is
/// admissible.
pub trait DriverRepository: Send + Sync {
    fn get(&self, id: &DriverId) -> EngineResult<Option<Driver>>;
    fn all(&self) -> EngineResult<Vec<Driver>>;
    /// Drivers with driving time left, optionally restricted to a region tag.
    fn available(&self, region: Option<&str>) -> EngineResult<Vec<Driver>>;
    fn upsert(&self, driver: Driver) -> EngineResult<()>;
}

/// Read/write access to loads. Status mutations go through
/// [LoadRepository::transition] so the lifecycle table is enforced in one
/// place.
pub trait LoadRepository: Send + Sync {
    fn get(&self, id: &LoadId) -> EngineResult<Option<Load>>;
    fn all(&self) -> EngineResult<Vec<Load>>;
    fn with_status(&self, status: LoadStatus, region: Option<&str>) -> EngineResult<Vec<Load>>;
    fn upsert(&self, load: Load) -> EngineResult<()>;
    /// Apply a lifecycle transition; illegal moves are a Conflict. An
    /// `Available → Assigned` transition must carry the assigned driver.
    fn transition(
        &self,
        id: &LoadId,
        next: LoadStatus,
        assigned_driver: Option<DriverId>,
    ) -> EngineResult<Load>;
}

#[derive(Default)]
pub struct InMemoryDriverRepository {
    drivers: RwLock<HashMap<DriverId, Driver>>,
}

impl InMemoryDriverRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_drivers(drivers: impl IntoIterator<Item = Driver>) -> Self {
        let repo = Self::new();
        {
            let mut map = repo.drivers.write().expect("driver map poisoned");
            for d in drivers {
                map.insert(d.id.clone(), d);
            }
        }
        repo
    }
}

impl DriverRepository for InMemoryDriverRepository {
    fn get(&self, id: &DriverId) -> EngineResult<Option<Driver>> {
        let map = self
            .drivers
            .read()
            .map_err(|_| EngineError::Database("driver repository lock poisoned".into()))?;
        Ok(map.get(id).cloned())
    }

    fn all(&self) -> EngineResult<Vec<Driver>> {
        let map = self
            .drivers
            .read()
            .map_err(|_| EngineError::Database("driver repository lock poisoned".into()))?;
        let mut out: Vec<Driver> = map.values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    fn available(&self, region: Option<&str>) -> EngineResult<Vec<Driver>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|d| d.driving_minutes_remaining > 0.0)
            .filter(|d| match region {
                Some(r) => d.region.as_deref() == Some(r),
                None => true,
            })
            .collect())
    }

    fn upsert(&self, driver: Driver) -> EngineResult<()> {
        let mut map = self
            .drivers
            .write()
            .map_err(|_| EngineError::Database("driver repository lock poisoned".into()))?;
        map.insert(driver.id.clone(), driver);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryLoadRepository {
    loads: RwLock<HashMap<LoadId, Load>>,
}

impl InMemoryLoadRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_loads(loads: impl IntoIterator<Item = Load>) -> Self {
        let repo = Self::new();
        {
            let mut map = repo.loads.write().expect("load map poisoned");
            for l in loads {
                map.insert(l.id.clone(), l);
            }
        }
        repo
    }
}

impl LoadRepository for InMemoryLoadRepository {
    fn get(&self, id: &LoadId) -> EngineResult<Option<Load>> {
        let map = self
            .loads
            .read()
            .map_err(|_| EngineError::Database("load repository lock poisoned".into()))?;
        Ok(map.get(id).cloned())
    }

    fn all(&self) -> EngineResult<Vec<Load>> {
        let map = self
            .loads
            .read()
            .map_err(|_| EngineError::Database("load repository lock poisoned".into()))?;
        let mut out: Vec<Load> = map.values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    fn with_status(&self, status: LoadStatus, region: Option<&str>) -> EngineResult<Vec<Load>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|l| l.status == status)
            .filter(|l| match region {
                Some(r) => l.region.as_deref() == Some(r),
                None => true,
            })
            .collect())
    }

    fn upsert(&self, load: Load) -> EngineResult<()> {
        let mut map = self
            .loads
            .write()
            .map_err(|_| EngineError::Database("load repository lock poisoned".into()))?;
        map.insert(load.id.clone(), load);
        Ok(())
    }

    fn transition(
        &self,
        id: &LoadId,
        next: LoadStatus,
        assigned_driver: Option<DriverId>,
    ) -> EngineResult<Load> {
        let mut map = self
            .loads
            .write()
            .map_err(|_| EngineError::Database("load repository lock poisoned".into()))?;
        let load = map
            .get_mut(id)
            .ok_or_else(|| EngineError::not_found("load", id.0.clone()))?;
        if !load.status.can_transition_to(next) {
            return Err(EngineError::Conflict(format!(
                "load {} cannot move {:?} -> {:?}",
                id, load.status, next
            )));
        }
        if load.status == LoadStatus::Available && next == LoadStatus::Assigned {
            let driver = assigned_driver.ok_or_else(|| {
                EngineError::Validation(format!(
                    "assigning load {id} requires exactly one driver reference"
                ))
            })?;
            load.assigned_driver = Some(driver);
        }
        load.status = next;
        Ok(load.clone())
    }
}
