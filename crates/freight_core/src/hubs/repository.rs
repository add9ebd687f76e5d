//! Hub catalogue: CRUD behind a trait, nearest-neighbor queries through the
//! spatial bucket index.
//!
//! Reads dominate; the in-memory implementation keeps hubs and the index
//! under one `RwLock` so index rebuilds on mutation are exclusive and rare.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::geo::{DistanceUnit, GeoPoint};
use crate::spatial::GeoBucketIndex;

use super::{Amenity, FacilityType, HubId, HubOptimizationMetrics, SmartHub};

/// Filters applied to nearest-neighbor queries. Empty filters match all
/// active hubs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HubFilters {
    pub facility_types: Option<Vec<FacilityType>>,
    pub required_amenities: BTreeSet<Amenity>,
    pub min_capacity: Option<u32>,
}

impl HubFilters {
    pub fn matches(&self, hub: &SmartHub) -> bool {
        if let Some(types) = &self.facility_types {
            if !types.contains(&hub.facility_type) {
                return false;
            }
        }
        if !self.required_amenities.is_subset(&hub.amenities) {
            return false;
        }
        if let Some(min) = self.min_capacity {
            if hub.capacity < min {
                return false;
            }
        }
        true
    }
}

/// Partial update applied by [HubRepository::patch]. `None` fields are left
/// untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HubPatch {
    pub name: Option<String>,
    pub facility_type: Option<FacilityType>,
    pub location: Option<GeoPoint>,
    pub amenities: Option<BTreeSet<Amenity>>,
    pub capacity: Option<u32>,
    pub efficiency_score: Option<f64>,
}

/// Persisted hub catalogue. Deletion is soft: `active` flips false and the
/// hub drops out of spatial queries.
pub trait HubRepository: Send + Sync {
    fn create(&self, hub: SmartHub) -> EngineResult<HubId>;
    fn get(&self, id: HubId) -> EngineResult<Option<SmartHub>>;
    fn patch(&self, id: HubId, patch: HubPatch) -> EngineResult<SmartHub>;
    fn deactivate(&self, id: HubId) -> EngineResult<()>;
    fn all_active(&self) -> EngineResult<Vec<SmartHub>>;
    /// Active hubs within `radius_mi`, matching `filters`, sorted ascending
    /// by great-circle distance. No hub within the radius is omitted.
    fn find_near(
        &self,
        center: GeoPoint,
        radius_mi: f64,
        filters: &HubFilters,
    ) -> EngineResult<Vec<(SmartHub, f64)>>;
    /// Replace the derived optimization metrics after an identification run.
    fn update_metrics(&self, id: HubId, metrics: HubOptimizationMetrics) -> EngineResult<()>;
}

struct Inner {
    hubs: HashMap<HubId, SmartHub>,
    index: GeoBucketIndex<HubId>,
}

pub struct InMemoryHubRepository {
    inner: RwLock<Inner>,
}

impl Default for InMemoryHubRepository {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Inner {
                hubs: HashMap::new(),
                index: GeoBucketIndex::new(),
            }),
        }
    }
}

impl InMemoryHubRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hubs(hubs: impl IntoIterator<Item = SmartHub>) -> EngineResult<Self> {
        let repo = Self::new();
        for hub in hubs {
            repo.create(hub)?;
        }
        Ok(repo)
    }

    fn read(&self) -> EngineResult<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| EngineError::Database("hub repository lock poisoned".into()))
    }

    fn write(&self) -> EngineResult<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| EngineError::Database("hub repository lock poisoned".into()))
    }
}

impl HubRepository for InMemoryHubRepository {
    fn create(&self, hub: SmartHub) -> EngineResult<HubId> {
        hub.validate()?;
        let mut inner = self.write()?;
        if inner.hubs.contains_key(&hub.id) {
            return Err(EngineError::Conflict(format!("hub {} already exists", hub.id)));
        }
        let id = hub.id;
        if hub.active {
            inner.index.insert(id, hub.location)?;
        }
        inner.hubs.insert(id, hub);
        Ok(id)
    }

    fn get(&self, id: HubId) -> EngineResult<Option<SmartHub>> {
        Ok(self.read()?.hubs.get(&id).cloned())
    }

    fn patch(&self, id: HubId, patch: HubPatch) -> EngineResult<SmartHub> {
        let mut inner = self.write()?;
        let hub = inner
            .hubs
            .get(&id)
            .ok_or_else(|| EngineError::not_found("hub", id.to_string()))?;

        let mut updated = hub.clone();
        if let Some(name) = patch.name {
            updated.name = name;
        }
        if let Some(facility_type) = patch.facility_type {
            updated.facility_type = facility_type;
        }
        if let Some(location) = patch.location {
            updated.location = location;
        }
        if let Some(amenities) = patch.amenities {
            updated.amenities = amenities;
        }
        if let Some(capacity) = patch.capacity {
            updated.capacity = capacity;
        }
        if let Some(score) = patch.efficiency_score {
            updated.efficiency_score = score;
        }
        updated.validate()?;

        if updated.active {
            inner.index.insert(id, updated.location)?;
        }
        inner.hubs.insert(id, updated.clone());
        Ok(updated)
    }

    fn deactivate(&self, id: HubId) -> EngineResult<()> {
        let mut inner = self.write()?;
        let hub = inner
            .hubs
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("hub", id.to_string()))?;
        hub.active = false;
        inner.index.remove(&id);
        Ok(())
    }

    fn all_active(&self) -> EngineResult<Vec<SmartHub>> {
        let inner = self.read()?;
        let mut hubs: Vec<SmartHub> = inner.hubs.values().filter(|h| h.active).cloned().collect();
        hubs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(hubs)
    }

    fn find_near(
        &self,
        center: GeoPoint,
        radius_mi: f64,
        filters: &HubFilters,
    ) -> EngineResult<Vec<(SmartHub, f64)>> {
        let inner = self.read()?;
        let hits = inner.index.radius_query(center, radius_mi, DistanceUnit::Miles)?;
        let mut out = Vec::with_capacity(hits.len());
        for (id, dist) in hits {
            let Some(hub) = inner.hubs.get(&id) else {
                continue;
            };
            if hub.active && filters.matches(hub) {
                out.push((hub.clone(), dist));
            }
        }
        Ok(out)
    }

    fn update_metrics(&self, id: HubId, metrics: HubOptimizationMetrics) -> EngineResult<()> {
        let mut inner = self.write()?;
        let hub = inner
            .hubs
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("hub", id.to_string()))?;
        hub.optimization_metrics = metrics;
        Ok(())
    }
}
