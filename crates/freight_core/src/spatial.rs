//! Spatial bucket index: H3 cells as the 2D pre-filter for radius queries.
//!
//! Keys (hub ids in practice) are bucketed by the H3 cell containing their
//! location at a coarse resolution. A radius query widens to a `grid_disk`
//! large enough to cover the radius plus a guard ring, unions the buckets,
//! then post-filters by great-circle distance, so no entry within the radius
//! is ever omitted.

use std::collections::HashMap;
use std::hash::Hash;

use h3o::{CellIndex, LatLng, Resolution};

use crate::error::{EngineError, EngineResult};
use crate::geo::{self, DistanceUnit, GeoPoint};

/// Bucket resolution. Res 4 cells have ~22.6 km average edge length, coarse
/// enough that corridor-scale queries touch a few thousand cells at most.
const BUCKET_RESOLUTION: Resolution = Resolution::Four;

/// Average hex edge length at [BUCKET_RESOLUTION], kilometers.
const BUCKET_EDGE_KM: f64 = 22.6;

fn cell_for(point: GeoPoint) -> EngineResult<CellIndex> {
    let latlng = LatLng::new(point.lat, point.lon)
        .map_err(|e| EngineError::Validation(format!("invalid coordinates {point:?}: {e}")))?;
    Ok(latlng.to_cell(BUCKET_RESOLUTION))
}

/// In-memory spatial index over arbitrary keys. Not internally synchronized;
/// the owning repository takes an exclusive lock for the (rare) rebuilds and
/// a shared lock for queries.
#[derive(Debug, Clone)]
pub struct GeoBucketIndex<K> {
    buckets: HashMap<CellIndex, Vec<K>>,
    positions: HashMap<K, (CellIndex, GeoPoint)>,
}

impl<K> Default for GeoBucketIndex<K> {
    fn default() -> Self {
        Self {
            buckets: HashMap::new(),
            positions: HashMap::new(),
        }
    }
}

impl<K: Clone + Eq + Hash> GeoBucketIndex<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Insert or move a key. Re-inserting under a new location rebuckets it.
    pub fn insert(&mut self, key: K, point: GeoPoint) -> EngineResult<()> {
        let cell = cell_for(point)?;
        if let Some((old_cell, _)) = self.positions.insert(key.clone(), (cell, point)) {
            if old_cell != cell {
                self.remove_from_bucket(&key, old_cell);
            } else {
                // Same bucket, position refreshed; bucket membership unchanged.
                return Ok(());
            }
        }
        self.buckets.entry(cell).or_default().push(key);
        Ok(())
    }

    pub fn remove(&mut self, key: &K) {
        if let Some((cell, _)) = self.positions.remove(key) {
            self.remove_from_bucket(key, cell);
        }
    }

    fn remove_from_bucket(&mut self, key: &K, cell: CellIndex) {
        if let Some(bucket) = self.buckets.get_mut(&cell) {
            bucket.retain(|k| k != key);
            if bucket.is_empty() {
                self.buckets.remove(&cell);
            }
        }
    }

    pub fn position_of(&self, key: &K) -> Option<GeoPoint> {
        self.positions.get(key).map(|(_, p)| *p)
    }

    /// All keys within `radius` of `center`, sorted ascending by distance.
    /// Distances in the result are in the query unit.
    pub fn radius_query(
        &self,
        center: GeoPoint,
        radius: f64,
        unit: DistanceUnit,
    ) -> EngineResult<Vec<(K, f64)>> {
        if radius < 0.0 {
            return Err(EngineError::Validation(format!(
                "radius must be non-negative, got {radius}"
            )));
        }
        let radius_km = match unit {
            DistanceUnit::Kilometers => radius,
            DistanceUnit::Miles => geo::mi_to_km(radius),
        };
        let origin = cell_for(center)?;
        // Guard ring: +1 covers entries whose cell center is outside the disk
        // while the entry itself is inside.
        let k = (radius_km / BUCKET_EDGE_KM).ceil() as u32 + 1;
        let mut hits: Vec<(K, f64)> = Vec::new();
        for cell in origin.grid_disk::<Vec<_>>(k) {
            let Some(bucket) = self.buckets.get(&cell) else {
                continue;
            };
            for key in bucket {
                let (_, point) = &self.positions[key];
                let d = geo::distance(center, *point, unit);
                if d <= radius {
                    hits.push((key.clone(), d));
                }
            }
        }
        hits.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(hits)
    }
}
