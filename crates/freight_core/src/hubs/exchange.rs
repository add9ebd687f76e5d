//! Exchange-point selection between two driver routes.
//!
//! Given two routes, candidate hubs are restricted to a disk around the
//! midpoint of the two route midpoints, filtered by per-route segment limits,
//! and ranked by total deviation from the original routes with small bonuses
//! for amenities and capacity.

use serde::{Deserialize, Serialize};

use crate::geo::{self, GeoPoint};

use super::{HubId, SmartHub};

/// Deviation credit per amenity a candidate hub offers, miles.
const AMENITY_BONUS_MI: f64 = 2.0;
/// Deviation credit per simultaneous-truck capacity slot, miles.
const CAPACITY_BONUS_MI: f64 = 0.1;

/// A point-to-point haul.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub origin: GeoPoint,
    pub destination: GeoPoint,
}

impl Route {
    pub fn new(origin: GeoPoint, destination: GeoPoint) -> Self {
        Self { origin, destination }
    }

    pub fn length_mi(&self) -> f64 {
        geo::distance_mi(self.origin, self.destination)
    }

    pub fn midpoint(&self) -> GeoPoint {
        geo::midpoint(self.origin, self.destination)
    }

    /// Total miles when detouring through `via`.
    pub fn via_mi(&self, via: GeoPoint) -> f64 {
        geo::distance_mi(self.origin, via) + geo::distance_mi(via, self.destination)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Candidate disk radius as a fraction of the average route length.
    pub corridor_fraction: f64,
    /// Per-route via-hub distance cap, miles.
    pub max_segment_distance_mi: f64,
    /// Per-route via-hub duration cap, hours.
    pub max_segment_duration_hours: f64,
    /// Duration estimator speed, mph.
    pub speed_mph: f64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            corridor_fraction: 0.20,
            max_segment_distance_mi: 500.0,
            max_segment_duration_hours: 8.0,
            speed_mph: 55.0,
        }
    }
}

/// A ranked exchange-point candidate. `rank_score` is deviation minus
/// bonuses; lower is better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeCandidate {
    pub hub_id: HubId,
    pub hub_name: String,
    pub location: GeoPoint,
    pub route1_via_mi: f64,
    pub route2_via_mi: f64,
    pub total_deviation_mi: f64,
    pub rank_score: f64,
}

/// Rank hubs as exchange points for the two routes, best first. Empty when
/// no hub sits in the candidate disk and survives the segment limits.
pub fn select_exchange_point(
    route1: Route,
    route2: Route,
    hubs: &[SmartHub],
    config: &ExchangeConfig,
) -> Vec<ExchangeCandidate> {
    let search_center = geo::midpoint(route1.midpoint(), route2.midpoint());
    let avg_len = (route1.length_mi() + route2.length_mi()) / 2.0;
    let search_radius = avg_len * config.corridor_fraction;
    let max_segment_mi = config
        .max_segment_distance_mi
        .min(config.max_segment_duration_hours * config.speed_mph);

    let mut candidates: Vec<ExchangeCandidate> = hubs
        .iter()
        .filter(|hub| hub.active)
        .filter(|hub| geo::distance_mi(hub.location, search_center) <= search_radius)
        .filter_map(|hub| {
            let via1 = route1.via_mi(hub.location);
            let via2 = route2.via_mi(hub.location);
            if via1 > max_segment_mi || via2 > max_segment_mi {
                return None;
            }
            let deviation = (via1 - route1.length_mi()) + (via2 - route2.length_mi());
            let bonus = hub.amenities.len() as f64 * AMENITY_BONUS_MI
                + hub.capacity as f64 * CAPACITY_BONUS_MI;
            Some(ExchangeCandidate {
                hub_id: hub.id,
                hub_name: hub.name.clone(),
                location: hub.location,
                route1_via_mi: via1,
                route2_via_mi: via2,
                total_deviation_mi: deviation,
                rank_score: deviation - bonus,
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        a.rank_score
            .partial_cmp(&b.rank_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hubs::test_fixtures::hub_at;
    use crate::hubs::Amenity;

    // Two crossing mid-length hauls around the Chicago/Indiana corridor.
    fn routes() -> (Route, Route) {
        let r1 = Route::new(GeoPoint::new(41.88, -87.63), GeoPoint::new(39.77, -86.16));
        let r2 = Route::new(GeoPoint::new(41.08, -85.14), GeoPoint::new(39.10, -87.40));
        (r1, r2)
    }

    #[test]
    fn picks_hub_nearest_both_corridors() {
        let (r1, r2) = routes();
        // Lafayette sits close to both corridors; Rockford is far north.
        let lafayette = hub_at("Lafayette", 40.42, -86.90);
        let rockford = hub_at("Rockford", 42.27, -89.09);
        let ranked = select_exchange_point(
            r1,
            r2,
            &[rockford, lafayette.clone()],
            &ExchangeConfig::default(),
        );
        assert!(!ranked.is_empty());
        assert_eq!(ranked[0].hub_id, lafayette.id);
    }

    #[test]
    fn hubs_outside_search_disk_excluded() {
        let (r1, r2) = routes();
        let far = hub_at("Denver", 39.74, -104.99);
        let ranked = select_exchange_point(r1, r2, &[far], &ExchangeConfig::default());
        assert!(ranked.is_empty());
    }

    #[test]
    fn segment_limit_rejects_long_detours() {
        let (r1, r2) = routes();
        let hub = hub_at("Near Center", 40.45, -86.80);
        let tight = ExchangeConfig {
            max_segment_distance_mi: 100.0,
            ..Default::default()
        };
        assert!(select_exchange_point(r1, r2, &[hub.clone()], &tight).is_empty());
        // Duration cap binds the same way: 1 h at 55 mph is 55 mi.
        let slow = ExchangeConfig {
            max_segment_duration_hours: 1.0,
            ..Default::default()
        };
        assert!(select_exchange_point(r1, r2, &[hub], &slow).is_empty());
    }

    #[test]
    fn amenity_bonus_breaks_near_ties() {
        let (r1, r2) = routes();
        let mut rich = hub_at("Rich", 40.42, -86.90);
        rich.amenities = [
            Amenity::Parking,
            Amenity::Fuel,
            Amenity::Food,
            Amenity::Shower,
            Amenity::Maintenance,
            Amenity::Lodging,
        ]
        .into_iter()
        .collect();
        let mut bare = hub_at("Bare", 40.43, -86.91);
        bare.amenities.clear();

        let ranked =
            select_exchange_point(r1, r2, &[bare, rich.clone()], &ExchangeConfig::default());
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].hub_id, rich.id);
    }

    #[test]
    fn inactive_hubs_never_selected() {
        let (r1, r2) = routes();
        let mut hub = hub_at("Closed", 40.42, -86.90);
        hub.active = false;
        assert!(select_exchange_point(r1, r2, &[hub], &ExchangeConfig::default()).is_empty());
    }
}
