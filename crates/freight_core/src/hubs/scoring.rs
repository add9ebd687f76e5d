//! Hub scoring against network state.
//!
//! A hub's value is a weighted sum of traffic density near the site, how well
//! it sits on historical route patterns, spacing from other hubs, amenity
//! coverage, and empty-miles reduction potential, normalized to [0, 100].

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::geo::{self, DistanceUnit, GeoPoint};

use super::{Amenity, SmartHub, MIN_HUB_DISTANCE_MILES};

/// Radius used when counting truck traffic near a hub, miles.
const TRAFFIC_RADIUS_MI: f64 = 25.0;
/// A route "passes" a hub when it comes within this distance, miles.
const ROUTE_MATCH_RADIUS_MI: f64 = 10.0;

/// Per-amenity contribution to the coverage component. Defaults sum to 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmenityWeights {
    pub parking: f64,
    pub restrooms: f64,
    pub food: f64,
    pub fuel: f64,
    pub maintenance: f64,
    pub shower: f64,
    pub lodging: f64,
    pub security: f64,
}

impl Default for AmenityWeights {
    fn default() -> Self {
        Self {
            parking: 0.20,
            restrooms: 0.15,
            food: 0.15,
            fuel: 0.20,
            maintenance: 0.10,
            shower: 0.10,
            lodging: 0.05,
            security: 0.05,
        }
    }
}

impl AmenityWeights {
    pub fn weight(&self, amenity: Amenity) -> f64 {
        match amenity {
            Amenity::Parking => self.parking,
            Amenity::Restrooms => self.restrooms,
            Amenity::Food => self.food,
            Amenity::Fuel => self.fuel,
            Amenity::Maintenance => self.maintenance,
            Amenity::Shower => self.shower,
            Amenity::Lodging => self.lodging,
            Amenity::Security => self.security,
        }
    }

    /// Sum of weights over the amenities present.
    pub fn coverage(&self, amenities: &BTreeSet<Amenity>) -> f64 {
        amenities.iter().map(|a| self.weight(*a)).sum()
    }
}

/// Relative weight of each scoring component. Defaults sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HubScoreWeights {
    pub traffic: f64,
    pub route_match: f64,
    pub proximity: f64,
    pub amenities: f64,
    pub empty_miles: f64,
}

impl Default for HubScoreWeights {
    fn default() -> Self {
        Self {
            traffic: 0.25,
            route_match: 0.25,
            proximity: 0.15,
            amenities: 0.15,
            empty_miles: 0.20,
        }
    }
}

/// Snapshot of network activity a hub is scored against.
#[derive(Debug, Clone, Default)]
pub struct NetworkState {
    /// Recent truck position fixes.
    pub truck_positions: Vec<GeoPoint>,
    /// Historical route polylines.
    pub routes: Vec<Vec<GeoPoint>>,
    /// Other hubs in the catalogue (the scored hub itself is skipped by id).
    pub existing_hubs: Vec<SmartHub>,
}

/// Minimum great-circle distance from a point to a polyline, miles.
fn distance_to_route_mi(point: GeoPoint, route: &[GeoPoint]) -> f64 {
    match route.len() {
        0 => f64::INFINITY,
        1 => geo::distance_mi(point, route[0]),
        _ => route
            .windows(2)
            .map(|seg| geo::point_to_segment_distance(point, seg[0], seg[1], DistanceUnit::Miles))
            .fold(f64::INFINITY, f64::min),
    }
}

/// Score a hub against the network, [0, 100].
pub fn score_hub(
    hub: &SmartHub,
    state: &NetworkState,
    weights: &HubScoreWeights,
    amenity_weights: &AmenityWeights,
) -> f64 {
    let traffic = if state.truck_positions.is_empty() {
        0.0
    } else {
        let near = state
            .truck_positions
            .iter()
            .filter(|p| geo::distance_mi(hub.location, **p) <= TRAFFIC_RADIUS_MI)
            .count();
        near as f64 / state.truck_positions.len() as f64
    };

    let route_match = if state.routes.is_empty() {
        0.0
    } else {
        let passing = state
            .routes
            .iter()
            .filter(|r| distance_to_route_mi(hub.location, r) <= ROUTE_MATCH_RADIUS_MI)
            .count();
        passing as f64 / state.routes.len() as f64
    };

    // Spacing: full marks at or beyond the discovery exclusion radius,
    // linearly penalized when crowding an existing hub.
    let proximity = state
        .existing_hubs
        .iter()
        .filter(|h| h.active && h.id != hub.id)
        .map(|h| geo::distance_mi(hub.location, h.location))
        .fold(f64::INFINITY, f64::min);
    let proximity = if proximity.is_finite() {
        (proximity / MIN_HUB_DISTANCE_MILES).clamp(0.0, 1.0)
    } else {
        1.0
    };

    let amenities = amenity_weights.coverage(&hub.amenities).clamp(0.0, 1.0);

    // Empty-miles reduction potential: traffic that both concentrates near
    // the site and rides historical lanes is traffic an exchange can shorten.
    let empty_miles = traffic * route_match;

    let score = traffic * weights.traffic
        + route_match * weights.route_match
        + proximity * weights.proximity
        + amenities * weights.amenities
        + empty_miles * weights.empty_miles;
    let total_weight = weights.traffic
        + weights.route_match
        + weights.proximity
        + weights.amenities
        + weights.empty_miles;
    if total_weight <= 0.0 {
        return 0.0;
    }
    (score / total_weight * 100.0).clamp(0.0, 100.0)
}
