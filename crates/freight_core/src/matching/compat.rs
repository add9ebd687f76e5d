//! Pair compatibility and efficiency scoring.
//!
//! Hard constraints (equipment, hours, time windows, hard preferences)
//! remove a pairing entirely; soft preferences are priced into the weight.

use chrono::{DateTime, Duration, Utc};

use crate::domain::{Driver, Load};
use crate::geo;

use super::types::{MatchingWeights, PairScore};

/// Loaded distance at which a pairing's network contribution saturates.
const NETWORK_SCALE_MI: f64 = 500.0;

/// Deadhead and loaded legs for one pairing, miles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairGeometry {
    pub empty_mi: f64,
    pub loaded_mi: f64,
}

pub fn pair_geometry(driver: &Driver, load: &Load) -> PairGeometry {
    PairGeometry {
        empty_mi: geo::distance_mi(driver.position.point, load.pickup.location),
        loaded_mi: geo::distance_mi(load.pickup.location, load.delivery.location),
    }
}

/// Minutes to reach pickup and deliver at the given speed.
pub fn required_minutes(geometry: PairGeometry, speed_mph: f64) -> f64 {
    (geometry.empty_mi + geometry.loaded_mi) / speed_mph.max(1.0) * 60.0
}

/// Why a pairing was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Incompatibility {
    Equipment,
    Hours,
    TimeWindow,
    HardPreference,
}

/// Apply the hard constraints to one pairing. Returns the geometry on
/// success so scoring does not recompute it.
pub fn check_pair(
    driver: &Driver,
    load: &Load,
    speed_mph: f64,
    now: DateTime<Utc>,
) -> Result<PairGeometry, Incompatibility> {
    if driver.equipment != load.required_equipment {
        return Err(Incompatibility::Equipment);
    }
    if let Some(region) = &load.region {
        if driver.preferences.excluded_regions.contains(region) {
            return Err(Incompatibility::HardPreference);
        }
    }

    let geometry = pair_geometry(driver, load);
    if driver.driving_minutes_remaining < required_minutes(geometry, speed_mph) {
        return Err(Incompatibility::Hours);
    }

    let speed = speed_mph.max(1.0);
    let to_pickup = minutes(geometry.empty_mi / speed * 60.0);
    let pickup_arrival = now + to_pickup;
    if pickup_arrival >= load.pickup.window.latest {
        return Err(Incompatibility::TimeWindow);
    }
    let departure = pickup_arrival.max(load.pickup.window.earliest);
    let to_delivery = minutes(geometry.loaded_mi / speed * 60.0);
    if departure + to_delivery >= load.delivery.window.latest {
        return Err(Incompatibility::TimeWindow);
    }

    Ok(geometry)
}

fn minutes(m: f64) -> Duration {
    Duration::seconds((m * 60.0) as i64)
}

/// Efficiency weight for a feasible pairing.
///
/// `w = (1 − empty/(empty+loaded))·W_empty + network·W_net + pref·W_pref +
/// hos_headroom·W_hos`, normalized by the weight sum and scaled to [0, 100].
pub fn score_pair(
    driver: &Driver,
    load: &Load,
    geometry: PairGeometry,
    weights: &MatchingWeights,
    speed_mph: f64,
) -> PairScore {
    let total_mi = geometry.empty_mi + geometry.loaded_mi;
    let empty_ratio = if total_mi > 0.0 {
        geometry.empty_mi / total_mi
    } else {
        0.0
    };
    let empty_component = 1.0 - empty_ratio;

    let network_component = (geometry.loaded_mi / NETWORK_SCALE_MI).clamp(0.0, 1.0);

    let preference_component = match &load.region {
        Some(region) if driver.preferences.preferred_regions.contains(region) => 1.0,
        _ => 0.0,
    };

    let required = required_minutes(geometry, speed_mph);
    let hos_component = if driver.driving_minutes_remaining > 0.0 {
        ((driver.driving_minutes_remaining - required) / driver.driving_minutes_remaining)
            .clamp(0.0, 1.0)
    } else {
        0.0
    };

    let weight_sum = weights.total();
    let total = if weight_sum > 0.0 {
        (empty_component * weights.empty_miles
            + network_component * weights.network
            + preference_component * weights.preference
            + hos_component * weights.hos)
            / weight_sum
            * 100.0
    } else {
        0.0
    };

    PairScore {
        total,
        empty_ratio,
        empty_component,
        network_component,
        preference_component,
        hos_component,
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::TimeZone;

    use crate::domain::{
        Driver, DriverId, DriverPreferences, EquipmentType, Load, LoadId, LoadStatus, Position,
        PositionSource, Stop, TimeWindow,
    };
    use crate::geo::GeoPoint;

    use super::*;

    pub fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap()
    }

    pub fn window(hours_from: i64, hours_to: i64) -> TimeWindow {
        TimeWindow::new(
            epoch() + Duration::hours(hours_from),
            epoch() + Duration::hours(hours_to),
        )
        .expect("window")
    }

    pub fn driver(id: &str, lat: f64, lon: f64) -> Driver {
        Driver {
            id: DriverId::new(id),
            position: Position {
                point: GeoPoint::new(lat, lon),
                heading: 0.0,
                speed: 0.0,
                accuracy: 5.0,
                timestamp: epoch(),
                source: PositionSource::Gps,
            },
            home_base: GeoPoint::new(lat - 0.1, lon - 0.1),
            driving_minutes_remaining: 600.0,
            preferences: DriverPreferences::default(),
            equipment: EquipmentType::DryVan,
            region: None,
        }
    }

    pub fn load(id: &str, pickup: GeoPoint, delivery: GeoPoint) -> Load {
        Load {
            id: LoadId::new(id),
            pickup: Stop { location: pickup, window: window(1, 6) },
            delivery: Stop { location: delivery, window: window(2, 24) },
            weight_lbs: 30_000.0,
            required_equipment: EquipmentType::DryVan,
            status: LoadStatus::Available,
            assigned_driver: None,
            region: None,
        }
    }
}
