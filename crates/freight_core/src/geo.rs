//! Geo primitives: great-circle distance, bearings, and polygon operations.
//!
//! All functions operate on latitude/longitude in degrees over the WGS-84
//! mean sphere and are deterministic and allocation-light. Distances come in
//! kilometers or statute miles via [DistanceUnit].

use serde::{Deserialize, Serialize};

/// WGS-84 mean earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;
/// WGS-84 mean earth radius in statute miles.
pub const EARTH_RADIUS_MI: f64 = 3958.8;

/// A geographic point in degrees. Latitude is positive north, longitude
/// positive east.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// True when latitude is within [-90, 90] and longitude within [-180, 180].
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Unit for distance results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceUnit {
    Kilometers,
    Miles,
}

impl DistanceUnit {
    /// Earth radius expressed in this unit.
    pub fn earth_radius(&self) -> f64 {
        match self {
            DistanceUnit::Kilometers => EARTH_RADIUS_KM,
            DistanceUnit::Miles => EARTH_RADIUS_MI,
        }
    }
}

/// Convert statute miles to kilometers.
pub fn mi_to_km(mi: f64) -> f64 {
    mi * (EARTH_RADIUS_KM / EARTH_RADIUS_MI)
}

/// Convert kilometers to statute miles.
pub fn km_to_mi(km: f64) -> f64 {
    km * (EARTH_RADIUS_MI / EARTH_RADIUS_KM)
}

/// Great-circle haversine distance between two points.
pub fn distance(a: GeoPoint, b: GeoPoint, unit: DistanceUnit) -> f64 {
    let (lat1, lon1) = (a.lat.to_radians(), a.lon.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lon.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    unit.earth_radius() * c
}

/// Distance in kilometers.
pub fn distance_km(a: GeoPoint, b: GeoPoint) -> f64 {
    distance(a, b, DistanceUnit::Kilometers)
}

/// Distance in statute miles.
pub fn distance_mi(a: GeoPoint, b: GeoPoint) -> f64 {
    distance(a, b, DistanceUnit::Miles)
}

/// Forward azimuth from `a` to `b`, normalized to [0, 360) degrees.
pub fn bearing(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lon1) = (a.lat.to_radians(), a.lon.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lon.to_radians());
    let dlon = lon2 - lon1;
    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    let theta = y.atan2(x).to_degrees();
    (theta + 360.0) % 360.0
}

/// Spherical midpoint of the great-circle segment from `a` to `b`.
pub fn midpoint(a: GeoPoint, b: GeoPoint) -> GeoPoint {
    let (lat1, lon1) = (a.lat.to_radians(), a.lon.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lon.to_radians());
    let dlon = lon2 - lon1;
    let bx = lat2.cos() * dlon.cos();
    let by = lat2.cos() * dlon.sin();
    let lat_m = (lat1.sin() + lat2.sin())
        .atan2(((lat1.cos() + bx) * (lat1.cos() + bx) + by * by).sqrt());
    let lon_m = lon1 + by.atan2(lat1.cos() + bx);
    GeoPoint::new(lat_m.to_degrees(), normalize_lon(lon_m.to_degrees()))
}

/// Destination point after traveling `dist` along `bearing_deg` from `origin`.
pub fn destination(origin: GeoPoint, bearing_deg: f64, dist: f64, unit: DistanceUnit) -> GeoPoint {
    let delta = dist / unit.earth_radius();
    let theta = bearing_deg.to_radians();
    let lat1 = origin.lat.to_radians();
    let lon1 = origin.lon.to_radians();
    let lat2 = (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * theta.cos()).asin();
    let lon2 = lon1
        + (theta.sin() * delta.sin() * lat1.cos()).atan2(delta.cos() - lat1.sin() * lat2.sin());
    GeoPoint::new(lat2.to_degrees(), normalize_lon(lon2.to_degrees()))
}

fn normalize_lon(lon: f64) -> f64 {
    let mut l = (lon + 180.0) % 360.0;
    if l < 0.0 {
        l += 360.0;
    }
    l - 180.0
}

/// Axis-aligned bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn contains(&self, p: GeoPoint) -> bool {
        p.lat >= self.min_lat
            && p.lat <= self.max_lat
            && p.lon >= self.min_lon
            && p.lon <= self.max_lon
    }

    /// Grow the box by the given padding in degrees on every side.
    pub fn padded(&self, degrees: f64) -> Self {
        Self {
            min_lat: self.min_lat - degrees,
            max_lat: self.max_lat + degrees,
            min_lon: self.min_lon - degrees,
            max_lon: self.max_lon + degrees,
        }
    }

    /// Smallest box covering both `self` and `other`.
    pub fn union(&self, other: &BoundingBox) -> Self {
        Self {
            min_lat: self.min_lat.min(other.min_lat),
            max_lat: self.max_lat.max(other.max_lat),
            min_lon: self.min_lon.min(other.min_lon),
            max_lon: self.max_lon.max(other.max_lon),
        }
    }

    /// Width × height in degrees² (used as a crude area proxy for density).
    pub fn degree_area(&self) -> f64 {
        (self.max_lat - self.min_lat).max(0.0) * (self.max_lon - self.min_lon).max(0.0)
    }
}

/// Bounding box around `center` with the given radius.
///
/// Latitude delta is `radius / R · 180/π`; the longitude delta is the same
/// divided by `cos(lat)` so the box stays correct away from the equator.
/// Longitude shrink is clamped near the poles.
pub fn bounding_box(center: GeoPoint, radius: f64, unit: DistanceUnit) -> BoundingBox {
    let lat_delta = radius / unit.earth_radius() * (180.0 / std::f64::consts::PI);
    let cos_lat = center.lat.to_radians().cos().max(1e-6);
    let lon_delta = lat_delta / cos_lat;
    BoundingBox {
        min_lat: center.lat - lat_delta,
        max_lat: center.lat + lat_delta,
        min_lon: center.lon - lon_delta,
        max_lon: center.lon + lon_delta,
    }
}

/// Ray-casting point-in-polygon test.
///
/// The polygon is a sequence of vertices and is treated as closed; the first
/// vertex does not need to be repeated. Odd edge crossings mean inside.
/// Points exactly on an edge or vertex resolve consistently per the crossing
/// count but are not otherwise special-cased.
pub fn point_in_polygon(p: GeoPoint, polygon: &[GeoPoint]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let a = polygon[i];
        let b = polygon[j];
        let crosses = (a.lat > p.lat) != (b.lat > p.lat);
        if crosses {
            let x = (b.lon - a.lon) * (p.lat - a.lat) / (b.lat - a.lat) + a.lon;
            if p.lon < x {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Distance from `p` to the great-circle segment `a`→`b`.
///
/// Projects into a local tangent plane anchored at `a`, clamps the projection
/// parameter to [0, 1], and returns the great-circle distance to the clamped
/// foot point.
pub fn point_to_segment_distance(p: GeoPoint, a: GeoPoint, b: GeoPoint, unit: DistanceUnit) -> f64 {
    let r = unit.earth_radius();
    let cos_lat = a.lat.to_radians().cos();
    // Local east/north coordinates (unit distance) around `a`.
    let to_xy = |q: GeoPoint| {
        (
            (q.lon - a.lon).to_radians() * cos_lat * r,
            (q.lat - a.lat).to_radians() * r,
        )
    };
    let (px, py) = to_xy(p);
    let (bx, by) = to_xy(b);
    let seg_len_sq = bx * bx + by * by;
    let t = if seg_len_sq <= f64::EPSILON {
        0.0
    } else {
        ((px * bx + py * by) / seg_len_sq).clamp(0.0, 1.0)
    };
    let foot = GeoPoint::new(
        a.lat + (b.lat - a.lat) * t,
        a.lon + (b.lon - a.lon) * t,
    );
    distance(p, foot, unit)
}

/// Approximate a circle as a polygon by sampling bearings uniformly over
/// 0..360 degrees. `n_points` of 3 or more are required for a usable ring.
pub fn circle_polygon(center: GeoPoint, radius: f64, unit: DistanceUnit, n_points: usize) -> Vec<GeoPoint> {
    let n = n_points.max(3);
    (0..n)
        .map(|i| {
            let theta = 360.0 * (i as f64) / (n as f64);
            destination(center, theta, radius, unit)
        })
        .collect()
}

/// Geodesic polygon area in square units (km² or mi²).
///
/// Spherical-excess form: `|Σ (λ₂−λ₁)·(2 + sin φ₁ + sin φ₂)| · R²/2` over the
/// closed ring, which stays accurate for the region-scale polygons the engine
/// works with.
pub fn polygon_area(polygon: &[GeoPoint], unit: DistanceUnit) -> f64 {
    if polygon.len() < 3 {
        return 0.0;
    }
    let r = unit.earth_radius();
    let mut total = 0.0;
    for i in 0..polygon.len() {
        let a = polygon[i];
        let b = polygon[(i + 1) % polygon.len()];
        let lon1 = a.lon.to_radians();
        let lon2 = b.lon.to_radians();
        let lat1 = a.lat.to_radians();
        let lat2 = b.lat.to_radians();
        total += (lon2 - lon1) * (2.0 + lat1.sin() + lat2.sin());
    }
    (total * r * r / 2.0).abs()
}

/// Area-weighted centroid of a polygon via the shoelace formula in the
/// lat/lon plane. Falls back to the vertex mean when the signed area is
/// degenerate (collinear ring).
pub fn polygon_centroid(polygon: &[GeoPoint]) -> Option<GeoPoint> {
    if polygon.is_empty() {
        return None;
    }
    if polygon.len() < 3 {
        let (lat, lon) = polygon
            .iter()
            .fold((0.0, 0.0), |(la, lo), p| (la + p.lat, lo + p.lon));
        let n = polygon.len() as f64;
        return Some(GeoPoint::new(lat / n, lon / n));
    }
    let mut signed_area = 0.0;
    let mut cx = 0.0;
    let mut cy = 0.0;
    for i in 0..polygon.len() {
        let a = polygon[i];
        let b = polygon[(i + 1) % polygon.len()];
        let cross = a.lon * b.lat - b.lon * a.lat;
        signed_area += cross;
        cx += (a.lon + b.lon) * cross;
        cy += (a.lat + b.lat) * cross;
    }
    if signed_area.abs() < 1e-12 {
        let (lat, lon) = polygon
            .iter()
            .fold((0.0, 0.0), |(la, lo), p| (la + p.lat, lo + p.lon));
        let n = polygon.len() as f64;
        return Some(GeoPoint::new(lat / n, lon / n));
    }
    let factor = 1.0 / (3.0 * signed_area);
    Some(GeoPoint::new(cy * factor, cx * factor))
}

/// Douglas–Peucker polyline simplification.
///
/// `tolerance` is the maximum allowed perpendicular deviation, in the given
/// unit, of a dropped point from the simplified line. Endpoints are always
/// kept.
pub fn simplify_polyline(points: &[GeoPoint], tolerance: f64, unit: DistanceUnit) -> Vec<GeoPoint> {
    if points.len() <= 2 {
        return points.to_vec();
    }
    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[points.len() - 1] = true;
    douglas_peucker(points, 0, points.len() - 1, tolerance, unit, &mut keep);
    points
        .iter()
        .zip(keep.iter())
        .filter_map(|(p, k)| k.then_some(*p))
        .collect()
}

fn douglas_peucker(
    points: &[GeoPoint],
    first: usize,
    last: usize,
    tolerance: f64,
    unit: DistanceUnit,
    keep: &mut [bool],
) {
    if last <= first + 1 {
        return;
    }
    let mut max_dist = 0.0;
    let mut index = first;
    for i in (first + 1)..last {
        let d = point_to_segment_distance(points[i], points[first], points[last], unit);
        if d > max_dist {
            max_dist = d;
            index = i;
        }
    }
    if max_dist > tolerance {
        keep[index] = true;
        douglas_peucker(points, first, index, tolerance, unit, keep);
        douglas_peucker(points, index, last, tolerance, unit, keep);
    }
}
