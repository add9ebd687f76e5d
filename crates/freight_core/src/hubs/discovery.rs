//! Potential-hub discovery: DBSCAN over historical truck-route points.
//!
//! Clusters dense traffic regions, rejects sites too close to existing hubs,
//! and ranks the survivors by density and cluster size.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::geo::{self, DistanceUnit, GeoPoint};

use super::{SmartHub, MIN_HUB_DISTANCE_MILES};

/// DBSCAN parameters. The distance metric is great-circle miles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DbscanParams {
    /// Neighborhood radius ε in miles.
    pub epsilon_mi: f64,
    /// Minimum neighborhood size (including the point itself) for a core
    /// point. 1 makes every point a core point.
    pub min_points: usize,
}

impl Default for DbscanParams {
    fn default() -> Self {
        Self { epsilon_mi: 25.0, min_points: 5 }
    }
}

/// Density-based clustering with noise. Returns one label per input point:
/// `Some(cluster)` or `None` for noise. Cluster ids are dense from 0 in
/// discovery order.
pub fn dbscan(points: &[GeoPoint], params: &DbscanParams) -> Vec<Option<usize>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        Noise,
        Cluster(usize),
    }

    let mut marks = vec![Mark::Unvisited; points.len()];
    let mut next_cluster = 0usize;

    let neighbors = |i: usize| -> Vec<usize> {
        (0..points.len())
            .filter(|&j| geo::distance_mi(points[i], points[j]) <= params.epsilon_mi)
            .collect()
    };

    for i in 0..points.len() {
        if marks[i] != Mark::Unvisited {
            continue;
        }
        let seed = neighbors(i);
        if seed.len() < params.min_points {
            marks[i] = Mark::Noise;
            continue;
        }
        let cluster = next_cluster;
        next_cluster += 1;
        marks[i] = Mark::Cluster(cluster);

        // Expand: noise points reachable from a core point join the cluster
        // as border points; unvisited core points extend the frontier.
        let mut frontier = seed;
        let mut cursor = 0;
        while cursor < frontier.len() {
            let j = frontier[cursor];
            cursor += 1;
            match marks[j] {
                Mark::Noise => marks[j] = Mark::Cluster(cluster),
                Mark::Unvisited => {
                    marks[j] = Mark::Cluster(cluster);
                    let reachable = neighbors(j);
                    if reachable.len() >= params.min_points {
                        frontier.extend(reachable);
                    }
                }
                Mark::Cluster(_) => {}
            }
        }
    }

    marks
        .into_iter()
        .map(|m| match m {
            Mark::Cluster(c) => Some(c),
            _ => None,
        })
        .collect()
}

/// A candidate site produced by discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PotentialHub {
    pub centroid: GeoPoint,
    pub point_count: usize,
    /// Points per square mile over the 10 mi-radius box around the centroid.
    pub density: f64,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    pub cluster: DbscanParams,
    /// Exclusion radius around existing active hubs, miles.
    pub min_hub_distance_mi: f64,
    pub max_results: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            cluster: DbscanParams::default(),
            min_hub_distance_mi: MIN_HUB_DISTANCE_MILES,
            max_results: 10,
        }
    }
}

/// Radius of the density reference box around each centroid, miles.
const DENSITY_BOX_RADIUS_MI: f64 = 10.0;

/// Cluster historical route points into ranked potential hub sites.
pub fn discover_potential_hubs(
    route_points: &[GeoPoint],
    existing_hubs: &[SmartHub],
    config: &DiscoveryConfig,
) -> Vec<PotentialHub> {
    let labels = dbscan(route_points, &config.cluster);
    let cluster_count = labels.iter().flatten().max().map_or(0, |m| m + 1);
    debug!(
        points = route_points.len(),
        clusters = cluster_count,
        noise = labels.iter().filter(|l| l.is_none()).count(),
        "dbscan pass complete"
    );

    let mut clusters: Vec<Vec<GeoPoint>> = vec![Vec::new(); cluster_count];
    for (point, label) in route_points.iter().zip(labels.iter()) {
        if let Some(c) = label {
            clusters[*c].push(*point);
        }
    }

    let mut candidates: Vec<PotentialHub> = clusters
        .into_iter()
        .filter(|members| !members.is_empty())
        .map(|members| {
            let n = members.len() as f64;
            let centroid = GeoPoint::new(
                members.iter().map(|p| p.lat).sum::<f64>() / n,
                members.iter().map(|p| p.lon).sum::<f64>() / n,
            );
            let density = members.len() as f64 / density_box_area_mi2(centroid);
            PotentialHub {
                centroid,
                point_count: members.len(),
                density,
                score: density * 50.0 + members.len() as f64 / 10.0,
            }
        })
        .filter(|candidate| {
            existing_hubs
                .iter()
                .filter(|h| h.active)
                .all(|h| geo::distance_mi(candidate.centroid, h.location) >= config.min_hub_distance_mi)
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(config.max_results);
    candidates
}

/// Area in mi² of the bounding box for a [DENSITY_BOX_RADIUS_MI] radius
/// around the centroid, measured along its edges.
fn density_box_area_mi2(centroid: GeoPoint) -> f64 {
    let bbox = geo::bounding_box(centroid, DENSITY_BOX_RADIUS_MI, DistanceUnit::Miles);
    let sw = GeoPoint::new(bbox.min_lat, bbox.min_lon);
    let se = GeoPoint::new(bbox.min_lat, bbox.max_lon);
    let nw = GeoPoint::new(bbox.max_lat, bbox.min_lon);
    let width = geo::distance_mi(sw, se);
    let height = geo::distance_mi(sw, nw);
    (width * height).max(f64::EPSILON)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hubs::test_fixtures::hub_at;

    /// Deterministic blob of `n` points within ~6 mi of the center.
    fn blob(center: GeoPoint, n: usize) -> Vec<GeoPoint> {
        (0..n)
            .map(|i| {
                let angle = (i as f64) * 2.39996; // golden-angle spiral
                let radius = 0.02 + 0.07 * ((i % 10) as f64 / 10.0);
                GeoPoint::new(
                    center.lat + radius * angle.sin(),
                    center.lon + radius * angle.cos(),
                )
            })
            .collect()
    }

    #[test]
    fn clusters_three_regions_and_drops_outliers() {
        let chicago = GeoPoint::new(41.85, -87.65);
        let kansas_city = GeoPoint::new(39.10, -94.58);
        let dallas = GeoPoint::new(32.78, -96.80);

        let mut points = Vec::new();
        points.extend(blob(chicago, 50));
        points.extend(blob(kansas_city, 30));
        points.extend(blob(dallas, 20));
        // Sparse outliers, each isolated by at least ~69 mi.
        for i in 0..10 {
            points.push(GeoPoint::new(45.0 + i as f64, -110.0));
        }

        let found = discover_potential_hubs(&points, &[], &DiscoveryConfig::default());
        assert_eq!(found.len(), 3, "outliers must not form clusters");
        assert_eq!(found[0].point_count, 50);
        assert_eq!(found[1].point_count, 30);
        assert_eq!(found[2].point_count, 20);
        assert!(found[0].density > found[1].density);
        assert!(geo::distance_mi(found[0].centroid, chicago) < 10.0);
    }

    #[test]
    fn existing_hub_exclusion_radius() {
        let site = GeoPoint::new(41.85, -87.65);
        let points = blob(site, 40);
        let nearby_hub = hub_at("Incumbent", 41.80, -87.70);

        let found = discover_potential_hubs(
            &points,
            &[nearby_hub.clone()],
            &DiscoveryConfig::default(),
        );
        assert!(found.is_empty(), "site within 50 mi of an existing hub");

        // An inactive hub does not block the site.
        let mut inactive = nearby_hub;
        inactive.active = false;
        let found = discover_potential_hubs(&points, &[inactive], &DiscoveryConfig::default());
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn min_points_one_makes_isolated_points_clusters() {
        let points = vec![
            GeoPoint::new(40.0, -100.0),
            GeoPoint::new(42.0, -100.0),
            GeoPoint::new(44.0, -100.0),
        ];
        let params = DbscanParams { epsilon_mi: 25.0, min_points: 1 };
        let labels = dbscan(&points, &params);
        let mut clusters: Vec<usize> = labels.into_iter().flatten().collect();
        clusters.sort_unstable();
        clusters.dedup();
        assert_eq!(clusters.len(), 3, "each isolated point is its own cluster");
    }

    #[test]
    fn noise_points_labeled_none() {
        let mut points = blob(GeoPoint::new(41.85, -87.65), 20);
        points.push(GeoPoint::new(48.0, -120.0));
        let labels = dbscan(&points, &DbscanParams::default());
        assert_eq!(labels[20], None);
        assert!(labels[..20].iter().all(|l| l.is_some()));
    }

    #[test]
    fn max_results_truncates_ranked_list() {
        let mut points = Vec::new();
        points.extend(blob(GeoPoint::new(41.85, -87.65), 30));
        points.extend(blob(GeoPoint::new(39.10, -94.58), 20));
        points.extend(blob(GeoPoint::new(32.78, -96.80), 10));

        let config = DiscoveryConfig { max_results: 2, ..Default::default() };
        let found = discover_potential_hubs(&points, &[], &config);
        assert_eq!(found.len(), 2);
        assert!(found[0].score >= found[1].score);
    }
}
