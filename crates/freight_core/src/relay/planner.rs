//! Relay planning: corridor hub anchoring, segmentation, driver assignment,
//! and exchange-window scheduling.

use chrono::{DateTime, Duration, Utc};
use pathfinding::kuhn_munkres::{kuhn_munkres, Weights};
use thiserror::Error;
use tracing::debug;

use crate::control::RunControl;
use crate::domain::{Driver, Load};
use crate::error::EngineError;
use crate::geo::{self, GeoPoint};
use crate::hubs::{HubFilters, HubRepository, SmartHub};

use super::{
    HandoffStatus, HubSnapshot, PlanId, RelayEfficiency, RelayHandoff, RelayPlan,
    RelayPlanStatus, RelaySegment, SegmentStatus,
};

/// Cost per mile used for savings estimates, dollars.
const COST_PER_MILE_USD: f64 = 1.80;
/// CO₂ per truck mile, kilograms.
const CO2_PER_MILE_KG: f64 = 0.5;
/// Distance scale for the driver-to-segment scoring terms, miles.
const SCORE_DISTANCE_SCALE_MI: f64 = 500.0;
/// Fixed-point scale for the assignment weight matrix.
const WEIGHT_SCALE: f64 = 1_000_000.0;
/// Minimum forward progress a hub anchor must make, miles.
const MIN_ANCHOR_PROGRESS_MI: f64 = 25.0;
/// Tolerance for the relay-eligibility distance threshold, miles.
const ELIGIBILITY_EPS_MI: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelayConfig {
    /// Hauls at or below this great-circle distance are not relay
    /// candidates, miles.
    pub min_relay_distance_mi: f64,
    /// Hauls shorter than this driving estimate are not relay candidates,
    /// hours.
    pub min_relay_duration_hours: f64,
    pub max_segments: usize,
    pub max_segment_distance_mi: f64,
    /// Duration estimator speed, mph.
    pub segment_speed_mph: f64,
    /// Buffer applied on top of the great-circle driving estimate.
    pub segment_buffer_fraction: f64,
    pub max_segment_duration_hours: f64,
    /// Pad added to the handoff window's lower bound, minutes.
    pub handoff_setup_minutes: i64,
    /// Safety margin held back from the delivery deadline, minutes.
    pub handoff_safety_minutes: i64,
    /// Corridor half-width as a fraction of route length.
    pub corridor_fraction: f64,
    /// Weight on driver proximity to the segment start.
    pub alpha: f64,
    /// Weight on segment-end proximity to the driver's home base.
    pub beta: f64,
    /// Weight on having the hours to run the segment.
    pub gamma: f64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            min_relay_distance_mi: 400.0,
            min_relay_duration_hours: 6.0,
            max_segments: 3,
            max_segment_distance_mi: 500.0,
            segment_speed_mph: 55.0,
            segment_buffer_fraction: 0.15,
            max_segment_duration_hours: 8.0,
            handoff_setup_minutes: 15,
            handoff_safety_minutes: 30,
            corridor_fraction: 0.20,
            alpha: 0.4,
            beta: 0.3,
            gamma: 0.3,
        }
    }
}

impl RelayConfig {
    /// Longest segment the duration cap allows once the buffer is applied,
    /// bounded by the distance cap.
    pub fn max_step_mi(&self) -> f64 {
        let duration_bound = self.max_segment_duration_hours * self.segment_speed_mph
            / (1.0 + self.segment_buffer_fraction);
        duration_bound.min(self.max_segment_distance_mi)
    }

    fn buffered_minutes(&self, distance_mi: f64) -> f64 {
        distance_mi / self.segment_speed_mph.max(1.0)
            * 60.0
            * (1.0 + self.segment_buffer_fraction)
    }

    fn travel_minutes(&self, distance_mi: f64) -> f64 {
        distance_mi / self.segment_speed_mph.max(1.0) * 60.0
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("load is not a relay candidate: {0}")]
    NotApplicable(String),
    #[error("exchange window collapsed at {0}")]
    NoExchangeWindow(String),
    #[error("no usable hubs in corridor: {0}")]
    NoCorridorHubs(String),
    #[error("not enough drivers: {0}")]
    InsufficientDrivers(String),
    #[error("plan rejected: {0}")]
    Invalid(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<RelayError> for EngineError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::NotApplicable(msg) => {
                EngineError::Validation(format!("not a relay candidate: {msg}"))
            }
            RelayError::Engine(inner) => inner,
            other => EngineError::Conflict(other.to_string()),
        }
    }
}

/// Weight matrix for the segment → driver assignment.
struct AssignmentWeights(Vec<Vec<i64>>);

impl Weights<i64> for AssignmentWeights {
    fn rows(&self) -> usize {
        self.0.len()
    }

    fn columns(&self) -> usize {
        self.0.first().map_or(0, |r| r.len())
    }

    fn at(&self, row: usize, col: usize) -> i64 {
        self.0[row][col]
    }

    fn neg(&self) -> Self {
        AssignmentWeights(
            self.0
                .iter()
                .map(|r| r.iter().map(|&x| x.saturating_neg()).collect())
                .collect(),
        )
    }
}

/// Plan a relay for one load over the candidate driver pool.
pub fn plan_relay(
    load: &Load,
    candidates: &[Driver],
    hub_repo: &dyn HubRepository,
    config: &RelayConfig,
    now: DateTime<Utc>,
    control: &mut dyn RunControl,
) -> Result<RelayPlan, RelayError> {
    control.checkpoint()?;
    let origin = load.pickup.location;
    let destination = load.delivery.location;
    let direct_mi = geo::distance_mi(origin, destination);
    let direct_hours = direct_mi / config.segment_speed_mph.max(1.0);

    if direct_mi <= config.min_relay_distance_mi + ELIGIBILITY_EPS_MI {
        return Err(RelayError::NotApplicable(format!(
            "haul is {direct_mi:.1} mi, threshold {} mi",
            config.min_relay_distance_mi
        )));
    }
    if direct_hours < config.min_relay_duration_hours {
        return Err(RelayError::NotApplicable(format!(
            "haul is {direct_hours:.1} h, threshold {} h",
            config.min_relay_duration_hours
        )));
    }
    control.progress(10);

    let anchors = anchor_hubs(origin, destination, direct_mi, hub_repo, config)?;
    control.checkpoint()?;
    control.progress(35);
    debug!(anchors = anchors.len(), direct_mi, "corridor anchoring complete");

    let waypoints: Vec<GeoPoint> = std::iter::once(origin)
        .chain(anchors.iter().map(|h| h.location))
        .chain(std::iter::once(destination))
        .collect();

    let mut segments: Vec<RelaySegment> = waypoints
        .windows(2)
        .enumerate()
        .map(|(index, pair)| {
            let distance_mi = geo::distance_mi(pair[0], pair[1]);
            RelaySegment {
                index,
                start: pair[0],
                end: pair[1],
                distance_mi,
                estimated_minutes: config.buffered_minutes(distance_mi),
                planned_start: now,
                planned_end: now,
                actual_start: None,
                actual_end: None,
                driver_id: None,
                status: SegmentStatus::Planned,
            }
        })
        .collect();

    for segment in &segments {
        if segment.distance_mi > config.max_segment_distance_mi {
            return Err(RelayError::Invalid(format!(
                "segment {} is {:.0} mi, cap {:.0}",
                segment.index, segment.distance_mi, config.max_segment_distance_mi
            )));
        }
        if segment.estimated_minutes > config.max_segment_duration_hours * 60.0 {
            return Err(RelayError::Invalid(format!(
                "segment {} needs {:.0} min, cap {:.0}",
                segment.index,
                segment.estimated_minutes,
                config.max_segment_duration_hours * 60.0
            )));
        }
    }

    let assignment = assign_drivers(&segments, candidates, config)?;
    control.checkpoint()?;
    control.progress(60);

    for (segment, driver_idx) in segments.iter_mut().zip(assignment.iter()) {
        segment.driver_id = Some(candidates[*driver_idx].id.clone());
    }

    let handoffs = schedule(&mut segments, &anchors, &assignment, candidates, load, now, config)?;
    control.checkpoint()?;
    control.progress(85);

    let last = segments.last().expect("segments are non-empty");
    if last.planned_end > load.delivery.window.latest {
        return Err(RelayError::Invalid(format!(
            "final arrival {} misses delivery deadline {}",
            last.planned_end, load.delivery.window.latest
        )));
    }
    for (segment, driver_idx) in segments.iter().zip(assignment.iter()) {
        let driver = &candidates[*driver_idx];
        if driver.driving_minutes_remaining < segment.estimated_minutes {
            return Err(RelayError::Invalid(format!(
                "driver {} lacks hours for segment {}",
                driver.id, segment.index
            )));
        }
    }

    let efficiency = efficiency_metrics(&segments, &assignment, candidates, direct_mi);
    let plan = RelayPlan {
        id: PlanId::generate(),
        load_id: load.id.clone(),
        status: RelayPlanStatus::Draft,
        segments,
        handoffs,
        efficiency,
        created_at: now,
    };
    plan.validate().map_err(|e| RelayError::Invalid(e.to_string()))?;
    control.progress(100);
    Ok(plan)
}

/// Pick handoff hubs greedily along the corridor: from each waypoint, take
/// the reachable corridor hub that makes the most forward progress, until
/// the destination is within one segment.
fn anchor_hubs(
    origin: GeoPoint,
    destination: GeoPoint,
    direct_mi: f64,
    hub_repo: &dyn HubRepository,
    config: &RelayConfig,
) -> Result<Vec<SmartHub>, RelayError> {
    let pad_mi = direct_mi * config.corridor_fraction;
    let search_center = geo::midpoint(origin, destination);
    let search_radius = direct_mi / 2.0 + pad_mi;
    let corridor: Vec<(SmartHub, f64)> = hub_repo
        .find_near(search_center, search_radius, &HubFilters::default())
        .map_err(RelayError::Engine)?
        .into_iter()
        .filter(|(hub, _)| {
            geo::point_to_segment_distance(
                hub.location,
                origin,
                destination,
                geo::DistanceUnit::Miles,
            ) <= pad_mi
        })
        .collect();
    if corridor.is_empty() {
        return Err(RelayError::NoCorridorHubs(format!(
            "no active hubs within {pad_mi:.0} mi of the route"
        )));
    }

    let max_step = config.max_step_mi();
    let mut anchors: Vec<SmartHub> = Vec::new();
    let mut current = origin;
    let mut progressed = 0.0;
    while geo::distance_mi(current, destination) > max_step {
        if anchors.len() + 1 >= config.max_segments {
            return Err(RelayError::Invalid(format!(
                "route needs more than {} segments of at most {:.0} mi",
                config.max_segments, max_step
            )));
        }
        let next = corridor
            .iter()
            .filter(|(hub, _)| {
                let along = geo::distance_mi(origin, hub.location);
                along > progressed + MIN_ANCHOR_PROGRESS_MI
                    && geo::distance_mi(current, hub.location) <= max_step
            })
            .max_by(|(a, _), (b, _)| {
                let along_a = geo::distance_mi(origin, a.location);
                let along_b = geo::distance_mi(origin, b.location);
                along_a
                    .partial_cmp(&along_b)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        let Some((hub, _)) = next else {
            return Err(RelayError::NoCorridorHubs(format!(
                "corridor gap after {progressed:.0} mi"
            )));
        };
        progressed = geo::distance_mi(origin, hub.location);
        current = hub.location;
        anchors.push(hub.clone());
    }
    Ok(anchors)
}

/// Score drivers against segments and solve the 1-to-1 assignment for
/// maximum total score.
fn assign_drivers(
    segments: &[RelaySegment],
    candidates: &[Driver],
    config: &RelayConfig,
) -> Result<Vec<usize>, RelayError> {
    if candidates.len() < segments.len() {
        return Err(RelayError::InsufficientDrivers(format!(
            "{} segments, {} candidate drivers",
            segments.len(),
            candidates.len()
        )));
    }

    let matrix: Vec<Vec<i64>> = segments
        .iter()
        .map(|segment| {
            candidates
                .iter()
                .map(|driver| {
                    let score = driver_segment_score(driver, segment, config);
                    (score * WEIGHT_SCALE) as i64
                })
                .collect()
        })
        .collect();

    let (_total, assignment) = kuhn_munkres(&AssignmentWeights(matrix));
    Ok(assignment)
}

fn driver_segment_score(driver: &Driver, segment: &RelaySegment, config: &RelayConfig) -> f64 {
    let to_start = geo::distance_mi(driver.position.point, segment.start);
    let end_to_home = geo::distance_mi(segment.end, driver.home_base);
    let hos_ok = if driver.driving_minutes_remaining >= segment.estimated_minutes {
        1.0
    } else {
        0.0
    };
    config.alpha * (1.0 - to_start / SCORE_DISTANCE_SCALE_MI).max(0.0)
        + config.beta * (1.0 - end_to_home / SCORE_DISTANCE_SCALE_MI).max(0.0)
        + config.gamma * hos_ok
}

/// Fix segment times and handoff windows. The first segment starts when its
/// driver can reach the pickup inside the load's pickup window; each later
/// segment starts at its handoff's scheduled time.
fn schedule(
    segments: &mut [RelaySegment],
    anchors: &[SmartHub],
    assignment: &[usize],
    candidates: &[Driver],
    load: &Load,
    now: DateTime<Utc>,
    config: &RelayConfig,
) -> Result<Vec<RelayHandoff>, RelayError> {
    let first_driver = &candidates[assignment[0]];
    let to_pickup = config.travel_minutes(geo::distance_mi(
        first_driver.position.point,
        segments[0].start,
    ));
    let first_start = (now + minutes(to_pickup)).max(load.pickup.window.earliest);
    if first_start > load.pickup.window.latest {
        return Err(RelayError::Invalid(format!(
            "driver {} cannot reach pickup inside its window",
            first_driver.id
        )));
    }
    segments[0].planned_start = first_start;
    segments[0].planned_end = first_start + minutes(segments[0].estimated_minutes);

    let mut handoffs = Vec::with_capacity(anchors.len());
    for i in 0..anchors.len() {
        let hub = &anchors[i];
        let incoming_driver = &candidates[assignment[i + 1]];
        let incoming_arrival = now
            + minutes(config.travel_minutes(geo::distance_mi(
                incoming_driver.position.point,
                hub.location,
            )));
        let outgoing_arrival = segments[i].planned_end;
        let window_opens =
            outgoing_arrival.max(incoming_arrival) + Duration::minutes(config.handoff_setup_minutes);

        let remaining_minutes: f64 = segments[i + 1..]
            .iter()
            .map(|s| s.estimated_minutes)
            .sum();
        let window_closes = load.delivery.window.latest
            - minutes(remaining_minutes)
            - Duration::minutes(config.handoff_safety_minutes);
        if window_opens >= window_closes {
            return Err(RelayError::NoExchangeWindow(hub.name.clone()));
        }

        handoffs.push(RelayHandoff {
            index: i,
            hub: HubSnapshot {
                hub_id: hub.id,
                name: hub.name.clone(),
                location: hub.location,
            },
            scheduled_at: window_opens,
            window_closes_at: window_closes,
            actual_at: None,
            outgoing_driver: segments[i].driver_id.clone(),
            incoming_driver: Some(incoming_driver.id.clone()),
            status: HandoffStatus::Scheduled,
        });

        segments[i + 1].planned_start = window_opens;
        segments[i + 1].planned_end = window_opens + minutes(segments[i + 1].estimated_minutes);
    }
    Ok(handoffs)
}

fn efficiency_metrics(
    segments: &[RelaySegment],
    assignment: &[usize],
    candidates: &[Driver],
    direct_mi: f64,
) -> RelayEfficiency {
    let total_mi: f64 = segments.iter().map(|s| s.distance_mi).sum();

    // Deadhead under the relay: each driver repositions to their segment
    // start and returns home from its end.
    let relay_empty: f64 = segments
        .iter()
        .zip(assignment.iter())
        .map(|(segment, idx)| {
            let driver = &candidates[*idx];
            geo::distance_mi(driver.position.point, segment.start)
                + geo::distance_mi(segment.end, driver.home_base)
        })
        .sum();

    // Baseline: the best-placed single candidate runs the whole haul.
    let origin = segments[0].start;
    let destination = segments[segments.len() - 1].end;
    let baseline_empty = candidates
        .iter()
        .map(|d| {
            geo::distance_mi(d.position.point, origin)
                + geo::distance_mi(destination, d.home_base)
        })
        .fold(f64::INFINITY, f64::min);

    let saved = (baseline_empty - relay_empty).max(0.0);
    let reduction_pct = if baseline_empty > 0.0 {
        saved / baseline_empty * 100.0
    } else {
        0.0
    };

    let home_improvement: f64 = segments
        .iter()
        .zip(assignment.iter())
        .map(|(segment, idx)| {
            let driver = &candidates[*idx];
            geo::distance_mi(driver.position.point, driver.home_base)
                - geo::distance_mi(segment.end, driver.home_base)
        })
        .sum();

    let detour = if total_mi > 0.0 { direct_mi / total_mi } else { 0.0 };
    let score = (detour * 60.0
        + reduction_pct * 0.25
        + (home_improvement / SCORE_DISTANCE_SCALE_MI).clamp(0.0, 1.0) * 15.0)
        .clamp(0.0, 100.0);

    RelayEfficiency {
        empty_miles_reduction_pct: reduction_pct,
        home_time_improvement_mi: home_improvement,
        cost_savings_usd: saved * COST_PER_MILE_USD,
        co2_reduction_kg: saved * CO2_PER_MILE_KG,
        total_distance_mi: total_mi,
        direct_distance_mi: direct_mi,
        score,
    }
}

fn minutes(m: f64) -> Duration {
    Duration::seconds((m * 60.0) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::NoopControl;
    use crate::domain::{
        DriverId, DriverPreferences, EquipmentType, LoadId, LoadStatus, Position, PositionSource,
        Stop, TimeWindow,
    };
    use crate::hubs::test_fixtures::hub_at;
    use crate::hubs::InMemoryHubRepository;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap()
    }

    fn driver(id: &str, pos: GeoPoint, home: GeoPoint) -> Driver {
        Driver {
            id: DriverId::new(id),
            position: Position {
                point: pos,
                heading: 0.0,
                speed: 0.0,
                accuracy: 5.0,
                timestamp: now(),
                source: PositionSource::Gps,
            },
            home_base: home,
            driving_minutes_remaining: 600.0,
            preferences: DriverPreferences::default(),
            equipment: EquipmentType::DryVan,
            region: None,
        }
    }

    fn long_haul(pickup: GeoPoint, delivery: GeoPoint, delivery_hours: i64) -> Load {
        Load {
            id: LoadId::new("relay-load"),
            pickup: Stop {
                location: pickup,
                window: TimeWindow::new(now(), now() + Duration::hours(4)).expect("window"),
            },
            delivery: Stop {
                location: delivery,
                window: TimeWindow::new(
                    now() + Duration::hours(8),
                    now() + Duration::hours(delivery_hours),
                )
                .expect("window"),
            },
            weight_lbs: 38_000.0,
            required_equipment: EquipmentType::DryVan,
            status: LoadStatus::Available,
            assigned_driver: None,
            region: None,
        }
    }

    /// Chicago → Denver (~920 mi) with anchors near Des Moines and North
    /// Platte, and a driver staged near each leg.
    fn corridor_fixture() -> (Load, Vec<Driver>, InMemoryHubRepository) {
        let chicago = GeoPoint::new(41.88, -87.63);
        let denver = GeoPoint::new(39.74, -104.99);
        let des_moines = GeoPoint::new(41.59, -93.62);
        let north_platte = GeoPoint::new(41.12, -100.76);

        let load = long_haul(chicago, denver, 30);
        let drivers = vec![
            driver("chi", GeoPoint::new(41.90, -87.70), des_moines),
            driver("dsm", GeoPoint::new(41.60, -93.70), north_platte),
            driver("lbf", GeoPoint::new(41.15, -100.70), GeoPoint::new(39.70, -105.00)),
        ];
        let repo = InMemoryHubRepository::with_hubs([
            hub_at("Des Moines Exchange", des_moines.lat, des_moines.lon),
            hub_at("North Platte Exchange", north_platte.lat, north_platte.lon),
            // Off-corridor noise that must never be anchored.
            hub_at("Fargo", 46.88, -96.79),
        ])
        .expect("repo");
        (load, drivers, repo)
    }

    #[test]
    fn plans_three_segments_over_two_hubs() {
        let (load, drivers, repo) = corridor_fixture();
        let plan = plan_relay(
            &load,
            &drivers,
            &repo,
            &RelayConfig::default(),
            now(),
            &mut NoopControl,
        )
        .expect("plan");

        assert_eq!(plan.segments.len(), 3);
        assert_eq!(plan.handoffs.len(), 2);
        plan.validate().expect("invariants");
        for segment in &plan.segments {
            assert!(segment.distance_mi <= 500.0, "segment {:.0} mi", segment.distance_mi);
            assert!(segment.driver_id.is_some());
        }
        for handoff in &plan.handoffs {
            assert!(
                handoff.scheduled_at < handoff.window_closes_at,
                "window must have positive width"
            );
        }
        // 1-to-1 assignment over distinct drivers.
        let mut assigned: Vec<&DriverId> = plan
            .segments
            .iter()
            .map(|s| s.driver_id.as_ref().expect("driver"))
            .collect();
        assigned.sort();
        assigned.dedup();
        assert_eq!(assigned.len(), 3);
        assert!(plan.efficiency.score > 0.0);
        assert!(plan.efficiency.total_distance_mi >= plan.efficiency.direct_distance_mi);
    }

    #[test]
    fn staged_drivers_get_their_legs() {
        let (load, drivers, repo) = corridor_fixture();
        let plan = plan_relay(
            &load,
            &drivers,
            &repo,
            &RelayConfig::default(),
            now(),
            &mut NoopControl,
        )
        .expect("plan");
        assert_eq!(plan.segments[0].driver_id, Some(DriverId::new("chi")));
        assert_eq!(plan.segments[1].driver_id, Some(DriverId::new("dsm")));
        assert_eq!(plan.segments[2].driver_id, Some(DriverId::new("lbf")));
        // Handoff drivers mirror the adjacent segments.
        assert_eq!(plan.handoffs[0].outgoing_driver, Some(DriverId::new("chi")));
        assert_eq!(plan.handoffs[0].incoming_driver, Some(DriverId::new("dsm")));
    }

    #[test]
    fn exact_threshold_haul_is_not_applicable() {
        let origin = GeoPoint::new(41.88, -87.63);
        let at_threshold = geo::destination(origin, 180.0, 400.0, geo::DistanceUnit::Miles);
        let load = long_haul(origin, at_threshold, 30);
        let repo = InMemoryHubRepository::new();
        let err = plan_relay(
            &load,
            &[],
            &repo,
            &RelayConfig::default(),
            now(),
            &mut NoopControl,
        )
        .unwrap_err();
        assert!(matches!(err, RelayError::NotApplicable(_)), "got {err:?}");

        // Just past the threshold the eligibility gate opens (the empty
        // catalogue then fails differently).
        let past = geo::destination(origin, 180.0, 410.0, geo::DistanceUnit::Miles);
        let load = long_haul(origin, past, 30);
        let err = plan_relay(
            &load,
            &[],
            &repo,
            &RelayConfig::default(),
            now(),
            &mut NoopControl,
        )
        .unwrap_err();
        assert!(matches!(err, RelayError::NoCorridorHubs(_)), "got {err:?}");
    }

    #[test]
    fn too_few_drivers_fails() {
        let (load, drivers, repo) = corridor_fixture();
        let err = plan_relay(
            &load,
            &drivers[..2],
            &repo,
            &RelayConfig::default(),
            now(),
            &mut NoopControl,
        )
        .unwrap_err();
        assert!(matches!(err, RelayError::InsufficientDrivers(_)), "got {err:?}");
    }

    #[test]
    fn tight_delivery_deadline_collapses_exchange_window() {
        let (mut load, drivers, repo) = corridor_fixture();
        // ~21 h of buffered driving cannot fit a 10 h delivery deadline.
        load.delivery.window =
            TimeWindow::new(now() + Duration::hours(8), now() + Duration::hours(10))
                .expect("window");
        let err = plan_relay(
            &load,
            &drivers,
            &repo,
            &RelayConfig::default(),
            now(),
            &mut NoopControl,
        )
        .unwrap_err();
        assert!(matches!(err, RelayError::NoExchangeWindow(_)), "got {err:?}");
    }

    #[test]
    fn segment_cap_binds_when_corridor_too_long() {
        let (load, drivers, repo) = corridor_fixture();
        let config = RelayConfig { max_segments: 2, ..Default::default() };
        let err = plan_relay(&load, &drivers, &repo, &config, now(), &mut NoopControl).unwrap_err();
        assert!(matches!(err, RelayError::Invalid(_)), "got {err:?}");
    }

    #[test]
    fn not_applicable_maps_to_validation_error() {
        let engine_err: EngineError = RelayError::NotApplicable("short haul".into()).into();
        assert_eq!(engine_err.http_status(), 400);
        let engine_err: EngineError = RelayError::NoExchangeWindow("Hub".into()).into();
        assert_eq!(engine_err.http_status(), 409);
    }
}
