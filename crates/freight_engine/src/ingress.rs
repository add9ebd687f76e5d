//! Event ingress: position updates and load-status transitions become jobs.
//!
//! The position handler debounces per driver: a network-optimization job is
//! triggered only when the driver moved far enough (geodesic) AND enough
//! time passed since the last trigger. The per-driver map entry is read,
//! decided, and updated under one lock acquisition, so concurrent updates
//! for the same driver serialize while other drivers proceed independently.
//!
//! Load-status transitions are state commitments and are never suppressed
//! by backpressure; position-driven triggers are.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use freight_core::domain::{
    DriverRepository, LoadId, LoadRepository, LoadStatus, PositionSource, TimeWindow,
};
use freight_core::error::{EngineError, EngineResult};
use freight_core::geo::{self, GeoPoint};
use freight_core::predict::{
    DriverBehaviorInput, PredictionInput, Predictor, SupplyInput,
};

use crate::clock::Clock;
use crate::job::{JobId, JobKind, JobParameters};

/// Priority for debounced position-driven optimization runs.
const POSITION_TRIGGER_PRIORITY: u8 = 4;
/// Priority for load-lifecycle-driven optimization runs.
const LOAD_EVENT_PRIORITY: u8 = 6;
/// Priority for hub identification after completed deliveries.
const HUB_IDENTIFICATION_PRIORITY: u8 = 3;
/// Priority for relay planning on long-haul pickups.
const RELAY_PLANNING_PRIORITY: u8 = 7;

/// Scope window attached to ingress-created jobs.
const JOB_WINDOW_HOURS: i64 = 1;

pub const LOAD_STATUS_CHANGED: &str = "LOAD_STATUS_CHANGED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Driver,
    Vehicle,
    Facility,
    Other,
}

/// Inbound payload on the position-updates topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub lat: f64,
    pub lon: f64,
    pub heading: f64,
    pub speed: f64,
    pub accuracy: f64,
    pub timestamp: DateTime<Utc>,
    pub source: PositionSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadEventMetadata {
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadEventPayload {
    pub load_id: LoadId,
    pub previous_status: LoadStatus,
    pub new_status: LoadStatus,
}

/// Inbound payload on the load-events topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadEvent {
    pub metadata: LoadEventMetadata,
    pub payload: LoadEventPayload,
}

/// Where ingress submits jobs. The engine implements this; tests record.
pub trait JobSink: Send + Sync {
    fn enqueue(
        &self,
        kind: JobKind,
        parameters: JobParameters,
        priority: u8,
        created_by: &str,
    ) -> EngineResult<JobId>;

    /// False while the queue is above its high watermark.
    fn accepting_position_triggers(&self) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct IngressConfig {
    /// Geodesic debounce distance, meters.
    pub trigger_distance_m: f64,
    pub trigger_cooldown: StdDuration,
    /// Pickups at or beyond this haul length get a relay-planning job, miles.
    pub relay_distance_threshold_mi: f64,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            trigger_distance_m: 5_000.0,
            trigger_cooldown: StdDuration::from_millis(300_000),
            relay_distance_threshold_mi: 400.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct DebounceState {
    last_trigger_point: GeoPoint,
    last_trigger_at: DateTime<Utc>,
}

pub struct Ingress {
    config: IngressConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn JobSink>,
    drivers: Arc<dyn DriverRepository>,
    loads: Arc<dyn LoadRepository>,
    /// Used for best-effort supply/behavior refreshes on triggers.
    predictor: Option<Arc<Predictor>>,
    debounce: Mutex<HashMap<String, DebounceState>>,
}

impl Ingress {
    pub fn new(
        config: IngressConfig,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn JobSink>,
        drivers: Arc<dyn DriverRepository>,
        loads: Arc<dyn LoadRepository>,
        predictor: Option<Arc<Predictor>>,
    ) -> Self {
        Self {
            config,
            clock,
            sink,
            drivers,
            loads,
            predictor,
            debounce: Mutex::new(HashMap::new()),
        }
    }

    /// Handle one position update. Returns the triggered job id, if any.
    pub fn handle_position(&self, update: &PositionUpdate) -> EngineResult<Option<JobId>> {
        if update.entity_type != EntityType::Driver {
            return Ok(None);
        }
        let point = GeoPoint::new(update.lat, update.lon);
        if !point.is_valid() {
            warn!(entity = %update.entity_id, lat = update.lat, lon = update.lon,
                "dropping position update with invalid coordinates");
            return Ok(None);
        }

        let now = self.clock.now();
        let cooldown = Duration::from_std(self.config.trigger_cooldown)
            .map_err(|e| EngineError::Validation(format!("cooldown out of range: {e}")))?;

        let triggered = {
            let mut map = self
                .debounce
                .lock()
                .map_err(|_| EngineError::Server("debounce map lock poisoned".into()))?;
            match map.get(&update.entity_id) {
                None => {
                    // First sighting seeds the baseline without triggering.
                    map.insert(
                        update.entity_id.clone(),
                        DebounceState { last_trigger_point: point, last_trigger_at: now },
                    );
                    false
                }
                Some(state) => {
                    let moved_m = geo::distance_km(state.last_trigger_point, point) * 1000.0;
                    let elapsed = now - state.last_trigger_at;
                    let due = moved_m > self.config.trigger_distance_m && elapsed > cooldown;
                    if !due {
                        debug!(entity = %update.entity_id, moved_m, "debounced position update");
                        false
                    } else if !self.sink.accepting_position_triggers() {
                        // Backpressure: leave the baseline so the trigger
                        // fires once the queue drains.
                        debug!(entity = %update.entity_id, "trigger suppressed by backpressure");
                        false
                    } else {
                        map.insert(
                            update.entity_id.clone(),
                            DebounceState { last_trigger_point: point, last_trigger_at: now },
                        );
                        true
                    }
                }
            }
        };
        if !triggered {
            return Ok(None);
        }

        let region = self
            .drivers
            .get(&freight_core::domain::DriverId::new(update.entity_id.clone()))?
            .and_then(|d| d.region);
        let mut parameters = JobParameters::new(self.job_window(now)?);
        parameters.region = region.clone();
        let job_id = self.sink.enqueue(
            JobKind::NetworkOptimization,
            parameters,
            POSITION_TRIGGER_PRIORITY,
            "ingress:position",
        )?;
        info!(entity = %update.entity_id, job = %job_id, "position trigger enqueued");

        self.refresh_predictions(&update.entity_id, region.as_deref(), now);
        Ok(Some(job_id))
    }

    /// Handle one load event. Returns the enqueued job ids.
    pub fn handle_load_event(&self, event: &LoadEvent) -> EngineResult<Vec<JobId>> {
        if event.metadata.event_type != LOAD_STATUS_CHANGED {
            return Ok(Vec::new());
        }
        let now = self.clock.now();
        let payload = &event.payload;
        let load = self.loads.get(&payload.load_id)?;
        let region = load.as_ref().and_then(|l| l.region.clone());

        let mut jobs = Vec::new();
        match (payload.previous_status, payload.new_status) {
            (LoadStatus::Pending, LoadStatus::Available)
            | (LoadStatus::Available, LoadStatus::Assigned) => {
                let mut parameters = JobParameters::new(self.job_window(now)?);
                parameters.region = region.clone();
                jobs.push(self.sink.enqueue(
                    JobKind::NetworkOptimization,
                    parameters,
                    LOAD_EVENT_PRIORITY,
                    "ingress:load",
                )?);
            }
            (LoadStatus::Delivered, LoadStatus::Completed) => {
                let mut parameters = JobParameters::new(self.job_window(now)?);
                parameters.region = region.clone();
                jobs.push(self.sink.enqueue(
                    JobKind::SmartHubIdentification,
                    parameters,
                    HUB_IDENTIFICATION_PRIORITY,
                    "ingress:load",
                )?);
            }
            _ => {}
        }

        // Long-haul pickups additionally get a relay evaluation.
        if payload.new_status == LoadStatus::Available {
            if let Some(load) = load {
                let haul_mi = load.haul_distance_mi();
                if haul_mi >= self.config.relay_distance_threshold_mi
                    && load.delivery.window.latest > now
                {
                    let mut parameters = JobParameters::new(self.job_window(now)?)
                        .with_target_load(load.id.clone());
                    parameters.region = load.region.clone();
                    jobs.push(self.sink.enqueue(
                        JobKind::RelayPlanning,
                        parameters,
                        RELAY_PLANNING_PRIORITY,
                        "ingress:load",
                    )?);
                    debug!(load = %load.id, haul_mi, "relay planning enqueued for long haul");
                }
            }
        }
        Ok(jobs)
    }

    fn job_window(&self, now: DateTime<Utc>) -> EngineResult<TimeWindow> {
        TimeWindow::new(now, now + Duration::hours(JOB_WINDOW_HOURS))
    }

    /// Best-effort supply and driver-behavior refresh; failures are logged
    /// and never propagate.
    fn refresh_predictions(&self, driver_id: &str, region: Option<&str>, now: DateTime<Utc>) {
        let Some(predictor) = &self.predictor else {
            return;
        };
        let Ok(window) = self.job_window(now) else {
            return;
        };
        if let Some(region) = region {
            let input = PredictionInput::Supply(SupplyInput {
                region: region.to_string(),
                window,
            });
            if let Err(e) = predictor.predict(&input) {
                warn!(region, error = %e, "supply refresh failed");
            }
        }
        let input = PredictionInput::DriverBehavior(DriverBehaviorInput {
            driver_id: freight_core::domain::DriverId::new(driver_id),
            lookback_days: 30,
        });
        if let Err(e) = predictor.predict(&input) {
            warn!(driver = driver_id, error = %e, "driver behavior refresh failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use freight_core::domain::{
        Driver, DriverId, DriverPreferences, EquipmentType, InMemoryDriverRepository,
        InMemoryLoadRepository, Load, Position, Stop,
    };
    use std::sync::atomic::{AtomicBool, Ordering};

    struct RecordingSink {
        accepting: AtomicBool,
        enqueued: Mutex<Vec<(JobKind, JobParameters, u8)>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                accepting: AtomicBool::new(true),
                enqueued: Mutex::new(Vec::new()),
            }
        }

        fn jobs(&self) -> Vec<(JobKind, JobParameters, u8)> {
            self.enqueued.lock().expect("sink lock").clone()
        }
    }

    impl JobSink for RecordingSink {
        fn enqueue(
            &self,
            kind: JobKind,
            parameters: JobParameters,
            priority: u8,
            _created_by: &str,
        ) -> EngineResult<JobId> {
            self.enqueued
                .lock()
                .expect("sink lock")
                .push((kind, parameters, priority));
            Ok(JobId::generate())
        }

        fn accepting_position_triggers(&self) -> bool {
            self.accepting.load(Ordering::SeqCst)
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap()
    }

    fn position(entity_id: &str, lat: f64, lon: f64) -> PositionUpdate {
        PositionUpdate {
            entity_type: EntityType::Driver,
            entity_id: entity_id.to_string(),
            lat,
            lon,
            heading: 0.0,
            speed: 55.0,
            accuracy: 5.0,
            timestamp: now(),
            source: PositionSource::Gps,
        }
    }

    fn fixture() -> (Ingress, Arc<RecordingSink>, Arc<ManualClock>) {
        let sink = Arc::new(RecordingSink::new());
        let clock = Arc::new(ManualClock::starting_at(now()));
        let ingress = Ingress::new(
            IngressConfig::default(),
            clock.clone(),
            sink.clone(),
            Arc::new(InMemoryDriverRepository::new()),
            Arc::new(InMemoryLoadRepository::new()),
            None,
        );
        (ingress, sink, clock)
    }

    #[test]
    fn non_driver_entities_ignored() {
        let (ingress, sink, _) = fixture();
        let mut update = position("facility-1", 41.88, -87.63);
        update.entity_type = EntityType::Facility;
        assert_eq!(ingress.handle_position(&update).expect("handle"), None);
        assert!(sink.jobs().is_empty());
    }

    #[test]
    fn debounce_sequence_triggers_exactly_once() {
        let (ingress, sink, clock) = fixture();

        // First update seeds the baseline.
        assert!(ingress
            .handle_position(&position("D2", 34.05, -118.24))
            .expect("handle")
            .is_none());

        // ~1.1 km within 10 s: distance gate fails.
        clock.advance(Duration::seconds(10));
        assert!(ingress
            .handle_position(&position("D2", 34.06, -118.24))
            .expect("handle")
            .is_none());

        // ~11 km but only 60 s later: cooldown gate fails.
        clock.advance(Duration::seconds(50));
        assert!(ingress
            .handle_position(&position("D2", 34.15, -118.24))
            .expect("handle")
            .is_none());

        // Same spot 6 minutes later: both gates pass, one job.
        clock.advance(Duration::minutes(6));
        let job = ingress
            .handle_position(&position("D2", 34.15, -118.24))
            .expect("handle");
        assert!(job.is_some());

        let jobs = sink.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].0, JobKind::NetworkOptimization);
        assert_eq!(jobs[0].2, 4);
    }

    #[test]
    fn cooldown_window_allows_at_most_one_trigger() {
        let (ingress, sink, clock) = fixture();
        ingress.handle_position(&position("D3", 34.05, -118.24)).expect("seed");

        clock.advance(Duration::minutes(6));
        ingress.handle_position(&position("D3", 34.15, -118.24)).expect("trigger");
        // Another large move immediately afterwards is inside the new
        // cooldown window.
        clock.advance(Duration::seconds(30));
        ingress.handle_position(&position("D3", 34.30, -118.24)).expect("debounced");
        assert_eq!(sink.jobs().len(), 1);
    }

    #[test]
    fn backpressure_suppresses_but_preserves_baseline() {
        let (ingress, sink, clock) = fixture();
        ingress.handle_position(&position("D4", 34.05, -118.24)).expect("seed");

        sink.accepting.store(false, Ordering::SeqCst);
        clock.advance(Duration::minutes(6));
        assert!(ingress
            .handle_position(&position("D4", 34.15, -118.24))
            .expect("handle")
            .is_none());
        assert!(sink.jobs().is_empty());

        // Queue drained: the same movement now fires because the baseline
        // was not consumed by the suppressed attempt.
        sink.accepting.store(true, Ordering::SeqCst);
        clock.advance(Duration::seconds(1));
        assert!(ingress
            .handle_position(&position("D4", 34.15, -118.24))
            .expect("handle")
            .is_some());
    }

    fn load_event(prev: LoadStatus, next: LoadStatus, load_id: &str) -> LoadEvent {
        LoadEvent {
            metadata: LoadEventMetadata {
                event_type: LOAD_STATUS_CHANGED.to_string(),
                event_time: Some(now()),
            },
            payload: LoadEventPayload {
                load_id: LoadId::new(load_id),
                previous_status: prev,
                new_status: next,
            },
        }
    }

    fn stored_load(id: &str, pickup: GeoPoint, delivery: GeoPoint) -> Load {
        Load {
            id: LoadId::new(id),
            pickup: Stop {
                location: pickup,
                window: TimeWindow::new(now(), now() + Duration::hours(4)).expect("window"),
            },
            delivery: Stop {
                location: delivery,
                window: TimeWindow::new(now() + Duration::hours(4), now() + Duration::hours(48))
                    .expect("window"),
            },
            weight_lbs: 30_000.0,
            required_equipment: EquipmentType::DryVan,
            status: LoadStatus::Available,
            assigned_driver: None,
            region: Some("midwest".into()),
        }
    }

    fn fixture_with_loads(loads: Vec<Load>) -> (Ingress, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let clock = Arc::new(ManualClock::starting_at(now()));
        let ingress = Ingress::new(
            IngressConfig::default(),
            clock,
            sink.clone(),
            Arc::new(InMemoryDriverRepository::new()),
            Arc::new(InMemoryLoadRepository::with_loads(loads)),
            None,
        );
        (ingress, sink)
    }

    #[test]
    fn load_transition_table_enqueues_jobs() {
        let short = stored_load(
            "short",
            GeoPoint::new(41.90, -87.60),
            GeoPoint::new(41.50, -87.90),
        );
        let (ingress, sink) = fixture_with_loads(vec![short]);

        ingress
            .handle_load_event(&load_event(LoadStatus::Pending, LoadStatus::Available, "short"))
            .expect("handle");
        ingress
            .handle_load_event(&load_event(LoadStatus::Available, LoadStatus::Assigned, "short"))
            .expect("handle");
        ingress
            .handle_load_event(&load_event(LoadStatus::Delivered, LoadStatus::Completed, "short"))
            .expect("handle");

        let kinds: Vec<JobKind> = sink.jobs().iter().map(|(k, _, _)| *k).collect();
        assert_eq!(
            kinds,
            vec![
                JobKind::NetworkOptimization,
                JobKind::NetworkOptimization,
                JobKind::SmartHubIdentification,
            ]
        );
    }

    #[test]
    fn long_haul_pickup_also_plans_relay() {
        let long = stored_load(
            "long",
            GeoPoint::new(41.88, -87.63),
            GeoPoint::new(39.74, -104.99),
        );
        let (ingress, sink) = fixture_with_loads(vec![long]);

        ingress
            .handle_load_event(&load_event(LoadStatus::Pending, LoadStatus::Available, "long"))
            .expect("handle");
        let jobs = sink.jobs();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].0, JobKind::NetworkOptimization);
        assert_eq!(jobs[1].0, JobKind::RelayPlanning);
        assert_eq!(jobs[1].1.target_load, Some(LoadId::new("long")));
    }

    #[test]
    fn other_event_types_ignored() {
        let (ingress, sink) = fixture_with_loads(Vec::new());
        let mut event = load_event(LoadStatus::Pending, LoadStatus::Available, "x");
        event.metadata.event_type = "LOAD_CREATED".to_string();
        assert!(ingress.handle_load_event(&event).expect("handle").is_empty());
        assert!(sink.jobs().is_empty());
    }

    #[test]
    fn load_events_bypass_backpressure() {
        let long = stored_load(
            "long",
            GeoPoint::new(41.88, -87.63),
            GeoPoint::new(39.74, -104.99),
        );
        let (ingress, sink) = fixture_with_loads(vec![long]);
        sink.accepting.store(false, Ordering::SeqCst);
        let jobs = ingress
            .handle_load_event(&load_event(LoadStatus::Pending, LoadStatus::Available, "long"))
            .expect("handle");
        assert_eq!(jobs.len(), 2, "state commitments are never suppressed");
    }

    #[test]
    fn region_flows_from_driver_record() {
        let sink = Arc::new(RecordingSink::new());
        let clock = Arc::new(ManualClock::starting_at(now()));
        let driver = Driver {
            id: DriverId::new("D9"),
            position: Position {
                point: GeoPoint::new(34.05, -118.24),
                heading: 0.0,
                speed: 0.0,
                accuracy: 5.0,
                timestamp: now(),
                source: PositionSource::Gps,
            },
            home_base: GeoPoint::new(34.0, -118.0),
            driving_minutes_remaining: 500.0,
            preferences: DriverPreferences::default(),
            equipment: EquipmentType::DryVan,
            region: Some("socal".into()),
        };
        let ingress = Ingress::new(
            IngressConfig::default(),
            clock.clone(),
            sink.clone(),
            Arc::new(InMemoryDriverRepository::with_drivers([driver])),
            Arc::new(InMemoryLoadRepository::new()),
            None,
        );

        ingress.handle_position(&position("D9", 34.05, -118.24)).expect("seed");
        clock.advance(Duration::minutes(6));
        ingress.handle_position(&position("D9", 34.15, -118.24)).expect("trigger");
        let jobs = sink.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].1.region.as_deref(), Some("socal"));
    }
}
