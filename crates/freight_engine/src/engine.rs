//! Engine composition root.
//!
//! Builds the predictor, stores, queue, ingress, and dispatcher from
//! explicit collaborators and exposes the control API: job submission and
//! inspection, cancellation, hub CRUD with nearest-neighbor queries, and
//! relay plan access.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use freight_core::demand::DemandPredictor;
use freight_core::domain::{DriverRepository, LoadId, LoadRepository};
use freight_core::error::{EngineError, EngineResult};
use freight_core::geo::GeoPoint;
use freight_core::hubs::{
    select_exchange_point, ExchangeCandidate, ExchangeConfig, HubFilters, HubId, HubPatch,
    HubRepository, Route, SmartHub,
};
use freight_core::predict::{PredictionModel, Predictor};
use freight_core::relay::{PlanId, RelayPlan, RelayPlanStatus};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::dispatcher::{Dispatcher, DispatcherContext};
use crate::events::EventPublisher;
use crate::ingress::{Ingress, IngressConfig, JobSink};
use crate::job::{JobError, JobId, JobKind, JobParameters, JobStatus, OptimizationJob, ResultId};
use crate::queue::JobQueue;
use crate::result::OptimizationResult;
use crate::store::{
    InMemoryJobStore, InMemoryPlanStore, InMemoryResultStore, JobStore, JobUpdate, PlanStore,
    ResultStore,
};

/// External collaborators composed at startup. No module-level singletons:
/// everything the engine touches comes in through here.
pub struct Collaborators {
    pub clock: Arc<dyn Clock>,
    pub drivers: Arc<dyn DriverRepository>,
    pub loads: Arc<dyn LoadRepository>,
    pub hubs: Arc<dyn HubRepository>,
    pub models: Vec<Arc<dyn PredictionModel>>,
    pub publisher: Arc<dyn EventPublisher>,
}

/// What `get_job_status` returns to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_id: Option<ResultId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

/// Job submission surface shared by the control API and ingress.
struct EngineSink {
    clock: Arc<dyn Clock>,
    jobs: Arc<dyn JobStore>,
    queue: Arc<JobQueue>,
}

impl JobSink for EngineSink {
    fn enqueue(
        &self,
        kind: JobKind,
        parameters: JobParameters,
        priority: u8,
        created_by: &str,
    ) -> EngineResult<JobId> {
        let job = OptimizationJob::new(kind, parameters, priority, created_by, self.clock.now());
        let id = job.id;
        let queue_priority = job.priority;
        let created_at = job.created_at;
        self.jobs.create(job)?;
        self.queue.push(id, queue_priority, created_at);
        Ok(id)
    }

    fn accepting_position_triggers(&self) -> bool {
        self.queue.accepting_triggers()
    }
}

pub struct Engine {
    clock: Arc<dyn Clock>,
    queue: Arc<JobQueue>,
    jobs: Arc<dyn JobStore>,
    results: Arc<dyn ResultStore>,
    plans: Arc<dyn PlanStore>,
    hubs: Arc<dyn HubRepository>,
    predictor: Arc<Predictor>,
    sink: Arc<EngineSink>,
    ingress: Ingress,
    dispatcher: Option<Dispatcher>,
}

impl Engine {
    /// Compose and start the engine: worker pool, stall monitor, and retry
    /// scheduler spin up here.
    pub fn start(config: EngineConfig, collaborators: Collaborators) -> Self {
        let Collaborators { clock, drivers, loads, hubs, models, publisher } = collaborators;

        let predictor = Arc::new(Predictor::with_models(config.predictor_config(), models));
        let demand = Arc::new(DemandPredictor::new(predictor.clone(), config.demand_config()));

        let queue = Arc::new(JobQueue::new(
            config.queue_high_watermark,
            config.queue_low_watermark,
        ));
        let jobs: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let results: Arc<dyn ResultStore> = Arc::new(InMemoryResultStore::new());
        let plans: Arc<dyn PlanStore> = Arc::new(InMemoryPlanStore::new());

        let sink = Arc::new(EngineSink {
            clock: clock.clone(),
            jobs: jobs.clone(),
            queue: queue.clone(),
        });

        let ingress = Ingress::new(
            IngressConfig {
                trigger_distance_m: config.position_trigger_distance_m,
                trigger_cooldown: config.position_trigger_cooldown,
                ..IngressConfig::default()
            },
            clock.clone(),
            sink.clone(),
            drivers.clone(),
            loads.clone(),
            Some(predictor.clone()),
        );

        let ctx = Arc::new(DispatcherContext {
            config,
            clock: clock.clone(),
            queue: queue.clone(),
            jobs: jobs.clone(),
            results: results.clone(),
            plans: plans.clone(),
            publisher,
            drivers,
            loads,
            hubs: hubs.clone(),
            predictor: predictor.clone(),
            demand,
        });
        let dispatcher = Dispatcher::start(ctx);
        info!("engine started");

        Self {
            clock,
            queue,
            jobs,
            results,
            plans,
            hubs,
            predictor,
            sink,
            ingress,
            dispatcher: Some(dispatcher),
        }
    }

    // ── Control API ────────────────────────────────────────────────

    pub fn create_job(
        &self,
        kind: JobKind,
        parameters: JobParameters,
        priority: u8,
        created_by: &str,
    ) -> EngineResult<JobId> {
        self.sink.enqueue(kind, parameters, priority, created_by)
    }

    pub fn get_job_status(&self, job_id: JobId) -> EngineResult<JobStatusView> {
        let job = self
            .jobs
            .get(job_id)?
            .ok_or_else(|| EngineError::not_found("job", job_id.to_string()))?;
        Ok(JobStatusView {
            status: job.status,
            progress: job.progress,
            result_id: job.result_id,
            error: job.error,
        })
    }

    /// Full job record, for operators and tests.
    pub fn get_job(&self, job_id: JobId) -> EngineResult<Option<OptimizationJob>> {
        self.jobs.get(job_id)
    }

    pub fn get_result(&self, result_id: ResultId) -> EngineResult<OptimizationResult> {
        self.results
            .get(result_id)?
            .ok_or_else(|| EngineError::not_found("result", result_id.to_string()))
    }

    /// Cancel a job. PENDING jobs leave the queue immediately; PROCESSING
    /// jobs get their cancellation flag set and the worker abandons at its
    /// next suspension point. Terminal jobs return `false` with no state
    /// change.
    pub fn cancel_job(&self, job_id: JobId) -> EngineResult<bool> {
        let job = self
            .jobs
            .get(job_id)?
            .ok_or_else(|| EngineError::not_found("job", job_id.to_string()))?;
        match job.status {
            status if status.is_terminal() => Ok(false),
            JobStatus::Pending => {
                self.queue.remove(job_id);
                match self.jobs.update(
                    job_id,
                    JobUpdate {
                        expect_status: Some(JobStatus::Pending),
                        status: Some(JobStatus::Cancelled),
                        completed_at: Some(self.clock.now()),
                        ..Default::default()
                    },
                ) {
                    Ok(_) => Ok(true),
                    // Lost the race to a worker claim; fall through to the
                    // processing path.
                    Err(EngineError::Conflict(_)) => self.cancel_processing(job_id),
                    Err(e) => Err(e),
                }
            }
            JobStatus::Processing => self.cancel_processing(job_id),
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => Ok(false),
        }
    }

    fn cancel_processing(&self, job_id: JobId) -> EngineResult<bool> {
        let Some(dispatcher) = &self.dispatcher else {
            return Ok(false);
        };
        if let Some(token) = dispatcher.cancel_token(job_id) {
            token.cancel();
            return Ok(true);
        }
        // The worker finished in between; report by final status.
        Ok(self
            .jobs
            .get(job_id)?
            .is_some_and(|job| !job.status.is_terminal()))
    }

    // ── Ingress and predictions ────────────────────────────────────

    pub fn ingress(&self) -> &Ingress {
        &self.ingress
    }

    pub fn predictor(&self) -> &Arc<Predictor> {
        &self.predictor
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    // ── Hub catalogue ──────────────────────────────────────────────

    pub fn create_hub(&self, hub: SmartHub) -> EngineResult<HubId> {
        self.hubs.create(hub)
    }

    pub fn get_hub(&self, id: HubId) -> EngineResult<Option<SmartHub>> {
        self.hubs.get(id)
    }

    pub fn patch_hub(&self, id: HubId, patch: HubPatch) -> EngineResult<SmartHub> {
        self.hubs.patch(id, patch)
    }

    pub fn deactivate_hub(&self, id: HubId) -> EngineResult<()> {
        self.hubs.deactivate(id)
    }

    pub fn hubs_near(
        &self,
        center: GeoPoint,
        radius_mi: f64,
        filters: &HubFilters,
    ) -> EngineResult<Vec<(SmartHub, f64)>> {
        self.hubs.find_near(center, radius_mi, filters)
    }

    /// Rank hubs as exchange points between two in-flight routes, best
    /// first.
    pub fn find_exchange_point(
        &self,
        route1: Route,
        route2: Route,
        config: &ExchangeConfig,
    ) -> EngineResult<Vec<ExchangeCandidate>> {
        let hubs = self.hubs.all_active()?;
        Ok(select_exchange_point(route1, route2, &hubs, config))
    }

    // ── Relay plans ────────────────────────────────────────────────

    pub fn get_relay_plan(&self, id: PlanId) -> EngineResult<Option<RelayPlan>> {
        self.plans.get(id)
    }

    pub fn relay_plans_for_load(&self, load_id: &LoadId) -> EngineResult<Vec<RelayPlan>> {
        self.plans.by_load(load_id)
    }

    pub fn transition_relay_plan(
        &self,
        id: PlanId,
        next: RelayPlanStatus,
    ) -> EngineResult<RelayPlan> {
        self.plans.transition(id, next)
    }

    /// Stop the worker pool and join every engine thread.
    pub fn shutdown(mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.shutdown();
        }
        info!("engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::events::{EventType, RecordingPublisher};
    use chrono::{Duration, Utc};
    use freight_core::demand::RegionSpec;
    use freight_core::domain::{
        Driver, DriverId, DriverPreferences, EquipmentType, InMemoryDriverRepository,
        InMemoryLoadRepository, Load, LoadStatus, Position, PositionSource, Stop, TimeWindow,
    };
    use freight_core::error::EngineResult as CoreResult;
    use freight_core::hubs::{
        Amenity, FacilityType, HubOptimizationMetrics, HubPerformanceCounters,
        InMemoryHubRepository, OperatingHours,
    };
    use freight_core::matching::MatchingWeights;
    use freight_core::predict::{ModelKind, RawPrediction};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration as StdDuration, Instant};

    fn hub_at(name: &str, lat: f64, lon: f64) -> SmartHub {
        use chrono::{NaiveTime, Weekday};
        SmartHub {
            id: HubId::generate(),
            name: name.to_string(),
            facility_type: FacilityType::TruckStop,
            location: GeoPoint::new(lat, lon),
            amenities: [Amenity::Parking, Amenity::Fuel, Amenity::Restrooms]
                .into_iter()
                .collect(),
            capacity: 20,
            operating_hours: OperatingHours::new(
                NaiveTime::from_hms_opt(0, 0, 0).expect("time"),
                NaiveTime::from_hms_opt(23, 59, 0).expect("time"),
                [
                    Weekday::Mon,
                    Weekday::Tue,
                    Weekday::Wed,
                    Weekday::Thu,
                    Weekday::Fri,
                    Weekday::Sat,
                    Weekday::Sun,
                ],
            )
            .expect("hours"),
            efficiency_score: 75.0,
            active: true,
            operating_region: None,
            optimization_metrics: HubOptimizationMetrics::default(),
            performance: HubPerformanceCounters::default(),
        }
    }

    fn wait_until(timeout: StdDuration, mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            std::thread::sleep(StdDuration::from_millis(10));
        }
        false
    }

    fn driver(id: &str, lat: f64, lon: f64) -> Driver {
        Driver {
            id: DriverId::new(id),
            position: Position {
                point: GeoPoint::new(lat, lon),
                heading: 0.0,
                speed: 0.0,
                accuracy: 5.0,
                timestamp: Utc::now(),
                source: PositionSource::Gps,
            },
            home_base: GeoPoint::new(lat - 0.1, lon - 0.1),
            driving_minutes_remaining: 600.0,
            preferences: DriverPreferences::default(),
            equipment: EquipmentType::DryVan,
            region: None,
        }
    }

    fn load(id: &str, pickup: GeoPoint, delivery: GeoPoint) -> Load {
        let now = Utc::now();
        Load {
            id: LoadId::new(id),
            pickup: Stop {
                location: pickup,
                window: TimeWindow::new(now, now + Duration::hours(4)).expect("window"),
            },
            delivery: Stop {
                location: delivery,
                window: TimeWindow::new(now + Duration::hours(1), now + Duration::hours(36))
                    .expect("window"),
            },
            weight_lbs: 30_000.0,
            required_equipment: EquipmentType::DryVan,
            status: LoadStatus::Available,
            assigned_driver: None,
            region: None,
        }
    }

    fn params() -> JobParameters {
        let now = Utc::now();
        JobParameters::new(TimeWindow::new(now, now + Duration::hours(6)).expect("window"))
    }

    struct SlowDemandModel {
        delay: StdDuration,
        calls: AtomicUsize,
        fail_first: usize,
    }

    impl SlowDemandModel {
        fn new(delay: StdDuration, fail_first: usize) -> Self {
            Self { delay, calls: AtomicUsize::new(0), fail_first }
        }
    }

    impl PredictionModel for SlowDemandModel {
        fn kind(&self) -> ModelKind {
            ModelKind::Demand
        }

        fn version(&self) -> String {
            "slow-demand-1".into()
        }

        fn infer(&self, _features: &serde_json::Value) -> CoreResult<RawPrediction> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if call < self.fail_first {
                return Err(EngineError::External("model backend flapping".into()));
            }
            Ok(RawPrediction {
                values: serde_json::json!({ "expected_loads": 120.0 }),
                score: Some(0.9),
                probabilities: None,
            })
        }
    }

    struct Fixture {
        engine: Engine,
        publisher: Arc<RecordingPublisher>,
    }

    fn start_engine(
        config: EngineConfig,
        drivers: Vec<Driver>,
        loads: Vec<Load>,
        hubs: Vec<SmartHub>,
        models: Vec<Arc<dyn PredictionModel>>,
    ) -> Fixture {
        let publisher = Arc::new(RecordingPublisher::new());
        let engine = Engine::start(
            config,
            Collaborators {
                clock: Arc::new(SystemClock),
                drivers: Arc::new(InMemoryDriverRepository::with_drivers(drivers)),
                loads: Arc::new(InMemoryLoadRepository::with_loads(loads)),
                hubs: Arc::new(InMemoryHubRepository::with_hubs(hubs).expect("hub repo")),
                models,
                publisher: publisher.clone(),
            },
        );
        Fixture { engine, publisher }
    }

    #[test]
    fn simple_match_end_to_end() {
        let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();
        let fixture = start_engine(
            EngineConfig::default(),
            vec![driver("D1", 41.88, -87.63)],
            vec![load("L1", GeoPoint::new(41.90, -87.60), GeoPoint::new(39.76, -86.16))],
            Vec::new(),
            Vec::new(),
        );

        let mut parameters = params();
        parameters.weights = MatchingWeights {
            empty_miles: 0.6,
            network: 0.0,
            preference: 0.2,
            hos: 0.2,
        };
        let job_id = fixture
            .engine
            .create_job(JobKind::LoadMatching, parameters, 5, "test")
            .expect("create job");

        assert!(wait_until(StdDuration::from_secs(10), || {
            fixture
                .engine
                .get_job_status(job_id)
                .map(|s| s.status == JobStatus::Completed)
                .unwrap_or(false)
        }));

        let status = fixture.engine.get_job_status(job_id).expect("status");
        assert_eq!(status.progress, 100);
        let result_id = status.result_id.expect("completed job has a result id");
        let result = fixture.engine.get_result(result_id).expect("result");
        assert_eq!(result.job_id, job_id, "result dereferences to its job");
        assert_eq!(result.load_matches.len(), 1);
        let m = &result.load_matches[0];
        assert_eq!(m.driver_id, DriverId::new("D1"));
        assert!((1.5..3.5).contains(&m.empty_miles));
        assert!(m.score > 70.0);
        let metrics = result.network_metrics.expect("metrics");
        assert_eq!(metrics.matched_loads, 1);

        let job = fixture.engine.get_job(job_id).expect("get").expect("job");
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_some());
        assert!(job.processing_time_ms.is_some());

        let events = fixture.publisher.published();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].envelope.event_type, EventType::OptimizationCompleted);
        assert_eq!(events[0].envelope.correlation_id, job_id);

        fixture.engine.shutdown();
    }

    #[test]
    fn equipment_mismatch_completes_with_zero_matches() {
        let mut mismatched = load(
            "L1",
            GeoPoint::new(41.90, -87.60),
            GeoPoint::new(39.76, -86.16),
        );
        mismatched.required_equipment = EquipmentType::Flatbed;
        let fixture = start_engine(
            EngineConfig::default(),
            vec![driver("D1", 41.88, -87.63)],
            vec![mismatched],
            Vec::new(),
            Vec::new(),
        );

        let job_id = fixture
            .engine
            .create_job(JobKind::LoadMatching, params(), 5, "test")
            .expect("create job");
        assert!(wait_until(StdDuration::from_secs(10), || {
            fixture
                .engine
                .get_job_status(job_id)
                .map(|s| s.status == JobStatus::Completed)
                .unwrap_or(false)
        }));

        let result_id = fixture
            .engine
            .get_job_status(job_id)
            .expect("status")
            .result_id
            .expect("result id");
        let result = fixture.engine.get_result(result_id).expect("result");
        assert!(result.load_matches.is_empty());
        assert_eq!(result.network_metrics.expect("metrics").matched_loads, 0);
        fixture.engine.shutdown();
    }

    #[test]
    fn pending_cancellation_is_idempotent() {
        // One worker, blocked on a slow demand job, leaves the second job
        // pending.
        let config = EngineConfig {
            max_concurrent_jobs: 1,
            forecast_regions: vec![RegionSpec {
                name: "midwest".into(),
                center: GeoPoint::new(41.88, -87.63),
            }],
            ..Default::default()
        };
        let fixture = start_engine(
            config,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            vec![Arc::new(SlowDemandModel::new(StdDuration::from_millis(300), 0)) as _],
        );

        let mut demand_params = params();
        demand_params.region = Some("midwest".into());
        let blocker = fixture
            .engine
            .create_job(JobKind::DemandPrediction, demand_params.clone(), 9, "test")
            .expect("create blocker");
        let victim = fixture
            .engine
            .create_job(JobKind::DemandPrediction, demand_params, 1, "test")
            .expect("create victim");

        assert!(wait_until(StdDuration::from_secs(5), || {
            fixture
                .engine
                .get_job_status(blocker)
                .map(|s| s.status == JobStatus::Processing)
                .unwrap_or(false)
        }));

        assert!(fixture.engine.cancel_job(victim).expect("cancel"));
        let status = fixture.engine.get_job_status(victim).expect("status");
        assert_eq!(status.status, JobStatus::Cancelled);

        // Second cancellation: no success, no state change.
        assert!(!fixture.engine.cancel_job(victim).expect("cancel again"));
        assert_eq!(
            fixture.engine.get_job_status(victim).expect("status").status,
            JobStatus::Cancelled
        );

        // The cancelled job never runs and never produces a result/event.
        assert!(wait_until(StdDuration::from_secs(10), || {
            fixture
                .engine
                .get_job_status(blocker)
                .map(|s| s.status.is_terminal())
                .unwrap_or(false)
        }));
        assert!(fixture
            .engine
            .get_job_status(victim)
            .expect("status")
            .result_id
            .is_none());
        assert_eq!(fixture.publisher.published().len(), 1, "only the blocker publishes");
        fixture.engine.shutdown();
    }

    #[test]
    fn cancellation_mid_flight_leaves_no_artifacts() {
        let config = EngineConfig {
            max_concurrent_jobs: 1,
            forecast_regions: (0..5)
                .map(|i| RegionSpec {
                    name: format!("region-{i}"),
                    center: GeoPoint::new(35.0 + i as f64, -100.0),
                })
                .collect(),
            ..Default::default()
        };
        let fixture = start_engine(
            config,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            vec![Arc::new(SlowDemandModel::new(StdDuration::from_millis(150), 0)) as _],
        );

        let job_id = fixture
            .engine
            .create_job(JobKind::DemandPrediction, params(), 5, "test")
            .expect("create job");

        // Wait for the first progress update, then cancel mid-run.
        assert!(wait_until(StdDuration::from_secs(5), || {
            fixture
                .engine
                .get_job_status(job_id)
                .map(|s| s.status == JobStatus::Processing && s.progress > 0)
                .unwrap_or(false)
        }));
        assert!(fixture.engine.cancel_job(job_id).expect("cancel"));

        assert!(wait_until(StdDuration::from_secs(5), || {
            fixture
                .engine
                .get_job_status(job_id)
                .map(|s| s.status.is_terminal())
                .unwrap_or(false)
        }));
        let status = fixture.engine.get_job_status(job_id).expect("status");
        assert_eq!(status.status, JobStatus::Cancelled);
        assert!(status.result_id.is_none(), "no result for a cancelled job");
        assert!(fixture.publisher.published().is_empty(), "no completion event");
        fixture.engine.shutdown();
    }

    #[test]
    fn relay_planning_end_to_end() {
        let chicago = GeoPoint::new(41.88, -87.63);
        let denver = GeoPoint::new(39.74, -104.99);
        let relay_load = load("LONG", chicago, denver);
        let drivers = vec![
            driver("chi", 41.90, -87.70),
            driver("dsm", 41.60, -93.70),
            driver("lbf", 41.15, -100.70),
        ];
        let hubs = vec![
            hub_at("Des Moines Exchange", 41.59, -93.62),
            hub_at("North Platte Exchange", 41.12, -100.76),
        ];
        let fixture = start_engine(EngineConfig::default(), drivers, vec![relay_load], hubs, Vec::new());

        let parameters = params().with_target_load(LoadId::new("LONG"));
        let job_id = fixture
            .engine
            .create_job(JobKind::RelayPlanning, parameters, 7, "test")
            .expect("create job");

        assert!(wait_until(StdDuration::from_secs(10), || {
            fixture
                .engine
                .get_job_status(job_id)
                .map(|s| s.status == JobStatus::Completed)
                .unwrap_or(false)
        }));

        let result_id = fixture
            .engine
            .get_job_status(job_id)
            .expect("status")
            .result_id
            .expect("result id");
        let result = fixture.engine.get_result(result_id).expect("result");
        assert_eq!(result.relay_plans.len(), 1);
        let plan = &result.relay_plans[0];
        assert_eq!(plan.segments.len(), 3);
        assert_eq!(plan.handoffs.len(), 2);
        assert!(plan.efficiency.score > 0.0);

        let stored = fixture
            .engine
            .relay_plans_for_load(&LoadId::new("LONG"))
            .expect("plans");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, plan.id);

        let events = fixture.publisher.published();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].envelope.event_type, EventType::RelayPlanCreated);
        fixture.engine.shutdown();
    }

    #[test]
    fn hub_identification_end_to_end() {
        // Eight drivers clustered around one site, far from any hub.
        let drivers: Vec<Driver> = (0..8)
            .map(|i| driver(&format!("D{i}"), 41.85 + 0.01 * i as f64, -87.65))
            .collect();
        let fixture = start_engine(EngineConfig::default(), drivers, Vec::new(), Vec::new(), Vec::new());

        let job_id = fixture
            .engine
            .create_job(JobKind::SmartHubIdentification, params(), 3, "test")
            .expect("create job");
        assert!(wait_until(StdDuration::from_secs(10), || {
            fixture
                .engine
                .get_job_status(job_id)
                .map(|s| s.status == JobStatus::Completed)
                .unwrap_or(false)
        }));

        let result_id = fixture
            .engine
            .get_job_status(job_id)
            .expect("status")
            .result_id
            .expect("result id");
        let result = fixture.engine.get_result(result_id).expect("result");
        assert_eq!(result.hub_recommendations.len(), 1);
        assert_eq!(result.hub_recommendations[0].point_count, 8);

        let events = fixture.publisher.published();
        assert_eq!(events[0].envelope.event_type, EventType::SmartHubIdentified);
        fixture.engine.shutdown();
    }

    #[test]
    fn retryable_failure_retries_to_success() {
        let config = EngineConfig {
            retry_base_delay: StdDuration::from_millis(20),
            forecast_regions: vec![RegionSpec {
                name: "midwest".into(),
                center: GeoPoint::new(41.88, -87.63),
            }],
            ..Default::default()
        };
        // First two model calls fail with a retryable dependency error.
        let fixture = start_engine(
            config,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            vec![Arc::new(SlowDemandModel::new(StdDuration::from_millis(1), 2)) as _],
        );

        let mut parameters = params();
        parameters.region = Some("midwest".into());
        let job_id = fixture
            .engine
            .create_job(JobKind::DemandPrediction, parameters, 5, "test")
            .expect("create job");

        assert!(wait_until(StdDuration::from_secs(10), || {
            fixture
                .engine
                .get_job_status(job_id)
                .map(|s| s.status == JobStatus::Completed)
                .unwrap_or(false)
        }));
        let job = fixture.engine.get_job(job_id).expect("get").expect("job");
        assert_eq!(job.attempts, 3, "two retries before success");
        fixture.engine.shutdown();
    }

    #[test]
    fn stalled_job_is_failed_by_monitor() {
        let config = EngineConfig {
            job_timeout: StdDuration::from_millis(200),
            stall_check_interval: StdDuration::from_millis(50),
            forecast_regions: vec![RegionSpec {
                name: "midwest".into(),
                center: GeoPoint::new(41.88, -87.63),
            }],
            ..Default::default()
        };
        // The model blocks far past the job timeout with no progress signal.
        let fixture = start_engine(
            config,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            vec![Arc::new(SlowDemandModel::new(StdDuration::from_secs(2), 0)) as _],
        );

        let mut parameters = params();
        parameters.region = Some("midwest".into());
        let job_id = fixture
            .engine
            .create_job(JobKind::DemandPrediction, parameters, 5, "test")
            .expect("create job");

        assert!(wait_until(StdDuration::from_secs(3), || {
            fixture
                .engine
                .get_job_status(job_id)
                .map(|s| s.status == JobStatus::Failed)
                .unwrap_or(false)
        }));
        let status = fixture.engine.get_job_status(job_id).expect("status");
        let error = status.error.expect("stalled job records its error");
        assert!(error.code.starts_with("TIME_"), "code {}", error.code);
        assert!(fixture.publisher.published().is_empty());
        fixture.engine.shutdown();
    }

    #[test]
    fn non_retryable_failure_fails_with_classified_error() {
        // Demand prediction with no region anywhere is a validation failure.
        let fixture = start_engine(EngineConfig::default(), Vec::new(), Vec::new(), Vec::new(), Vec::new());
        let job_id = fixture
            .engine
            .create_job(JobKind::DemandPrediction, params(), 5, "test")
            .expect("create job");

        assert!(wait_until(StdDuration::from_secs(10), || {
            fixture
                .engine
                .get_job_status(job_id)
                .map(|s| s.status == JobStatus::Failed)
                .unwrap_or(false)
        }));
        let status = fixture.engine.get_job_status(job_id).expect("status");
        let error = status.error.expect("failed job records its error");
        assert!(error.code.starts_with("VAL_"), "code {}", error.code);
        assert!(fixture.publisher.published().is_empty());
        fixture.engine.shutdown();
    }

    #[test]
    fn position_trigger_flows_through_to_a_job() {
        use crate::ingress::{EntityType, PositionUpdate};
        // Zero cooldown: only the distance gate applies, so a real-time test
        // can trigger on the second update.
        let config = EngineConfig {
            position_trigger_cooldown: StdDuration::ZERO,
            ..Default::default()
        };
        let fixture = start_engine(
            config,
            vec![driver("D7", 34.05, -118.24)],
            Vec::new(),
            Vec::new(),
            Vec::new(),
        );

        let update = |lat: f64| PositionUpdate {
            entity_type: EntityType::Driver,
            entity_id: "D7".into(),
            lat,
            lon: -118.24,
            heading: 0.0,
            speed: 55.0,
            accuracy: 5.0,
            timestamp: Utc::now(),
            source: PositionSource::Gps,
        };

        assert!(fixture
            .engine
            .ingress()
            .handle_position(&update(34.05))
            .expect("seed")
            .is_none());
        // ~1 km: below the distance threshold.
        assert!(fixture
            .engine
            .ingress()
            .handle_position(&update(34.06))
            .expect("debounced")
            .is_none());
        // ~11 km: triggers a network-optimization job.
        let job_id = fixture
            .engine
            .ingress()
            .handle_position(&update(34.15))
            .expect("trigger")
            .expect("job enqueued");

        assert!(wait_until(StdDuration::from_secs(10), || {
            fixture
                .engine
                .get_job_status(job_id)
                .map(|s| s.status == JobStatus::Completed)
                .unwrap_or(false)
        }));
        let job = fixture.engine.get_job(job_id).expect("get").expect("job");
        assert_eq!(job.kind, JobKind::NetworkOptimization);
        assert_eq!(job.created_by, "ingress:position");
        fixture.engine.shutdown();
    }

    #[test]
    fn exchange_point_ranked_from_catalogue() {
        let fixture = start_engine(
            EngineConfig::default(),
            Vec::new(),
            Vec::new(),
            vec![
                hub_at("Lafayette", 40.42, -86.90),
                hub_at("Rockford", 42.27, -89.09),
            ],
            Vec::new(),
        );

        let route1 = Route::new(GeoPoint::new(41.88, -87.63), GeoPoint::new(39.77, -86.16));
        let route2 = Route::new(GeoPoint::new(41.08, -85.14), GeoPoint::new(39.10, -87.40));
        let ranked = fixture
            .engine
            .find_exchange_point(route1, route2, &ExchangeConfig::default())
            .expect("candidates");
        assert!(!ranked.is_empty());
        assert_eq!(ranked[0].hub_name, "Lafayette");
        fixture.engine.shutdown();
    }

    #[test]
    fn hub_crud_round_trip() {
        let fixture = start_engine(EngineConfig::default(), Vec::new(), Vec::new(), Vec::new(), Vec::new());
        let hub = hub_at("Joliet Exchange", 41.52, -88.08);
        let id = fixture.engine.create_hub(hub).expect("create");

        let near = fixture
            .engine
            .hubs_near(GeoPoint::new(41.52, -88.08), 25.0, &HubFilters::default())
            .expect("query");
        assert_eq!(near.len(), 1);

        fixture
            .engine
            .patch_hub(id, HubPatch { capacity: Some(40), ..Default::default() })
            .expect("patch");
        assert_eq!(fixture.engine.get_hub(id).expect("get").expect("hub").capacity, 40);

        fixture.engine.deactivate_hub(id).expect("deactivate");
        assert!(fixture
            .engine
            .hubs_near(GeoPoint::new(41.52, -88.08), 25.0, &HubFilters::default())
            .expect("query")
            .is_empty());
        fixture.engine.shutdown();
    }
}
