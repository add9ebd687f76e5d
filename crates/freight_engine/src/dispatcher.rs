//! Dispatcher: drains the queue with a bounded worker pool and routes each
//! job to its algorithm.
//!
//! Workers claim jobs atomically (PENDING → PROCESSING), thread a
//! cancellation token and progress sink into the algorithm, persist the
//! result, and publish the completion event. Transient failures requeue with
//! exponential backoff and jitter up to a max attempt count; everything else
//! fails the job with its classified error. A monitor thread fails jobs
//! whose progress has stalled past the timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, info_span, warn};

use freight_core::control::{CancelFlag, FlagControl, RunControl};
use freight_core::demand::{DemandPredictor, RegionSpec};
use freight_core::domain::{DriverRepository, LoadRepository, LoadStatus};
use freight_core::error::{EngineError, EngineResult};
use freight_core::geo::{self, GeoPoint};
use freight_core::hubs::{
    discover_potential_hubs, score_hub, AmenityWeights, HubOptimizationMetrics, HubRepository,
    HubScoreWeights, NetworkState,
};
use freight_core::matching::{optimize, MatchingProblem};
use freight_core::predict::Predictor;
use freight_core::relay::plan_relay;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::events::{EventPublisher, ResultEvent};
use crate::job::{JobError, JobId, JobKind, JobStatus, OptimizationJob};
use crate::queue::JobQueue;
use crate::result::OptimizationResult;
use crate::store::{JobStore, JobUpdate, PlanStore, ResultStore};

/// Everything a worker needs; shared by reference across the pool.
pub struct DispatcherContext {
    pub config: EngineConfig,
    pub clock: Arc<dyn Clock>,
    pub queue: Arc<JobQueue>,
    pub jobs: Arc<dyn JobStore>,
    pub results: Arc<dyn ResultStore>,
    pub plans: Arc<dyn PlanStore>,
    pub publisher: Arc<dyn EventPublisher>,
    pub drivers: Arc<dyn DriverRepository>,
    pub loads: Arc<dyn LoadRepository>,
    pub hubs: Arc<dyn HubRepository>,
    pub predictor: Arc<Predictor>,
    pub demand: Arc<DemandPredictor>,
}

struct RetryRequest {
    job_id: JobId,
    priority: u8,
    created_at: DateTime<Utc>,
    due: Instant,
}

pub struct Dispatcher {
    workers: Vec<JoinHandle<()>>,
    monitor: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,
    retry_tx: Option<Sender<RetryRequest>>,
    shutdown: Arc<AtomicBool>,
    tokens: Arc<Mutex<HashMap<JobId, CancelFlag>>>,
    ctx: Arc<DispatcherContext>,
}

impl Dispatcher {
    pub fn start(ctx: Arc<DispatcherContext>) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let tokens: Arc<Mutex<HashMap<JobId, CancelFlag>>> = Arc::new(Mutex::new(HashMap::new()));
        let (retry_tx, retry_rx) = bounded::<RetryRequest>(1024);

        let workers = (0..ctx.config.max_concurrent_jobs.max(1))
            .map(|worker| {
                let ctx = ctx.clone();
                let tokens = tokens.clone();
                let retry_tx = retry_tx.clone();
                std::thread::Builder::new()
                    .name(format!("freight-worker-{worker}"))
                    .spawn(move || worker_loop(ctx, tokens, retry_tx))
                    .expect("spawn worker thread")
            })
            .collect();

        let monitor = {
            let ctx = ctx.clone();
            let tokens = tokens.clone();
            let shutdown = shutdown.clone();
            std::thread::Builder::new()
                .name("freight-stall-monitor".into())
                .spawn(move || stall_monitor_loop(ctx, tokens, shutdown))
                .expect("spawn stall monitor")
        };

        let retry = {
            let ctx = ctx.clone();
            std::thread::Builder::new()
                .name("freight-retry".into())
                .spawn(move || retry_loop(ctx, retry_rx))
                .expect("spawn retry thread")
        };

        Self {
            workers,
            monitor: Some(monitor),
            retry: Some(retry),
            retry_tx: Some(retry_tx),
            shutdown,
            tokens,
            ctx,
        }
    }

    /// Cancellation token for a PROCESSING job, if one is registered.
    pub fn cancel_token(&self, job_id: JobId) -> Option<CancelFlag> {
        self.tokens.lock().expect("token registry lock").get(&job_id).cloned()
    }

    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.ctx.queue.shutdown();
        // Closing the retry channel wakes the retry thread for exit.
        self.retry_tx.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.join();
        }
        if let Some(retry) = self.retry.take() {
            let _ = retry.join();
        }
    }
}

fn worker_loop(
    ctx: Arc<DispatcherContext>,
    tokens: Arc<Mutex<HashMap<JobId, CancelFlag>>>,
    retry_tx: Sender<RetryRequest>,
) {
    while let Some(job_id) = ctx.queue.pop_blocking() {
        process_job(&ctx, &tokens, &retry_tx, job_id);
    }
}

fn process_job(
    ctx: &Arc<DispatcherContext>,
    tokens: &Mutex<HashMap<JobId, CancelFlag>>,
    retry_tx: &Sender<RetryRequest>,
    job_id: JobId,
) {
    let token = CancelFlag::new();
    tokens
        .lock()
        .expect("token registry lock")
        .insert(job_id, token.clone());

    let claimed = match ctx.jobs.claim(job_id, ctx.clock.now()) {
        Ok(Some(job)) => Some(job),
        Ok(None) => None,
        Err(e) => {
            warn!(job = %job_id, error = %e, "claim failed");
            None
        }
    };
    if let Some(job) = claimed {
        let span = info_span!("job", id = %job.id, kind = ?job.kind, attempt = job.attempts);
        let _guard = span.enter();
        run_claimed_job(ctx, retry_tx, &token, &job);
    }

    tokens.lock().expect("token registry lock").remove(&job_id);
}

fn run_claimed_job(
    ctx: &Arc<DispatcherContext>,
    retry_tx: &Sender<RetryRequest>,
    token: &CancelFlag,
    job: &OptimizationJob,
) {
    let started = Instant::now();
    let outcome = {
        let jobs = ctx.jobs.clone();
        let clock = ctx.clock.clone();
        let job_id = job.id;
        let mut control = FlagControl::new(token.clone(), move |pct| {
            if let Err(e) = jobs.touch_progress(job_id, pct, clock.now()) {
                warn!(job = %job_id, error = %e, "progress update failed");
            }
        });
        execute_job(ctx, job, &mut control)
    };
    let elapsed_ms = started.elapsed().as_millis() as u64;
    let now = ctx.clock.now();

    match outcome {
        Ok(_) | Err(_) if token.is_cancelled() => {
            finalize(
                ctx,
                job.id,
                JobUpdate {
                    expect_status: Some(JobStatus::Processing),
                    status: Some(JobStatus::Cancelled),
                    completed_at: Some(now),
                    processing_time_ms: Some(elapsed_ms),
                    ..Default::default()
                },
            );
            info!("job cancelled mid-flight");
        }
        Ok(result) => {
            let result_id = result.id;
            if let Err(e) = ctx.results.insert(result.clone()) {
                warn!(error = %e, "result insert failed");
                finalize_failed(ctx, job, &e, elapsed_ms);
                return;
            }
            finalize(
                ctx,
                job.id,
                JobUpdate {
                    expect_status: Some(JobStatus::Processing),
                    status: Some(JobStatus::Completed),
                    progress: Some(100),
                    result_id: Some(result_id),
                    completed_at: Some(now),
                    processing_time_ms: Some(elapsed_ms),
                    ..Default::default()
                },
            );
            if let Err(e) = ctx.publisher.publish(ResultEvent::for_result(result, now)) {
                warn!(error = %e, "result event publish failed");
            }
            info!(result = %result_id, elapsed_ms, "job completed");
        }
        Err(e) if e.is_retryable() && job.attempts < ctx.config.max_job_attempts => {
            let delay = backoff_delay(
                job.attempts,
                ctx.config.retry_base_delay,
                ctx.config.retry_max_delay,
                ctx.config.retry_jitter,
                &mut StdRng::from_entropy(),
            );
            finalize(
                ctx,
                job.id,
                JobUpdate {
                    expect_status: Some(JobStatus::Processing),
                    status: Some(JobStatus::Pending),
                    ..Default::default()
                },
            );
            warn!(error = %e, attempt = job.attempts, delay_ms = delay.as_millis() as u64,
                "retryable failure, requeueing with backoff");
            let request = RetryRequest {
                job_id: job.id,
                priority: job.priority,
                created_at: job.created_at,
                due: Instant::now() + delay,
            };
            if retry_tx.send(request).is_err() {
                warn!("retry channel closed, job stays pending");
            }
        }
        Err(e) => {
            warn!(error = %e, "job failed permanently");
            finalize_failed(ctx, job, &e, elapsed_ms);
        }
    }
}

fn finalize_failed(
    ctx: &Arc<DispatcherContext>,
    job: &OptimizationJob,
    error: &EngineError,
    elapsed_ms: u64,
) {
    finalize(
        ctx,
        job.id,
        JobUpdate {
            expect_status: Some(JobStatus::Processing),
            status: Some(JobStatus::Failed),
            error: Some(JobError::from(error)),
            completed_at: Some(ctx.clock.now()),
            processing_time_ms: Some(elapsed_ms),
            ..Default::default()
        },
    );
}

/// Apply a terminal update; losing a race (e.g. the stall monitor got there
/// first) is logged, not propagated.
fn finalize(ctx: &Arc<DispatcherContext>, job_id: JobId, update: JobUpdate) {
    if let Err(e) = ctx.jobs.update(job_id, update) {
        debug!(job = %job_id, error = %e, "terminal update lost a race");
    }
}

/// Exponential backoff with ±jitter: `base · 2^(attempt−1)` capped, then
/// scaled by a random factor in `[1 − jitter, 1 + jitter]`.
fn backoff_delay(
    attempt: u32,
    base: Duration,
    cap: Duration,
    jitter: f64,
    rng: &mut impl Rng,
) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let raw = base.as_millis() as f64 * 2_f64.powi(exponent as i32);
    let capped = raw.min(cap.as_millis() as f64);
    let factor = 1.0 + jitter * rng.gen_range(-1.0..=1.0);
    Duration::from_millis((capped * factor).max(0.0) as u64)
}

fn stall_monitor_loop(
    ctx: Arc<DispatcherContext>,
    tokens: Arc<Mutex<HashMap<JobId, CancelFlag>>>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(ctx.config.stall_check_interval);
        let cutoff = ctx.clock.now()
            - chrono::Duration::milliseconds(ctx.config.job_timeout.as_millis() as i64);
        let stalled = match ctx.jobs.stalled(cutoff) {
            Ok(stalled) => stalled,
            Err(e) => {
                warn!(error = %e, "stall scan failed");
                continue;
            }
        };
        for job in stalled {
            warn!(job = %job.id, "job stalled past timeout, failing");
            if let Some(token) = tokens.lock().expect("token registry lock").get(&job.id) {
                token.cancel();
            }
            let timeout = EngineError::Timeout(format!(
                "no progress for {} ms",
                ctx.config.job_timeout.as_millis()
            ));
            finalize(
                &ctx,
                job.id,
                JobUpdate {
                    expect_status: Some(JobStatus::Processing),
                    status: Some(JobStatus::Failed),
                    error: Some(JobError::from(&timeout)),
                    completed_at: Some(ctx.clock.now()),
                    ..Default::default()
                },
            );
        }
    }
}

fn retry_loop(ctx: Arc<DispatcherContext>, rx: Receiver<RetryRequest>) {
    let mut pending: Vec<RetryRequest> = Vec::new();
    loop {
        let now = Instant::now();
        let mut i = 0;
        while i < pending.len() {
            if pending[i].due <= now {
                let request = pending.swap_remove(i);
                debug!(job = %request.job_id, "retry due, requeueing");
                ctx.queue.push(request.job_id, request.priority, request.created_at);
            } else {
                i += 1;
            }
        }

        match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(request) => pending.push(request),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                // Flush whatever is due; drop the rest on shutdown.
                return;
            }
        }
    }
}

/// Route a claimed job to its algorithm.
fn execute_job(
    ctx: &Arc<DispatcherContext>,
    job: &OptimizationJob,
    control: &mut dyn RunControl,
) -> EngineResult<OptimizationResult> {
    match job.kind {
        JobKind::LoadMatching | JobKind::NetworkOptimization => run_matching(ctx, job, control),
        JobKind::SmartHubIdentification => run_hub_identification(ctx, job, control),
        JobKind::RelayPlanning => run_relay(ctx, job, control),
        JobKind::DemandPrediction => run_demand(ctx, job, control),
    }
}

fn run_matching(
    ctx: &Arc<DispatcherContext>,
    job: &OptimizationJob,
    control: &mut dyn RunControl,
) -> EngineResult<OptimizationResult> {
    let region = job.parameters.region.as_deref();
    let loads = ctx.loads.with_status(LoadStatus::Available, region)?;
    let drivers = ctx.drivers.available(region)?;
    control.checkpoint()?;

    let problem = MatchingProblem {
        loads,
        drivers,
        weights: job.parameters.weights,
        constraints: job.parameters.constraints.clone(),
        speed_mph: ctx.config.speed_factor_mph,
        now: ctx.clock.now(),
    };
    let outcome = optimize(&problem, control)?;

    let mut result = OptimizationResult::empty(job.id, job.kind, ctx.clock.now());
    result.load_matches = outcome.matches;
    result.network_metrics = Some(outcome.metrics);
    result.notes = outcome.reason;
    Ok(result)
}

fn run_hub_identification(
    ctx: &Arc<DispatcherContext>,
    job: &OptimizationJob,
    control: &mut dyn RunControl,
) -> EngineResult<OptimizationResult> {
    // The observable traffic stream: current driver fixes plus load
    // endpoints stand in for historical route points.
    let drivers = ctx.drivers.all()?;
    let loads = ctx.loads.all()?;
    let mut points: Vec<GeoPoint> = drivers.iter().map(|d| d.position.point).collect();
    let routes: Vec<Vec<GeoPoint>> = loads
        .iter()
        .map(|l| vec![l.pickup.location, l.delivery.location])
        .collect();
    points.extend(routes.iter().flatten().copied());
    control.checkpoint()?;
    control.progress(20);

    let existing = ctx.hubs.all_active()?;
    let found = discover_potential_hubs(&points, &existing, &ctx.config.discovery_config());
    control.checkpoint()?;
    control.progress(60);

    // Refresh derived metrics on the current catalogue.
    let state = NetworkState {
        truck_positions: drivers.iter().map(|d| d.position.point).collect(),
        routes,
        existing_hubs: existing.clone(),
    };
    let score_weights = HubScoreWeights::default();
    let amenity_weights = AmenityWeights::default();
    for hub in &existing {
        let impact = score_hub(hub, &state, &score_weights, &amenity_weights);
        let coverage = if state.truck_positions.is_empty() {
            0.0
        } else {
            state
                .truck_positions
                .iter()
                .filter(|p| geo::distance_mi(hub.location, **p) <= 25.0)
                .count() as f64
                / state.truck_positions.len() as f64
        };
        let utilization = (hub.performance.exchange_count as f64
            / (hub.capacity.max(1) as f64 * 100.0))
            .min(1.0);
        ctx.hubs.update_metrics(
            hub.id,
            HubOptimizationMetrics {
                network_impact: impact,
                geographic_coverage: coverage,
                utilization_rate: utilization,
            },
        )?;
        control.checkpoint()?;
    }
    control.progress(90);

    let mut result = OptimizationResult::empty(job.id, job.kind, ctx.clock.now());
    result.hub_recommendations = found;
    Ok(result)
}

fn run_relay(
    ctx: &Arc<DispatcherContext>,
    job: &OptimizationJob,
    control: &mut dyn RunControl,
) -> EngineResult<OptimizationResult> {
    let load = match &job.parameters.target_load {
        Some(load_id) => ctx
            .loads
            .get(load_id)?
            .ok_or_else(|| EngineError::not_found("load", load_id.0.clone()))?,
        None => {
            // No explicit target: take the longest relay-eligible available
            // load in scope.
            let region = job.parameters.region.as_deref();
            ctx.loads
                .with_status(LoadStatus::Available, region)?
                .into_iter()
                .max_by(|a, b| {
                    a.haul_distance_mi()
                        .partial_cmp(&b.haul_distance_mi())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .ok_or_else(|| {
                    EngineError::Validation("no available load to plan a relay for".into())
                })?
        }
    };
    control.checkpoint()?;

    let drivers = ctx.drivers.available(job.parameters.region.as_deref())?;
    let plan = plan_relay(
        &load,
        &drivers,
        ctx.hubs.as_ref(),
        &ctx.config.relay_config(),
        ctx.clock.now(),
        control,
    )
    .map_err(EngineError::from)?;
    ctx.plans.insert(plan.clone())?;

    let mut result = OptimizationResult::empty(job.id, job.kind, ctx.clock.now());
    result.relay_plans = vec![plan];
    Ok(result)
}

fn run_demand(
    ctx: &Arc<DispatcherContext>,
    job: &OptimizationJob,
    control: &mut dyn RunControl,
) -> EngineResult<OptimizationResult> {
    let regions: Vec<RegionSpec> = match &job.parameters.region {
        Some(region) => vec![ctx
            .config
            .forecast_regions
            .iter()
            .find(|spec| &spec.name == region)
            .cloned()
            .unwrap_or_else(|| RegionSpec {
                name: region.clone(),
                center: GeoPoint::new(0.0, 0.0),
            })],
        None => ctx.config.forecast_regions.clone(),
    };
    if regions.is_empty() {
        return Err(EngineError::Validation(
            "demand prediction needs a region or configured forecast regions".into(),
        ));
    }

    let mut result = OptimizationResult::empty(job.id, job.kind, ctx.clock.now());
    let total = regions.len();
    for (i, spec) in regions.iter().enumerate() {
        control.checkpoint()?;
        let forecast = ctx.demand.regional(&spec.name, job.parameters.window)?;
        result.demand_forecasts.push(forecast);
        control.progress((20 + 70 * (i + 1) / total) as u8);
    }
    Ok(result)
}
