//! Durable stores for jobs, results, and relay plans, behind traits.
//!
//! Job status updates are transactional: the store checks the lifecycle
//! table (and an optional expected current status) under the write lock, so
//! racing writers resolve to exactly one winner.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use freight_core::domain::LoadId;
use freight_core::error::{EngineError, EngineResult};
use freight_core::relay::{PlanId, RelayPlan, RelayPlanStatus};

use crate::job::{JobError, JobId, JobKind, JobStatus, OptimizationJob, ResultId};
use crate::result::OptimizationResult;

/// Partial job update. `None` fields are untouched; `expect_status` makes
/// the update conditional on the job's current status.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub expect_status: Option<JobStatus>,
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub result_id: Option<ResultId>,
    pub error: Option<JobError>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processing_time_ms: Option<u64>,
    pub attempts: Option<u32>,
    pub last_progress_at: Option<DateTime<Utc>>,
}

pub trait JobStore: Send + Sync {
    fn create(&self, job: OptimizationJob) -> EngineResult<()>;
    fn get(&self, id: JobId) -> EngineResult<Option<OptimizationJob>>;
    /// Apply a transactional update; illegal status moves are a Conflict.
    fn update(&self, id: JobId, update: JobUpdate) -> EngineResult<OptimizationJob>;
    /// Atomically move a PENDING job to PROCESSING for a worker. Returns
    /// `None` when the job is no longer claimable (cancelled, missing, or
    /// already taken).
    fn claim(&self, id: JobId, now: DateTime<Utc>) -> EngineResult<Option<OptimizationJob>>;
    /// Record a progress update on a PROCESSING job. A no-op for any other
    /// status.
    fn touch_progress(&self, id: JobId, progress: u8, now: DateTime<Utc>) -> EngineResult<()>;
    /// Jobs by status/kind, ordered by priority descending then creation
    /// time ascending.
    fn find(
        &self,
        status: Option<JobStatus>,
        kind: Option<JobKind>,
    ) -> EngineResult<Vec<OptimizationJob>>;
    fn find_by_region(
        &self,
        region: &str,
        status: Option<JobStatus>,
    ) -> EngineResult<Vec<OptimizationJob>>;
    /// PROCESSING jobs with no progress signal since `cutoff`.
    fn stalled(&self, cutoff: DateTime<Utc>) -> EngineResult<Vec<OptimizationJob>>;
}

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, OptimizationJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> EngineResult<std::sync::RwLockReadGuard<'_, HashMap<JobId, OptimizationJob>>> {
        self.jobs
            .read()
            .map_err(|_| EngineError::Database("job store lock poisoned".into()))
    }

    fn write(
        &self,
    ) -> EngineResult<std::sync::RwLockWriteGuard<'_, HashMap<JobId, OptimizationJob>>> {
        self.jobs
            .write()
            .map_err(|_| EngineError::Database("job store lock poisoned".into()))
    }
}

fn sort_for_index(jobs: &mut [OptimizationJob]) {
    jobs.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.created_at.cmp(&b.created_at))
    });
}

impl JobStore for InMemoryJobStore {
    fn create(&self, job: OptimizationJob) -> EngineResult<()> {
        let mut jobs = self.write()?;
        if jobs.contains_key(&job.id) {
            return Err(EngineError::Conflict(format!("job {} already exists", job.id)));
        }
        jobs.insert(job.id, job);
        Ok(())
    }

    fn get(&self, id: JobId) -> EngineResult<Option<OptimizationJob>> {
        Ok(self.read()?.get(&id).cloned())
    }

    fn update(&self, id: JobId, update: JobUpdate) -> EngineResult<OptimizationJob> {
        let mut jobs = self.write()?;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("job", id.to_string()))?;
        if let Some(expected) = update.expect_status {
            if job.status != expected {
                return Err(EngineError::Conflict(format!(
                    "job {} is {:?}, expected {:?}",
                    id, job.status, expected
                )));
            }
        }
        if let Some(next) = update.status {
            if next != job.status && !job.status.can_transition_to(next) {
                return Err(EngineError::Conflict(format!(
                    "job {} cannot move {:?} -> {:?}",
                    id, job.status, next
                )));
            }
            job.status = next;
        }
        if let Some(progress) = update.progress {
            job.progress = progress.min(100);
        }
        if let Some(result_id) = update.result_id {
            job.result_id = Some(result_id);
        }
        if let Some(error) = update.error {
            job.error = Some(error);
        }
        if let Some(started_at) = update.started_at {
            job.started_at = Some(started_at);
        }
        if let Some(completed_at) = update.completed_at {
            job.completed_at = Some(completed_at);
        }
        if let Some(ms) = update.processing_time_ms {
            job.processing_time_ms = Some(ms);
        }
        if let Some(attempts) = update.attempts {
            job.attempts = attempts;
        }
        if let Some(at) = update.last_progress_at {
            job.last_progress_at = Some(at);
        }
        Ok(job.clone())
    }

    fn claim(&self, id: JobId, now: DateTime<Utc>) -> EngineResult<Option<OptimizationJob>> {
        let mut jobs = self.write()?;
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };
        if job.status != JobStatus::Pending {
            return Ok(None);
        }
        job.status = JobStatus::Processing;
        job.started_at = Some(now);
        job.last_progress_at = Some(now);
        job.attempts += 1;
        Ok(Some(job.clone()))
    }

    fn touch_progress(&self, id: JobId, progress: u8, now: DateTime<Utc>) -> EngineResult<()> {
        let mut jobs = self.write()?;
        if let Some(job) = jobs.get_mut(&id) {
            if job.status == JobStatus::Processing {
                job.progress = progress.min(100);
                job.last_progress_at = Some(now);
            }
        }
        Ok(())
    }

    fn find(
        &self,
        status: Option<JobStatus>,
        kind: Option<JobKind>,
    ) -> EngineResult<Vec<OptimizationJob>> {
        let jobs = self.read()?;
        let mut out: Vec<OptimizationJob> = jobs
            .values()
            .filter(|j| status.map_or(true, |s| j.status == s))
            .filter(|j| kind.map_or(true, |k| j.kind == k))
            .cloned()
            .collect();
        sort_for_index(&mut out);
        Ok(out)
    }

    fn find_by_region(
        &self,
        region: &str,
        status: Option<JobStatus>,
    ) -> EngineResult<Vec<OptimizationJob>> {
        let jobs = self.read()?;
        let mut out: Vec<OptimizationJob> = jobs
            .values()
            .filter(|j| j.parameters.region.as_deref() == Some(region))
            .filter(|j| status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        sort_for_index(&mut out);
        Ok(out)
    }

    fn stalled(&self, cutoff: DateTime<Utc>) -> EngineResult<Vec<OptimizationJob>> {
        let jobs = self.read()?;
        Ok(jobs
            .values()
            .filter(|j| j.status == JobStatus::Processing)
            .filter(|j| j.last_progress_at.or(j.started_at).is_some_and(|t| t < cutoff))
            .cloned()
            .collect())
    }
}

pub trait ResultStore: Send + Sync {
    /// Write-once insert: a duplicate result id or a second result for the
    /// same job is a Conflict.
    fn insert(&self, result: OptimizationResult) -> EngineResult<()>;
    fn get(&self, id: ResultId) -> EngineResult<Option<OptimizationResult>>;
    fn get_by_job(&self, job_id: JobId) -> EngineResult<Option<OptimizationResult>>;
}

#[derive(Default)]
pub struct InMemoryResultStore {
    inner: RwLock<ResultInner>,
}

#[derive(Default)]
struct ResultInner {
    results: HashMap<ResultId, OptimizationResult>,
    by_job: HashMap<JobId, ResultId>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultStore for InMemoryResultStore {
    fn insert(&self, result: OptimizationResult) -> EngineResult<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| EngineError::Database("result store lock poisoned".into()))?;
        if inner.results.contains_key(&result.id) {
            return Err(EngineError::Conflict(format!(
                "result {} already exists",
                result.id
            )));
        }
        if inner.by_job.contains_key(&result.job_id) {
            return Err(EngineError::Conflict(format!(
                "job {} already has a result",
                result.job_id
            )));
        }
        inner.by_job.insert(result.job_id, result.id);
        inner.results.insert(result.id, result);
        Ok(())
    }

    fn get(&self, id: ResultId) -> EngineResult<Option<OptimizationResult>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| EngineError::Database("result store lock poisoned".into()))?;
        Ok(inner.results.get(&id).cloned())
    }

    fn get_by_job(&self, job_id: JobId) -> EngineResult<Option<OptimizationResult>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| EngineError::Database("result store lock poisoned".into()))?;
        Ok(inner
            .by_job
            .get(&job_id)
            .and_then(|id| inner.results.get(id))
            .cloned())
    }
}

pub trait PlanStore: Send + Sync {
    fn insert(&self, plan: RelayPlan) -> EngineResult<()>;
    fn get(&self, id: PlanId) -> EngineResult<Option<RelayPlan>>;
    fn by_load(&self, load_id: &LoadId) -> EngineResult<Vec<RelayPlan>>;
    /// Apply a lifecycle transition through [RelayPlan::transition].
    fn transition(&self, id: PlanId, next: RelayPlanStatus) -> EngineResult<RelayPlan>;
}

#[derive(Default)]
pub struct InMemoryPlanStore {
    plans: RwLock<HashMap<PlanId, RelayPlan>>,
}

impl InMemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlanStore for InMemoryPlanStore {
    fn insert(&self, plan: RelayPlan) -> EngineResult<()> {
        let mut plans = self
            .plans
            .write()
            .map_err(|_| EngineError::Database("plan store lock poisoned".into()))?;
        if plans.contains_key(&plan.id) {
            return Err(EngineError::Conflict(format!("plan {} already exists", plan.id)));
        }
        plans.insert(plan.id, plan);
        Ok(())
    }

    fn get(&self, id: PlanId) -> EngineResult<Option<RelayPlan>> {
        let plans = self
            .plans
            .read()
            .map_err(|_| EngineError::Database("plan store lock poisoned".into()))?;
        Ok(plans.get(&id).cloned())
    }

    fn by_load(&self, load_id: &LoadId) -> EngineResult<Vec<RelayPlan>> {
        let plans = self
            .plans
            .read()
            .map_err(|_| EngineError::Database("plan store lock poisoned".into()))?;
        let mut out: Vec<RelayPlan> = plans
            .values()
            .filter(|p| &p.load_id == load_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    fn transition(&self, id: PlanId, next: RelayPlanStatus) -> EngineResult<RelayPlan> {
        let mut plans = self
            .plans
            .write()
            .map_err(|_| EngineError::Database("plan store lock poisoned".into()))?;
        let plan = plans
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("relay plan", id.to_string()))?;
        plan.transition(next)?;
        Ok(plan.clone())
    }
}
