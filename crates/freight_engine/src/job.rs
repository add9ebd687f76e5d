//! Optimization jobs: the durable unit of work the engine schedules.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use freight_core::domain::{LoadId, TimeWindow};
use freight_core::error::EngineError;
use freight_core::matching::{MatchingWeights, OptimizationConstraint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultId(pub Uuid);

impl ResultId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ResultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    LoadMatching,
    SmartHubIdentification,
    RelayPlanning,
    NetworkOptimization,
    DemandPrediction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
                // Retryable failure requeues the job.
                | (Processing, Pending)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

/// Job scope and tuning. The window's `start < end` invariant is enforced by
/// [TimeWindow] at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    pub region: Option<String>,
    pub window: TimeWindow,
    pub constraints: Vec<OptimizationConstraint>,
    pub weights: MatchingWeights,
    pub max_iterations: u32,
    /// Target load for relay planning; other kinds ignore it.
    pub target_load: Option<LoadId>,
}

impl JobParameters {
    pub fn new(window: TimeWindow) -> Self {
        Self {
            region: None,
            window,
            constraints: Vec::new(),
            weights: MatchingWeights::default(),
            max_iterations: 1000,
            target_load: None,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_target_load(mut self, load: LoadId) -> Self {
        self.target_load = Some(load);
        self
    }
}

/// Persisted failure record on a FAILED job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl From<&EngineError> for JobError {
    fn from(err: &EngineError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            stack: None,
        }
    }
}

pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationJob {
    pub id: JobId,
    pub kind: JobKind,
    pub parameters: JobParameters,
    /// Scheduling priority, [1, 10]; higher is preferred.
    pub priority: u8,
    pub status: JobStatus,
    /// Completion estimate, [0, 100].
    pub progress: u8,
    pub result_id: Option<ResultId>,
    pub error: Option<JobError>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processing_time_ms: Option<u64>,
    /// Execution attempts so far (retries included).
    pub attempts: u32,
    /// Last progress update; the stall monitor compares against this.
    pub last_progress_at: Option<DateTime<Utc>>,
}

impl OptimizationJob {
    pub fn new(
        kind: JobKind,
        parameters: JobParameters,
        priority: u8,
        created_by: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::generate(),
            kind,
            parameters,
            priority: priority.clamp(MIN_PRIORITY, MAX_PRIORITY),
            status: JobStatus::Pending,
            progress: 0,
            result_id: None,
            error: None,
            created_by: created_by.into(),
            created_at: now,
            started_at: None,
            completed_at: None,
            processing_time_ms: None,
            attempts: 0,
            last_progress_at: None,
        }
    }
}
