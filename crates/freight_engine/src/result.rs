//! Optimization result artifacts.
//!
//! Results are write-once: created by the dispatcher on successful
//! completion, referenced by exactly one job, and published verbatim as the
//! event payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use freight_core::demand::DemandForecast;
use freight_core::hubs::PotentialHub;
use freight_core::matching::{LoadMatch, NetworkMetrics};
use freight_core::relay::RelayPlan;

use crate::job::{JobId, JobKind, ResultId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub id: ResultId,
    pub job_id: JobId,
    pub kind: JobKind,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub load_matches: Vec<LoadMatch>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub hub_recommendations: Vec<PotentialHub>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub relay_plans: Vec<RelayPlan>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub demand_forecasts: Vec<DemandForecast>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_metrics: Option<NetworkMetrics>,
    /// Free-form note, e.g. the optimizer's no-assignment reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl OptimizationResult {
    pub fn empty(job_id: JobId, kind: JobKind, now: DateTime<Utc>) -> Self {
        Self {
            id: ResultId::generate(),
            job_id,
            kind,
            created_at: now,
            load_matches: Vec::new(),
            hub_recommendations: Vec::new(),
            relay_plans: Vec::new(),
            demand_forecasts: Vec::new(),
            network_metrics: None,
            notes: None,
        }
    }
}
