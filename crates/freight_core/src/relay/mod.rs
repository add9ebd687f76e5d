//! Relay hauls: one long load split across several drivers with coordinated
//! hub handoffs.
//!
//! Plans use the identity-based model: segments and handoffs reference
//! drivers and hubs by id, and each handoff freezes a `{hub_id, name,
//! location}` snapshot at creation time. Full driver and hub records are
//! resolved on demand by the caller.

pub mod planner;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{DriverId, LoadId};
use crate::error::{EngineError, EngineResult};
use crate::geo::GeoPoint;
use crate::hubs::HubId;

pub use planner::{plan_relay, RelayConfig, RelayError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(pub Uuid);

impl PlanId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelayPlanStatus {
    Draft,
    Proposed,
    Accepted,
    InProgress,
    Completed,
    Cancelled,
}

impl RelayPlanStatus {
    pub fn can_transition_to(&self, next: RelayPlanStatus) -> bool {
        use RelayPlanStatus::*;
        matches!(
            (self, next),
            (Draft, Proposed)
                | (Draft, Cancelled)
                | (Proposed, Accepted)
                | (Proposed, Cancelled)
                | (Accepted, InProgress)
                | (Accepted, Cancelled)
                | (InProgress, Completed)
                | (InProgress, Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RelayPlanStatus::Completed | RelayPlanStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SegmentStatus {
    Planned,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HandoffStatus {
    Scheduled,
    InProgress,
    Completed,
    Missed,
}

/// Hub identity frozen into the plan at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubSnapshot {
    pub hub_id: HubId,
    pub name: String,
    pub location: GeoPoint,
}

/// One driver-sized leg of the haul.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelaySegment {
    pub index: usize,
    pub start: GeoPoint,
    pub end: GeoPoint,
    pub distance_mi: f64,
    /// Buffered driving estimate, minutes.
    pub estimated_minutes: f64,
    pub planned_start: DateTime<Utc>,
    pub planned_end: DateTime<Utc>,
    pub actual_start: Option<DateTime<Utc>>,
    pub actual_end: Option<DateTime<Utc>>,
    pub driver_id: Option<DriverId>,
    pub status: SegmentStatus,
}

/// A coordinated exchange between two adjacent segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayHandoff {
    pub index: usize,
    pub hub: HubSnapshot,
    pub scheduled_at: DateTime<Utc>,
    /// Latest workable exchange time; `scheduled_at` sits at the window's
    /// lower bound.
    pub window_closes_at: DateTime<Utc>,
    pub actual_at: Option<DateTime<Utc>>,
    pub outgoing_driver: Option<DriverId>,
    pub incoming_driver: Option<DriverId>,
    pub status: HandoffStatus,
}

/// Plan-level efficiency versus a direct single-driver haul.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RelayEfficiency {
    pub empty_miles_reduction_pct: f64,
    /// Signed sum over drivers of how much closer to home each ends up, miles.
    pub home_time_improvement_mi: f64,
    pub cost_savings_usd: f64,
    pub co2_reduction_kg: f64,
    pub total_distance_mi: f64,
    pub direct_distance_mi: f64,
    /// Overall plan quality, [0, 100].
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayPlan {
    pub id: PlanId,
    pub load_id: LoadId,
    pub status: RelayPlanStatus,
    pub segments: Vec<RelaySegment>,
    pub handoffs: Vec<RelayHandoff>,
    pub efficiency: RelayEfficiency,
    pub created_at: DateTime<Utc>,
}

impl RelayPlan {
    /// Structural invariants: one handoff per segment junction, handoff hubs
    /// sit exactly at the junctions, and segment times are monotone.
    pub fn validate(&self) -> EngineResult<()> {
        if self.segments.is_empty() {
            return Err(EngineError::Validation("relay plan has no segments".into()));
        }
        if self.handoffs.len() + 1 != self.segments.len() {
            return Err(EngineError::Validation(format!(
                "plan {} has {} handoffs for {} segments",
                self.id,
                self.handoffs.len(),
                self.segments.len()
            )));
        }
        for (i, handoff) in self.handoffs.iter().enumerate() {
            let junction_out = self.segments[i].end;
            let junction_in = self.segments[i + 1].start;
            if handoff.hub.location != junction_out || handoff.hub.location != junction_in {
                return Err(EngineError::Validation(format!(
                    "handoff {} hub is not at the junction of segments {} and {}",
                    i,
                    i,
                    i + 1
                )));
            }
        }
        for segment in &self.segments {
            if segment.planned_end <= segment.planned_start {
                return Err(EngineError::Validation(format!(
                    "segment {} has non-positive planned duration",
                    segment.index
                )));
            }
        }
        for pair in self.segments.windows(2) {
            if pair[1].planned_start < pair[0].planned_end {
                return Err(EngineError::Validation(format!(
                    "segment {} starts before segment {} ends",
                    pair[1].index, pair[0].index
                )));
            }
        }
        Ok(())
    }

    pub fn transition(&mut self, next: RelayPlanStatus) -> EngineResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::Conflict(format!(
                "relay plan {} cannot move {:?} -> {:?}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }
}
