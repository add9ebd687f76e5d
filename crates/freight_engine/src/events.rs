//! Outbound result events.
//!
//! Each completed job publishes one event whose type is determined by the
//! job kind. The transport (Kafka in production) sits behind
//! [EventPublisher]; a recording implementation backs the tests.

use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use freight_core::error::{EngineError, EngineResult};

use crate::config::PRODUCER;
use crate::job::{JobId, JobKind};
use crate::result::OptimizationResult;

pub const EVENT_VERSION: &str = "1.0";
pub const EVENT_CATEGORY: &str = "OPTIMIZATION";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    OptimizationCompleted,
    SmartHubIdentified,
    RelayPlanCreated,
}

impl EventType {
    pub fn for_job_kind(kind: JobKind) -> Self {
        match kind {
            JobKind::LoadMatching | JobKind::NetworkOptimization | JobKind::DemandPrediction => {
                EventType::OptimizationCompleted
            }
            JobKind::SmartHubIdentification => EventType::SmartHubIdentified,
            JobKind::RelayPlanning => EventType::RelayPlanCreated,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: EventId,
    pub event_type: EventType,
    pub event_version: String,
    pub event_time: DateTime<Utc>,
    pub producer: String,
    /// Correlates the event back to its originating job.
    pub correlation_id: JobId,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEvent {
    pub envelope: EventEnvelope,
    pub payload: OptimizationResult,
}

impl ResultEvent {
    pub fn for_result(result: OptimizationResult, now: DateTime<Utc>) -> Self {
        Self {
            envelope: EventEnvelope {
                event_id: EventId::generate(),
                event_type: EventType::for_job_kind(result.kind),
                event_version: EVENT_VERSION.to_string(),
                event_time: now,
                producer: PRODUCER.to_string(),
                correlation_id: result.job_id,
                category: EVENT_CATEGORY.to_string(),
            },
            payload: result,
        }
    }
}

/// Event bus abstraction; the concrete transport is an external
/// collaborator.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: ResultEvent) -> EngineResult<()>;
}

/// Publisher that records events in memory, for tests and local runs.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<ResultEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<ResultEvent> {
        self.events.lock().expect("publisher lock").clone()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: ResultEvent) -> EngineResult<()> {
        self.events
            .lock()
            .map_err(|_| EngineError::External("event buffer lock poisoned".into()))?
            .push(event);
        Ok(())
    }
}
