//! Typed prediction contracts: one input and one output variant per model
//! kind, replacing the untyped option bags the trained models consume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{DriverId, EquipmentType, TimeWindow};
use crate::error::EngineResult;
use crate::geo::GeoPoint;

/// The five trained models the façade fronts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelKind {
    Demand,
    Supply,
    DriverBehavior,
    Price,
    NetworkEfficiency,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Demand => "demand",
            ModelKind::Supply => "supply",
            ModelKind::DriverBehavior => "driver_behavior",
            ModelKind::Price => "price",
            ModelKind::NetworkEfficiency => "network_efficiency",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandInput {
    pub region: String,
    pub window: TimeWindow,
    pub equipment: Option<EquipmentType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplyInput {
    pub region: String,
    pub window: TimeWindow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverBehaviorInput {
    pub driver_id: DriverId,
    pub lookback_days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceInput {
    pub origin: GeoPoint,
    pub destination: GeoPoint,
    pub equipment: EquipmentType,
    pub pickup_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkEfficiencyInput {
    pub region: Option<String>,
    pub window: TimeWindow,
}

/// Tagged model input. The variant fixes the model kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredictionInput {
    Demand(DemandInput),
    Supply(SupplyInput),
    DriverBehavior(DriverBehaviorInput),
    Price(PriceInput),
    NetworkEfficiency(NetworkEfficiencyInput),
}

impl PredictionInput {
    pub fn kind(&self) -> ModelKind {
        match self {
            PredictionInput::Demand(_) => ModelKind::Demand,
            PredictionInput::Supply(_) => ModelKind::Supply,
            PredictionInput::DriverBehavior(_) => ModelKind::DriverBehavior,
            PredictionInput::Price(_) => ModelKind::Price,
            PredictionInput::NetworkEfficiency(_) => ModelKind::NetworkEfficiency,
        }
    }
}

/// Demand bucket derived from the expected load count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DemandLevel {
    Low,
    Moderate,
    High,
    Critical,
}

impl DemandLevel {
    /// Bucket thresholds over expected loads per window.
    pub fn from_expected_loads(expected: f64) -> Self {
        if expected >= 200.0 {
            DemandLevel::Critical
        } else if expected >= 80.0 {
            DemandLevel::High
        } else if expected >= 20.0 {
            DemandLevel::Moderate
        } else {
            DemandLevel::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandOutput {
    pub region: String,
    pub expected_loads: f64,
    pub level: DemandLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplyOutput {
    pub region: String,
    pub expected_drivers: f64,
    /// Expected fraction of drivers under load, [0, 1].
    pub utilization: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverBehaviorOutput {
    pub driver_id: DriverId,
    /// Probability the driver accepts a well-matched offer, [0, 1].
    pub acceptance_probability: f64,
    pub preferred_lanes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceOutput {
    pub rate_per_mile: f64,
    pub low: f64,
    pub high: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkEfficiencyOutput {
    pub efficiency_score: f64,
    pub empty_miles_pct: f64,
}

/// Tagged model output, one variant per kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredictionOutput {
    Demand(DemandOutput),
    Supply(SupplyOutput),
    DriverBehavior(DriverBehaviorOutput),
    Price(PriceOutput),
    NetworkEfficiency(NetworkEfficiencyOutput),
}

impl PredictionOutput {
    pub fn kind(&self) -> ModelKind {
        match self {
            PredictionOutput::Demand(_) => ModelKind::Demand,
            PredictionOutput::Supply(_) => ModelKind::Supply,
            PredictionOutput::DriverBehavior(_) => ModelKind::DriverBehavior,
            PredictionOutput::Price(_) => ModelKind::Price,
            PredictionOutput::NetworkEfficiency(_) => ModelKind::NetworkEfficiency,
        }
    }
}

/// A completed prediction with its confidence attached. Low confidence is
/// not a failure; filtering is the caller's responsibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub output: PredictionOutput,
    /// Confidence score in [0, 1].
    pub confidence: f64,
    pub model_version: String,
    /// True when served from the façade cache.
    pub cached: bool,
}

/// What a trained model actually returns before postprocessing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPrediction {
    /// Model-specific payload the postprocessor extracts fields from.
    pub values: serde_json::Value,
    /// Model-provided confidence, when the model reports one.
    pub score: Option<f64>,
    /// Class probability vector, when the model is a classifier.
    pub probabilities: Option<Vec<f64>>,
}

/// A trained model behind the façade. Implementations wrap whatever runtime
/// serves the model; an unavailable backend surfaces as a retryable
/// dependency failure.
pub trait PredictionModel: Send + Sync {
    fn kind(&self) -> ModelKind;
    fn version(&self) -> String;
    fn infer(&self, features: &serde_json::Value) -> EngineResult<RawPrediction>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_variants_report_their_kind() {
        let input = PredictionInput::DriverBehavior(DriverBehaviorInput {
            driver_id: DriverId::new("d1"),
            lookback_days: 30,
        });
        assert_eq!(input.kind(), ModelKind::DriverBehavior);
        assert_eq!(input.kind().as_str(), "driver_behavior");
    }

    #[test]
    fn demand_level_buckets() {
        assert_eq!(DemandLevel::from_expected_loads(5.0), DemandLevel::Low);
        assert_eq!(DemandLevel::from_expected_loads(20.0), DemandLevel::Moderate);
        assert_eq!(DemandLevel::from_expected_loads(80.0), DemandLevel::High);
        assert_eq!(DemandLevel::from_expected_loads(500.0), DemandLevel::Critical);
        assert!(DemandLevel::High > DemandLevel::Low);
    }

    #[test]
    fn datetime_fields_serialize_rfc3339() {
        use chrono::TimeZone;
        let input = PredictionInput::Price(PriceInput {
            origin: GeoPoint::new(41.88, -87.63),
            destination: GeoPoint::new(39.77, -86.16),
            equipment: EquipmentType::DryVan,
            pickup_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        });
        let json = serde_json::to_string(&input).expect("serialize");
        assert!(json.contains("2024-03-01T12:00:00Z"), "canonical ISO-8601: {json}");
    }
}
