//! Predictor façade: one `predict` operation over five trained models.
//!
//! The façade validates the requested kind, consults a bounded LRU cache
//! with TTL, and on a miss runs preprocess → model → postprocess and attaches
//! a confidence score. Models are registered as trait objects; an
//! unregistered or unavailable model is a retryable dependency failure.

pub mod cache;
pub mod types;

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tracing::debug;

use crate::error::{EngineError, EngineResult};

use cache::TtlCache;
pub use types::{
    DemandInput, DemandLevel, DemandOutput, DriverBehaviorInput, DriverBehaviorOutput, ModelKind,
    NetworkEfficiencyInput, NetworkEfficiencyOutput, Prediction, PredictionInput, PredictionModel,
    PredictionOutput, PriceInput, PriceOutput, RawPrediction, SupplyInput, SupplyOutput,
};

/// Façade configuration. Defaults mirror the engine-wide settings.
#[derive(Debug, Clone)]
pub struct PredictorConfig {
    pub cache_enabled: bool,
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
    /// Minimum confidence for callers that filter; results below it are
    /// still returned.
    pub confidence_threshold: f64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_capacity: 1000,
            cache_ttl: Duration::from_millis(300_000),
            confidence_threshold: 0.7,
        }
    }
}

/// Confidence assigned when the model reports nothing usable.
const FALLBACK_CONFIDENCE: f64 = 0.5;

pub struct Predictor {
    models: HashMap<ModelKind, Arc<dyn PredictionModel>>,
    cache: Mutex<TtlCache<String, Prediction>>,
    config: PredictorConfig,
}

impl Predictor {
    pub fn new(config: PredictorConfig) -> Self {
        let capacity = NonZeroUsize::new(config.cache_capacity.max(1)).expect("non-zero capacity");
        Self {
            models: HashMap::new(),
            cache: Mutex::new(TtlCache::new(capacity, config.cache_ttl)),
            config,
        }
    }

    pub fn register_model(&mut self, model: Arc<dyn PredictionModel>) {
        self.models.insert(model.kind(), model);
    }

    pub fn with_models(
        config: PredictorConfig,
        models: impl IntoIterator<Item = Arc<dyn PredictionModel>>,
    ) -> Self {
        let mut predictor = Self::new(config);
        for model in models {
            predictor.register_model(model);
        }
        predictor
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    /// Run a prediction. Kind is fixed by the input variant.
    pub fn predict(&self, input: &PredictionInput) -> EngineResult<Prediction> {
        let kind = input.kind();
        let model = self.models.get(&kind).ok_or_else(|| {
            EngineError::External(format!("no {} model registered", kind.as_str()))
        })?;

        let key = cache_key(kind, &model.version(), input)?;
        if self.config.cache_enabled {
            let mut cache = self
                .cache
                .lock()
                .map_err(|_| EngineError::Server("prediction cache lock poisoned".into()))?;
            if let Some(mut hit) = cache.get(&key) {
                hit.cached = true;
                return Ok(hit);
            }
        }

        let features = preprocess(input);
        let raw = model.infer(&features)?;
        let output = postprocess(input, &raw)?;
        let confidence = confidence_score(kind, &raw, &output);
        debug!(kind = kind.as_str(), confidence, "prediction computed");

        let prediction = Prediction {
            output,
            confidence,
            model_version: model.version(),
            cached: false,
        };
        if self.config.cache_enabled {
            let mut cache = self
                .cache
                .lock()
                .map_err(|_| EngineError::Server("prediction cache lock poisoned".into()))?;
            cache.put(key, prediction.clone());
        }
        Ok(prediction)
    }

    /// Run a prediction, first validating that the input variant matches the
    /// expected kind.
    pub fn predict_expecting(
        &self,
        kind: ModelKind,
        input: &PredictionInput,
    ) -> EngineResult<Prediction> {
        if input.kind() != kind {
            return Err(EngineError::Validation(format!(
                "expected {} input, got {}",
                kind.as_str(),
                input.kind().as_str()
            )));
        }
        self.predict(input)
    }

    pub fn clear_cache(&self) -> EngineResult<()> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| EngineError::Server("prediction cache lock poisoned".into()))?;
        cache.clear();
        Ok(())
    }
}

/// Cache key over kind, model version, and the canonical JSON form of the
/// input. Datetime fields serialize as RFC 3339, so equal instants produce
/// equal keys.
fn cache_key(kind: ModelKind, version: &str, input: &PredictionInput) -> EngineResult<String> {
    let canonical = serde_json::to_string(input)
        .map_err(|e| EngineError::Validation(format!("unserializable prediction input: {e}")))?;
    Ok(format!("{}:{}:{}", kind.as_str(), version, canonical))
}

/// Model-specific input reshaping into the flat feature object the trained
/// models expect.
fn preprocess(input: &PredictionInput) -> serde_json::Value {
    match input {
        PredictionInput::Demand(d) => json!({
            "region": d.region,
            "window_start": d.window.earliest.to_rfc3339(),
            "window_end": d.window.latest.to_rfc3339(),
            "equipment": d.equipment,
        }),
        PredictionInput::Supply(s) => json!({
            "region": s.region,
            "window_start": s.window.earliest.to_rfc3339(),
            "window_end": s.window.latest.to_rfc3339(),
        }),
        PredictionInput::DriverBehavior(b) => json!({
            "driver_id": b.driver_id,
            "lookback_days": b.lookback_days,
        }),
        PredictionInput::Price(p) => json!({
            "origin_lat": p.origin.lat,
            "origin_lon": p.origin.lon,
            "dest_lat": p.destination.lat,
            "dest_lon": p.destination.lon,
            "equipment": p.equipment,
            "pickup_at": p.pickup_at.to_rfc3339(),
            "distance_mi": crate::geo::distance_mi(p.origin, p.destination),
        }),
        PredictionInput::NetworkEfficiency(n) => json!({
            "region": n.region,
            "window_start": n.window.earliest.to_rfc3339(),
            "window_end": n.window.latest.to_rfc3339(),
        }),
    }
}

fn field_f64(values: &serde_json::Value, field: &str) -> Option<f64> {
    values.get(field).and_then(|v| v.as_f64())
}

fn require_f64(values: &serde_json::Value, field: &str, kind: ModelKind) -> EngineResult<f64> {
    field_f64(values, field).ok_or_else(|| {
        EngineError::Server(format!(
            "{} model payload missing numeric field `{field}`",
            kind.as_str()
        ))
    })
}

/// Extract the typed output contract from the raw model payload.
fn postprocess(input: &PredictionInput, raw: &RawPrediction) -> EngineResult<PredictionOutput> {
    let kind = input.kind();
    let values = &raw.values;
    let output = match input {
        PredictionInput::Demand(d) => {
            let expected = require_f64(values, "expected_loads", kind)?.max(0.0);
            PredictionOutput::Demand(DemandOutput {
                region: d.region.clone(),
                expected_loads: expected,
                level: DemandLevel::from_expected_loads(expected),
            })
        }
        PredictionInput::Supply(s) => PredictionOutput::Supply(SupplyOutput {
            region: s.region.clone(),
            expected_drivers: require_f64(values, "expected_drivers", kind)?.max(0.0),
            utilization: field_f64(values, "utilization").unwrap_or(0.0).clamp(0.0, 1.0),
        }),
        PredictionInput::DriverBehavior(b) => {
            let acceptance = field_f64(values, "acceptance_probability")
                .or_else(|| raw.probabilities.as_ref().and_then(|p| p.get(1).copied()))
                .unwrap_or(0.0)
                .clamp(0.0, 1.0);
            let lanes = values
                .get("preferred_lanes")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|l| l.as_str().map(str::to_owned))
                        .collect()
                })
                .unwrap_or_default();
            PredictionOutput::DriverBehavior(DriverBehaviorOutput {
                driver_id: b.driver_id.clone(),
                acceptance_probability: acceptance,
                preferred_lanes: lanes,
            })
        }
        PredictionInput::Price(_) => {
            let rate = require_f64(values, "rate_per_mile", kind)?;
            let low = field_f64(values, "low").unwrap_or(rate * 0.9);
            let high = field_f64(values, "high").unwrap_or(rate * 1.1);
            PredictionOutput::Price(PriceOutput { rate_per_mile: rate, low, high })
        }
        PredictionInput::NetworkEfficiency(_) => {
            PredictionOutput::NetworkEfficiency(NetworkEfficiencyOutput {
                efficiency_score: require_f64(values, "efficiency_score", kind)?.clamp(0.0, 100.0),
                empty_miles_pct: field_f64(values, "empty_miles_pct")
                    .unwrap_or(0.0)
                    .clamp(0.0, 100.0),
            })
        }
    };
    Ok(output)
}

/// Confidence: model-provided score, then probability vector, then a
/// kind-specific heuristic.
fn confidence_score(kind: ModelKind, raw: &RawPrediction, output: &PredictionOutput) -> f64 {
    if let Some(score) = raw.score {
        return score.clamp(0.0, 1.0);
    }
    if let Some(probabilities) = &raw.probabilities {
        if let Some(max) = probabilities.iter().copied().fold(None::<f64>, |acc, p| {
            Some(acc.map_or(p, |m| m.max(p)))
        }) {
            return max.clamp(0.0, 1.0);
        }
    }
    match (kind, output) {
        // Tighter predicted price range means a more confident model.
        (ModelKind::Price, PredictionOutput::Price(price)) if price.rate_per_mile > 0.0 => {
            (1.0 - (price.high - price.low) / price.rate_per_mile).clamp(0.0, 1.0)
        }
        _ => FALLBACK_CONFIDENCE,
    }
}
