//! Demand predictor: regional, lane, and localized forecasts, hotspot
//! discovery, and trend analysis over the predictor façade.
//!
//! Results are cached per method and parameters, mirroring the façade cache
//! but keyed on the operation rather than the raw model input.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::TimeWindow;
use crate::error::{EngineError, EngineResult};
use crate::geo::GeoPoint;
use crate::hubs::{dbscan, DbscanParams};
use crate::predict::cache::TtlCache;
use crate::predict::{
    DemandInput, DemandLevel, PredictionInput, PredictionOutput, Predictor,
};

/// A named region with a representative center used for localized
/// drill-down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSpec {
    pub name: String,
    pub center: GeoPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandForecast {
    pub region: String,
    pub window: TimeWindow,
    pub expected_loads: f64,
    pub level: DemandLevel,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Stable,
    Decreasing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandTrend {
    pub region: String,
    pub samples: Vec<f64>,
    /// Relative change from the first to the last sample.
    pub rate_of_change: f64,
    /// Mean second difference across the samples.
    pub acceleration: f64,
    pub direction: TrendDirection,
}

/// A cluster of high-demand locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hotspot {
    pub center: GeoPoint,
    pub regions: Vec<String>,
    pub peak_expected_loads: f64,
}

#[derive(Debug, Clone)]
pub struct DemandPredictorConfig {
    pub cache_capacity: usize,
    pub cache_ttl: StdDuration,
    /// Radius used for localized drill-down around a region center, miles.
    pub drilldown_radius_mi: f64,
    /// DBSCAN ε when clustering high-demand locations, miles.
    pub hotspot_cluster_epsilon_mi: f64,
    /// Minimum level for a region to count as high demand.
    pub high_demand_level: DemandLevel,
    /// Relative-change threshold separating stable from moving trends.
    pub trend_threshold: f64,
}

impl Default for DemandPredictorConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 256,
            cache_ttl: StdDuration::from_millis(300_000),
            drilldown_radius_mi: 50.0,
            hotspot_cluster_epsilon_mi: 50.0,
            high_demand_level: DemandLevel::High,
            trend_threshold: 0.10,
        }
    }
}

pub struct DemandPredictor {
    predictor: Arc<Predictor>,
    cache: Mutex<TtlCache<String, DemandForecast>>,
    config: DemandPredictorConfig,
}

impl DemandPredictor {
    pub fn new(predictor: Arc<Predictor>, config: DemandPredictorConfig) -> Self {
        let capacity = NonZeroUsize::new(config.cache_capacity.max(1)).expect("non-zero capacity");
        Self {
            predictor,
            cache: Mutex::new(TtlCache::new(capacity, config.cache_ttl)),
            config,
        }
    }

    /// Expected demand for a named region over a window.
    pub fn regional(&self, region: &str, window: TimeWindow) -> EngineResult<DemandForecast> {
        self.forecast(region.to_string(), window, method_key("regional", region, window))
    }

    /// Expected demand around a location. The location and radius form a
    /// synthetic region key.
    pub fn for_location(
        &self,
        center: GeoPoint,
        radius_mi: f64,
        window: TimeWindow,
    ) -> EngineResult<DemandForecast> {
        let region = format!("loc:{:.4},{:.4}:r{:.0}", center.lat, center.lon, radius_mi);
        let key = method_key("location", &region, window);
        self.forecast(region, window, key)
    }

    /// Expected demand on a lane from an origin region to a destination
    /// region.
    pub fn for_lane(
        &self,
        origin_region: &str,
        destination_region: &str,
        window: TimeWindow,
    ) -> EngineResult<DemandForecast> {
        let region = format!("lane:{origin_region}->{destination_region}");
        let key = method_key("lane", &region, window);
        self.forecast(region, window, key)
    }

    /// Find clusters of high demand: regional sweep, localized drill-down
    /// for the high-demand regions, then clustering of the hot locations.
    pub fn hotspots(
        &self,
        regions: &[RegionSpec],
        window: TimeWindow,
    ) -> EngineResult<Vec<Hotspot>> {
        let mut hot: Vec<(RegionSpec, f64)> = Vec::new();
        for spec in regions {
            let regional = self.regional(&spec.name, window)?;
            if regional.level < self.config.high_demand_level {
                continue;
            }
            let local =
                self.for_location(spec.center, self.config.drilldown_radius_mi, window)?;
            if local.level >= self.config.high_demand_level {
                hot.push((spec.clone(), local.expected_loads));
            }
        }
        debug!(candidates = regions.len(), hot = hot.len(), "hotspot drill-down complete");
        if hot.is_empty() {
            return Ok(Vec::new());
        }

        let points: Vec<GeoPoint> = hot.iter().map(|(spec, _)| spec.center).collect();
        let labels = dbscan(
            &points,
            &DbscanParams {
                epsilon_mi: self.config.hotspot_cluster_epsilon_mi,
                min_points: 1,
            },
        );
        let cluster_count = labels.iter().flatten().max().map_or(0, |m| m + 1);
        let mut hotspots: Vec<Hotspot> = Vec::with_capacity(cluster_count);
        for cluster in 0..cluster_count {
            let members: Vec<&(RegionSpec, f64)> = hot
                .iter()
                .zip(labels.iter())
                .filter(|(_, label)| **label == Some(cluster))
                .map(|(member, _)| member)
                .collect();
            let n = members.len() as f64;
            hotspots.push(Hotspot {
                center: GeoPoint::new(
                    members.iter().map(|(s, _)| s.center.lat).sum::<f64>() / n,
                    members.iter().map(|(s, _)| s.center.lon).sum::<f64>() / n,
                ),
                regions: members.iter().map(|(s, _)| s.name.clone()).collect(),
                peak_expected_loads: members.iter().map(|(_, v)| *v).fold(0.0, f64::max),
            });
        }
        hotspots.sort_by(|a, b| {
            b.peak_expected_loads
                .partial_cmp(&a.peak_expected_loads)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(hotspots)
    }

    /// Sample demand uniformly across `[start, end)` and classify the trend.
    pub fn trend(
        &self,
        region: &str,
        window: TimeWindow,
        samples: usize,
    ) -> EngineResult<DemandTrend> {
        let samples = samples.max(3);
        let total_secs = (window.latest - window.earliest).num_seconds();
        let step = total_secs / samples as i64;
        if step <= 0 {
            return Err(EngineError::Validation(
                "trend window too narrow for the requested sample count".into(),
            ));
        }

        let mut values = Vec::with_capacity(samples);
        for i in 0..samples {
            let sample_start = window.earliest + Duration::seconds(step * i as i64);
            let sample_window =
                TimeWindow::new(sample_start, sample_start + Duration::seconds(step))?;
            values.push(self.regional(region, sample_window)?.expected_loads);
        }

        let first = values[0];
        let last = values[values.len() - 1];
        let rate_of_change = if first.abs() > f64::EPSILON {
            (last - first) / first
        } else if last > 0.0 {
            1.0
        } else {
            0.0
        };
        let second_diffs: Vec<f64> = values
            .windows(3)
            .map(|w| w[2] - 2.0 * w[1] + w[0])
            .collect();
        let acceleration = if second_diffs.is_empty() {
            0.0
        } else {
            second_diffs.iter().sum::<f64>() / second_diffs.len() as f64
        };

        let direction = if rate_of_change > self.config.trend_threshold {
            TrendDirection::Increasing
        } else if rate_of_change < -self.config.trend_threshold {
            TrendDirection::Decreasing
        } else {
            TrendDirection::Stable
        };

        Ok(DemandTrend {
            region: region.to_string(),
            samples: values,
            rate_of_change,
            acceleration,
            direction,
        })
    }

    pub fn clear_cache(&self) -> EngineResult<()> {
        self.cache
            .lock()
            .map_err(|_| EngineError::Server("demand cache lock poisoned".into()))?
            .clear();
        Ok(())
    }

    fn forecast(
        &self,
        region: String,
        window: TimeWindow,
        key: String,
    ) -> EngineResult<DemandForecast> {
        {
            let mut cache = self
                .cache
                .lock()
                .map_err(|_| EngineError::Server("demand cache lock poisoned".into()))?;
            if let Some(hit) = cache.get(&key) {
                return Ok(hit);
            }
        }

        let prediction = self.predictor.predict(&PredictionInput::Demand(DemandInput {
            region: region.clone(),
            window,
            equipment: None,
        }))?;
        let PredictionOutput::Demand(output) = prediction.output else {
            return Err(EngineError::Server(
                "demand model returned a non-demand output".into(),
            ));
        };
        let forecast = DemandForecast {
            region,
            window,
            expected_loads: output.expected_loads,
            level: output.level,
            confidence: prediction.confidence,
        };

        let mut cache = self
            .cache
            .lock()
            .map_err(|_| EngineError::Server("demand cache lock poisoned".into()))?;
        cache.put(key, forecast.clone());
        Ok(forecast)
    }
}

fn method_key(method: &str, region: &str, window: TimeWindow) -> String {
    format!(
        "{method}:{region}:{}:{}",
        window.earliest.to_rfc3339(),
        window.latest.to_rfc3339()
    )
}
